//! Sealdoc CLI - encrypt and decrypt documents from the command line.
//!
//! Documents are files or directories. Directories are written as packages
//! of a main object plus side files under cryptic names.

mod keys;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use sealdoc_cms::{CmsOptions, Keypair, LocalKeypair};
use sealdoc_crypto::KdfParams;
use sealdoc_package::{disk, schema, EncryptionSettings, Node, PackageCodec};

use keys::TerminalKeySource;

#[derive(Parser)]
#[command(name = "sealdoc")]
#[command(about = "Sealdoc - Encrypted document containers")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file or directory.
    Encrypt {
        /// Plaintext file or directory.
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the encrypted document.
        #[arg(short, long)]
        output: PathBuf,

        /// Prompt for a password recipient.
        #[arg(short, long)]
        password: bool,

        /// Plaintext hint stored with the document.
        #[arg(long)]
        hint: Option<String>,

        /// Certificate of a public key recipient (repeatable).
        #[arg(short, long = "recipient")]
        recipients: Vec<PathBuf>,

        /// Certificate to carry inside the document (repeatable).
        #[arg(long = "embed-certificate")]
        embed_certificates: Vec<PathBuf>,

        /// Compress content when it pays off.
        #[arg(long)]
        compress: bool,

        /// Use the legacy unauthenticated cipher.
        #[arg(long)]
        without_aead: bool,

        /// Also write the hint as a plaintext file inside packages.
        #[arg(long)]
        legacy_hint: bool,

        /// JSON file with per-file settings.
        #[arg(long)]
        schema: Option<PathBuf>,

        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long, default_value = "moderate")]
        strength: String,
    },

    /// Decrypt a document.
    Decrypt {
        /// Encrypted file or package.
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the plaintext.
        #[arg(short, long)]
        output: PathBuf,

        /// Key file to try before prompting (repeatable).
        #[arg(long = "identity")]
        identities: Vec<PathBuf>,
    },

    /// Show who can open a document.
    Inspect {
        /// Encrypted file or package.
        #[arg(short, long)]
        input: PathBuf,

        /// Key file to try before prompting (repeatable).
        #[arg(long = "identity")]
        identities: Vec<PathBuf>,
    },

    /// Generate a keypair and self-issued certificate.
    Keygen {
        /// Writes NAME.cert and NAME.key.
        #[arg(short, long)]
        output: PathBuf,

        /// Certificate subject.
        #[arg(short, long)]
        subject: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Encrypt {
            input,
            output,
            password,
            hint,
            recipients,
            embed_certificates,
            compress,
            without_aead,
            legacy_hint,
            schema,
            strength,
        } => {
            let mut options = CmsOptions::empty();
            options.set(CmsOptions::COMPRESS, compress);
            options.set(CmsOptions::WITHOUT_AEAD, without_aead);

            let mut settings = EncryptionSettings::new();
            settings.options = options;
            settings.password_hint = hint;
            settings.legacy_hint = legacy_hint;
            settings.kdf_params = parse_strength(&strength)?;

            cmd_encrypt(
                &input,
                &output,
                settings,
                password,
                &recipients,
                &embed_certificates,
                schema.as_deref(),
            )
        }

        Commands::Decrypt {
            input,
            output,
            identities,
        } => cmd_decrypt(&input, &output, &identities),

        Commands::Inspect { input, identities } => cmd_inspect(&input, &identities),

        Commands::Keygen { output, subject } => cmd_keygen(&output, &subject),
    }
}

fn parse_strength(strength: &str) -> Result<KdfParams> {
    match strength {
        "interactive" => Ok(KdfParams::interactive()),
        "moderate" => Ok(KdfParams::moderate()),
        "sensitive" => Ok(KdfParams::sensitive()),
        _ => anyhow::bail!("Invalid strength. Use: interactive, moderate, or sensitive"),
    }
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

fn codec_for(identities: &[Arc<dyn Keypair>]) -> PackageCodec {
    let mut codec = PackageCodec::new()
        .with_key_source(Arc::new(TerminalKeySource))
        .allow_interaction(true);
    for keypair in identities {
        codec = codec.with_keypair(keypair.clone());
    }
    codec
}

fn load_encrypted(input: &Path) -> Result<Node> {
    let node = disk::load(input).with_context(|| format!("Failed to read {}", input.display()))?;
    if !sealdoc_package::might_be_encrypted(&node) {
        anyhow::bail!("{} is not an encrypted document", input.display());
    }
    Ok(node)
}

/// Encrypt a document.
fn cmd_encrypt(
    input: &Path,
    output: &Path,
    mut settings: EncryptionSettings,
    password: bool,
    recipients: &[PathBuf],
    embed_certificates: &[PathBuf],
    schema_path: Option<&Path>,
) -> Result<()> {
    info!("Encrypting {}", input.display());

    if password {
        let password = prompt_password("Enter password: ")?;
        let confirm = prompt_password("Confirm password: ")?;

        if *password != *confirm {
            anyhow::bail!("Passwords do not match");
        }

        if password.is_empty() {
            anyhow::bail!("Password cannot be empty");
        }

        settings.set_password(Some(password.as_str()));
    }

    for path in recipients {
        settings.add_certificate_recipient(keys::read_certificate(path)?);
    }
    for path in embed_certificates {
        settings.certificates.push(keys::read_certificate(path)?);
    }

    if settings.recipients().is_empty() {
        anyhow::bail!("No recipients. Use --password or --recipient");
    }

    let schema = match schema_path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Some(schema::from_json(&json).context("Invalid schema")?)
        }
        None => None,
    };

    let plain = disk::load(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let encrypted = PackageCodec::new()
        .wrap(&plain, schema.as_ref(), &mut settings)
        .context("Failed to encrypt")?;
    disk::save(&encrypted, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Encrypted successfully!");
    println!("  Files: {}", plain.count_files());
    println!("  Recipients: {}", settings.describe());
    println!("  Location: {}", output.display());

    Ok(())
}

/// Decrypt a document.
fn cmd_decrypt(input: &Path, output: &Path, identities: &[PathBuf]) -> Result<()> {
    info!("Decrypting {}", input.display());

    let encrypted = load_encrypted(input)?;
    let identities = keys::read_identities(identities)?;
    let (plain, settings) = codec_for(&identities)
        .unwrap(&encrypted)
        .context("Failed to decrypt")?;
    disk::save(&plain, output).with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Decrypted successfully!");
    println!("  Files: {}", plain.count_files());
    println!("  Encryption: {}", settings.describe());
    println!("  Location: {}", output.display());

    Ok(())
}

/// Show document information.
fn cmd_inspect(input: &Path, identities: &[PathBuf]) -> Result<()> {
    let encrypted = load_encrypted(input)?;
    let identities = keys::read_identities(identities)?;
    let (plain, mut settings) = codec_for(&identities)
        .unwrap(&encrypted)
        .context("Failed to decrypt")?;
    let unusable = settings
        .resolve_recipients(&identities, None, false)
        .context("Failed to resolve recipients")?;

    println!("Document Information:");
    println!("  Encryption: {}", settings.describe());
    println!("  Recipients:");
    for recipient in settings.recipients() {
        println!("    - {}", recipient);
    }
    println!("  Unusable recipients: {}", unusable);
    println!("  Embedded certificates: {}", settings.certificates.len());
    if let Some(hint) = &settings.password_hint {
        println!("  Password hint: {}", hint);
    }
    println!(
        "  Content: {} files, {} bytes",
        plain.count_files(),
        plain.total_size()
    );

    Ok(())
}

/// Generate a keypair.
fn cmd_keygen(output: &Path, subject: &str) -> Result<()> {
    info!("Generating keypair for {}", subject);

    let keypair = LocalKeypair::generate(subject);
    keys::write_keypair(&keypair, output)?;

    println!("Keypair generated successfully!");
    println!("  Certificate: {}", output.with_extension("cert").display());
    println!("  Private key: {}", output.with_extension("key").display());

    Ok(())
}
