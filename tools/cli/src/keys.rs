//! Key files and the terminal key source.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use sealdoc_cms::{Certificate, KeySource, Keypair, LocalKeypair};
use sealdoc_common::Error;

/// On-disk form of a keypair.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    subject: String,
    /// DER certificate, base64.
    certificate: String,
    /// X25519 secret key, base64.
    secret: String,
}

/// Write `NAME.cert` and `NAME.key` for a keypair.
pub fn write_keypair(keypair: &LocalKeypair, name: &Path) -> Result<()> {
    let certificate = keypair.certificate().to_der()?;
    let secret = Zeroizing::new(keypair.secret_bytes());
    let file = KeyFile {
        subject: keypair.certificate().subject.clone(),
        certificate: STANDARD.encode(&certificate),
        secret: STANDARD.encode(secret.as_slice()),
    };
    let json = Zeroizing::new(serde_json::to_string_pretty(&file)?);

    let cert_path = name.with_extension("cert");
    let key_path = name.with_extension("key");
    fs::write(&cert_path, certificate)
        .with_context(|| format!("Failed to write {}", cert_path.display()))?;
    fs::write(&key_path, json.as_bytes())
        .with_context(|| format!("Failed to write {}", key_path.display()))?;
    Ok(())
}

/// Read a keypair written by [`write_keypair`].
pub fn read_keypair(path: &Path) -> Result<LocalKeypair> {
    let json = Zeroizing::new(
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?,
    );
    let file: KeyFile = serde_json::from_str(&json).context("Invalid key file")?;

    let certificate = Certificate::from_der(
        &STANDARD
            .decode(&file.certificate)
            .context("Invalid certificate encoding")?,
    )?;
    let secret = Zeroizing::new(STANDARD.decode(&file.secret).context("Invalid secret encoding")?);
    let secret: [u8; 32] = secret
        .as_slice()
        .try_into()
        .context("Secret key must be 32 bytes")?;

    Ok(LocalKeypair::from_parts(certificate, secret)?)
}

/// Read a DER certificate.
pub fn read_certificate(path: &Path) -> Result<Certificate> {
    let der = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Certificate::from_der(&der).with_context(|| format!("Invalid certificate {}", path.display()))
}

/// Asks for passwords on the terminal.
///
/// An empty answer cancels.
pub struct TerminalKeySource;

impl KeySource for TerminalKeySource {
    fn prompt_for_password(
        &self,
        failure_count: usize,
        hint: Option<&str>,
    ) -> sealdoc_common::Result<String> {
        if failure_count > 0 {
            eprintln!("Incorrect password ({} failed attempts).", failure_count);
        }
        if let Some(hint) = hint {
            eprintln!("Hint: {}", hint);
        }
        let password = rpassword::prompt_password("Password (empty to cancel): ")?;
        if password.is_empty() {
            return Err(Error::UserCancelled);
        }
        Ok(password)
    }
}

/// Load every identity file.
pub fn read_identities(paths: &[impl AsRef<Path>]) -> Result<Vec<Arc<dyn Keypair>>> {
    paths
        .iter()
        .map(|path| {
            let keypair: Arc<dyn Keypair> = Arc::new(read_keypair(path.as_ref())?);
            Ok(keypair)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_keypair_file_round_trip() {
        let temp = TempDir::new().unwrap();
        let name = temp.path().join("alice");
        let keypair = LocalKeypair::generate("Alice");

        write_keypair(&keypair, &name).unwrap();

        let restored = read_keypair(&name.with_extension("key")).unwrap();
        assert_eq!(restored.certificate(), keypair.certificate());
        assert_eq!(restored.secret_bytes(), keypair.secret_bytes());

        let certificate = read_certificate(&name.with_extension("cert")).unwrap();
        assert_eq!(&certificate, keypair.certificate());
    }

    #[test]
    fn test_rejects_bad_key_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.key");
        fs::write(&path, "{\"subject\":\"x\",\"certificate\":\"AA==\",\"secret\":\"AA==\"}")
            .unwrap();
        assert!(read_keypair(&path).is_err());
    }
}
