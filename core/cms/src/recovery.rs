//! Content-key recovery across heterogeneous recipients.
//!
//! Strategies run cheapest first: pre-shared keys from the caller, then
//! private keys, then interactive password prompts. The first recovered key
//! ends the search.

use der::asn1::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::keystore::{KeySource, Keypair};
use crate::recipient::{PreSharedKeyRecipient, PublicKeyRecipient, Recipient};
use sealdoc_common::{Error, Result};
use sealdoc_crypto::keys::{ContentKey, KeyEncryptionKey};

/// Everything the caller can offer towards recovering a content key.
pub struct RecoveryContext<'a> {
    /// Pre-shared keys by key identifier.
    pub symmetric_keys: &'a HashMap<Vec<u8>, KeyEncryptionKey>,
    /// Private keys tried before the key source.
    pub asymmetric_keys: &'a [Arc<dyn Keypair>],
    pub key_source: Option<&'a dyn KeySource>,
    pub allow_interaction: bool,
    pub password_hint: Option<&'a str>,
}

/// A recovered content key and the recipients it was recovered from.
#[derive(Debug)]
pub struct RecoveredKey {
    pub cek: ContentKey,
    /// Index into `recipients` of the recipient that yielded the key.
    pub used_recipient: usize,
    /// Every parsed recipient, in wire order.
    pub recipients: Vec<Recipient>,
    /// RecipientInfos of a kind this engine does not understand.
    pub discarded: usize,
}

/// Recover the content key from a set of RecipientInfos.
///
/// # Errors
/// - `Format` if a recognized RecipientInfo is malformed
/// - `UserCancelled` if a prompt was declined, or if a declined lookup is
///   the last thing that went wrong
/// - `KeyNotAvailable` with the last error seen as its cause otherwise
/// - Any non-password error raised while trying a password
pub fn recover_content_key(infos: &[Any], ctx: &RecoveryContext<'_>) -> Result<RecoveredKey> {
    let mut recipients = Vec::with_capacity(infos.len());
    let mut discarded = 0;
    for info in infos {
        match Recipient::from_any(info)? {
            Some(recipient) => recipients.push(recipient),
            None => discarded += 1,
        }
    }
    if discarded > 0 {
        warn!(discarded, "Discarded unrecognized recipients");
    }

    let mut last_error: Option<Error> = None;
    let recovered = try_pre_shared_keys(&mut recipients, ctx, &mut last_error)
        .or_else(|| try_public_keys(&mut recipients, ctx, &mut last_error));

    let recovered = match recovered {
        Some(found) => Some(found),
        None => try_passwords(&mut recipients, ctx)?,
    };

    match recovered {
        Some((cek, used_recipient)) => {
            debug!(
                recipient = used_recipient,
                total = recipients.len(),
                "Recovered content key"
            );
            Ok(RecoveredKey {
                cek,
                used_recipient,
                recipients,
                discarded,
            })
        }
        None => Err(match last_error {
            Some(err) if err.is_user_cancelled() => err,
            Some(err) => Error::key_not_available_because(err),
            None => Error::key_not_available(),
        }),
    }
}

fn try_pre_shared_keys(
    recipients: &mut [Recipient],
    ctx: &RecoveryContext<'_>,
    last_error: &mut Option<Error>,
) -> Option<(ContentKey, usize)> {
    recipients.iter_mut().enumerate().find_map(|(index, recipient)| {
        let Recipient::PreSharedKey(r) = recipient else {
            return None;
        };
        try_pre_shared_key(r, ctx, last_error).map(|cek| (cek, index))
    })
}

fn try_pre_shared_key(
    r: &mut PreSharedKeyRecipient,
    ctx: &RecoveryContext<'_>,
    last_error: &mut Option<Error>,
) -> Option<ContentKey> {
    let kek = ctx.symmetric_keys.get(r.key_identifier())?.clone();
    debug!("Trying pre-shared key recipient");
    match r.unwrap(&kek) {
        Ok(cek) => Some(cek),
        Err(err) => {
            debug!(error = %err, "Pre-shared key did not apply");
            *last_error = Some(err);
            None
        }
    }
}

fn try_public_keys(
    recipients: &mut [Recipient],
    ctx: &RecoveryContext<'_>,
    last_error: &mut Option<Error>,
) -> Option<(ContentKey, usize)> {
    recipients.iter_mut().enumerate().find_map(|(index, recipient)| {
        let Recipient::PublicKey(r) = recipient else {
            return None;
        };
        try_public_key(r, ctx, last_error).map(|cek| (cek, index))
    })
}

fn try_public_key(
    r: &mut PublicKeyRecipient,
    ctx: &RecoveryContext<'_>,
    last_error: &mut Option<Error>,
) -> Option<ContentKey> {
    let rid = r.identifier().clone();
    debug!(rid = %rid, "Trying public key recipient");

    let auxiliary: Vec<Arc<dyn Keypair>> = ctx
        .asymmetric_keys
        .iter()
        .filter(|kp| rid.matches_certificate(kp.certificate()))
        .cloned()
        .collect();
    match try_keypairs(r, &auxiliary, last_error) {
        KeypairOutcome::Recovered(cek) => return Some(cek),
        KeypairOutcome::Cancelled => return None,
        KeypairOutcome::Exhausted => {}
    }

    let source = ctx.key_source?;
    match source.find_keypairs(&rid, ctx.allow_interaction) {
        Ok(found) => match try_keypairs(r, &found, last_error) {
            KeypairOutcome::Recovered(cek) => Some(cek),
            _ => None,
        },
        Err(err) => {
            debug!(rid = %rid, error = %err, "Key lookup failed");
            *last_error = Some(err);
            None
        }
    }
}

enum KeypairOutcome {
    Recovered(ContentKey),
    /// A keypair declined; no further identities are tried for this recipient.
    Cancelled,
    Exhausted,
}

fn try_keypairs(
    r: &mut PublicKeyRecipient,
    candidates: &[Arc<dyn Keypair>],
    last_error: &mut Option<Error>,
) -> KeypairOutcome {
    for keypair in candidates {
        match r.unwrap(keypair.as_ref()) {
            Ok(cek) => return KeypairOutcome::Recovered(cek),
            Err(err) if err.is_user_cancelled() => {
                debug!(rid = %r.identifier(), "Keypair use was cancelled");
                *last_error = Some(err);
                return KeypairOutcome::Cancelled;
            }
            Err(err) => *last_error = Some(err),
        }
    }
    KeypairOutcome::Exhausted
}

fn try_passwords(
    recipients: &mut [Recipient],
    ctx: &RecoveryContext<'_>,
) -> Result<Option<(ContentKey, usize)>> {
    if !recipients.iter().any(Recipient::is_password) || !ctx.allow_interaction {
        return Ok(None);
    }
    let Some(source) = ctx.key_source else {
        return Ok(None);
    };

    let mut failures = 0;
    loop {
        let password = Zeroizing::new(source.prompt_for_password(failures, ctx.password_hint)?);

        for (index, recipient) in recipients.iter_mut().enumerate() {
            let Recipient::Password(r) = recipient else {
                continue;
            };
            match r.unwrap(&password) {
                Ok(cek) => return Ok(Some((cek, index))),
                Err(err) if err.is_key_not_applicable() => {}
                Err(err) => return Err(err),
            }
        }

        failures += 1;
        debug!(failures, "Password did not apply");
    }
}
