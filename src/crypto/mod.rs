//! Hybrid RSA/AES decryption of encrypted submissions.
//!
//! Each encrypted submission ships an RSA-wrapped AES key, a fixed sequence
//! of encrypted files (media first, payload last) and an RSA-encrypted
//! signature over the plaintext digests. Decryption happens into a fresh
//! temporary working directory owned by the returned value, so cleanup is
//! tied to its lifetime on every exit path.

pub mod decrypt;
pub mod keys;
pub mod signature;

use std::path::Path;

use rsa::RsaPrivateKey;
use tempfile::TempDir;
use tracing::warn;

use crate::config::{ENC_EXTENSION, ENCRYPTED_SUBMISSION_FILE};
use crate::error::{CryptoError, SubmissionError};
use crate::model::FormDefinition;
use crate::submission::SubmissionMeta;
use crate::types::ValidationStatus;
use crate::xml::{self, Element};

/// Result of decrypting one submission.
pub struct DecryptedSubmission {
    /// Root of the decrypted answer document; replaces the envelope root.
    pub root: Element,

    /// Working directory holding the decrypted payload and media.
    pub workdir: TempDir,

    pub status: ValidationStatus,
}

/// Strips the trailing `.enc` from an encrypted file name.
pub fn plaintext_name(name: &str) -> &str {
    name.strip_suffix(ENC_EXTENSION).unwrap_or(name)
}

/// Decrypts every declared file of a submission and validates its signature.
///
/// Media files are decrypted in declared order, the payload last, matching
/// the cipher schedule of the collection side. A missing media file or any
/// decryption failure skips the submission; a signature mismatch only marks
/// it `NotValid`.
pub fn decrypt_submission(
    form: &FormDefinition,
    meta: &SubmissionMeta,
    instance_dir: &Path,
    instance_id: &str,
    private_key: &RsaPrivateKey,
) -> Result<DecryptedSubmission, SubmissionError> {
    let wrapped = meta
        .base64_key
        .as_deref()
        .ok_or_else(|| CryptoError::Key("submission has no base64EncryptedKey".to_string()))?;
    let mut factory = keys::CipherFactory::new(instance_id, wrapped, private_key)?;

    let workdir = TempDir::new().map_err(|source| SubmissionError::Io { path: instance_dir.to_path_buf(), source })?;
    let mut digests: Vec<(String, [u8; 16])> = Vec::with_capacity(meta.media_names.len() + 1);

    for name in &meta.media_names {
        let source = instance_dir.join(name);
        if !source.is_file() {
            return Err(CryptoError::MissingMedia { path: source }.into());
        }
        let plain = plaintext_name(name);
        let digest = decrypt::decrypt_file(factory.next_cipher(), &source, &workdir.path().join(plain))?;
        digests.push((plain.to_string(), digest));
    }

    let payload = meta.encrypted_payload.as_deref().unwrap_or(ENCRYPTED_SUBMISSION_FILE);
    let source = instance_dir.join(payload);
    if !source.is_file() {
        return Err(CryptoError::DecryptionFailed {
            path: source,
            reason: "encrypted payload is missing".to_string(),
        }
        .into());
    }
    let plain_payload = workdir.path().join(plaintext_name(payload));
    let digest = decrypt::decrypt_file(factory.next_cipher(), &source, &plain_payload)?;
    digests.push((plaintext_name(payload).to_string(), digest));

    let root = xml::parse_document(&plain_payload)?;

    let status = match &meta.base64_signature {
        Some(signature_b64) => {
            match signature::verify_signature(form, instance_id, &factory.key_base64(), &digests, signature_b64, private_key) {
                Ok(()) => ValidationStatus::Valid,
                Err(err) => {
                    warn!(instance = instance_id, "{err}");
                    ValidationStatus::NotValid
                }
            }
        }
        None => {
            warn!(instance = instance_id, "submission carries no signature");
            ValidationStatus::NotValid
        }
    };

    Ok(DecryptedSubmission { root, workdir, status })
}
