//! Submission signature reconstruction and validation.
//!
//! The signature is an md5 over a canonical newline-joined string of the form
//! identity, the unwrapped key, the instance id and the per-file plaintext
//! digests, itself RSA-encrypted on the collection side.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use subtle::ConstantTimeEq;

use crate::error::CryptoError;
use crate::model::FormDefinition;

/// Rebuilds the canonical signature input and compares its digest against the
/// RSA-decrypted signature field, in constant time.
pub fn verify_signature(
    form: &FormDefinition,
    instance_id: &str,
    key_b64: &str,
    file_digests: &[(String, [u8; 16])],
    signature_b64: &str,
    private_key: &RsaPrivateKey,
) -> Result<(), CryptoError> {
    let wrapped = BASE64
        .decode(signature_b64.trim())
        .map_err(|e| CryptoError::Key(format!("signature is not valid base64: {e}")))?;
    let expected = private_key
        .decrypt(Pkcs1v15Encrypt, &wrapped)
        .map_err(|e| CryptoError::Key(format!("failed to decrypt signature: {e}")))?;

    let actual: [u8; 16] = Md5::digest(signature_input(form, instance_id, key_b64, file_digests)).into();

    if bool::from(expected.as_slice().ct_eq(&actual)) {
        Ok(())
    } else {
        Err(CryptoError::SignatureMismatch { instance: instance_id.to_string() })
    }
}

/// The canonical signature input: form id, version (when present), base64 of
/// the unwrapped key, instance id, then `name::base64(md5)` per file with the
/// submission payload last, all newline-joined without a trailing newline.
pub fn signature_input(
    form: &FormDefinition,
    instance_id: &str,
    key_b64: &str,
    file_digests: &[(String, [u8; 16])],
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(4 + file_digests.len());
    parts.push(form.id.clone());
    if let Some(version) = &form.version {
        parts.push(version.clone());
    }
    parts.push(key_b64.to_string());
    parts.push(instance_id.to_string());
    for (name, digest) in file_digests {
        parts.push(format!("{name}::{}", BASE64.encode(digest)));
    }
    parts.join("\n")
}
