//! Symmetric-key unwrap and the per-file cipher schedule.

use aes::Aes256;
use aes::cipher::KeyIvInit;
use aes::cipher::generic_array::GenericArray;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};

use crate::config::{IV_LEN, SYMMETRIC_KEY_LEN};
use crate::error::CryptoError;

/// Stateful AES-256/CFB decryptor fed in arbitrary-sized chunks.
pub type Aes256CfbDec = cfb_mode::BufDecryptor<Aes256>;

/// Issues the per-file AES-256/CFB ciphers for one submission, in a fixed
/// order: one per declared media file first, then the submission payload.
///
/// The wrapped key is RSA-unwrapped once; the IV seed is
/// `md5(instance_id || key)` and each issued cipher advances the schedule by
/// incrementing one seed byte, rotating through the positions.
pub struct CipherFactory {
    key: [u8; SYMMETRIC_KEY_LEN],
    seed: [u8; IV_LEN],
    issued: usize,
}

impl CipherFactory {
    pub fn new(instance_id: &str, wrapped_key_b64: &str, private_key: &RsaPrivateKey) -> Result<Self, CryptoError> {
        let wrapped = BASE64
            .decode(wrapped_key_b64.trim())
            .map_err(|e| CryptoError::Key(format!("wrapped key is not valid base64: {e}")))?;
        let key_bytes = private_key
            .decrypt(Pkcs1v15Encrypt, &wrapped)
            .map_err(|e| CryptoError::Key(format!("failed to unwrap symmetric key: {e}")))?;
        let key: [u8; SYMMETRIC_KEY_LEN] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::Key(format!("unexpected symmetric key length {}", key_bytes.len())))?;

        let mut hasher = Md5::new();
        hasher.update(instance_id.as_bytes());
        hasher.update(key);
        let seed: [u8; IV_LEN] = hasher.finalize().into();

        Ok(Self { key, seed, issued: 0 })
    }

    /// Returns the next cipher in the schedule. Never reuse one across files.
    pub fn next_cipher(&mut self) -> Aes256CfbDec {
        self.seed[self.issued % IV_LEN] = self.seed[self.issued % IV_LEN].wrapping_add(1);
        self.issued += 1;
        Aes256CfbDec::new(GenericArray::from_slice(&self.key), GenericArray::from_slice(&self.seed))
    }

    /// Base64 of the unwrapped symmetric key, as used in the signature input.
    pub fn key_base64(&self) -> String {
        BASE64.encode(self.key)
    }

    /// Current IV the next cipher would use, after advancing the schedule.
    #[cfg(test)]
    pub(crate) fn peek_seed(&self) -> [u8; IV_LEN] {
        self.seed
    }
}
