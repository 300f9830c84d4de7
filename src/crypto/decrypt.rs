//! Streaming decryption of encrypted submission files.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use md5::{Digest, Md5};

use crate::config::{AES_BLOCK_LEN, DECRYPT_CHUNK_SIZE};
use crate::crypto::keys::Aes256CfbDec;
use crate::error::CryptoError;

/// Decrypts `source` into `dest`, returning the md5 digest of the plaintext.
///
/// Reads 2 KiB at a time so the working set stays bounded regardless of file
/// size. The ciphertext must be a whole number of AES blocks and end with
/// valid PKCS#7 padding; the final block is held back until end of stream so
/// the padding can be stripped.
pub fn decrypt_file(mut cipher: Aes256CfbDec, source: &Path, dest: &Path) -> Result<[u8; 16], CryptoError> {
    let fail = |reason: String| CryptoError::DecryptionFailed { path: source.to_path_buf(), reason };

    let mut reader = File::open(source).map_err(|e| fail(e.to_string()))?;
    let mut writer = BufWriter::new(File::create(dest).map_err(|e| fail(e.to_string()))?);

    let mut digest = Md5::new();
    let mut buf = [0u8; DECRYPT_CHUNK_SIZE];
    let mut held: Vec<u8> = Vec::with_capacity(DECRYPT_CHUNK_SIZE + AES_BLOCK_LEN);
    let mut total = 0usize;

    loop {
        let read = reader.read(&mut buf).map_err(|e| fail(e.to_string()))?;
        if read == 0 {
            break;
        }
        total += read;

        let chunk = &mut buf[..read];
        cipher.decrypt(chunk);
        held.extend_from_slice(chunk);

        // Flush everything except one trailing block, which may carry padding.
        if held.len() > AES_BLOCK_LEN {
            let flush = held.len() - AES_BLOCK_LEN;
            digest.update(&held[..flush]);
            writer.write_all(&held[..flush]).map_err(|e| fail(e.to_string()))?;
            held.drain(..flush);
        }
    }

    if total == 0 || total % AES_BLOCK_LEN != 0 {
        return Err(fail(format!("ciphertext length {total} is not a whole number of cipher blocks")));
    }

    let plain = strip_padding(&held).ok_or_else(|| fail("invalid trailing padding".to_string()))?;
    digest.update(plain);
    writer.write_all(plain).map_err(|e| fail(e.to_string()))?;
    writer.flush().map_err(|e| fail(e.to_string()))?;

    Ok(digest.finalize().into())
}

/// Validates and strips PKCS#7 padding from the final block.
fn strip_padding(block: &[u8]) -> Option<&[u8]> {
    let &last = block.last()?;
    let pad = last as usize;
    if pad == 0 || pad > AES_BLOCK_LEN || pad > block.len() {
        return None;
    }
    let (plain, padding) = block.split_at(block.len() - pad);
    padding.iter().all(|&b| b == last).then_some(plain)
}
