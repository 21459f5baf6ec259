//! Envelope encryption for account files
//!
//! Account configurations are stored on disk as a single line of four
//! colon-separated fields:
//!
//! ```text
//! <cipher_len_decimal>:<salt_hex>:<nonce_hex>:<cipher_hex>
//! ```
//!
//! where the ciphertext is XChaCha20-Poly1305 over the UTF-8 JSON of the
//! record, under a key derived from the user's password with Argon2id and
//! the per-file random salt. `cipher_len` is the byte length of the
//! decoded ciphertext (plaintext plus MAC), kept as a plain decimal so the
//! file stays user-inspectable.

use argon2::Argon2;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use thiserror::Error;

/// Length in bytes of the random salt fed to the KDF.
pub const SALT_LEN: usize = 16;
/// Length in bytes of the AEAD nonce.
pub const NONCE_LEN: usize = 24;
/// Length in bytes of the authentication tag appended to the ciphertext.
pub const MAC_LEN: usize = 16;

const KEY_LEN: usize = 32;

/// Possible errors when sealing or opening an encrypted file.
#[derive(Error, Debug)]
pub enum CryptError {
    /// The MAC did not verify. Deliberately does not distinguish a wrong
    /// password from a tampered file.
    #[error("wrong password or corrupted file")]
    AuthFail,
    /// The file does not match the `len:salt:nonce:cipher` framing.
    #[error("malformed encrypted file: {0}")]
    Framing(&'static str),
    /// Key derivation failed.
    #[error("failed to derive encryption key: {0}")]
    Kdf(argon2::Error),
}

/// The four fields of an encrypted file, hex fields still encoded.
#[derive(Clone, Debug)]
pub struct Sealed {
    /// Byte length of the decoded ciphertext, MAC included.
    pub cipher_len: usize,
    /// Hex-encoded KDF salt.
    pub salt_hex: String,
    /// Hex-encoded AEAD nonce.
    pub nonce_hex: String,
    /// Hex-encoded ciphertext plus MAC.
    pub cipher_hex: String,
}

fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], CryptError> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(CryptError::Kdf)?;
    Ok(key)
}

/// Encrypt `plain` under `password` with a fresh random salt and nonce.
pub fn seal(plain: &[u8], password: &str) -> Result<Sealed, CryptError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce);

    let key = derive_key(password, &salt)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plain)
        .map_err(|_| CryptError::AuthFail)?;
    debug_assert_eq!(ciphertext.len(), plain.len() + MAC_LEN);

    Ok(Sealed {
        cipher_len: ciphertext.len(),
        salt_hex: hex::encode(salt),
        nonce_hex: hex::encode(nonce),
        cipher_hex: hex::encode(ciphertext),
    })
}

/// Decrypt a [`Sealed`] envelope. Fails with [`CryptError::AuthFail`] when
/// the password is wrong or the ciphertext was modified.
pub fn open(sealed: &Sealed, password: &str) -> Result<Vec<u8>, CryptError> {
    let salt = hex::decode(&sealed.salt_hex).map_err(|_| CryptError::Framing("invalid salt hex"))?;
    let nonce = hex::decode(&sealed.nonce_hex).map_err(|_| CryptError::Framing("invalid nonce hex"))?;
    let ciphertext =
        hex::decode(&sealed.cipher_hex).map_err(|_| CryptError::Framing("invalid cipher hex"))?;
    if salt.len() != SALT_LEN {
        return Err(CryptError::Framing("bad salt length"));
    }
    if nonce.len() != NONCE_LEN {
        return Err(CryptError::Framing("bad nonce length"));
    }
    if ciphertext.len() != sealed.cipher_len || ciphertext.len() < MAC_LEN {
        return Err(CryptError::Framing("cipher length mismatch"));
    }

    let key = derive_key(password, &salt)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(XNonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| CryptError::AuthFail)
}

/// Seal `plain` and render the single-line file format.
pub fn seal_file(plain: &[u8], password: &str) -> Result<String, CryptError> {
    let sealed = seal(plain, password)?;
    Ok(format!(
        "{}:{}:{}:{}",
        sealed.cipher_len, sealed.salt_hex, sealed.nonce_hex, sealed.cipher_hex
    ))
}

/// Parse the single-line file format and decrypt it.
pub fn open_file(content: &str, password: &str) -> Result<Vec<u8>, CryptError> {
    let mut fields = content.trim_end().splitn(4, ':');
    let cipher_len = fields
        .next()
        .ok_or(CryptError::Framing("missing cipher length"))?
        .parse::<usize>()
        .map_err(|_| CryptError::Framing("invalid cipher length"))?;
    let salt_hex = fields.next().ok_or(CryptError::Framing("missing salt"))?;
    let nonce_hex = fields.next().ok_or(CryptError::Framing("missing nonce"))?;
    let cipher_hex = fields.next().ok_or(CryptError::Framing("missing ciphertext"))?;
    open(
        &Sealed {
            cipher_len,
            salt_hex: salt_hex.to_owned(),
            nonce_hex: nonce_hex.to_owned(),
            cipher_hex: cipher_hex.to_owned(),
        },
        password,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let plain = br#"{"name":"prov","refresh_token":"rt"}"#;
        let file = seal_file(plain, "hunter2").unwrap();
        assert_eq!(file.split(':').count(), 4);
        let opened = open_file(&file, "hunter2").unwrap();
        assert_eq!(opened, plain);
    }

    #[test]
    fn wrong_password_fails_auth() {
        let file = seal_file(b"secret", "right").unwrap();
        assert!(matches!(open_file(&file, "wrong"), Err(CryptError::AuthFail)));
    }

    #[test]
    fn tampered_cipher_fails_auth() {
        let file = seal_file(b"secret", "pw").unwrap();
        let mut fields: Vec<String> = file.split(':').map(str::to_owned).collect();
        let flipped = if fields[3].ends_with('0') { "1" } else { "0" };
        let last = fields[3].len() - 1;
        fields[3].replace_range(last.., flipped);
        let tampered = fields.join(":");
        assert!(matches!(open_file(&tampered, "pw"), Err(CryptError::AuthFail)));
    }

    #[test]
    fn framing_rejects() {
        assert!(matches!(
            open_file("not an encrypted file", "pw"),
            Err(CryptError::Framing(_))
        ));
        assert!(matches!(
            open_file("12:zz:zz:zz", "pw"),
            Err(CryptError::Framing(_))
        ));
        // declared length disagreeing with the decoded ciphertext
        let file = seal_file(b"secret", "pw").unwrap();
        let mut fields: Vec<String> = file.split(':').map(str::to_owned).collect();
        fields[0] = "3".into();
        assert!(matches!(
            open_file(&fields.join(":"), "pw"),
            Err(CryptError::Framing("cipher length mismatch"))
        ));
    }
}
