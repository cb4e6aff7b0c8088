use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{bail, Context, Result};
use rand::RngCore;

/// At-rest encryption for OAuth tokens only — the one secret category named
/// in `spec.md` §6; everything else (screenshots, OCR text, clipboard) is
/// stored plaintext per the Non-goals.
pub struct SecretBox {
    cipher: Aes256Gcm,
}

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

impl SecretBox {
    /// Load the machine-local key from `key_path`, generating and persisting
    /// one (mode 0600 on unix) if absent.
    pub fn open_or_create(key_path: &Path) -> Result<Self> {
        let key_bytes = if key_path.exists() {
            let raw = std::fs::read(key_path)
                .with_context(|| format!("reading secret key at {:?}", key_path))?;
            if raw.len() != KEY_LEN {
                bail!("secret key at {:?} has unexpected length {}", key_path, raw.len());
            }
            raw
        } else {
            if let Some(parent) = key_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut key = vec![0u8; KEY_LEN];
            OsRng.fill_bytes(&mut key);
            std::fs::write(key_path, &key)
                .with_context(|| format!("writing secret key at {:?}", key_path))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))?;
            }
            key
        };
        let cipher = Aes256Gcm::new_from_slice(&key_bytes).context("constructing cipher from key")?;
        Ok(Self { cipher })
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext` base64-encoded so
    /// the result can sit directly in a config value or database column.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;
        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, combined))
    }

    pub fn open(&self, sealed: &str) -> Result<String> {
        let combined = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, sealed)
            .context("base64-decoding sealed secret")?;
        if combined.len() < NONCE_LEN {
            bail!("sealed secret too short");
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("decryption failed: {e}"))?;
        Ok(String::from_utf8(plaintext)?)
    }
}

pub fn default_key_path(data_dir: &Path) -> PathBuf {
    data_dir.join("secret.key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_secret() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = default_key_path(dir.path());
        let secrets = SecretBox::open_or_create(&key_path).unwrap();
        let sealed = secrets.seal("oauth-refresh-token-xyz").unwrap();
        assert_ne!(sealed, "oauth-refresh-token-xyz");
        assert_eq!(secrets.open(&sealed).unwrap(), "oauth-refresh-token-xyz");
    }

    #[test]
    fn reopening_reuses_the_persisted_key() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = default_key_path(dir.path());
        let sealed = SecretBox::open_or_create(&key_path).unwrap().seal("token").unwrap();
        let reopened = SecretBox::open_or_create(&key_path).unwrap();
        assert_eq!(reopened.open(&sealed).unwrap(), "token");
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = default_key_path(dir.path());
        let secrets = SecretBox::open_or_create(&key_path).unwrap();
        let mut sealed = secrets.seal("token").unwrap();
        sealed.push('A');
        assert!(secrets.open(&sealed).is_err());
    }
}
