//! Signing identities

use bech32::{Bech32, Hrp};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use zeroize::Zeroizing;

use crate::errors::{HarnessError, Result};

/// Anything able to sign transactions for one account
pub trait Signer: Send + Sync + fmt::Debug {
    /// Bech32 account address
    fn address(&self) -> &str;

    /// Compressed SEC1 public key
    fn public_key(&self) -> Vec<u8>;

    /// 64-byte r||s signature over SHA-256(`sign_bytes`)
    fn sign(&self, sign_bytes: &[u8]) -> Result<Vec<u8>>;
}

/// Bech32 account address of a compressed secp256k1 public key:
/// `bech32(prefix, ripemd160(sha256(pubkey)))`
pub fn account_address(public_key: &[u8], prefix: &str) -> Result<String> {
    let hrp = Hrp::parse(prefix)
        .map_err(|e| HarnessError::Signing(format!("invalid address prefix '{}': {}", prefix, e)))?;
    let hash = Ripemd160::digest(Sha256::digest(public_key));
    bech32::encode::<Bech32>(hrp, &hash).map_err(|e| HarnessError::Signing(e.to_string()))
}

/// secp256k1 wallet backed by a raw private key
pub struct Secp256k1Wallet {
    key: SigningKey,
    address: String,
}

impl Secp256k1Wallet {
    /// Create from a 32-byte secret; the address is derived under `prefix`
    pub fn from_bytes(secret: &[u8], prefix: &str) -> Result<Self> {
        if secret.len() != 32 {
            return Err(HarnessError::Signing(format!(
                "invalid key length: expected 32 bytes, got {}",
                secret.len()
            )));
        }
        if secret.iter().all(|&b| b == 0) {
            return Err(HarnessError::Signing("all-zero key rejected".to_string()));
        }

        let key = SigningKey::from_slice(secret)
            .map_err(|e| HarnessError::Signing(format!("invalid secp256k1 key: {}", e)))?;
        Self::from_key(key, prefix)
    }

    /// Create from a hex-encoded 32-byte secret
    pub fn from_hex(secret_hex: &str, prefix: &str) -> Result<Self> {
        let secret = Zeroizing::new(
            hex::decode(secret_hex.trim().trim_start_matches("0x"))
                .map_err(|e| HarnessError::Signing(format!("invalid hex key: {}", e)))?,
        );
        Self::from_bytes(&secret, prefix)
    }

    /// Load a hex secret from a file
    pub fn from_file(path: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        let path = path.as_ref();
        let contents = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Signing(format!("failed to read key file {}: {}", path.display(), e))
        })?);
        Self::from_hex(&contents, prefix)
    }

    /// Load a hex secret from an environment variable
    pub fn from_env(var: &str, prefix: &str) -> Result<Self> {
        let value = Zeroizing::new(
            std::env::var(var)
                .map_err(|_| HarnessError::Signing(format!("environment variable {} not set", var)))?,
        );
        Self::from_hex(&value, prefix)
    }

    /// Fresh random key, for tests and throwaway accounts
    pub fn random(prefix: &str) -> Result<Self> {
        Self::from_key(SigningKey::random(&mut rand::rngs::OsRng), prefix)
    }

    fn from_key(key: SigningKey, prefix: &str) -> Result<Self> {
        let public_key = key.verifying_key().to_encoded_point(true);
        let address = account_address(public_key.as_bytes(), prefix)?;
        Ok(Self { key, address })
    }

    /// Fails when `expected` is not the address this key signs for
    pub fn ensure_address(&self, expected: &str) -> Result<()> {
        if !expected.eq_ignore_ascii_case(&self.address) {
            return Err(HarnessError::Signing(format!(
                "configured address {} does not match the key's address {}",
                expected, self.address
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Secp256k1Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secp256k1Wallet")
            .field("address", &self.address)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl Signer for Secp256k1Wallet {
    fn address(&self) -> &str {
        &self.address
    }

    fn public_key(&self) -> Vec<u8> {
        self.key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    fn sign(&self, sign_bytes: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha256::digest(sign_bytes);
        let signature: Signature = self
            .key
            .sign_prehash(&digest)
            .map_err(|e| HarnessError::Signing(e.to_string()))?;
        let signature = signature.normalize_s().unwrap_or(signature);
        Ok(signature.to_bytes().to_vec())
    }
}

/// Check a signature produced by `Signer::sign`
pub fn verify_signature(public_key: &[u8], sign_bytes: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    let digest = Sha256::digest(sign_bytes);
    key.verify_prehash(&digest, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn test_sign_and_verify() {
        let wallet = Secp256k1Wallet::from_hex(KEY, "terra").unwrap();
        let sig = wallet.sign(b"sign doc").unwrap();
        let pubkey = wallet.public_key();

        assert_eq!(sig.len(), 64);
        assert_eq!(pubkey.len(), 33);
        assert!(verify_signature(&pubkey, b"sign doc", &sig));
        assert!(!verify_signature(&pubkey, b"other doc", &sig));
    }

    #[test]
    fn test_address_is_derived_from_key() {
        let wallet = Secp256k1Wallet::from_hex(KEY, "terra").unwrap();
        let address = wallet.address().to_string();
        assert!(address.starts_with("terra1"));
        // 20-byte hash: hrp, separator, 32 data chars and a 6-char checksum
        assert_eq!(address.len(), "terra".len() + 1 + 32 + 6);
        assert_eq!(account_address(&wallet.public_key(), "terra").unwrap(), address);

        let again = Secp256k1Wallet::from_hex(KEY, "terra").unwrap();
        assert_eq!(again.address(), address);

        let other = Secp256k1Wallet::from_hex(&"01".repeat(32), "terra").unwrap();
        assert_ne!(other.address(), address);

        let cosmos = Secp256k1Wallet::from_hex(KEY, "cosmos").unwrap();
        assert!(cosmos.address().starts_with("cosmos1"));
        assert_eq!(cosmos.address()[7..39], address[6..38]);
    }

    #[test]
    fn test_random_keys_get_distinct_addresses() {
        let a = Secp256k1Wallet::random("terra").unwrap();
        let b = Secp256k1Wallet::random("terra").unwrap();
        assert_ne!(a.public_key(), b.public_key());
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn test_ensure_address() {
        let wallet = Secp256k1Wallet::from_hex(KEY, "terra").unwrap();
        assert!(wallet.ensure_address(wallet.address()).is_ok());
        assert!(wallet.ensure_address(&wallet.address().to_uppercase()).is_ok());

        let err = wallet.ensure_address("terra1victim").unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(Secp256k1Wallet::from_hex("zz", "terra").is_err());
        assert!(Secp256k1Wallet::from_hex("abcd", "terra").is_err());
        assert!(Secp256k1Wallet::from_hex(&"00".repeat(32), "terra").is_err());
        assert!(Secp256k1Wallet::from_hex(KEY, "").is_err());
    }

    #[test]
    fn test_from_file_trims_whitespace() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, format!("0x{}\n", KEY).as_bytes()).unwrap();

        let wallet = Secp256k1Wallet::from_file(file.path(), "terra").unwrap();
        let expected = Secp256k1Wallet::from_hex(KEY, "terra").unwrap();
        assert_eq!(wallet.address(), expected.address());
    }

    #[test]
    fn test_debug_hides_key() {
        let wallet = Secp256k1Wallet::from_hex(KEY, "terra").unwrap();
        let text = format!("{:?}", wallet);
        assert!(!text.contains(KEY));
        assert!(text.contains("redacted"));
    }
}
