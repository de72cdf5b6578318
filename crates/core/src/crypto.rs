//! Hashing and secp256r1 signing.

use crate::{CoreError, CoreResult, UInt160, UInt256};
use appchain_io::{BinaryWriter, IoError, IoResult, MemoryReader, Serializable};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use ripemd::Ripemd160;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Length of a raw `r || s` signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Length of a compressed SEC1 public key.
pub const PUBLIC_KEY_SIZE: usize = 33;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256, used for every object hash.
pub fn hash256(data: &[u8]) -> UInt256 {
    UInt256::from_array(sha256(&sha256(data)))
}

/// RIPEMD-160 over SHA-256, used for script hashes.
pub fn hash160(data: &[u8]) -> UInt160 {
    let digest: [u8; 20] = Ripemd160::digest(sha256(data)).into();
    UInt160::from_array(digest)
}

/// A compressed secp256r1 public key.
#[derive(Clone)]
pub struct PublicKey {
    encoded: [u8; PUBLIC_KEY_SIZE],
    key: VerifyingKey,
}

impl PublicKey {
    /// Parses a SEC1 encoded point (compressed or uncompressed).
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let key = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| CoreError::invalid_key(e.to_string()))?;
        Ok(Self::from_verifying_key(key))
    }

    fn from_verifying_key(key: VerifyingKey) -> Self {
        let point = key.to_encoded_point(true);
        let mut encoded = [0u8; PUBLIC_KEY_SIZE];
        encoded.copy_from_slice(point.as_bytes());
        Self { encoded, key }
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.encoded
    }

    /// Verifies a 64-byte signature over `message` (SHA-256 digest).
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        self.key.verify(message, &signature).is_ok()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.encoded == other.encoded
    }
}

impl Eq for PublicKey {}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encoded.hash(state);
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.encoded.cmp(&other.encoded)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.encoded))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl FromStr for PublicKey {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let bytes = hex::decode(s).map_err(|e| CoreError::invalid_key(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl Serializable for PublicKey {
    fn size(&self) -> usize {
        PUBLIC_KEY_SIZE
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_bytes(&self.encoded);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        let bytes = reader.read_fixed::<PUBLIC_KEY_SIZE>()?;
        Self::from_bytes(&bytes).map_err(|e| IoError::invalid_format(e.to_string()))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A secp256r1 private key with its public half.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Loads a key from its 32-byte big-endian scalar.
    pub fn from_private_key(bytes: &[u8]) -> CoreResult<Self> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|e| CoreError::invalid_key(e.to_string()))?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = PublicKey::from_verifying_key(VerifyingKey::from(&signing_key));
        Self {
            signing_key,
            public_key,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Script hash of the single-signature contract for this key.
    pub fn script_hash(&self) -> UInt160 {
        crate::script::signature_contract_hash(&self.public_key)
    }

    /// Signs `message` (hashed with SHA-256, RFC 6979 nonces).
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let signature: Signature = self.signing_key.sign(message);
        let mut out = [0u8; SIGNATURE_SIZE];
        out.copy_from_slice(&signature.to_bytes());
        out
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(seed: u8) -> KeyPair {
        KeyPair::from_private_key(&sha256(&[seed])).unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let key = test_key(1);
        let signature = key.sign(b"block header");
        assert!(key.public_key().verify(b"block header", &signature));
        assert!(!key.public_key().verify(b"other data", &signature));
        assert!(!test_key(2).public_key().verify(b"block header", &signature));
        assert!(!key.public_key().verify(b"block header", &signature[..63]));
    }

    #[test]
    fn test_public_key_roundtrip() {
        let key = test_key(3);
        let text = key.public_key().to_string();
        assert_eq!(text.len(), PUBLIC_KEY_SIZE * 2);
        let parsed: PublicKey = text.parse().unwrap();
        assert_eq!(&parsed, key.public_key());
    }

    #[test]
    fn test_hash_functions() {
        // sha256("") is well known.
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(hash256(b"a"), hash256(b"b"));
        assert_eq!(hash160(b"a"), hash160(b"a"));
    }
}
