//! Ed25519 keys and their strkey text form ("G..." accounts, "S..." seeds).

use crate::errors::KeyError;
use crate::xdr;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Public half of an ed25519 keypair, addressed on the ledger by its strkey
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Last four bytes of the key, used to match decorated signatures
    pub fn signature_hint(&self) -> [u8; 4] {
        let mut hint = [0u8; 4];
        hint.copy_from_slice(&self.0[28..]);
        hint
    }

    /// Verify a raw 64-byte ed25519 signature over `message`
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), KeyError> {
        let key = VerifyingKey::from_bytes(&self.0)
            .map_err(|_| KeyError::InvalidPublicKey(self.to_string()))?;
        let signature = Signature::from_slice(signature).map_err(|_| KeyError::InvalidSignature)?;
        key.verify(message, &signature)
            .map_err(|_| KeyError::InvalidSignature)
    }

    pub fn to_account_id(&self) -> xdr::AccountId {
        xdr::AccountId(xdr::PublicKey::PublicKeyTypeEd25519(xdr::Uint256(self.0)))
    }

    pub fn to_muxed_account(&self) -> xdr::MuxedAccount {
        xdr::MuxedAccount::Ed25519(xdr::Uint256(self.0))
    }

    pub fn from_account_id(account: &xdr::AccountId) -> Self {
        let xdr::PublicKey::PublicKeyTypeEd25519(xdr::Uint256(bytes)) = &account.0;
        Self(*bytes)
    }

    pub fn from_muxed_account(account: &xdr::MuxedAccount) -> Self {
        match account {
            xdr::MuxedAccount::Ed25519(xdr::Uint256(bytes)) => Self(*bytes),
            xdr::MuxedAccount::MuxedEd25519(muxed) => Self(muxed.ed25519.0),
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&stellar_strkey::ed25519::PublicKey(self.0).to_string())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        stellar_strkey::ed25519::PublicKey::from_string(s.trim())
            .map(|key| Self(key.0))
            .map_err(|_| KeyError::InvalidPublicKey(s.to_string()))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Signing keypair. The secret seed never shows up in `Debug` output.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Build a keypair from a raw 32-byte seed. Same seed, same keypair.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Parse a strkey secret seed ("S...")
    pub fn from_secret(secret: &str) -> Result<Self, KeyError> {
        let seed = stellar_strkey::ed25519::PrivateKey::from_string(secret.trim())
            .map_err(|_| KeyError::InvalidSecret)?;
        Ok(Self::from_seed(&seed.0))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Strkey form of the secret seed
    pub fn secret(&self) -> String {
        stellar_strkey::ed25519::PrivateKey(self.signing_key.to_bytes()).to_string()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    pub fn signature_hint(&self) -> [u8; 4] {
        self.public_key().signature_hint()
    }

    /// Sign `message` and tag the signature with this key's hint
    pub fn sign_decorated(&self, message: &[u8]) -> Result<xdr::DecoratedSignature, xdr::Error> {
        Ok(xdr::DecoratedSignature {
            hint: xdr::SignatureHint(self.signature_hint()),
            signature: xdr::Signature(self.sign(message).to_vec().try_into()?),
        })
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}
