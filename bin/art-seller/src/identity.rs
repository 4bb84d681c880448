//! Deterministic asset identities.
//!
//! An asset keypair is seeded from a hash over the seller's signature on the
//! artifact record, so the same record signed by the same seller always maps
//! to the same ledger account. Re-running issuance after a crash lands on the
//! account it already started instead of orphaning a second one.

use crate::errors::IssuanceError;
use base64::{engine::general_purpose, Engine as _};
use ledger::{Keypair, KeyError, PublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Long-lived seller keypair loaded from configuration
#[derive(Clone)]
pub struct SellerIdentity {
    keypair: Keypair,
}

impl SellerIdentity {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn from_secret(secret: &str) -> Result<Self, KeyError> {
        Keypair::from_secret(secret).map(Self::new)
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub(crate) fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl fmt::Debug for SellerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SellerIdentity")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Metadata of a generated artifact. All three fields feed the identity.
///
/// Field order is the canonical serialization order; do not reorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Content hash or blob reference of the artifact
    pub id: String,
    /// Buyer identifier
    pub name: String,
    pub image_url: String,
}

impl ArtifactRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image_url: image_url.into(),
        }
    }

    pub fn validate(&self) -> Result<(), IssuanceError> {
        for (field, value) in [("id", &self.id), ("name", &self.name), ("image_url", &self.image_url)] {
            if value.trim().is_empty() {
                return Err(IssuanceError::Precondition(format!(
                    "artifact record is missing `{field}`"
                )));
            }
        }
        Ok(())
    }

    /// `{"id":..,"name":..,"image_url":..}` with no whitespace
    pub fn canonical_json(&self) -> Result<String, IssuanceError> {
        serde_json::to_string(self).map_err(|e| {
            IssuanceError::Precondition(format!("artifact record is not serializable: {e}"))
        })
    }
}

#[derive(Serialize)]
struct SignedArtifact<'a> {
    sig: String,
    meta: &'a ArtifactRecord,
}

/// Keypair of an issued asset. Only the public key is meant to outlive
/// provisioning; call `into_public_key` once signatories are installed.
pub struct AssetIdentity {
    keypair: Keypair,
}

impl AssetIdentity {
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub(crate) fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Drop the seed, keeping the address
    pub fn into_public_key(self) -> PublicKey {
        self.keypair.public_key()
    }
}

impl fmt::Debug for AssetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetIdentity")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Derive the asset identity for `record` as authorized by `seller`
pub fn derive(seller: &SellerIdentity, record: &ArtifactRecord) -> Result<AssetIdentity, IssuanceError> {
    record.validate()?;

    let meta_hash = Sha256::digest(record.canonical_json()?.as_bytes());
    let signature = seller.keypair().sign(&meta_hash);

    let signed = SignedArtifact {
        sig: general_purpose::STANDARD.encode(signature),
        meta: record,
    };
    let signed = serde_json::to_string(&signed).map_err(|e| {
        IssuanceError::Precondition(format!("signed artifact is not serializable: {e}"))
    })?;

    let seed: [u8; 32] = Sha256::digest(signed.as_bytes()).into();
    let identity = AssetIdentity {
        keypair: Keypair::from_seed(&seed),
    };

    tracing::debug!(asset = %identity.public_key(), artifact = %record.id, "Derived asset identity");

    Ok(identity)
}
