use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";
pub const PUBLIC_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";

pub const TESTNET_HORIZON: &str = "https://horizon-testnet.stellar.org";
pub const PUBLIC_HORIZON: &str = "https://horizon.stellar.org";

/// Which ledger network transactions are signed for, and where to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub passphrase: String,
    pub horizon_url: String,
}

impl Network {
    pub fn testnet() -> Self {
        Self {
            passphrase: TESTNET_PASSPHRASE.to_string(),
            horizon_url: TESTNET_HORIZON.to_string(),
        }
    }

    pub fn public() -> Self {
        Self {
            passphrase: PUBLIC_PASSPHRASE.to_string(),
            horizon_url: PUBLIC_HORIZON.to_string(),
        }
    }

    /// Look up a preset by name ("testnet" / "public")
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "testnet" | "test" => Some(Self::testnet()),
            "public" | "mainnet" | "pubnet" => Some(Self::public()),
            _ => None,
        }
    }

    pub fn with_horizon_url(mut self, url: impl Into<String>) -> Self {
        self.horizon_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Hash of the passphrase; mixed into every transaction signature
    pub fn network_id(&self) -> [u8; 32] {
        Sha256::digest(self.passphrase.as_bytes()).into()
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::testnet()
    }
}
