//! Process configuration, loaded once from the environment.
//!
//! Every required variable must be present and well-formed or loading fails;
//! there is no degraded mode.

use crate::identity::SellerIdentity;
use ledger::{Lumens, Network, PublicKey, TxEnvelope, BASE_FEE};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_STARTING_BALANCE: &str = "5";
pub const DEFAULT_TX_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_TSS_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HORIZON_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Fixed parameters of the remote smart-contract execution service
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteExecutionDescriptor {
    pub endpoint_base: String,
    pub function_hash: String,
    /// Key the service signs with; installed as co-signatory on every asset
    pub remote_signer: PublicKey,
    /// Account the service collects its fees into
    pub service_account: PublicKey,
    pub sale_price: String,
    /// Pre-signed fee payment envelope (base64 XDR) the service redeems per call
    pub fee_authorization: String,
}

impl RemoteExecutionDescriptor {
    pub fn function_url(&self) -> String {
        format!(
            "{}/tx-functions/{}",
            self.endpoint_base.trim_end_matches('/'),
            self.function_hash
        )
    }
}

impl fmt::Debug for RemoteExecutionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteExecutionDescriptor")
            .field("endpoint_base", &self.endpoint_base)
            .field("function_hash", &self.function_hash)
            .field("remote_signer", &self.remote_signer)
            .field("service_account", &self.service_account)
            .field("sale_price", &self.sale_price)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    pub network: Network,
    pub starting_balance: Lumens,
    pub base_fee: u32,
    pub tx_timeout_secs: u64,
    pub horizon_timeout_secs: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            network: Network::testnet(),
            starting_balance: Lumens::from_whole(5),
            base_fee: BASE_FEE,
            tx_timeout_secs: DEFAULT_TX_TIMEOUT_SECS,
            horizon_timeout_secs: DEFAULT_HORIZON_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SellerConfig {
    pub seller: SellerIdentity,
    pub remote: RemoteExecutionDescriptor,
    pub ledger: LedgerSettings,
    pub tss_timeout_secs: u64,
}

impl SellerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source; `lookup` returns `None` for unset keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| -> Option<String> {
            lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };
        let required = |var: &'static str| get(var).ok_or(ConfigError::Missing(var));
        let invalid = |var: &'static str, reason: String| ConfigError::Invalid { var, reason };

        let seller = SellerIdentity::from_secret(&required("SELLER_SECRET_KEY")?)
            .map_err(|e| invalid("SELLER_SECRET_KEY", e.to_string()))?;
        if let Some(public) = get("SELLER_PUBLIC_KEY") {
            let expected: PublicKey = public
                .parse()
                .map_err(|e: ledger::KeyError| invalid("SELLER_PUBLIC_KEY", e.to_string()))?;
            if expected != seller.public_key() {
                return Err(invalid(
                    "SELLER_PUBLIC_KEY",
                    "does not match SELLER_SECRET_KEY".to_string(),
                ));
            }
        }

        let parse_key = |var: &'static str| -> Result<PublicKey, ConfigError> {
            required(var)?
                .parse()
                .map_err(|e: ledger::KeyError| invalid(var, e.to_string()))
        };

        let endpoint_base = required("TSS_URL")?;
        if !(endpoint_base.starts_with("http://") || endpoint_base.starts_with("https://")) {
            return Err(invalid("TSS_URL", "must be an http(s) URL".to_string()));
        }

        let function_hash = required("TSS_HASH")?;
        if function_hash.len() != 64 || !function_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("TSS_HASH", "must be 64 hex characters".to_string()));
        }

        let sale_price = required("TSS_SALE_PRICE")?;
        sale_price
            .parse::<Lumens>()
            .map_err(|e| invalid("TSS_SALE_PRICE", e.to_string()))?;

        let fee_authorization = required("TSS_TX_FN_FEE")?;
        TxEnvelope::from_xdr_base64(&fee_authorization)
            .map_err(|e| invalid("TSS_TX_FN_FEE", e.to_string()))?;

        let remote = RemoteExecutionDescriptor {
            endpoint_base: endpoint_base.trim_end_matches('/').to_string(),
            function_hash: function_hash.to_ascii_lowercase(),
            remote_signer: parse_key("TSS_SIGNER")?,
            service_account: parse_key("TSS_PUBLIC_KEY")?,
            sale_price,
            fee_authorization,
        };

        let mut network = match get("STELLAR_NETWORK") {
            Some(name) => Network::from_name(&name)
                .ok_or_else(|| invalid("STELLAR_NETWORK", format!("unknown network {name:?}")))?,
            None => Network::testnet(),
        };
        if let Some(url) = get("HORIZON_URL") {
            network = network.with_horizon_url(url);
        }

        let number = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match get(var) {
                Some(text) => text.parse().map_err(|_| invalid(var, format!("not a number: {text:?}"))),
                None => Ok(default),
            }
        };

        let starting_balance = get("NFT_STARTING_BALANCE")
            .unwrap_or_else(|| DEFAULT_STARTING_BALANCE.to_string())
            .parse::<Lumens>()
            .map_err(|e| invalid("NFT_STARTING_BALANCE", e.to_string()))?;

        let base_fee = u32::try_from(number("TX_BASE_FEE", u64::from(BASE_FEE))?)
            .map_err(|_| invalid("TX_BASE_FEE", "out of range".to_string()))?;

        let tx_timeout_secs = number("TX_TIMEOUT_SECS", DEFAULT_TX_TIMEOUT_SECS)?;
        if tx_timeout_secs == 0 {
            return Err(invalid("TX_TIMEOUT_SECS", "must be positive".to_string()));
        }

        Ok(Self {
            seller,
            remote,
            ledger: LedgerSettings {
                network,
                starting_balance,
                base_fee,
                tx_timeout_secs,
                horizon_timeout_secs: number("HORIZON_TIMEOUT_SECS", DEFAULT_HORIZON_TIMEOUT_SECS)?,
            },
            tss_timeout_secs: number("TSS_TIMEOUT_SECS", DEFAULT_TSS_TIMEOUT_SECS)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ledger::{operations, AccountState, Keypair, Thresholds, TransactionBuilder};
    use std::collections::HashMap;

    /// A complete, valid environment
    pub(crate) fn test_env() -> HashMap<&'static str, String> {
        let seller = Keypair::from_seed(&[1u8; 32]);
        let service = Keypair::from_seed(&[2u8; 32]);
        let signer = Keypair::from_seed(&[3u8; 32]);

        let funded = AccountState {
            account_id: seller.public_key(),
            sequence: 10,
            balance: Lumens::from_whole(100),
            signers: Vec::new(),
            thresholds: Thresholds::default(),
        };
        let mut fee = TransactionBuilder::new(&funded)
            .set_timeout(3600)
            .add_operation(operations::payment(&service.public_key(), Lumens::from_whole(1)))
            .build()
            .unwrap();
        fee.sign(&seller, &Network::testnet()).unwrap();

        HashMap::from([
            ("SELLER_SECRET_KEY", seller.secret()),
            ("TSS_PUBLIC_KEY", service.public_key().to_string()),
            ("TSS_URL", "http://tss.local/".to_string()),
            ("TSS_HASH", "aa".repeat(32)),
            ("TSS_SIGNER", signer.public_key().to_string()),
            ("TSS_SALE_PRICE", "420".to_string()),
            ("TSS_TX_FN_FEE", fee.to_xdr_base64().unwrap()),
        ])
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<SellerConfig, ConfigError> {
        SellerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_loads_complete_environment() {
        let config = load(&test_env()).unwrap();

        assert_eq!(config.seller.public_key(), Keypair::from_seed(&[1u8; 32]).public_key());
        assert_eq!(config.remote.endpoint_base, "http://tss.local");
        assert_eq!(
            config.remote.function_url(),
            format!("http://tss.local/tx-functions/{}", "aa".repeat(32))
        );
        assert_eq!(config.ledger.network, Network::testnet());
        assert_eq!(config.ledger.starting_balance, Lumens::from_whole(5));
        assert_eq!(config.ledger.tx_timeout_secs, 180);
        assert_eq!(config.ledger.base_fee, BASE_FEE);
    }

    #[test]
    fn test_each_required_variable() {
        for var in [
            "SELLER_SECRET_KEY",
            "TSS_PUBLIC_KEY",
            "TSS_URL",
            "TSS_HASH",
            "TSS_SIGNER",
            "TSS_SALE_PRICE",
            "TSS_TX_FN_FEE",
        ] {
            let mut env = test_env();
            env.remove(var);
            assert_eq!(load(&env).unwrap_err(), ConfigError::Missing(var));

            // Blank counts as missing
            env.insert(var, "  ".to_string());
            assert_eq!(load(&env).unwrap_err(), ConfigError::Missing(var));
        }
    }

    #[test]
    fn test_rejects_malformed_values() {
        let cases = [
            ("SELLER_SECRET_KEY", "SNOPE"),
            ("TSS_SIGNER", "GNOPE"),
            ("TSS_URL", "tss.local"),
            ("TSS_HASH", "xyz"),
            ("TSS_SALE_PRICE", "four hundred"),
            ("TSS_TX_FN_FEE", "not-xdr"),
            ("STELLAR_NETWORK", "moonnet"),
            ("TX_TIMEOUT_SECS", "0"),
            ("NFT_STARTING_BALANCE", "-1"),
        ];
        for (var, value) in cases {
            let mut env = test_env();
            env.insert(var, value.to_string());
            assert!(
                matches!(load(&env), Err(ConfigError::Invalid { var: v, .. }) if v == var),
                "{var}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_seller_public_key_must_match() {
        let mut env = test_env();
        env.insert("SELLER_PUBLIC_KEY", Keypair::from_seed(&[9u8; 32]).public_key().to_string());
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { var: "SELLER_PUBLIC_KEY", .. })
        ));

        env.insert("SELLER_PUBLIC_KEY", Keypair::from_seed(&[1u8; 32]).public_key().to_string());
        assert!(load(&env).is_ok());
    }

    #[test]
    fn test_optional_overrides() {
        let mut env = test_env();
        env.insert("STELLAR_NETWORK", "public".to_string());
        env.insert("HORIZON_URL", "http://localhost:8000/".to_string());
        env.insert("NFT_STARTING_BALANCE", "2.5".to_string());
        env.insert("TX_TIMEOUT_SECS", "60".to_string());

        let config = load(&env).unwrap();
        assert_eq!(config.ledger.network.passphrase, ledger::network::PUBLIC_PASSPHRASE);
        assert_eq!(config.ledger.network.horizon_url, "http://localhost:8000");
        assert_eq!(config.ledger.starting_balance, Lumens::from_stroops(25_000_000));
        assert_eq!(config.ledger.tx_timeout_secs, 60);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let env = test_env();
        let config = load(&env).unwrap();
        let debug = format!("{config:?}");

        assert!(!debug.contains(&env["SELLER_SECRET_KEY"]));
        assert!(!debug.contains(&env["TSS_TX_FN_FEE"]));
    }
}
