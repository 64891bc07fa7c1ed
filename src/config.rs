//! Configuration for the deployer
//!
//! Loaded from a TOML file (optional), then `.env` and environment
//! overrides. Without a file, built-in `localterra` and `testnet`
//! networks are available.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chain::retry::RetryPolicy;
use crate::chain::{ChainEndpoint, ClientConfig};
use crate::deploy::{ArtifactNames, ProtocolParams};
use crate::fees::{FeePolicy, NetworkFees};
use crate::messages::engine::Side;
use crate::scenario::TradeParams;
use crate::types::Uint128;
use crate::wallet::Secp256k1Wallet;

/// Environment variable selecting the network
pub const NETWORK_ENV: &str = "NETWORK";
/// Environment variable holding the hex deployer key
pub const WALLET_KEY_ENV: &str = "WALLET_KEY";
/// Environment variable overriding the artifacts directory
pub const ARTIFACTS_DIR_ENV: &str = "ARTIFACTS_DIR";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Selected entry of `networks`
    #[serde(default = "default_network")]
    pub network: String,

    #[serde(default)]
    pub client: ClientSection,

    #[serde(default)]
    pub wallet: WalletConfig,

    /// Merged over the built-in networks
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,

    #[serde(default)]
    pub deploy: DeployConfig,

    #[serde(default)]
    pub scenario: ScenarioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Pause after each broadcast, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Multiplier on simulated gas for fee-less networks
    #[serde(default = "default_gas_adjustment")]
    pub gas_adjustment: f64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Polling schedule for block-height waits
    #[serde(default = "RetryPolicy::block_wait")]
    pub block_wait: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// File holding the hex secret; the env var wins when both are set
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    #[serde(default = "default_key_env")]
    pub key_env: String,

    /// Expected account address; checked against the key when set
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: String,
    pub lcd_url: String,

    #[serde(default = "default_address_prefix")]
    pub address_prefix: String,

    /// Overrides `client.settle_delay_ms`
    #[serde(default)]
    pub settle_delay_ms: Option<u64>,

    #[serde(flatten)]
    pub fees: NetworkFees,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    #[serde(default)]
    pub artifacts: ArtifactNames,

    #[serde(default)]
    pub params: ProtocolParams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Extra signing identities by scenario wallet name
    #[serde(default)]
    pub wallets: BTreeMap<String, WalletConfig>,

    #[serde(default)]
    pub trade: TradeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeConfig {
    #[serde(default = "default_trader")]
    pub trader: String,

    #[serde(default = "default_side")]
    pub side: Side,

    #[serde(default = "default_margin")]
    pub margin: Uint128,

    #[serde(default = "default_leverage")]
    pub leverage: Uint128,

    #[serde(default)]
    pub tolerance: i64,
}

// Default value functions
fn default_network() -> String { "localterra".to_string() }
fn default_settle_delay_ms() -> u64 { 1000 }
fn default_gas_adjustment() -> f64 { 1.2 }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_key_env() -> String { WALLET_KEY_ENV.to_string() }
fn default_address_prefix() -> String { "terra".to_string() }
fn default_artifacts_dir() -> PathBuf { PathBuf::from("artifacts") }
fn default_trader() -> String { TradeParams::default().trader }
fn default_side() -> Side { TradeParams::default().side }
fn default_margin() -> Uint128 { Uint128::new(TradeParams::default().margin) }
fn default_leverage() -> Uint128 { Uint128::new(TradeParams::default().leverage) }

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            gas_adjustment: default_gas_adjustment(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryPolicy::default(),
            block_wait: RetryPolicy::block_wait(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            key_path: None,
            key_env: default_key_env(),
            address: None,
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            artifacts: ArtifactNames::default(),
            params: ProtocolParams::default(),
        }
    }
}

impl Default for TradeConfig {
    fn default() -> Self {
        let trade = TradeParams::default();
        Self {
            trader: trade.trader,
            side: trade.side,
            margin: Uint128::new(trade.margin),
            leverage: Uint128::new(trade.leverage),
            tolerance: 0,
        }
    }
}

impl From<&TradeConfig> for TradeParams {
    fn from(c: &TradeConfig) -> Self {
        TradeParams {
            trader: c.trader.clone(),
            side: c.side,
            margin: c.margin.u128(),
            leverage: c.leverage.u128(),
            tolerance: i128::from(c.tolerance),
        }
    }
}

impl WalletConfig {
    /// Load the key from `key_env` or, failing that, `key_path`, deriving
    /// its address under `prefix`
    pub fn load(&self, prefix: &str) -> anyhow::Result<Secp256k1Wallet> {
        let wallet = if std::env::var(&self.key_env).is_ok() {
            Secp256k1Wallet::from_env(&self.key_env, prefix)
                .with_context(|| format!("failed to load key from ${}", self.key_env))?
        } else {
            match &self.key_path {
                Some(path) => Secp256k1Wallet::from_file(path, prefix)
                    .with_context(|| format!("failed to load key from {}", path.display()))?,
                None => bail!("no signing key: set ${} or wallet.key_path", self.key_env),
            }
        };

        if let Some(expected) = self.address.as_deref().filter(|a| !a.is_empty()) {
            wallet.ensure_address(expected)?;
        }
        Ok(wallet)
    }
}

/// Networks available without a config file
pub fn builtin_networks() -> BTreeMap<String, NetworkConfig> {
    let mut networks = BTreeMap::new();
    networks.insert(
        "localterra".to_string(),
        NetworkConfig {
            chain_id: "localterra".to_string(),
            lcd_url: "http://localhost:1317".to_string(),
            address_prefix: default_address_prefix(),
            settle_delay_ms: Some(0),
            fees: NetworkFees::fee_less(),
        },
    );
    networks.insert(
        "testnet".to_string(),
        NetworkConfig {
            chain_id: "bombay-12".to_string(),
            lcd_url: "https://bombay-lcd.terra.dev".to_string(),
            address_prefix: default_address_prefix(),
            settle_delay_ms: None,
            fees: NetworkFees::default(),
        },
    );
    networks
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            client: ClientSection::default(),
            wallet: WalletConfig::default(),
            networks: builtin_networks(),
            deploy: DeployConfig::default(),
            scenario: ScenarioConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse TOML, filling in built-in networks the file does not define
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let mut config: AppConfig = toml::from_str(content).context("invalid config TOML")?;
        for (name, network) in builtin_networks() {
            config.networks.entry(name).or_insert(network);
        }
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("in {}", path.display()))
    }

    /// File (or defaults) plus `.env` and environment overrides, validated
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `NETWORK` and `ARTIFACTS_DIR` from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(network) = lookup(NETWORK_ENV).filter(|n| !n.is_empty()) {
            self.network = network;
        }
        if let Some(dir) = lookup(ARTIFACTS_DIR_ENV).filter(|d| !d.is_empty()) {
            self.deploy.artifacts_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.networks.contains_key(&self.network) {
            bail!(
                "unknown network '{}' (configured: {})",
                self.network,
                self.networks.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }

        for (name, network) in &self.networks {
            if network.chain_id.trim().is_empty() {
                bail!("network '{}': chain_id is empty", name);
            }
            let url = network.lcd_url.trim();
            if url.is_empty() {
                bail!("network '{}': lcd_url is empty", name);
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("network '{}': lcd_url must be http(s), got '{}'", name, url);
            }
            network
                .fees
                .validate()
                .map_err(|e| anyhow::anyhow!("network '{}': {}", name, e))?;
        }

        let client = &self.client;
        if !client.gas_adjustment.is_finite() || client.gas_adjustment < 1.0 {
            bail!("client.gas_adjustment must be >= 1.0, got {}", client.gas_adjustment);
        }
        if client.request_timeout_secs == 0 {
            bail!("client.request_timeout_secs must be positive");
        }
        for (name, policy) in [("retry", &client.retry), ("block_wait", &client.block_wait)] {
            if policy.max_attempts == 0 {
                bail!("client.{}.max_attempts must be at least 1", name);
            }
            if !policy.jitter_factor.is_finite() || !(0.0..=1.0).contains(&policy.jitter_factor) {
                bail!(
                    "client.{}.jitter_factor must be within 0.0..=1.0, got {}",
                    name,
                    policy.jitter_factor
                );
            }
            if policy.base_delay_ms > policy.max_delay_ms {
                bail!("client.{}.base_delay_ms exceeds max_delay_ms", name);
            }
        }
        Ok(())
    }

    /// The selected network
    pub fn selected(&self) -> anyhow::Result<&NetworkConfig> {
        self.networks
            .get(&self.network)
            .with_context(|| format!("unknown network '{}'", self.network))
    }

    pub fn endpoint(&self) -> anyhow::Result<ChainEndpoint> {
        let network = self.selected()?;
        Ok(ChainEndpoint::new(
            network.chain_id.clone(),
            network.lcd_url.clone(),
            network.address_prefix.clone(),
        ))
    }

    /// Client tuning for the selected network
    pub fn client_config(&self) -> ClientConfig {
        let settle_delay_ms = self
            .networks
            .get(&self.network)
            .and_then(|n| n.settle_delay_ms)
            .unwrap_or(self.client.settle_delay_ms);
        ClientConfig {
            settle_delay: Duration::from_millis(settle_delay_ms),
            gas_adjustment: self.client.gas_adjustment,
            request_timeout: Duration::from_secs(self.client.request_timeout_secs),
            retry: self.client.retry.clone(),
            block_wait: self.client.block_wait.clone(),
        }
    }

    /// Fee tables of every configured network
    pub fn fee_policy(&self) -> FeePolicy {
        self.networks
            .iter()
            .fold(FeePolicy::new(), |policy, (name, network)| {
                policy.with_network(name.clone(), network.fees.clone())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::OperationKind;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.network, "localterra");
        assert_eq!(config.client_config().settle_delay, Duration::ZERO);

        let policy = config.fee_policy();
        assert!(policy.bid("localterra", OperationKind::Upload).unwrap().is_free());
        assert_eq!(policy.bid("testnet", OperationKind::Upload).unwrap().gas_limit, 30_000_000);
    }

    #[test]
    fn test_file_merges_builtin_networks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
network = "columbus"

[client]
settle_delay_ms = 2500

[networks.columbus]
chain_id = "columbus-5"
lcd_url = "https://lcd.terra.dev/"
denom = "uusd"

[networks.columbus.execute]
gas = 3000000
amount = 450000

[deploy.params]
quote_asset = "BTC"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        config.validate().unwrap();
        assert!(config.networks.contains_key("localterra"));
        assert_eq!(config.endpoint().unwrap().url, "https://lcd.terra.dev");
        assert_eq!(config.client_config().settle_delay, Duration::from_millis(2500));
        assert_eq!(config.deploy.params.quote_asset, "BTC");

        let bid = config.fee_policy().bid("columbus", OperationKind::Execute).unwrap();
        assert_eq!((bid.gas_limit, bid.amount, bid.denom.as_str()), (3_000_000, 450_000, "uusd"));
    }

    #[test]
    fn test_overrides() {
        let mut config = AppConfig::default();
        config.apply_overrides(|key| match key {
            NETWORK_ENV => Some("testnet".to_string()),
            ARTIFACTS_DIR_ENV => Some("/tmp/wasm".to_string()),
            _ => None,
        });
        assert_eq!(config.network, "testnet");
        assert_eq!(config.deploy.artifacts_dir, PathBuf::from("/tmp/wasm"));
        assert_eq!(config.client_config().settle_delay, Duration::from_millis(1000));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.network = "mainnet".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.client.gas_adjustment = 0.9;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.client.retry.jitter_factor = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.client.retry.jitter_factor = -0.1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.client.block_wait.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("client.block_wait"));

        let mut config = AppConfig::default();
        if let Some(n) = config.networks.get_mut("testnet") {
            n.lcd_url = "ftp://bombay".to_string();
        }
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        if let Some(n) = config.networks.get_mut("testnet") {
            n.lcd_url = String::new();
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trade_config_defaults() {
        let config = AppConfig::from_toml("[scenario.trade]\nside = \"buy\"\n").unwrap();
        let trade = TradeParams::from(&config.scenario.trade);
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.margin, 50_000_000);
        assert_eq!(trade.trader, "owner");
    }

    #[test]
    fn test_trade_amounts_accept_strings_and_integers() {
        let config = AppConfig::from_toml(
            "[scenario.trade]\nmargin = \"10000000\"\nleverage = 2000000\ntolerance = 2\n",
        )
        .unwrap();
        let trade = TradeParams::from(&config.scenario.trade);
        assert_eq!((trade.margin, trade.leverage, trade.tolerance), (10_000_000, 2_000_000, 2));
    }
}
