//! Gas/fee policy
//!
//! A pure lookup from (network, operation kind) to a fee bid. Fee-less
//! networks get the zero sentinel, which tells the executor to simulate
//! gas and submit without a fee amount.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{HarnessError, Result};
use crate::types::{Coin, Uint128};

/// Kind of chain operation, for fee sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Upload,
    Instantiate,
    Execute,
    Migrate,
    Transfer,
    Admin,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Upload,
        OperationKind::Instantiate,
        OperationKind::Execute,
        OperationKind::Migrate,
        OperationKind::Transfer,
        OperationKind::Admin,
    ];
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Upload => "upload",
            OperationKind::Instantiate => "instantiate",
            OperationKind::Execute => "execute",
            OperationKind::Migrate => "migrate",
            OperationKind::Transfer => "transfer",
            OperationKind::Admin => "admin",
        };
        f.write_str(s)
    }
}

/// Fee bid for one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeBid {
    /// 0 means "simulate and let the chain not charge"
    pub gas_limit: u64,
    pub denom: String,
    pub amount: u128,
}

impl FeeBid {
    pub fn free() -> Self {
        Self {
            gas_limit: 0,
            denom: String::new(),
            amount: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.gas_limit == 0 && self.amount == 0
    }

    /// Fee coins to put on the wire; empty for a zero amount
    pub fn coins(&self) -> Vec<Coin> {
        if self.amount == 0 {
            Vec::new()
        } else {
            vec![Coin::new(self.amount, self.denom.clone())]
        }
    }
}

/// Fixed gas limit and fee amount for one operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedBid {
    pub gas: u64,
    /// Integer or decimal string in config files
    pub amount: Uint128,
}

/// Fee table for one network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkFees {
    /// Chain accepts zero-fee transactions
    #[serde(default)]
    pub fee_less: bool,

    #[serde(default = "default_fee_denom")]
    pub denom: String,

    #[serde(default = "default_upload_bid")]
    pub upload: FixedBid,

    #[serde(default = "default_instantiate_bid")]
    pub instantiate: FixedBid,

    #[serde(default = "default_execute_bid")]
    pub execute: FixedBid,

    /// Falls back to the instantiate bid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrate: Option<FixedBid>,

    #[serde(default = "default_small_bid")]
    pub transfer: FixedBid,

    #[serde(default = "default_small_bid")]
    pub admin: FixedBid,
}

fn default_fee_denom() -> String {
    "uluna".to_string()
}

fn default_upload_bid() -> FixedBid {
    FixedBid {
        gas: 30_000_000,
        amount: Uint128::new(4_500_000),
    }
}

fn default_instantiate_bid() -> FixedBid {
    FixedBid {
        gas: 5_000_000,
        amount: Uint128::new(750_000),
    }
}

fn default_execute_bid() -> FixedBid {
    FixedBid {
        gas: 2_000_000,
        amount: Uint128::new(300_000),
    }
}

fn default_small_bid() -> FixedBid {
    FixedBid {
        gas: 200_000,
        amount: Uint128::new(30_000),
    }
}

impl Default for NetworkFees {
    fn default() -> Self {
        Self {
            fee_less: false,
            denom: default_fee_denom(),
            upload: default_upload_bid(),
            instantiate: default_instantiate_bid(),
            execute: default_execute_bid(),
            migrate: None,
            transfer: default_small_bid(),
            admin: default_small_bid(),
        }
    }
}

impl NetworkFees {
    /// Table for a network that never charges
    pub fn fee_less() -> Self {
        Self {
            fee_less: true,
            ..Self::default()
        }
    }

    fn fixed(&self, kind: OperationKind) -> FixedBid {
        match kind {
            OperationKind::Upload => self.upload,
            OperationKind::Instantiate => self.instantiate,
            OperationKind::Execute => self.execute,
            OperationKind::Migrate => self.migrate.unwrap_or(self.instantiate),
            OperationKind::Transfer => self.transfer,
            OperationKind::Admin => self.admin,
        }
    }

    pub fn bid(&self, kind: OperationKind) -> FeeBid {
        if self.fee_less {
            return FeeBid::free();
        }
        let fixed = self.fixed(kind);
        FeeBid {
            gas_limit: fixed.gas,
            denom: self.denom.clone(),
            amount: fixed.amount.u128(),
        }
    }

    /// Fee-bearing tables need a denom and positive bids
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.fee_less {
            return Ok(());
        }
        if self.denom.trim().is_empty() {
            return Err("fee denom must not be empty".to_string());
        }
        for kind in OperationKind::ALL {
            let fixed = self.fixed(kind);
            if fixed.gas == 0 || fixed.amount.is_zero() {
                return Err(format!("{} bid must have positive gas and amount", kind));
            }
        }
        Ok(())
    }
}

/// Fee tables keyed by network name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeePolicy {
    networks: BTreeMap<String, NetworkFees>,
}

impl FeePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_network(mut self, network: impl Into<String>, fees: NetworkFees) -> Self {
        self.insert(network, fees);
        self
    }

    pub fn insert(&mut self, network: impl Into<String>, fees: NetworkFees) {
        self.networks.insert(network.into(), fees);
    }

    pub fn network(&self, network: &str) -> Option<&NetworkFees> {
        self.networks.get(network)
    }

    /// Fee bid for `kind` on `network`
    pub fn bid(&self, network: &str, kind: OperationKind) -> Result<FeeBid> {
        self.networks
            .get(network)
            .map(|fees| fees.bid(kind))
            .ok_or_else(|| HarnessError::Config(format!("no fee table for network '{}'", network)))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, fees) in &self.networks {
            fees.validate()
                .map_err(|e| HarnessError::Config(format!("networks.{}: {}", name, e)))?;
        }
        Ok(())
    }
}
