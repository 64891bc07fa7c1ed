//! Insurance fund messages

use serde::Serialize;

use super::refs::AddrRef;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstantiateMsg {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<AddrRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMsg {
    /// Contract allowed to draw on the fund (the margin engine)
    UpdateConfig {
        #[serde(skip_serializing_if = "Option::is_none")]
        beneficiary: Option<AddrRef>,
    },
    UpdateOwner {
        owner: AddrRef,
    },
    AddVamm {
        vamm: AddrRef,
    },
    RemoveVamm {
        vamm: AddrRef,
    },
    ShutdownVamms {},
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMsg {
    Config {},
    IsVamm { vamm: AddrRef },
    GetAllVamm {
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },
}
