//! Placeholders inside JSON payloads
//!
//! A payload may reference values only known at run time:
//! `{"$contract": "vamm"}` (address of a deployed contract),
//! `{"$wallet": "alice"}` (address of a named wallet) and
//! `{"$var": "position_id"}` (a value bound by an earlier scenario step).
//! A placeholder is an object with exactly one of these keys and a string value.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use crate::types::ContractId;

pub const CONTRACT_KEY: &str = "$contract";
pub const WALLET_KEY: &str = "$wallet";
pub const VAR_KEY: &str = "$var";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Contract,
    Wallet,
    Var,
}

impl RefKind {
    fn key(self) -> &'static str {
        match self {
            RefKind::Contract => CONTRACT_KEY,
            RefKind::Wallet => WALLET_KEY,
            RefKind::Var => VAR_KEY,
        }
    }
}

/// One placeholder found in a payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Placeholder {
    pub kind: RefKind,
    pub name: String,
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{\"{}\": \"{}\"}}", self.kind.key(), self.name)
    }
}

/// Address that is either known up front or produced by a deploy step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrRef {
    Literal(String),
    Contract(ContractId),
}

impl AddrRef {
    pub fn contract(id: impl Into<ContractId>) -> Self {
        AddrRef::Contract(id.into())
    }

    pub fn literal(addr: impl Into<String>) -> Self {
        AddrRef::Literal(addr.into())
    }
}

impl From<&str> for AddrRef {
    fn from(s: &str) -> Self {
        AddrRef::Literal(s.to_string())
    }
}

impl Serialize for AddrRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AddrRef::Literal(addr) => serializer.serialize_str(addr),
            AddrRef::Contract(id) => contract_ref(id.as_str()).serialize(serializer),
        }
    }
}

/// `{"$contract": id}`
pub fn contract_ref(id: &str) -> Value {
    single(CONTRACT_KEY, id)
}

/// `{"$wallet": name}`
pub fn wallet_ref(name: &str) -> Value {
    single(WALLET_KEY, name)
}

/// `{"$var": name}`
pub fn var_ref(name: &str) -> Value {
    single(VAR_KEY, name)
}

fn single(key: &str, name: &str) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), Value::String(name.to_string()));
    Value::Object(map)
}

fn as_placeholder(value: &Value) -> Option<Placeholder> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let (key, name) = map.iter().next()?;
    let name = name.as_str()?.to_string();
    let kind = match key.as_str() {
        CONTRACT_KEY => RefKind::Contract,
        WALLET_KEY => RefKind::Wallet,
        VAR_KEY => RefKind::Var,
        _ => return None,
    };
    Some(Placeholder { kind, name })
}

/// All placeholders in `value`, depth-first
pub fn placeholders(value: &Value) -> Vec<Placeholder> {
    let mut found = Vec::new();
    collect(value, &mut found);
    found
}

fn collect(value: &Value, found: &mut Vec<Placeholder>) {
    if let Some(p) = as_placeholder(value) {
        found.push(p);
        return;
    }
    match value {
        Value::Object(map) => map.values().for_each(|v| collect(v, found)),
        Value::Array(items) => items.iter().for_each(|v| collect(v, found)),
        _ => {}
    }
}

/// Source of placeholder values
pub trait Resolver {
    fn contract(&self, id: &str) -> Option<String>;

    fn wallet(&self, _name: &str) -> Option<String> {
        None
    }

    fn var(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Replace every placeholder; the first unresolvable one is returned as the error
pub fn resolve(value: &Value, resolver: &dyn Resolver) -> Result<Value, Placeholder> {
    if let Some(p) = as_placeholder(value) {
        let resolved = match p.kind {
            RefKind::Contract => resolver.contract(&p.name).map(Value::String),
            RefKind::Wallet => resolver.wallet(&p.name).map(Value::String),
            RefKind::Var => resolver.var(&p.name),
        };
        return resolved.ok_or(p);
    }

    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve(v, resolver)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| resolve(v, resolver))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct MapResolver(HashMap<&'static str, &'static str>);

    impl Resolver for MapResolver {
        fn contract(&self, id: &str) -> Option<String> {
            self.0.get(id).map(|s| s.to_string())
        }

        fn var(&self, name: &str) -> Option<Value> {
            (name == "position_id").then(|| json!(1))
        }
    }

    #[test]
    fn test_addr_ref_serialization() {
        assert_eq!(serde_json::to_value(AddrRef::from("terra1abc")).unwrap(), json!("terra1abc"));
        assert_eq!(
            serde_json::to_value(AddrRef::contract("vamm")).unwrap(),
            json!({ "$contract": "vamm" })
        );
    }

    #[test]
    fn test_placeholders_in_document_order() {
        let v = json!({
            "insurance_fund": { "$contract": "insurance_fund" },
            "vamm": [ { "$contract": "vamm" } ],
            "trader": { "$wallet": "alice" },
            "other": { "$contract": "a", "extra": 1 }
        });
        let found = placeholders(&v);
        let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
        // serde_json maps iterate in key order
        assert_eq!(names, vec!["insurance_fund", "alice", "vamm"]);
    }

    #[test]
    fn test_resolve_replaces_nested_refs() {
        let resolver = MapResolver(HashMap::from([("vamm", "terra1vamm")]));
        let v = json!({ "position": { "vamm": { "$contract": "vamm" }, "position_id": { "$var": "position_id" } } });
        let resolved = resolve(&v, &resolver).unwrap();
        assert_eq!(resolved, json!({ "position": { "vamm": "terra1vamm", "position_id": 1 } }));
    }

    #[test]
    fn test_resolve_reports_unresolved() {
        let resolver = MapResolver(HashMap::new());
        let err = resolve(&json!([{ "$contract": "engine" }]), &resolver).unwrap_err();
        assert_eq!(err.kind, RefKind::Contract);
        assert_eq!(err.name, "engine");
        assert_eq!(err.to_string(), r#"{"$contract": "engine"}"#);
    }
}
