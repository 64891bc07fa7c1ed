//! Integration tests for deployment plan validation and persistence
//!
//! This test validates:
//! - plans are rejected for forward, unknown and duplicate references
//! - re-runs may reference contracts of an earlier deployment
//! - deployments and scenarios survive a JSON round trip on disk

use proptest::prelude::*;
use serde_json::json;
use tempfile::TempDir;

use perp_deployer::deploy::{ArtifactNames, DeployedContract, PlanStep, ProtocolParams, StepAction};
use perp_deployer::scenario::{open_position_scenario, TradeParams};
use perp_deployer::types::ContractId;
use perp_deployer::{standard_plan, Deployment, DeploymentPlan, HarnessError, Scenario};

fn sequencing_step(err: HarnessError) -> usize {
    match err {
        HarnessError::Sequencing { step, .. } => step,
        other => panic!("expected a sequencing error, got {other:?}"),
    }
}

#[test]
fn test_standard_plans_validate() {
    let plan = standard_plan(&ProtocolParams::default(), &ArtifactNames::default()).unwrap();
    plan.validate(&[]).unwrap();
    assert_eq!(plan.deployed_ids().len(), 5);
}

#[test]
fn test_unknown_and_duplicate_ids() {
    let unknown = DeploymentPlan::new()
        .deploy("vamm", "margined_vamm.wasm", json!({ "pricefeed": { "$contract": "pricefeed" } }))
        .unwrap();
    assert_eq!(sequencing_step(unknown.validate(&[]).unwrap_err()), 0);

    let duplicate = DeploymentPlan::new()
        .deploy("fee_pool", "margined_fee_pool.wasm", json!({}))
        .unwrap()
        .deploy("fee_pool", "margined_fee_pool.wasm", json!({}))
        .unwrap();
    assert_eq!(sequencing_step(duplicate.validate(&[]).unwrap_err()), 1);

    let early_target = DeploymentPlan::new()
        .configure("open", "vamm", json!({ "set_open": { "open": true } }))
        .unwrap()
        .deploy("vamm", "margined_vamm.wasm", json!({}))
        .unwrap();
    assert_eq!(sequencing_step(early_target.validate(&[]).unwrap_err()), 0);
}

#[test]
fn test_plans_reject_scenario_placeholders() {
    let plan = DeploymentPlan::new()
        .deploy("token", "cw20_base.wasm", json!({ "minter": { "$wallet": "alice" } }))
        .unwrap();
    assert_eq!(sequencing_step(plan.validate(&[]).unwrap_err()), 0);
}

#[test]
fn test_existing_contracts_satisfy_references() {
    let mut plan = DeploymentPlan::new();
    plan.push(PlanStep {
        label: "register vamm".to_string(),
        action: StepAction::Configure {
            target: ContractId::new("insurance_fund"),
            msg: json!({ "add_vamm": { "vamm": { "$contract": "vamm" } } }),
            funds: Vec::new(),
        },
    });
    assert!(plan.validate(&[]).is_err());

    let existing = [ContractId::new("insurance_fund"), ContractId::new("vamm")];
    plan.validate(&existing).unwrap();
}

#[test]
fn test_deployment_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("deployment.json");

    let mut deployment = Deployment::new("localterra", "localterra", "terra1deployer");
    deployment
        .insert(
            ContractId::new("vamm"),
            DeployedContract {
                code_id: 4,
                address: "terra1vamm".to_string(),
                label: "vamm".to_string(),
            },
        )
        .unwrap();
    assert!(deployment
        .insert(
            ContractId::new("vamm"),
            DeployedContract {
                code_id: 5,
                address: "terra1other".to_string(),
                label: "vamm".to_string(),
            },
        )
        .is_err());

    deployment.save(&path).unwrap();
    let loaded = Deployment::load(&path).unwrap();
    assert_eq!(loaded.address("vamm"), Some("terra1vamm"));
    assert_eq!(loaded.get("vamm").map(|c| c.code_id), Some(4));
    assert_eq!(loaded.deployer, "terra1deployer");

    assert!(matches!(
        Deployment::load(dir.path().join("missing.json")),
        Err(HarnessError::Artifact { .. })
    ));
}

#[test]
fn test_scenario_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("open_position.json");
    let scenario = open_position_scenario(&ProtocolParams::default(), &TradeParams::default()).unwrap();

    std::fs::write(&path, serde_json::to_string_pretty(&scenario).unwrap()).unwrap();
    assert_eq!(Scenario::load(&path).unwrap(), scenario);

    std::fs::write(&path, "{ \"name\": 1 }").unwrap();
    assert!(matches!(Scenario::load(&path), Err(HarnessError::Config(_))));
}

proptest! {
    /// A configure step referencing deploy `target` is valid iff that deploy comes first
    #[test]
    fn prop_references_must_point_backwards(count in 2usize..6, target in 0usize..6, position in 0usize..6) {
        let target = target % count;
        let position = position % (count + 1);

        let mut plan = DeploymentPlan::new();
        for i in 0..count {
            if i == position {
                plan = plan
                    .configure("wire", "c0", json!({ "set": { "peer": { "$contract": format!("c{}", target) } } }))
                    .unwrap();
            }
            plan = plan.deploy(format!("c{}", i).as_str(), "contract.wasm", json!({})).unwrap();
        }
        if position == count {
            plan = plan
                .configure("wire", "c0", json!({ "set": { "peer": { "$contract": format!("c{}", target) } } }))
                .unwrap();
        }

        // c0 is also the configure target, so position 0 is always invalid
        let valid = position > target;
        prop_assert_eq!(plan.validate(&[]).is_ok(), valid);
    }
}
