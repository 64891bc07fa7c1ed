//! End-to-end deployment runs on the mock chain

use serde_json::json;
use tempfile::TempDir;

use super::{artifacts_dir, deploy_protocol, protocol_chain};
use crate::deploy::topology::{TokenBalance, TokenParams, ENGINE, FEE_POOL, INSURANCE_FUND, PRICEFEED, TOKEN, VAMM};
use crate::deploy::{
    standard_plan, ArtifactNames, Deployment, DeploymentPlan, Orchestrator, ProtocolParams, StepState,
};
use crate::errors::HarnessError;
use crate::test_utils::mock_address;
use crate::types::Uint128;

fn token_params() -> ProtocolParams {
    ProtocolParams {
        token: Some(TokenParams {
            name: "Margined USD".to_string(),
            symbol: "MUSD".to_string(),
            decimals: 6,
            initial_balances: vec![TokenBalance {
                address: mock_address("owner"),
                amount: Uint128(1_000_000_000),
            }],
        }),
        ..ProtocolParams::default()
    }
}

#[tokio::test]
async fn test_standard_plan_deploys_and_wires_market() {
    let (chain, owner) = protocol_chain();
    let dir = artifacts_dir();
    let plan = standard_plan(&ProtocolParams::default(), &ArtifactNames::default()).unwrap();

    let run = Orchestrator::new(owner.clone(), dir.path()).run(&plan).await.unwrap();

    assert_eq!(run.report.count(StepState::Confirmed), plan.len());
    assert!(run.report.is_success());
    assert!(run.report.total_gas() > 0);
    let ids: Vec<&str> = run.deployment.ids().map(|id| id.as_str()).collect();
    assert_eq!(ids, vec![FEE_POOL, INSURANCE_FUND, PRICEFEED, VAMM, ENGINE]);
    assert_eq!(chain.contract_count(), 5);

    let deployment = &run.deployment;
    let vamm = deployment.address(VAMM).unwrap();
    let engine = deployment.address(ENGINE).unwrap();

    let state = owner.query(vamm, &json!({ "state": {} })).await.unwrap();
    assert_eq!(state["open"], json!(true));
    let config = owner.query(vamm, &json!({ "config": {} })).await.unwrap();
    assert_eq!(config["margin_engine"], json!(engine));
    assert_eq!(config["pricefeed"], json!(deployment.address(PRICEFEED).unwrap()));

    let engine_config = owner.query(engine, &json!({ "config": {} })).await.unwrap();
    assert_eq!(engine_config["eligible_collateral"], json!("uusd"));
    assert_eq!(chain.contract_admin(engine).as_deref(), Some(owner.address()));
}

#[tokio::test]
async fn test_token_collateral_replaces_native_denom() {
    let (_chain, owner) = protocol_chain();
    let deployment = deploy_protocol(&owner, &token_params()).await;

    let token = deployment.address(TOKEN).unwrap();
    let engine = deployment.address(ENGINE).unwrap();
    let config = owner.query(engine, &json!({ "config": {} })).await.unwrap();
    assert_eq!(config["eligible_collateral"], json!(token));

    let fee_pool = deployment.address(FEE_POOL).unwrap();
    let is_token = owner
        .query(fee_pool, &json!({ "is_token": { "token": token } }))
        .await
        .unwrap();
    assert_eq!(is_token["is_token"], json!(true));

    let balance = owner
        .query(token, &json!({ "balance": { "address": owner.address() } }))
        .await
        .unwrap();
    assert_eq!(balance["balance"], json!("1000000000"));
}

#[tokio::test]
async fn test_forward_reference_rejected_before_any_request() {
    let (chain, owner) = protocol_chain();
    let dir = artifacts_dir();
    let plan = DeploymentPlan::new()
        .deploy(FEE_POOL, "margined_fee_pool.wasm", json!({}))
        .unwrap()
        .configure("set engine", FEE_POOL, json!({ "add_token": { "token": { "$contract": ENGINE } } }))
        .unwrap()
        .deploy(ENGINE, "margined_engine.wasm", json!({}))
        .unwrap();

    let err = Orchestrator::new(owner, dir.path()).run(&plan).await.unwrap_err();

    assert_eq!(err.step_index, 1);
    assert_eq!(err.label, "set engine");
    assert!(matches!(err.source, HarnessError::Sequencing { step: 1, .. }));
    assert_eq!(chain.request_count(), 0);
}

#[tokio::test]
async fn test_failed_step_halts_plan_and_keeps_partial_deployment() {
    let (chain, owner) = protocol_chain();
    let dir = artifacts_dir();
    let add = json!({ "add_token": { "token": "terra1token" } });
    let plan = DeploymentPlan::new()
        .deploy(FEE_POOL, "margined_fee_pool.wasm", json!({}))
        .unwrap()
        .configure("fee pool: add token", FEE_POOL, add.clone())
        .unwrap()
        .configure("fee pool: add token again", FEE_POOL, add)
        .unwrap()
        .deploy(PRICEFEED, "mock_pricefeed.wasm", json!({ "oracle_hub_contract": "" }))
        .unwrap();

    let run = Orchestrator::new(owner.clone(), dir.path())
        .run_with(
            &plan,
            Deployment::new("localterra", "localterra", owner.address()),
        )
        .await;

    let states: Vec<StepState> = run.report.steps.iter().map(|s| s.state).collect();
    assert_eq!(
        states,
        vec![
            StepState::Confirmed,
            StepState::Confirmed,
            StepState::Failed,
            StepState::Pending,
        ]
    );
    assert_eq!(run.deployment.len(), 1);
    assert!(run.deployment.address(FEE_POOL).is_some());
    assert_eq!(chain.contract_count(), 1);

    let err = run.into_result().unwrap_err();
    assert_eq!(err.step_index, 2);
    assert!(err.source.raw_log().unwrap().contains("This token is already added"));
}

#[tokio::test]
async fn test_rerun_on_top_of_partial_deployment() {
    let (chain, owner) = protocol_chain();
    let dir = artifacts_dir();
    let orchestrator = Orchestrator::new(owner.clone(), dir.path());

    let first = DeploymentPlan::new()
        .deploy(FEE_POOL, "margined_fee_pool.wasm", json!({}))
        .unwrap();
    let deployment = orchestrator.run(&first).await.unwrap().deployment;

    let second = DeploymentPlan::new()
        .configure(
            "fee pool: add token",
            FEE_POOL,
            json!({ "add_token": { "token": "terra1token" } }),
        )
        .unwrap();
    let run = orchestrator.run_with(&second, deployment).await.into_result().unwrap();
    assert_eq!(run.report.count(StepState::Confirmed), 1);
    assert_eq!(chain.contract_count(), 1);
}

#[tokio::test]
async fn test_missing_artifact_is_reported() {
    let (chain, owner) = protocol_chain();
    let empty = TempDir::new().unwrap();
    let plan = standard_plan(&ProtocolParams::default(), &ArtifactNames::default()).unwrap();

    let err = Orchestrator::new(owner, empty.path()).run(&plan).await.unwrap_err();

    assert_eq!(err.step_index, 0);
    match &err.source {
        HarnessError::Artifact { path, .. } => assert!(path.ends_with("margined_fee_pool.wasm")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(chain.request_count(), 0);
}
