//! Crate-level tests against the in-memory mock chain

mod orchestrator_tests;

use std::sync::Arc;
use tempfile::TempDir;

use crate::deploy::{standard_plan, ArtifactNames, Deployment, Orchestrator, ProtocolParams};
use crate::executor::TxExecutor;
use crate::test_utils::{mock_executor, write_protocol_artifacts, MockChain};

/// Fresh chain with the protocol contracts registered, plus an owner wallet
pub(crate) fn protocol_chain() -> (Arc<MockChain>, TxExecutor) {
    let chain = Arc::new(MockChain::with_protocol_contracts());
    let owner = mock_executor(&chain, "owner");
    (chain, owner)
}

/// Artifacts directory holding the protocol bytecode
pub(crate) fn artifacts_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_protocol_artifacts(dir.path(), &ArtifactNames::default()).unwrap();
    dir
}

/// Run the standard plan to completion
pub(crate) async fn deploy_protocol(owner: &TxExecutor, params: &ProtocolParams) -> Deployment {
    let dir = artifacts_dir();
    let plan = standard_plan(params, &ArtifactNames::default()).unwrap();
    Orchestrator::new(owner.clone(), dir.path())
        .run(&plan)
        .await
        .unwrap()
        .deployment
}
