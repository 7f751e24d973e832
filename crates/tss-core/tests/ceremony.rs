use k256::ecdsa::VerifyingKey;
use rand_chacha::{rand_core::SeedableRng, ChaCha20Rng};
use std::sync::Arc;
use std::time::Duration;
use tss_core::field::scalar_from_index;
use tss_core::mpc::{
    async_trait, Connection, EngineInput, EngineSession, Fault, MemoryNetwork, SigningEngine,
    Transport,
};
use tss_core::sim::{node_endpoint, SimulatedDeployment};
use tss_core::{CeremonyState, Error, HashAlgorithm, NodeIndex, Result, Session, Signer};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn deployment(seed: u64) -> SimulatedDeployment {
    init_tracing();
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    SimulatedDeployment::new(&mut rng, 4).unwrap()
}

fn nodes(deployment: &SimulatedDeployment) -> Vec<NodeIndex> {
    deployment.attestation.node_indexes.clone()
}

/// Memory network where one endpoint takes `delay` to accept a connection
struct SlowTransport {
    network: Arc<MemoryNetwork>,
    slow_endpoint: String,
    delay: Duration,
}

#[async_trait]
impl Transport for SlowTransport {
    async fn connect(&self, endpoint: &str, socket_scope: &str) -> Result<Box<dyn Connection>> {
        if endpoint == self.slow_endpoint {
            tokio::time::sleep(self.delay).await;
        }
        self.network.connect(endpoint, socket_scope).await
    }
}

/// Engine that fails to load, or loads and then refuses every session
struct BrokenEngine {
    load_fails: bool,
}

#[async_trait]
impl SigningEngine for BrokenEngine {
    async fn load(&self) -> Result<()> {
        if self.load_fails {
            return Err(Error::Engine("engine unavailable".into()));
        }
        Ok(())
    }

    fn begin(&self, _session: &Session, _input: EngineInput) -> Result<Box<dyn EngineSession>> {
        Err(Error::Engine("session rejected".into()))
    }
}

fn signer_with_slow_node(deployment: &SimulatedDeployment, node: NodeIndex) -> Signer {
    let mut collaborators = deployment.collaborators();
    collaborators.transport = Arc::new(SlowTransport {
        network: deployment.network.clone(),
        slow_endpoint: node_endpoint(node),
        delay: Duration::from_secs(5),
    });
    Signer::new(
        deployment.config.clone(),
        *deployment.factor_secret(),
        collaborators,
    )
}

fn signer_with_broken_engine(deployment: &SimulatedDeployment, load_fails: bool) -> Signer {
    let mut collaborators = deployment.collaborators();
    collaborators.engine = Arc::new(BrokenEngine { load_fails });
    Signer::new(
        deployment.config.clone(),
        *deployment.factor_secret(),
        collaborators,
    )
}

/// Every participating node saw one connection, one cleanup and one close
fn assert_cleaned_exactly_once(deployment: &SimulatedDeployment) {
    for node in nodes(deployment) {
        let stats = deployment.network.stats(&node_endpoint(node));
        assert_eq!(stats.connects, 1, "node {} connects", node);
        assert_eq!(stats.cleanups, 1, "node {} cleanups", node);
        assert_eq!(stats.closes, 1, "node {} closes", node);
    }
    assert_eq!(deployment.network.active_sessions(), 0);
}

#[tokio::test]
async fn test_hello_world_keccak256() {
    let deployment = deployment(1);
    let signer = deployment.signer();

    let message = b"hello world";
    let signature = signer
        .sign_message(message, HashAlgorithm::Keccak256)
        .await
        .unwrap();

    let digest = HashAlgorithm::Keccak256.digest(message);
    let (k256_signature, recovery_id) = signature.to_k256().unwrap();
    let recovered =
        VerifyingKey::recover_from_prehash(&digest, &k256_signature, recovery_id).unwrap();
    assert_eq!(
        recovered.as_affine(),
        &deployment.sharing.public_key().to_affine()
    );

    let rsv = signature.to_rsv_hex();
    assert!(rsv.starts_with("0x"));
    assert_eq!(rsv.len(), 2 + 65 * 2);

    assert_cleaned_exactly_once(&deployment);
}

#[tokio::test]
async fn test_sha256_with_sparse_participants() {
    let mut rng = ChaCha20Rng::seed_from_u64(2);
    let deployment = SimulatedDeployment::with_participants(&mut rng, 5, vec![2, 4, 5], 3).unwrap();
    let signer = deployment.signer();

    let report = signer
        .run_ceremony(b"transfer 10", HashAlgorithm::Sha256, std::future::pending())
        .await;

    assert!(report.result.is_ok());
    assert!(report.cleanup_errors.is_empty());
    assert_eq!(report.reached, CeremonyState::Verifying);
    assert_eq!(report.final_state, CeremonyState::Terminated { success: true });
    assert_eq!(report.connections_closed, 3);

    assert_cleaned_exactly_once(&deployment);
    // idle nodes are never contacted
    for idle in [1, 3] {
        assert_eq!(deployment.network.stats(&node_endpoint(idle)).connects, 0);
    }
}

#[tokio::test]
async fn test_each_ceremony_uses_a_fresh_session() {
    let deployment = deployment(3);
    let signer = deployment.signer();

    let (first, second) = tokio::join!(
        signer.sign_message(b"first", HashAlgorithm::Keccak256),
        signer.sign_message(b"second", HashAlgorithm::Keccak256),
    );
    assert_ne!(first.unwrap(), second.unwrap());
    assert_eq!(deployment.network.active_sessions(), 0);
}

#[tokio::test]
async fn test_duplicate_node_index_rejected_before_connecting() {
    let mut deployment = deployment(4);
    deployment.attestation.node_indexes = vec![1, 2, 2];
    let signer = deployment.signer();

    let result = signer.sign_message(b"hello", HashAlgorithm::Keccak256).await;
    assert!(matches!(result, Err(Error::Configuration(_))));
    for node in 1..=3 {
        assert_eq!(deployment.network.stats(&node_endpoint(node)).connects, 0);
    }
}

#[tokio::test]
async fn test_node_count_must_match_parties() {
    let mut deployment = deployment(5);
    deployment.config.parties = 5;
    let signer = deployment.signer();

    let result = signer.sign_message(b"hello", HashAlgorithm::Keccak256).await;
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn test_unknown_factor_is_a_custody_error() {
    let deployment = deployment(6);
    let signer = Signer::new(
        deployment.config.clone(),
        scalar_from_index(999),
        deployment.collaborators(),
    );

    let result = signer.sign_message(b"hello", HashAlgorithm::Keccak256).await;
    assert!(matches!(result, Err(Error::Custody(_))));
}

#[tokio::test]
async fn test_refused_connection_closes_the_others() {
    let deployment = deployment(7);
    deployment
        .network
        .inject_fault(&node_endpoint(2), Fault::RefuseConnection);
    let signer = deployment.signer();

    let report = signer
        .run_ceremony(b"hello", HashAlgorithm::Keccak256, std::future::pending())
        .await;
    assert!(matches!(report.result, Err(Error::Connection(_))));
    assert!(report.result.as_ref().unwrap_err().is_retryable());
    assert_eq!(report.reached, CeremonyState::Initialized);
    assert_eq!(report.connections_closed, 2);

    for node in [1, 3] {
        let stats = deployment.network.stats(&node_endpoint(node));
        assert_eq!((stats.connects, stats.cleanups, stats.closes), (1, 1, 1));
        assert_eq!(stats.precomputes, 0);
    }
    assert_eq!(deployment.network.stats(&node_endpoint(2)).closes, 0);
}

#[tokio::test]
async fn test_precompute_rejection() {
    let deployment = deployment(8);
    deployment
        .network
        .inject_fault(&node_endpoint(3), Fault::RejectPrecompute);
    let signer = deployment.signer();

    let report = signer
        .run_ceremony(b"hello", HashAlgorithm::Keccak256, std::future::pending())
        .await;
    assert!(matches!(report.result, Err(Error::Protocol { party: 2, .. })));
    assert_eq!(report.reached, CeremonyState::Precomputing);
    assert_cleaned_exactly_once(&deployment);
}

#[tokio::test]
async fn test_sign_rejection() {
    let deployment = deployment(9);
    deployment
        .network
        .inject_fault(&node_endpoint(1), Fault::RejectSign);
    let signer = deployment.signer();

    let report = signer
        .run_ceremony(b"hello", HashAlgorithm::Keccak256, std::future::pending())
        .await;
    assert!(matches!(report.result, Err(Error::Protocol { party: 0, .. })));
    assert_eq!(report.reached, CeremonyState::Signing);
    assert_cleaned_exactly_once(&deployment);
}

#[tokio::test]
async fn test_tampered_coefficient_fails_verification() {
    let deployment = deployment(10);
    deployment
        .network
        .inject_fault(&node_endpoint(2), Fault::TamperCoefficient);
    let signer = deployment.signer();

    let report = signer
        .run_ceremony(b"hello world", HashAlgorithm::Keccak256, std::future::pending())
        .await;
    match &report.result {
        Err(Error::Consistency(reason)) => assert!(reason.contains("invalid signature")),
        other => panic!("expected consistency failure, got {:?}", other),
    }
    assert_eq!(report.reached, CeremonyState::Verifying);
    assert_eq!(report.final_state, CeremonyState::Terminated { success: false });
    assert_cleaned_exactly_once(&deployment);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_precompute_times_out() {
    let mut deployment = deployment(11);
    deployment.config.round_timeout_secs = 5;
    deployment
        .network
        .inject_fault(&node_endpoint(2), Fault::StallPrecompute);
    let signer = deployment.signer();

    let report = signer
        .run_ceremony(b"hello", HashAlgorithm::Keccak256, std::future::pending())
        .await;
    assert!(matches!(report.result, Err(Error::Timeout(_))));
    assert_eq!(report.reached, CeremonyState::Precomputing);
    assert_cleaned_exactly_once(&deployment);
}

#[tokio::test(start_paused = true)]
async fn test_abort_still_cleans_up() {
    let deployment = deployment(12);
    deployment
        .network
        .inject_fault(&node_endpoint(1), Fault::StallSign);
    let signer = deployment.signer();

    let abort = tokio::time::sleep(Duration::from_secs(1));
    let report = signer
        .run_ceremony(b"hello", HashAlgorithm::Keccak256, abort)
        .await;
    assert!(matches!(report.result, Err(Error::Aborted)));
    assert_eq!(report.reached, CeremonyState::Signing);
    assert_cleaned_exactly_once(&deployment);
}

#[tokio::test]
async fn test_cleanup_failure_does_not_replace_result() {
    let deployment = deployment(13);
    deployment
        .network
        .inject_fault(&node_endpoint(3), Fault::RejectCleanup);
    let signer = deployment.signer();

    let report = signer
        .run_ceremony(b"hello", HashAlgorithm::Keccak256, std::future::pending())
        .await;
    assert!(report.result.is_ok());
    assert_eq!(report.cleanup_errors.len(), 1);
    assert!(matches!(report.cleanup_errors[0], Error::Cleanup(_)));

    let stats = deployment.network.stats(&node_endpoint(3));
    assert_eq!((stats.cleanups, stats.closes), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_abort_while_connecting_cleans_opened_connections() {
    let deployment = deployment(14);
    let signer = signer_with_slow_node(&deployment, 3);

    let abort = tokio::time::sleep(Duration::from_secs(1));
    let report = signer
        .run_ceremony(b"hello", HashAlgorithm::Keccak256, abort)
        .await;
    assert!(matches!(report.result, Err(Error::Aborted)));
    assert_eq!(report.reached, CeremonyState::Initialized);
    assert_eq!(report.connections_closed, 2);

    for node in [1, 2] {
        let stats = deployment.network.stats(&node_endpoint(node));
        assert_eq!((stats.connects, stats.cleanups, stats.closes), (1, 1, 1));
    }
    assert_eq!(deployment.network.stats(&node_endpoint(3)).connects, 0);
    assert_eq!(deployment.network.active_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_is_a_connection_error() {
    let mut deployment = deployment(15);
    deployment.config.connect_timeout_secs = 2;
    let signer = signer_with_slow_node(&deployment, 2);

    let report = signer
        .run_ceremony(b"hello", HashAlgorithm::Keccak256, std::future::pending())
        .await;
    assert!(matches!(report.result, Err(Error::Connection(_))));
    assert_eq!(report.connections_closed, 2);

    for node in [1, 3] {
        let stats = deployment.network.stats(&node_endpoint(node));
        assert_eq!((stats.connects, stats.cleanups, stats.closes), (1, 1, 1));
    }
    assert_eq!(deployment.network.stats(&node_endpoint(2)).connects, 0);
}

#[tokio::test]
async fn test_engine_load_failure_cleans_every_connection() {
    let deployment = deployment(16);
    let signer = signer_with_broken_engine(&deployment, true);

    let report = signer
        .run_ceremony(b"hello", HashAlgorithm::Keccak256, std::future::pending())
        .await;
    assert!(matches!(report.result, Err(Error::Engine(_))));
    assert_eq!(report.connections_closed, 3);
    assert_cleaned_exactly_once(&deployment);
}

#[tokio::test]
async fn test_failure_after_connecting_cleans_every_connection() {
    let deployment = deployment(17);
    let signer = signer_with_broken_engine(&deployment, false);

    let report = signer
        .run_ceremony(b"hello", HashAlgorithm::Keccak256, std::future::pending())
        .await;
    assert!(matches!(report.result, Err(Error::Engine(_))));
    assert_eq!(report.reached, CeremonyState::Connected);
    assert_eq!(report.connections_closed, 3);
    assert_cleaned_exactly_once(&deployment);
    for node in nodes(&deployment) {
        assert_eq!(deployment.network.stats(&node_endpoint(node)).precomputes, 0);
    }
}
