//! Common test utilities
//!
//! Wires in-memory stores, an in-memory credential engine and a manual clock
//! into a `Reconciler`, so reconciliation can be driven step by step without a
//! cluster or a Vault server.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube_runtime::controller::Action;
use std::sync::{Arc, Once};
use std::time::Duration;
use vault_access_controller::config::ControllerConfig;
use vault_access_controller::controller::reconciler::{reconcile, Reconciler, ReconcilerError};
use vault_access_controller::controller::AccessProvisioner;
use vault_access_controller::crd::{AccessRequest, AccessRequestSpec, RoleKind, RoleRef, SubjectRef};
use vault_access_controller::sync::{
    Clock, ManualClock, MemoryStore, ObjectStore, ResourceSynchronizer, RetryConfig,
};
use vault_access_controller::vault::{CredentialEngine, MemoryEngine, StaticConnector};

static RUSTLS_INIT: Once = Once::new();

/// Install the ring crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

/// Backend path the default request issues against
pub const PG_ROLE_PATH: &str = "database/creds/k8s.-.pg.readonly";

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Short retry budget; with a `ManualClock` it costs no wall time anyway
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        interval: Duration::from_millis(10),
        timeout: Duration::from_millis(100),
    }
}

/// Postgres request granting a ServiceAccount read access
pub fn pg_request(name: &str, namespace: &str) -> AccessRequest {
    let mut request = AccessRequest::new(
        name,
        AccessRequestSpec {
            role_ref: RoleRef {
                kind: RoleKind::Postgres,
                name: "readonly".to_string(),
                namespace: None,
            },
            subjects: vec![SubjectRef {
                kind: "ServiceAccount".to_string(),
                name: "pg-sa".to_string(),
                namespace: Some(namespace.to_string()),
                api_group: None,
            }],
            engine_path: None,
            key_algorithm: None,
            key_type: None,
            secret_type: None,
            credential_type: None,
            ttl: None,
        },
    );
    request.metadata.namespace = Some(namespace.to_string());
    request
}

fn synchronizer<K>(store: &Arc<MemoryStore<K>>, clock: &Arc<ManualClock>) -> ResourceSynchronizer<K>
where
    K: vault_access_controller::sync::StoreObject,
{
    let store: Arc<dyn ObjectStore<K>> = Arc::clone(store) as Arc<dyn ObjectStore<K>>;
    let clock: Arc<dyn Clock> = Arc::clone(clock) as Arc<dyn Clock>;
    ResourceSynchronizer::new(store, fast_retry(), clock)
}

/// A reconciler over in-memory collaborators
pub struct Harness {
    pub requests: Arc<MemoryStore<AccessRequest>>,
    pub secrets: Arc<MemoryStore<Secret>>,
    pub roles: Arc<MemoryStore<Role>>,
    pub bindings: Arc<MemoryStore<RoleBinding>>,
    pub engine: Arc<MemoryEngine>,
    pub clock: Arc<ManualClock>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    /// Engine with the default Postgres role registered
    pub fn new() -> Self {
        let engine = MemoryEngine::new();
        engine.add_role(PG_ROLE_PATH, [("username", "v-pg-1"), ("password", "s3cret")]);
        Self::with_engine(engine)
    }

    pub fn with_engine(engine: MemoryEngine) -> Self {
        let requests = Arc::new(MemoryStore::new());
        let secrets = Arc::new(MemoryStore::new());
        let roles = Arc::new(MemoryStore::new());
        let bindings = Arc::new(MemoryStore::new());
        let engine = Arc::new(engine);
        let clock = Arc::new(ManualClock::new(start_time()));

        let provisioner = AccessProvisioner::new(
            synchronizer(&secrets, &clock),
            synchronizer(&roles, &clock),
            synchronizer(&bindings, &clock),
        );
        let backend = Arc::new(StaticConnector(
            Arc::clone(&engine) as Arc<dyn CredentialEngine>,
        ));
        let reconciler = Arc::new(Reconciler::new(
            synchronizer(&requests, &clock),
            provisioner,
            backend,
            ControllerConfig::default(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));

        Self {
            requests,
            secrets,
            roles,
            bindings,
            engine,
            clock,
            reconciler,
        }
    }

    /// Store the request the way the API server would (uid, generation)
    pub async fn create(&self, request: &AccessRequest) -> AccessRequest {
        self.requests.create(request).await.unwrap()
    }

    pub async fn get(&self, namespace: &str, name: &str) -> AccessRequest {
        self.requests.get(namespace, name).await.unwrap()
    }

    /// Reconcile the latest stored version of the request
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, ReconcilerError> {
        let latest = self.get(namespace, name).await;
        reconcile(Arc::new(latest), Arc::clone(&self.reconciler)).await
    }

    /// Replace the spec, bumping the generation
    pub async fn edit_spec(
        &self,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut AccessRequestSpec),
    ) -> AccessRequest {
        let mut current = self.get(namespace, name).await;
        edit(&mut current.spec);
        self.requests.update(&current).await.unwrap()
    }
}
