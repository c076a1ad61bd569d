//! # Vault Access Controller
//!
//! A Kubernetes controller that brokers short-lived Vault credentials into
//! access-controlled Secrets.
//!
//! For every `AccessRequest` it:
//!
//! 1. **Issues a credential** - asks the Vault secret engine behind the role
//!    (database, AWS, GCP or Azure) for a leased credential
//! 2. **Exposes it** - writes the credential to a Secret
//! 3. **Grants access** - creates a Role allowing `get` on exactly that Secret and
//!    a RoleBinding for the request's subjects
//! 4. **Tracks the lease** - re-issues when the lease disappears and revokes it
//!    when the request is deleted
//!
//! ## Usage
//!
//! Configuration is read from the environment, see `ControllerConfig`.

use anyhow::Result;
use vault_access_controller::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init.client, init.reconciler, init.server_state, init.config).await
}
