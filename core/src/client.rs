//! Client facade.
//!
//! # Design
//! `AlmaClient` owns the transport and the frozen resource registry. Setup
//! happens once, in the constructor: declare every resource type, then push
//! the transport into `user` with `set_config`, which carries it down to
//! loans, requests and fees. Nothing mutates the registry afterwards.

use std::sync::Arc;

use tracing::info;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::resource::{ConfigPatch, Registry};
use crate::resources::{default_registry, Users, USER};
use crate::transport::{ReqwestExecutor, Transport};

/// Entry point of the library.
///
/// ```no_run
/// # async fn run() -> alma_core::Result<()> {
/// use alma_core::{AlmaClient, ClientConfig};
///
/// let client = AlmaClient::new(ClientConfig::new("my-api-key"))?;
/// let mut user = client.users.for_id("U1")?;
/// for (loan_id, loan) in user.loans().await? {
///     println!("{loan_id}: {:?}", loan.get("title"));
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AlmaClient {
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    pub users: Users,
}

impl AlmaClient {
    /// Build a client talking to Alma over HTTPS.
    ///
    /// Fails with `AlmaError::Configuration` when no API key is given and
    /// `ALMA_KEY` is unset.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api_key = config.resolve_api_key(|name| std::env::var(name).ok())?;
        let executor = Arc::new(ReqwestExecutor::new()?);
        let api = config.build_api(&api_key, executor);
        info!(region = %config.region, base_url = api.base_url(), "Alma client configured");
        Self::with_transport(Arc::new(api))
    }

    /// Build a client from `ALMA_KEY` / `ALMA_REGION` / `ALMA_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env())
    }

    /// Build a client on top of any transport.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Result<Self> {
        let mut registry = default_registry();
        registry.set_config(USER, &ConfigPatch::new().with_transport(Arc::clone(&transport)))?;
        let registry = Arc::new(registry);
        Ok(Self {
            transport,
            users: Users::new(Arc::clone(&registry)),
            registry,
        })
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl std::fmt::Debug for AlmaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlmaClient")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
