//! `ServerControl`: the one context object command handlers talk to.

use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::Outcome;
use crate::compute::auth::ServiceAccountTokenSource;
use crate::compute::gce::GceClient;
use crate::config::Config;
use crate::controller::{ConnectionCloser, LifecycleController};
use crate::error::BotResult;
use crate::management::ManagementChannel;

pub const UNABLE_TO_CHECK: &str = "unable to check if MC server is up";
pub const NOT_UP: &str =
    "the server isn't up, so you can't whitelist players. try starting the server first";

/// Owns the lifecycle controller and the management channel. Cheap to clone.
#[derive(Clone)]
pub struct ServerControl {
    controller: Arc<LifecycleController>,
    channel: Arc<ManagementChannel>,
    /// Whitelist calls hold it shared from the up-check through the RPC;
    /// `bring_down` holds it exclusively, so a stop never interleaves with a
    /// dial that was cleared against the old state.
    stop_gate: Arc<RwLock<()>>,
}

impl ServerControl {
    /// `controller` should close `channel` before stopping the instance
    /// (see [`LifecycleController::with_connection`]).
    pub fn new(controller: Arc<LifecycleController>, channel: Arc<ManagementChannel>) -> Self {
        Self {
            controller,
            channel,
            stop_gate: Arc::new(RwLock::new(())),
        }
    }

    /// Wire the production clients: Compute Engine over REST with
    /// service-account auth, and the mTLS management channel.
    pub fn from_config(config: &Config) -> BotResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let tokens = ServiceAccountTokenSource::from_key_file(
            http.clone(),
            &config.gcp.client_email,
            &config.gcp.token_url,
            &config.gcp.private_key_path,
        )?;
        let compute = GceClient::new(
            http,
            &config.gcp.api_base_url,
            &config.gcp.project_id,
            &config.gcp.zone,
            Arc::new(tokens),
        );

        let channel = Arc::new(ManagementChannel::from_config(config));
        let closer = Arc::clone(&channel) as Arc<dyn ConnectionCloser>;
        let controller =
            LifecycleController::from_config(Arc::new(compute), config).with_connection(closer);

        info!(
            project = %config.gcp.project_id,
            zone = %config.gcp.zone,
            instance = %config.instance.name,
            management = %config.management_endpoint(),
            "Server control initialized"
        );

        Ok(Self::new(Arc::new(controller), channel))
    }

    pub async fn bring_up(&self) -> Outcome {
        self.controller.bring_up().await
    }

    pub async fn bring_down(&self) -> Outcome {
        let _gate = self.stop_gate.write().await;
        self.controller.bring_down().await
    }

    pub async fn is_up(&self) -> BotResult<bool> {
        self.controller.is_up().await
    }

    /// Whitelist `player`, but only while the instance is running. The
    /// management server is never dialed otherwise.
    pub async fn whitelist(&self, player: &str) -> Outcome {
        self.checked_whitelist(player).await.1
    }

    /// Like [`Self::whitelist`], also returning what the up-check saw
    /// (`None` when the check itself failed).
    pub async fn checked_whitelist(&self, player: &str) -> (Option<bool>, Outcome) {
        let _gate = self.stop_gate.read().await;
        match self.controller.is_up().await {
            Ok(true) => (Some(true), self.channel.whitelist(player).await),
            Ok(false) => (Some(false), Outcome::failed(NOT_UP)),
            Err(e) => {
                warn!(error = %e, "Could not check server state before whitelisting");
                (None, Outcome::failed(UNABLE_TO_CHECK))
            }
        }
    }

    /// Release the management connection.
    pub async fn shutdown(&self) {
        self.channel.close().await;
    }
}

impl fmt::Debug for ServerControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerControl")
            .field("controller", &self.controller)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
