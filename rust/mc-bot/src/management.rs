//! Secure Management Channel.
//!
//! Mutually authenticated gRPC client for the management service that runs
//! on the game server instance. The connection is dialed lazily, reused while
//! it is ready, and dropped when the instance is stopped.

use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::{debug, info, instrument, warn};

use crate::Outcome;
use crate::config::Config;
use crate::controller::{ConnectionCloser, DONE};
use crate::error::{BotError, BotResult};
use crate::logging::OpTimer;

// Generated protobuf types
pub mod proto {
    tonic::include_proto!("mcmanagement");
}

use proto::mc_management_client::McManagementClient;
use proto::update_whitelist_request::Action;
use proto::update_whitelist_response::ResultCode;
use proto::{UpdateWhitelistRequest, UpdateWhitelistResponse};

/// Connectivity of the management transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Never dialed
    Idle,
    Connecting,
    Ready,
    /// Last dial or call failed at the transport level; next call redials
    TransientFailure,
    /// Closed on purpose (instance stopped or process exiting)
    Shutdown,
}

/// One established connection able to issue the whitelist RPC.
#[async_trait]
pub trait WhitelistRpc: Send + Sync {
    async fn update_whitelist(
        &self,
        request: UpdateWhitelistRequest,
    ) -> Result<UpdateWhitelistResponse, tonic::Status>;
}

/// Dials the management service, completing the handshake before returning.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> BotResult<Arc<dyn WhitelistRpc>>;
}

struct GrpcWhitelist {
    client: McManagementClient<Channel>,
}

#[async_trait]
impl WhitelistRpc for GrpcWhitelist {
    async fn update_whitelist(
        &self,
        request: UpdateWhitelistRequest,
    ) -> Result<UpdateWhitelistResponse, tonic::Status> {
        // Clones share the underlying channel
        let mut client = self.client.clone();
        let response = client.update_whitelist(tonic::Request::new(request)).await?;
        Ok(response.into_inner())
    }
}

/// mTLS connector: fixed client identity, trusted root bundle, and a server
/// identity pinned to the management hostname.
#[derive(Debug, Clone)]
pub struct TlsConnector {
    uri: String,
    server_name: String,
    client_cert_path: PathBuf,
    client_key_path: PathBuf,
    ca_cert_path: PathBuf,
    connect_timeout: Duration,
}

impl TlsConnector {
    pub fn from_config(config: &Config) -> Self {
        let management = &config.management;
        Self {
            uri: format!("https://{}", config.management_endpoint()),
            server_name: management.address.clone(),
            client_cert_path: management.client_cert_path.clone(),
            client_key_path: management.client_key_path.clone(),
            ca_cert_path: management.ca_cert_path.clone(),
            connect_timeout: config.connect_timeout(),
        }
    }

    async fn tls_config(&self) -> BotResult<ClientTlsConfig> {
        let cert = read_pem(&self.client_cert_path, "client certificate").await?;
        let key = read_pem(&self.client_key_path, "client key").await?;
        let ca = read_pem(&self.ca_cert_path, "ca certificate").await?;

        Ok(ClientTlsConfig::new()
            .domain_name(self.server_name.clone())
            .ca_certificate(Certificate::from_pem(ca))
            .identity(Identity::from_pem(cert, key)))
    }
}

async fn read_pem(path: &Path, what: &str) -> BotResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        BotError::Connection(format!("failed to read {what} {}: {e}", path.display()))
    })
}

/// Render an error with its source chain; tonic's transport errors hide the
/// useful part in their sources.
fn error_chain(err: &dyn StdError) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self) -> BotResult<Arc<dyn WhitelistRpc>> {
        let tls = self.tls_config().await?;

        let endpoint = Endpoint::from_shared(self.uri.clone())
            .map_err(|e| BotError::Connection(format!("invalid endpoint {}: {e}", self.uri)))?
            .tls_config(tls)
            .map_err(|e| BotError::Connection(format!("invalid TLS config: {}", error_chain(&e))))?
            .connect_timeout(self.connect_timeout);

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| BotError::Connection(error_chain(&e)))?;

        info!(endpoint = %self.uri, "Connected to MC management server");
        Ok(Arc::new(GrpcWhitelist {
            client: McManagementClient::new(channel),
        }))
    }
}

struct Slot {
    readiness: Readiness,
    rpc: Option<Arc<dyn WhitelistRpc>>,
    /// Bumped on every successful dial so late failures of an old
    /// connection cannot mark a newer one as failed
    generation: u64,
}

/// Process-wide handle to the management service.
pub struct ManagementChannel {
    connector: Arc<dyn Connector>,
    rpc_timeout: Duration,
    slot: Mutex<Slot>,
}

impl ManagementChannel {
    pub fn new(connector: Arc<dyn Connector>, rpc_timeout: Duration) -> Self {
        Self {
            connector,
            rpc_timeout,
            slot: Mutex::new(Slot {
                readiness: Readiness::Idle,
                rpc: None,
                generation: 0,
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(TlsConnector::from_config(config)),
            config.rpc_timeout(),
        )
    }

    pub async fn readiness(&self) -> Readiness {
        self.slot.lock().await.readiness
    }

    /// Add `player` to the server whitelist.
    #[instrument(skip(self))]
    pub async fn whitelist(&self, player: &str) -> Outcome {
        let player = player.trim();
        if player.is_empty() {
            return Outcome::failed("no player name given");
        }

        let timer = OpTimer::new("management", "whitelist");
        let result = self.try_whitelist(player).await;
        timer.finish_with_result(&result);

        match result {
            Ok(()) => Outcome::ok(DONE),
            Err(err @ BotError::Connection(_)) => Outcome::failed(err.to_string()),
            Err(BotError::Rejected(text)) => {
                Outcome::failed(format!("whitelist operation failed: {text}"))
            }
            Err(err) => Outcome::failed(format!("whitelist operation failed: {err}")),
        }
    }

    async fn try_whitelist(&self, player: &str) -> BotResult<()> {
        let (rpc, generation) = self.ready_rpc().await?;

        let request = UpdateWhitelistRequest {
            action: Action::Add.into(),
            player_name: player.to_string(),
        };

        // The slot lock is not held here; concurrent calls share the connection
        let response =
            match tokio::time::timeout(self.rpc_timeout, rpc.update_whitelist(request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(status)) => {
                    self.note_rpc_failure(generation, &status).await;
                    return Err(status.into());
                }
                Err(_) => {
                    return Err(BotError::Rpc(format!(
                        "deadline exceeded after {}s",
                        self.rpc_timeout.as_secs()
                    )));
                }
            };

        if response.result_code == i32::from(ResultCode::AddOk) {
            info!(player, "Player whitelisted");
            return Ok(());
        }

        let code = ResultCode::try_from(response.result_code)
            .map_or_else(|_| format!("code {}", response.result_code), |c| c.as_str_name().to_string());
        warn!(player, code = %code, response = %response.response, "Whitelist request rejected");
        Err(BotError::Rejected(format!("{code}: {}", response.response)))
    }

    /// Return the live connection, dialing a new one when none is ready.
    ///
    /// The check-and-dial sequence runs under the slot lock so concurrent
    /// callers never dial twice.
    async fn ready_rpc(&self) -> BotResult<(Arc<dyn WhitelistRpc>, u64)> {
        let mut slot = self.slot.lock().await;

        if slot.readiness == Readiness::Ready {
            if let Some(rpc) = &slot.rpc {
                return Ok((Arc::clone(rpc), slot.generation));
            }
        }

        debug!(previous = ?slot.readiness, "Dialing management server");
        slot.readiness = Readiness::Connecting;
        slot.rpc = None;

        let timer = OpTimer::new("management", "dial");
        let dialed = self.connector.connect().await;
        timer.finish_with_result(&dialed);

        match dialed {
            Ok(rpc) => {
                slot.generation += 1;
                slot.rpc = Some(Arc::clone(&rpc));
                slot.readiness = Readiness::Ready;
                Ok((rpc, slot.generation))
            }
            Err(e) => {
                slot.readiness = Readiness::TransientFailure;
                Err(e)
            }
        }
    }

    async fn note_rpc_failure(&self, generation: u64, status: &tonic::Status) {
        let transport_level = matches!(
            status.code(),
            tonic::Code::Unavailable | tonic::Code::Unknown | tonic::Code::Cancelled
        );
        if !transport_level {
            return;
        }

        let mut slot = self.slot.lock().await;
        if slot.generation == generation && slot.readiness == Readiness::Ready {
            warn!(code = ?status.code(), "Management connection no longer ready");
            slot.readiness = Readiness::TransientFailure;
        }
    }

    /// Drop the connection; the next whitelist call dials again.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        if slot.rpc.take().is_some() {
            info!("Closing management server connection");
        }
        slot.readiness = Readiness::Shutdown;
    }
}

#[async_trait]
impl ConnectionCloser for ManagementChannel {
    async fn close(&self) {
        ManagementChannel::close(self).await;
    }
}

impl fmt::Debug for ManagementChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagementChannel")
            .field("rpc_timeout", &self.rpc_timeout)
            .finish_non_exhaustive()
    }
}
