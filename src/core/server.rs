//! TCP listener
//!
//! Accepts device connections and spawns one worker task per connection,
//! each under its own tracing span carrying a connection id and the peer
//! address. All binary families share the single listener; the negotiator
//! sorts them out from the first bytes.

use crate::core::error::GatewayError;
use crate::core::protocol::Negotiator;
use crate::core::store::DeviceStore;
use crate::core::worker::{run_connection, WorkerSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Listener owning the shared negotiator and store handles
pub struct GatewayServer {
    negotiator: Arc<Negotiator<OwnedReadHalf>>,
    store: Arc<dyn DeviceStore>,
    settings: WorkerSettings,
}

impl GatewayServer {
    /// Assemble a server from its collaborators
    pub fn new(
        negotiator: Negotiator<OwnedReadHalf>,
        store: Arc<dyn DeviceStore>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            negotiator: Arc::new(negotiator),
            store,
            settings,
        }
    }

    /// Bind and accept until the task is cancelled
    pub async fn serve(&self, listen: SocketAddr) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(listen).await?;
        self.serve_on(listener).await
    }

    /// Accept on an already-bound listener
    pub async fn serve_on(&self, listener: TcpListener) -> Result<(), GatewayError> {
        let listen = listener.local_addr()?;
        info!(%listen, candidates = self.negotiator.len(), "gateway listening");

        loop {
            let (socket, peer) = listener.accept().await?;
            self.spawn_connection(socket, peer);
        }
    }

    fn spawn_connection(&self, socket: tokio::net::TcpStream, peer: SocketAddr) {
        let connection_id = Uuid::new_v4();
        let span = info_span!("connection", id = %connection_id, %peer);
        let negotiator = self.negotiator.clone();
        let store = self.store.clone();
        let settings = self.settings;

        tokio::spawn(
            async move {
                let (read, write) = socket.into_split();
                match run_connection(read, write, &negotiator, store, settings).await {
                    Ok(stats) => {
                        info!(saved = stats.saved, failed = stats.failed, "connection finished")
                    }
                    Err(e) if e.is_clean_close() => {}
                    Err(e) => error!(error = %e, "connection failed"),
                }
            }
            .instrument(span),
        );
    }
}
