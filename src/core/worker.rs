//! Per-connection worker
//!
//! One worker task per accepted connection: negotiate the protocol, answer
//! the login, optionally verify the device against the store, then decode
//! frames one at a time, answering acks inline and handing decoded items to
//! the dispatch sink. Clean EOF at a frame boundary ends the loop silently;
//! anything else closes the connection hard. Both paths drain the sink.

use crate::core::error::GatewayError;
use crate::core::protocol::Negotiator;
use crate::core::sink::{DispatchSink, SinkStats};
use crate::core::store::DeviceStore;
use crate::core::stream::FrameReader;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Per-connection knobs, copied out of the gateway config
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Dispatch queue capacity
    pub queue_capacity: usize,
    /// Reject devices the store does not know
    pub verify_devices: bool,
}

/// Drive one device connection to completion.
///
/// Returns the sink counters on a clean close; the caller decides how loudly
/// to log errors.
pub async fn run_connection<R, W>(
    read: R,
    mut write: W,
    negotiator: &Negotiator<R>,
    store: Arc<dyn DeviceStore>,
    settings: WorkerSettings,
) -> Result<SinkStats, GatewayError>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    let mut reader = FrameReader::new(read);

    // a connection that closes before sending anything is not an error
    if !reader.has_data().await? {
        debug!("connection closed before any bytes");
        return Ok(SinkStats::default());
    }

    let (login, protocol) = negotiator.negotiate(&mut reader).await?;
    let mut session = login.session;
    if !login.ack.is_empty() {
        write.write_all(&login.ack).await?;
        write.flush().await?;
    }

    if settings.verify_devices {
        match store.verify_device(session.device_id()).await? {
            None => {
                return Err(GatewayError::UnauthorizedDevice {
                    device_id: session.device_id().to_string(),
                })
            }
            Some(family) if family != session.family => {
                warn!(
                    device = %session.device_id(),
                    registered = %family,
                    negotiated = %session.family,
                    "device registered under a different family"
                );
            }
            Some(_) => {}
        }
        if let Some(model) = store.fetch_model(session.device_id()).await? {
            debug!(device = %session.device_id(), model = %model, "device model");
        }
    }

    info!(
        device = %session.device_id(),
        family = %session.family,
        "session established"
    );

    let sink = DispatchSink::spawn(store, settings.queue_capacity);
    let result = frame_loop(&mut reader, &mut write, protocol, &mut session, &sink).await;
    let stats = sink.close().await;

    result.map(|()| stats)
}

async fn frame_loop<R, W>(
    reader: &mut FrameReader<R>,
    write: &mut W,
    protocol: &dyn crate::core::protocol::Protocol<R>,
    session: &mut crate::core::session::ProtocolSession,
    sink: &DispatchSink,
) -> Result<(), GatewayError>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    loop {
        if !reader.has_data().await? {
            debug!(device = %session.device_id(), "clean close");
            return Ok(());
        }

        let outcome = protocol.read_frame(reader, session).await?;
        if let Some(ack) = &outcome.ack {
            write.write_all(ack).await?;
            write.flush().await?;
        }
        for record in outcome.records {
            sink.enqueue_status(record).await?;
        }
        for response in outcome.responses {
            sink.enqueue_response(response).await?;
        }
    }
}
