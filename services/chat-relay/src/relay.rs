//! Per-connection session lifecycle.
//!
//! A session moves through four phases. INIT opens the runtime session; on
//! failure the socket is closed with 1011 and nothing is registered. ACTIVE
//! runs the inbound and outbound pumps until either one stops, then aborts the
//! other and waits for it. DRAINING closes the request queue, removes the
//! registry entry, closes the socket if the client is still there and ends the
//! runtime session. CLOSED is the return from [`run_session`].

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agent_runtime::{AgentRuntime, Content, EventStream, LiveRequestQueue, LiveSession};
use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::RelayError;
use crate::frames::OutboundFrame;
use crate::registry::SessionRegistry;

/// Why a pump stopped on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    ClientDisconnected,
    AgentStreamEnded,
    SocketClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    Finished(PumpExit),
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub connection_id: Uuid,
    pub inbound: PumpOutcome,
    pub outbound: PumpOutcome,
}

/// Relays one WebSocket connection to a fresh runtime session until either
/// side goes away. Returns an error only when the runtime session could not
/// be started.
pub async fn run_session<S, R, E>(
    runtime: Arc<dyn AgentRuntime>,
    registry: SessionRegistry,
    session_id: String,
    sink: S,
    stream: R,
) -> Result<SessionReport, RelayError>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let client = ClientSink::new(sink);

    let LiveSession {
        requests,
        events,
        generation,
        ..
    } = match runtime.start_session(&session_id).await {
        Ok(live) => live,
        Err(err) => {
            error!(%session_id, error = %err, "failed to start agent session");
            client.close(close_code::ERROR, "agent session unavailable").await;
            return Err(err.into());
        }
    };

    let connection_id = registry.register(&session_id).await;
    info!(%session_id, %connection_id, "client connected");

    let client_gone = Arc::new(AtomicBool::new(false));
    let mut inbound = tokio::spawn(inbound_pump(
        session_id.clone(),
        stream,
        requests.clone(),
        Arc::clone(&client_gone),
    ));
    let mut outbound = tokio::spawn(outbound_pump(session_id.clone(), events, client.clone()));

    let (inbound_result, outbound_result) = tokio::select! {
        result = &mut inbound => {
            outbound.abort();
            (result, outbound.await)
        }
        result = &mut outbound => {
            inbound.abort();
            (inbound.await, result)
        }
    };
    let report = SessionReport {
        connection_id,
        inbound: pump_outcome(&session_id, "inbound", inbound_result),
        outbound: pump_outcome(&session_id, "outbound", outbound_result),
    };

    requests.close();
    let connected_for = registry.unregister(&session_id, connection_id).await;
    if !client_gone.load(Ordering::SeqCst) {
        client.close(close_code::NORMAL, "").await;
    }
    runtime.end_session(&session_id, generation).await;
    info!(%session_id, %connection_id, ?connected_for, "session closed");

    Ok(report)
}

fn pump_outcome(
    session_id: &str,
    pump: &'static str,
    result: Result<Result<PumpExit, RelayError>, JoinError>,
) -> PumpOutcome {
    match result {
        Ok(Ok(exit)) => {
            info!(session_id, pump, ?exit, "pump finished");
            PumpOutcome::Finished(exit)
        }
        Ok(Err(err)) => {
            warn!(session_id, pump, error = %err, "pump failed");
            PumpOutcome::Failed
        }
        Err(join) if join.is_cancelled() => {
            info!(session_id, pump, "pump cancelled");
            PumpOutcome::Cancelled
        }
        Err(join) => {
            warn!(session_id, pump, error = %join, "pump panicked");
            PumpOutcome::Failed
        }
    }
}

/// Closes the request queue when the inbound pump ends, however it ends.
struct QueueGuard(LiveRequestQueue);

impl Drop for QueueGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

async fn inbound_pump<R, E>(
    session_id: String,
    mut stream: R,
    requests: LiveRequestQueue,
    client_gone: Arc<AtomicBool>,
) -> Result<PumpExit, RelayError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let _guard = QueueGuard(requests.clone());
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(%session_id, bytes = text.len(), "client -> agent");
                requests.send_content(Content::user_text(text))?;
            }
            Ok(Message::Binary(data)) => {
                warn!(%session_id, bytes = data.len(), "ignoring binary frame");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                client_gone.store(true, Ordering::SeqCst);
                return Err(RelayError::Socket(err.to_string()));
            }
        }
    }
    client_gone.store(true, Ordering::SeqCst);
    Ok(PumpExit::ClientDisconnected)
}

async fn outbound_pump<S>(
    session_id: String,
    mut events: EventStream,
    client: ClientSink<S>,
) -> Result<PumpExit, RelayError>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    while let Some(item) = events.next().await {
        let event = item?;
        let Some(frame) = OutboundFrame::from_event(&event) else {
            continue;
        };
        let payload = frame.to_json()?;
        if let Err(err) = client.send(Message::Text(payload)).await {
            debug!(%session_id, error = %err, "client write failed");
            return Ok(PumpExit::SocketClosed);
        }
        debug!(%session_id, ?frame, "agent -> client");
    }
    Ok(PumpExit::AgentStreamEnded)
}

struct SinkState<S> {
    sink: S,
    closed: bool,
}

/// Write half of the socket, shared between the outbound pump and teardown.
struct ClientSink<S> {
    inner: Arc<Mutex<SinkState<S>>>,
}

impl<S> Clone for ClientSink<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> ClientSink<S>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    fn new(sink: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkState {
                sink,
                closed: false,
            })),
        }
    }

    async fn send(&self, message: Message) -> Result<(), RelayError> {
        let mut state = self.inner.lock().await;
        if state.closed {
            return Err(RelayError::Socket("socket already closed".to_string()));
        }
        state
            .sink
            .send(message)
            .await
            .map_err(|err| RelayError::Socket(err.to_string()))
    }

    /// Sends a close frame once. Later calls do nothing.
    async fn close(&self, code: u16, reason: &'static str) -> bool {
        let mut state = self.inner.lock().await;
        if state.closed {
            return false;
        }
        state.closed = true;
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        if let Err(err) = state.sink.send(Message::Close(Some(frame))).await {
            debug!(error = %err, "close frame not delivered");
        }
        true
    }
}
