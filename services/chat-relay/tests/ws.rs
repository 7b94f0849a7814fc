use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agent_runtime::{
    Content, GenerateRequest, GenerativeModel, ModelError, ModelStream, Role, Runner,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chat_relay::{serve, AppState, RelayConfig, SessionRegistry};
use futures::stream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Answers every turn by echoing the latest user text in two fragments.
struct EchoModel;

#[async_trait]
impl GenerativeModel for EchoModel {
    async fn stream_generate(&self, request: GenerateRequest) -> Result<ModelStream, ModelError> {
        let last = request
            .contents
            .iter()
            .rev()
            .find(|content| content.role == Role::User)
            .map(Content::text)
            .unwrap_or_default();
        let chunks = vec![
            Ok(Content::model_text("echo: ")),
            Ok(Content::model_text(last)),
        ];
        Ok(stream::iter(chunks).boxed())
    }
}

struct Harness {
    addr: SocketAddr,
    registry: SessionRegistry,
    shutdown: oneshot::Sender<()>,
    server: tokio::task::JoinHandle<()>,
}

async fn start() -> Result<Harness> {
    let personas = personas::default_registry()?;
    let runner = Runner::builder("ws test", personas.root().clone(), Arc::new(EchoModel)).build();
    let registry = SessionRegistry::new();
    let state = AppState::new(Arc::new(runner), RelayConfig::default().with_static_dir("/nonexistent"))
        .with_registry(registry.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown, signal) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let _ = serve(listener, state, async {
            let _ = signal.await;
        })
        .await;
    });
    Ok(Harness {
        addr,
        registry,
        shutdown,
        server,
    })
}

async fn next_text<S>(socket: &mut S) -> Result<String>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = timeout(Duration::from_secs(5), socket.next())
            .await?
            .ok_or_else(|| anyhow!("socket closed"))??;
        match message {
            Message::Text(text) => return Ok(text),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return Err(anyhow!("unexpected frame {other:?}")),
        }
    }
}

async fn wait_for_sessions(registry: &SessionRegistry, count: usize) -> Result<()> {
    timeout(Duration::from_secs(5), async {
        while registry.len().await != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn browser_round_trip_over_websocket() -> Result<()> {
    let harness = start().await?;
    let url = format!("ws://{}/ws/session-1", harness.addr);
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await?;
    wait_for_sessions(&harness.registry, 1).await?;
    assert!(harness.registry.contains("session-1").await);

    socket.send(Message::Text("hello".into())).await?;
    assert_eq!(
        next_text(&mut socket).await?,
        r#"{"type":"agent_message","message":"echo: "}"#
    );
    assert_eq!(
        next_text(&mut socket).await?,
        r#"{"type":"agent_message","message":"hello"}"#
    );
    assert_eq!(
        next_text(&mut socket).await?,
        r#"{"type":"agent_turn_complete","turn_complete":true}"#
    );

    socket.close(None).await?;
    wait_for_sessions(&harness.registry, 0).await?;

    let _ = harness.shutdown.send(());
    timeout(Duration::from_secs(5), harness.server).await??;
    Ok(())
}

#[tokio::test]
async fn closing_one_session_leaves_the_other() -> Result<()> {
    let harness = start().await?;
    let (mut first, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/ws/a", harness.addr)).await?;
    let (mut second, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/ws/b", harness.addr)).await?;
    wait_for_sessions(&harness.registry, 2).await?;

    first.close(None).await?;
    wait_for_sessions(&harness.registry, 1).await?;
    assert!(harness.registry.contains("b").await);

    second.send(Message::Text("ping".into())).await?;
    assert_eq!(
        next_text(&mut second).await?,
        r#"{"type":"agent_message","message":"echo: "}"#
    );
    assert_eq!(
        next_text(&mut second).await?,
        r#"{"type":"agent_message","message":"ping"}"#
    );

    second.close(None).await?;
    wait_for_sessions(&harness.registry, 0).await?;
    let _ = harness.shutdown.send(());
    Ok(())
}
