//! End-to-end tests against an in-process WebSocket relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HandshakeRequest, Response as HandshakeResponse,
};

use relay_messaging::protocol::{Event, Method, Request, Response};
use relay_messaging::{
    AckKind, ClientEvent, ClientOptions, ConnectionState, Error, Message, MessageId,
    MessageStatus, MessagingClient, RequestId, UserId, WsOptions,
};

// ============================================================================
// Test Relay
// ============================================================================

/// Behavior of the in-process relay.
#[derive(Clone, Default)]
struct Script {
    /// Frames pushed right after the `ready` frame.
    greeting: Vec<Event>,
    /// Close each session after this long.
    close_after: Option<Duration>,
    /// Stop accepting after this many sessions.
    max_sessions: Option<usize>,
}

/// Minimal relay answering the chat RPCs.
struct TestRelay {
    addr: SocketAddr,
    methods: Arc<Mutex<Vec<String>>>,
    tokens: Arc<Mutex<Vec<String>>>,
}

impl TestRelay {
    async fn start(script: Script) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let methods = Arc::new(Mutex::new(Vec::new()));
        let tokens = Arc::new(Mutex::new(Vec::new()));

        let relay = Self {
            addr,
            methods: Arc::clone(&methods),
            tokens: Arc::clone(&tokens),
        };

        tokio::spawn(async move {
            let mut sessions = 0;
            while let Ok((stream, _)) = listener.accept().await {
                sessions += 1;
                tokio::spawn(serve(
                    stream,
                    script.clone(),
                    Arc::clone(&methods),
                    Arc::clone(&tokens),
                ));
                if script.max_sessions.is_some_and(|max| sessions >= max) {
                    break;
                }
            }
        });

        Ok(relay)
    }

    fn url(&self) -> String {
        format!("ws://{}/hubs/chat", self.addr)
    }

    fn methods(&self) -> Vec<String> {
        self.methods.lock().clone()
    }
}

async fn serve(
    stream: TcpStream,
    script: Script,
    methods: Arc<Mutex<Vec<String>>>,
    tokens: Arc<Mutex<Vec<String>>>,
) {
    let callback = move |request: &HandshakeRequest,
                         response: HandshakeResponse|
          -> Result<HandshakeResponse, ErrorResponse> {
        if let Some(query) = request.uri().query() {
            tokens.lock().push(query.to_string());
        }
        Ok(response)
    };

    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    let ready = Response::success(RequestId::ready(), json!({ "connectionId": "conn-1" }));
    if send_json(&mut ws, &ready).await.is_err() {
        return;
    }
    if !script.greeting.is_empty() {
        // Let the client finish its handshake bookkeeping first.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    for event in &script.greeting {
        if send_json(&mut ws, event).await.is_err() {
            return;
        }
    }

    let mut issued = 0u64;
    let deadline = script
        .close_after
        .map(|after| tokio::time::Instant::now() + after);

    loop {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, ws.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let _ = ws.close(None).await;
                    return;
                }
            },
            None => ws.next().await,
        };

        let Some(Ok(WsMessage::Text(text))) = next else {
            return;
        };
        let Ok(request) = serde_json::from_str::<Request>(&text) else {
            continue;
        };

        methods.lock().push(request.method.name().to_string());

        match request.method {
            Method::SendMessage { .. } => {
                issued += 1;
                let id = MessageId::new(format!("srv-{issued}"));
                let response = Response::success(request.id, json!({ "id": id }));
                let delivered = Event::message_status(&id, MessageStatus::Delivered);
                if send_json(&mut ws, &response).await.is_err()
                    || send_json(&mut ws, &delivered).await.is_err()
                {
                    return;
                }
            }
            Method::MarkDelivered { .. } | Method::MarkRead { .. } => {
                let response = Response::success(request.id, Value::Null);
                if send_json(&mut ws, &response).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn send_json(
    ws: &mut WebSocketStream<TcpStream>,
    frame: &impl serde::Serialize,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(frame)?;
    ws.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_options() -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(2))
        .with_backoff_step(Duration::from_millis(20))
        .with_simulated_delays(Duration::from_millis(20), Duration::from_millis(50))
        .with_ws(
            WsOptions::default()
                .with_ready_timeout(Duration::from_secs(2))
                .with_reconnect_delays([Duration::from_millis(10), Duration::from_millis(20)]),
        )
}

fn client(url: String) -> anyhow::Result<MessagingClient> {
    Ok(MessagingClient::builder()
        .relay_url(url)
        .options(fast_options())
        .build()?)
}

/// Waits for the first event matching `predicate`.
async fn wait_for(
    events: &mut broadcast::Receiver<ClientEvent>,
    predicate: impl Fn(&ClientEvent) -> bool,
) -> anyhow::Result<ClientEvent> {
    let found = timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await??;
    Ok(found)
}

async fn unused_url() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("ws://{addr}/hubs/chat"))
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_connected_send_is_delivered() -> anyhow::Result<()> {
    init_tracing();
    let relay = TestRelay::start(Script::default()).await?;
    let client = client(relay.url())?;
    let mut events = client.subscribe();

    let state = client.connect("secret-token").await;
    assert_eq!(state.state, ConnectionState::Connected);
    assert!(relay.tokens.lock().iter().any(|q| q.contains("access_token=secret-token")));

    let id = client.send("consumer-1", "provider-2", "hi").await?;
    assert!(!id.is_simulated());

    let expected = id.clone();
    wait_for(&mut events, |event| {
        matches!(
            event,
            ClientEvent::MessageStatusChanged { message_id, status: MessageStatus::Delivered }
                if *message_id == expected
        )
    })
    .await?;

    assert_eq!(client.message_status(id.as_str()), Some(MessageStatus::Delivered));
    assert_eq!(relay.methods(), vec!["chat.sendMessage".to_string()]);

    client.disconnect().await;
    assert_eq!(client.connection_state().state, ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_inbound_message_and_presence() -> anyhow::Result<()> {
    init_tracing();
    let inbound = Message::new(
        MessageId::new("srv-77"),
        UserId::new("provider-2"),
        UserId::new("consumer-1"),
        "Your order is ready",
        MessageStatus::Sent,
    );
    let relay = TestRelay::start(Script {
        greeting: vec![
            Event::presence(&UserId::new("provider-2"), "Online"),
            Event::message_received(&inbound),
        ],
        ..Script::default()
    })
    .await?;

    let client = client(relay.url())?;
    client.set_foreground(false);
    let mut events = client.subscribe();
    client.connect("t").await;

    let received = wait_for(&mut events, |event| {
        matches!(event, ClientEvent::MessageReceived { simulated: false, .. })
    })
    .await?;
    let ClientEvent::MessageReceived { message, .. } = received else {
        unreachable!("matched above");
    };
    assert_eq!(message.id, inbound.id);

    wait_for(&mut events, |event| matches!(event, ClientEvent::Notification { .. })).await?;
    wait_for(&mut events, |event| {
        matches!(
            event,
            ClientEvent::MessageStatusChanged { status: MessageStatus::Delivered, .. }
        )
    })
    .await?;

    assert!(client.is_online("provider-2"));
    assert!(!client.is_online("provider-3"));
    assert!(relay.methods().contains(&"chat.markDelivered".to_string()));

    assert_ok!(client.acknowledge("srv-77", AckKind::Read).await);
    assert_eq!(client.message_status("srv-77"), Some(MessageStatus::Read));
    Ok(())
}

#[tokio::test]
async fn test_unreachable_relay_degrades() -> anyhow::Result<()> {
    init_tracing();
    let client = client(unused_url().await?)?;

    let state = client.connect("t").await;
    assert_eq!(state.state, ConnectionState::DegradedMode);
    assert!(state.degraded);
    assert_eq!(state.retry_count, 3);

    let again = client.connect("t").await;
    assert_eq!(again.state, ConnectionState::DegradedMode);
    assert_eq!(again.retry_count, 3);

    let mut events = client.subscribe();
    let id = client.send("a", "b", "what's the price?").await?;
    assert!(id.is_simulated());

    let reply = wait_for(&mut events, |event| {
        matches!(event, ClientEvent::MessageReceived { simulated: true, .. })
    })
    .await?;
    let ClientEvent::MessageReceived { message, .. } = reply else {
        unreachable!("matched above");
    };
    assert!(message.id.is_simulated());
    assert!(message.content.contains("quote"));
    assert_eq!(client.message_status(id.as_str()), Some(MessageStatus::Delivered));
    Ok(())
}

#[tokio::test]
async fn test_relay_loss_exhausts_reconnect_then_degrades() -> anyhow::Result<()> {
    init_tracing();
    let relay = TestRelay::start(Script {
        close_after: Some(Duration::from_millis(100)),
        max_sessions: Some(1),
        ..Script::default()
    })
    .await?;

    let client = client(relay.url())?;
    let mut events = client.subscribe();
    assert!(client.connect("t").await.is_connected());

    wait_for(&mut events, |event| {
        matches!(
            event,
            ClientEvent::StatusChanged { status: ConnectionState::Reconnecting, .. }
        )
    })
    .await?;
    wait_for(&mut events, |event| {
        matches!(
            event,
            ClientEvent::StatusChanged { status: ConnectionState::DegradedMode, degraded: true, .. }
        )
    })
    .await?;

    let id = client.send("a", "b", "hello?").await?;
    assert!(id.is_simulated());
    Ok(())
}

#[tokio::test]
async fn test_empty_content_is_rejected() -> anyhow::Result<()> {
    init_tracing();
    let relay = TestRelay::start(Script::default()).await?;
    let client = client(relay.url())?;
    client.connect("t").await;

    let result = client.send("a", "b", "  ").await;
    let err = assert_err!(result);
    assert!(matches!(err, Error::Validation { field: "content", .. }));
    assert!(relay.methods().is_empty());
    Ok(())
}
