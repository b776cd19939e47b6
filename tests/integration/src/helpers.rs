//! Test helpers for gateway integration tests
//!
//! Provides a scriptable mock gateway server: it speaks the hello /
//! identify / resume handshake, optionally serves its frames through a
//! chunked zlib stream, and records everything the client sends so tests
//! can assert on the wire traffic.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use flate2::{Compress, Compression, FlushCompress};
use futures_util::{SinkExt, StreamExt};
use gateway_client::ShardMessage;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

/// Behavior knobs for the mock gateway
#[derive(Debug, Clone)]
pub struct MockGatewayOptions {
    /// Heartbeat interval advertised in the hello payload
    pub heartbeat_interval_ms: u64,

    /// Whether heartbeats are acknowledged (disable to zombie the client)
    pub ack_heartbeats: bool,

    /// Serve all frames through a connection-lifetime zlib stream
    pub compression: bool,

    /// Split each compressed message into chunks of this many bytes
    pub chunk_size: Option<usize>,
}

impl Default for MockGatewayOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 45_000,
            ack_heartbeats: true,
            compression: false,
            chunk_size: None,
        }
    }
}

/// Script actions broadcast to every live connection
#[derive(Debug, Clone)]
enum ServerAction {
    Close(u16),
    Reconnect,
    Dispatch { name: String, data: Value },
}

/// Everything the mock observed, keyed by connection id
#[derive(Debug, Default)]
struct MockGatewayState {
    identifies: Mutex<Vec<(u64, Value)>>,
    resumes: Mutex<Vec<(u64, Value)>>,
    received: Mutex<Vec<(u64, Value)>>,
    connections: AtomicU64,
}

/// In-process gateway server for end-to-end fleet tests
pub struct MockGateway {
    addr: SocketAddr,
    state: Arc<MockGatewayState>,
    actions: broadcast::Sender<ServerAction>,
    _accept: JoinHandle<()>,
}

impl MockGateway {
    /// Bind a mock gateway on a random local port
    pub async fn start(options: MockGatewayOptions) -> Result<Self> {
        // First test in the process wins; the rest are no-ops
        let _ = gateway_common::try_init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let url = format!("ws://{addr}");

        let state = Arc::new(MockGatewayState::default());
        let (actions, _) = broadcast::channel(64);

        let accept_state = Arc::clone(&state);
        let accept_actions = actions.clone();
        let accept = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let state = Arc::clone(&accept_state);
                let actions = accept_actions.subscribe();
                let options = options.clone();
                let url = url.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state, options, actions, url).await;
                });
            }
        });

        Ok(Self {
            addr,
            state,
            actions,
            _accept: accept,
        })
    }

    /// WebSocket URL of this mock
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Close every live connection with the given code
    pub fn close_all(&self, code: u16) {
        let _ = self.actions.send(ServerAction::Close(code));
    }

    /// Ask every live connection's client to reconnect (op 7)
    pub fn send_reconnect(&self) {
        let _ = self.actions.send(ServerAction::Reconnect);
    }

    /// Dispatch an event to every live connection
    pub fn dispatch(&self, name: &str, data: Value) {
        let _ = self.actions.send(ServerAction::Dispatch {
            name: name.to_string(),
            data,
        });
    }

    /// Identify payloads received, as `(connection id, payload d)`
    pub fn identifies(&self) -> Vec<(u64, Value)> {
        self.state.identifies.lock().clone()
    }

    /// Resume payloads received, as `(connection id, payload d)`
    pub fn resumes(&self) -> Vec<(u64, Value)> {
        self.state.resumes.lock().clone()
    }

    /// Every other payload received, as `(connection id, raw message)`
    pub fn received(&self) -> Vec<(u64, Value)> {
        self.state.received.lock().clone()
    }

    /// Total connections accepted so far
    pub fn connection_count(&self) -> u64 {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Connection id that identified as the given shard, if any
    pub fn connection_for_shard(&self, shard_id: u64) -> Option<u64> {
        self.identifies()
            .iter()
            .find(|(_, d)| d["shard"][0].as_u64() == Some(shard_id))
            .map(|(conn, _)| *conn)
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockGatewayState>,
    options: MockGatewayOptions,
    mut actions: broadcast::Receiver<ServerAction>,
    url: String,
) -> Result<()> {
    let mut ws = accept_async(stream).await?;
    let conn = state.connections.fetch_add(1, Ordering::SeqCst) + 1;

    let mut encoder = options
        .compression
        .then(|| Compress::new(Compression::default(), true));
    let chunk_size = options.chunk_size;

    send_payload(
        &mut ws,
        encoder.as_mut(),
        chunk_size,
        &json!({"op": 10, "d": {"heartbeat_interval": options.heartbeat_interval_ms}}),
    )
    .await?;

    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            action = actions.recv() => match action {
                Ok(ServerAction::Close(code)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "scripted".into(),
                    };
                    let _ = ws.send(Message::Close(Some(frame))).await;
                    break;
                }
                Ok(ServerAction::Reconnect) => {
                    send_payload(&mut ws, encoder.as_mut(), chunk_size, &json!({"op": 7})).await?;
                }
                Ok(ServerAction::Dispatch { name, data }) => {
                    seq += 1;
                    send_payload(
                        &mut ws,
                        encoder.as_mut(),
                        chunk_size,
                        &json!({"op": 0, "t": name, "s": seq, "d": data}),
                    )
                    .await?;
                }
                Err(_) => {}
            },
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(&text)?;
                    match value["op"].as_u64() {
                        Some(1) => {
                            state.received.lock().push((conn, value));
                            if options.ack_heartbeats {
                                send_payload(&mut ws, encoder.as_mut(), chunk_size, &json!({"op": 11}))
                                    .await?;
                            }
                        }
                        Some(2) => {
                            let d = value["d"].clone();
                            let shard = d["shard"].clone();
                            state.identifies.lock().push((conn, d));
                            seq += 1;
                            send_payload(
                                &mut ws,
                                encoder.as_mut(),
                                chunk_size,
                                &json!({"op": 0, "t": "READY", "s": seq, "d": {
                                    "v": 10,
                                    "session_id": format!("session-{conn}"),
                                    "resume_gateway_url": url,
                                    "shard": shard,
                                }}),
                            )
                            .await?;
                        }
                        Some(6) => {
                            let d = value["d"].clone();
                            seq = d["seq"].as_u64().unwrap_or(0);
                            state.resumes.lock().push((conn, d));
                            seq += 1;
                            send_payload(
                                &mut ws,
                                encoder.as_mut(),
                                chunk_size,
                                &json!({"op": 0, "t": "RESUMED", "s": seq, "d": {}}),
                            )
                            .await?;
                        }
                        _ => state.received.lock().push((conn, value)),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }
    Ok(())
}

/// Send one payload, through the zlib stream when compression is on
async fn send_payload(
    ws: &mut WebSocketStream<TcpStream>,
    encoder: Option<&mut Compress>,
    chunk_size: Option<usize>,
    payload: &Value,
) -> Result<()> {
    let text = serde_json::to_string(payload)?;

    match encoder {
        Some(compress) => {
            let frame = compress_sync(compress, text.as_bytes())?;
            let chunk = chunk_size.unwrap_or(frame.len()).max(1);
            for piece in frame.chunks(chunk) {
                ws.send(Message::Binary(piece.to_vec())).await?;
            }
        }
        None => ws.send(Message::Text(text)).await?,
    }
    Ok(())
}

/// Compress with a sync flush so the output ends in `00 00 FF FF`
fn compress_sync(compress: &mut Compress, input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() + 64);
    let mut offset = 0usize;

    loop {
        if out.capacity() == out.len() {
            out.reserve(1024);
        }
        let before = compress.total_in();
        compress.compress_vec(&input[offset..], &mut out, FlushCompress::Sync)?;
        offset += usize::try_from(compress.total_in() - before).unwrap_or(0);

        if offset >= input.len() && out.len() < out.capacity() {
            break;
        }
    }
    Ok(out)
}

/// Poll a condition until it holds or the timeout lapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}

/// Read events until one matches, discarding the rest
pub async fn next_matching_event(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<ShardMessage>,
    timeout: Duration,
    predicate: impl Fn(&ShardMessage) -> bool,
) -> Option<ShardMessage> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Some(message)) if predicate(&message) => return Some(message),
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => return None,
        }
    }
}
