//! Shard session state machine
//!
//! Owns one socket at a time and drives the full connection lifecycle:
//! connect, hello, identify or resume, heartbeating, dispatch, close
//! classification and reconnect with backoff. Everything runs on a single
//! task; commands arrive over a channel and events leave over another.

use crate::backoff::ReconnectBackoff;
use crate::events::{ShardEvent, ShardMessage};
use crate::heartbeat::Heartbeat;
use crate::shard::{DestroyOptions, SessionCommand, ShardHandle, ShardStatus};
use crate::throttle::IdentifyThrottle;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use gateway_common::{GatewayConfig, GatewayError};
use gateway_protocol::{
    CloseCode, FrameCodec, GatewayEventType, GatewayMessage, IdentifyPayload, OpCode,
    ResumePayload, SessionInfo, ShardId, RESUME_CLOSE_CODE,
};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant as TokioInstant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Everything a session needs before it can open its first socket
#[derive(Debug, Clone)]
pub struct ShardSessionOptions {
    /// Shard this session identifies as
    pub shard_id: ShardId,

    /// Total shard count sent in the identify payload
    pub shard_count: u32,

    /// Gateway URL used when no resume URL is known
    pub gateway_url: String,

    /// Shared client configuration
    pub config: Arc<GatewayConfig>,

    /// Fleet-wide identify admission gate
    pub throttle: Arc<IdentifyThrottle>,
}

/// How one connection attempt ended
enum ConnectionEnd {
    /// Destroyed or command channel closed; stop for good
    Terminal,
    /// Unrecoverable; report and stop
    Fatal(GatewayError),
    /// Reconnect, resuming the session if `resume` holds
    Reconnect { resume: bool },
}

/// What to do after handling one inbound message
enum Flow {
    Continue,
    End(ConnectionEnd),
}

/// One value out of the connection select loop
///
/// Handling happens after the select resolves so the command receiver is
/// not borrowed while the handlers run.
enum Step {
    HelloTimeout,
    HeartbeatTick,
    Command(Option<SessionCommand>),
    Frame(Option<Result<Message, tungstenite::Error>>),
}

/// State machine for one shard
pub struct ShardSession {
    shard_id: ShardId,
    shard_count: u32,
    gateway_url: String,
    config: Arc<GatewayConfig>,
    throttle: Arc<IdentifyThrottle>,
    codec: FrameCodec,
    backoff: ReconnectBackoff,
    session: Arc<parking_lot::Mutex<Option<SessionInfo>>>,
    status: watch::Sender<ShardStatus>,
    events: mpsc::UnboundedSender<ShardMessage>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

impl ShardSession {
    /// Spawn a session task and return its handle
    #[must_use]
    pub fn spawn(
        options: ShardSessionOptions,
        events: mpsc::UnboundedSender<ShardMessage>,
    ) -> ShardHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ShardStatus::Idle);
        let session = Arc::new(parking_lot::Mutex::new(None));

        let codec = FrameCodec::new(
            options.config.compression,
            options.config.effective_identify_compress(),
        );

        let worker = Self {
            shard_id: options.shard_id,
            shard_count: options.shard_count,
            gateway_url: options.gateway_url,
            config: options.config,
            throttle: options.throttle,
            codec,
            backoff: ReconnectBackoff::new(),
            session: Arc::clone(&session),
            status: status_tx,
            events,
            commands: command_rx,
        };

        let shard_id = worker.shard_id;
        let task = tokio::spawn(worker.run());

        ShardHandle::new(shard_id, command_tx, status_rx, session, task)
    }

    /// Session task body: idle until connect, then the reconnect loop
    async fn run(mut self) {
        // Idle until someone asks for a connection
        loop {
            match self.commands.recv().await {
                Some(SessionCommand::Connect) => break,
                Some(SessionCommand::Send(message)) => {
                    debug!(shard_id = %self.shard_id, %message, "dropping send before connect");
                }
                Some(SessionCommand::Destroy(_)) | None => {
                    self.set_status(ShardStatus::Disconnected);
                    return;
                }
            }
        }

        loop {
            self.set_status(ShardStatus::Connecting);

            let url = self.connect_url();
            debug!(shard_id = %self.shard_id, %url, "opening gateway socket");

            let socket = match connect_async(&url).await {
                Ok((socket, _response)) => socket,
                Err(err) => {
                    self.emit_debug(format!("socket open failed: {err}"));
                    if self.backoff_pause().await {
                        continue;
                    }
                    self.set_status(ShardStatus::Disconnected);
                    return;
                }
            };

            // Fresh socket, fresh compression context
            self.codec.reset();

            match self.run_connection(socket).await {
                ConnectionEnd::Terminal => {
                    self.set_status(ShardStatus::Disconnected);
                    return;
                }
                ConnectionEnd::Fatal(error) => {
                    // Auth and intent failures condemn every shard, not just this one
                    if error.is_fleet_fatal() {
                        error!(shard_id = %self.shard_id, %error, "shard stopped on a fleet-fatal error");
                    } else {
                        warn!(shard_id = %self.shard_id, %error, "shard stopped on fatal error");
                    }
                    self.emit(ShardEvent::Error { error });
                    self.set_status(ShardStatus::Disconnected);
                    return;
                }
                ConnectionEnd::Reconnect { resume } => {
                    if !resume {
                        self.session.lock().take();
                    }
                    debug!(shard_id = %self.shard_id, resume, "reconnecting");
                    if !self.backoff_pause().await {
                        self.set_status(ShardStatus::Disconnected);
                        return;
                    }
                }
            }
        }
    }

    /// Drive one socket until it ends
    async fn run_connection(&mut self, socket: WsStream) -> ConnectionEnd {
        let (mut sink, mut stream) = socket.split();

        let mut heartbeat: Option<Heartbeat> = None;
        let mut ticker: Option<Interval> = None;

        let hello_deadline = tokio::time::sleep(self.config.hello_timeout());
        tokio::pin!(hello_deadline);

        loop {
            let step = tokio::select! {
                () = &mut hello_deadline, if heartbeat.is_none() => Step::HelloTimeout,
                () = Self::next_tick(&mut ticker) => Step::HeartbeatTick,
                command = self.commands.recv() => Step::Command(command),
                frame = stream.next() => Step::Frame(frame),
            };

            let flow = match step {
                Step::HelloTimeout => {
                    self.emit_debug("no hello within the deadline".to_string());
                    Self::close_for_resume(&mut sink).await;
                    Flow::End(ConnectionEnd::Reconnect { resume: true })
                }
                Step::HeartbeatTick => self.on_heartbeat_tick(&mut sink, &mut heartbeat).await,
                Step::Command(command) => self.on_command(&mut sink, command).await,
                Step::Frame(frame) => {
                    self.on_frame(&mut sink, frame, &mut heartbeat, &mut ticker)
                        .await
                }
            };

            if let Flow::End(end) = flow {
                return end;
            }
        }
    }

    /// Resolve the ticker arm: pending while no ticker exists yet
    async fn next_tick(ticker: &mut Option<Interval>) {
        match ticker.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    async fn on_heartbeat_tick(
        &mut self,
        sink: &mut WsSink,
        heartbeat: &mut Option<Heartbeat>,
    ) -> Flow {
        let Some(hb) = heartbeat.as_mut() else {
            return Flow::Continue;
        };

        if hb.is_zombied() {
            warn!(shard_id = %self.shard_id, "heartbeat went unacknowledged, closing zombied socket");
            Self::close_for_resume(sink).await;
            return Flow::End(ConnectionEnd::Reconnect { resume: true });
        }

        let beat = GatewayMessage::heartbeat(self.current_sequence());
        if self.send_message(sink, &beat).await.is_err() {
            return Flow::End(ConnectionEnd::Reconnect { resume: true });
        }
        hb.record_sent();
        Flow::Continue
    }

    async fn on_command(&mut self, sink: &mut WsSink, command: Option<SessionCommand>) -> Flow {
        match command {
            Some(SessionCommand::Send(message)) => {
                if self.send_message(sink, &message).await.is_err() {
                    return Flow::End(ConnectionEnd::Reconnect { resume: true });
                }
                Flow::Continue
            }
            Some(SessionCommand::Destroy(options)) => {
                info!(shard_id = %self.shard_id, code = options.code, "destroying shard");
                let frame = CloseFrame {
                    code: WsCloseCode::from(options.code),
                    reason: options.reason.into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                self.emit(ShardEvent::Closed { code: options.code });
                Flow::End(ConnectionEnd::Terminal)
            }
            // Already connected
            Some(SessionCommand::Connect) => Flow::Continue,
            None => Flow::End(ConnectionEnd::Terminal),
        }
    }

    async fn on_frame(
        &mut self,
        sink: &mut WsSink,
        frame: Option<Result<Message, tungstenite::Error>>,
        heartbeat: &mut Option<Heartbeat>,
        ticker: &mut Option<Interval>,
    ) -> Flow {
        match frame {
            None => {
                self.emit(ShardEvent::Closed { code: 0 });
                Flow::End(ConnectionEnd::Reconnect { resume: true })
            }
            Some(Err(err)) => {
                self.emit_debug(format!("socket read failed: {err}"));
                self.emit(ShardEvent::Closed { code: 0 });
                Flow::End(ConnectionEnd::Reconnect { resume: true })
            }
            Some(Ok(Message::Close(frame))) => {
                let code = frame.map_or(0, |f| u16::from(f.code));
                info!(shard_id = %self.shard_id, code, "gateway closed the connection");
                self.emit(ShardEvent::Closed { code });
                Flow::End(self.classify_close(code))
            }
            Some(Ok(Message::Text(text))) => {
                if let Some(message) = self.codec.decode_text(&text) {
                    self.handle_message(message, sink, heartbeat, ticker).await
                } else {
                    debug!(shard_id = %self.shard_id, "discarding unparseable text frame");
                    Flow::Continue
                }
            }
            Some(Ok(Message::Binary(data))) => match self.codec.decode_binary(&data) {
                Ok(Some(message)) => self.handle_message(message, sink, heartbeat, ticker).await,
                // Partial transport-compressed message
                Ok(None) => Flow::Continue,
                Err(err) => {
                    warn!(shard_id = %self.shard_id, %err, "binary frame decode failed, replacing socket");
                    Self::close_for_resume(sink).await;
                    Flow::End(ConnectionEnd::Reconnect { resume: true })
                }
            },
            // Ping/pong are answered by the transport
            Some(Ok(_)) => Flow::Continue,
        }
    }

    /// Dispatch one decoded gateway message
    async fn handle_message(
        &mut self,
        message: GatewayMessage,
        sink: &mut WsSink,
        heartbeat: &mut Option<Heartbeat>,
        ticker: &mut Option<Interval>,
    ) -> Flow {
        match message.op {
            OpCode::Hello => self.on_hello(&message, sink, heartbeat, ticker).await,
            OpCode::Dispatch => self.on_dispatch(message),
            OpCode::Heartbeat => {
                // Server wants a beat right now, outside the regular cadence
                let beat = GatewayMessage::heartbeat(self.current_sequence());
                if self.send_message(sink, &beat).await.is_err() {
                    return Flow::End(ConnectionEnd::Reconnect { resume: true });
                }
                if let Some(hb) = heartbeat.as_mut() {
                    hb.record_sent();
                }
                Flow::Continue
            }
            OpCode::HeartbeatAck => {
                if let Some(hb) = heartbeat.as_mut() {
                    let latency = hb.record_ack();
                    self.emit(ShardEvent::HeartbeatComplete {
                        heartbeat_at: chrono::Utc::now().timestamp_millis(),
                        latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                Flow::Continue
            }
            OpCode::Reconnect => {
                debug!(shard_id = %self.shard_id, "server requested reconnect");
                Self::close_for_resume(sink).await;
                Flow::End(ConnectionEnd::Reconnect { resume: true })
            }
            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session_resumable().unwrap_or(false);
                debug!(shard_id = %self.shard_id, resumable, "session invalidated");
                if !resumable {
                    self.session.lock().take();
                }
                Self::close_for_resume(sink).await;
                Flow::End(ConnectionEnd::Reconnect { resume: resumable })
            }
            // Send-only ops arriving inbound mean the peer is broken
            OpCode::Identify | OpCode::Resume => {
                self.emit_debug(format!("unexpected inbound op {}", message.op));
                Self::close_for_resume(sink).await;
                Flow::End(ConnectionEnd::Reconnect { resume: true })
            }
        }
    }

    /// Hello: start the heartbeat cadence, then resume or identify
    async fn on_hello(
        &mut self,
        message: &GatewayMessage,
        sink: &mut WsSink,
        heartbeat: &mut Option<Heartbeat>,
        ticker: &mut Option<Interval>,
    ) -> Flow {
        let Some(hello) = message.as_hello() else {
            self.emit_debug("malformed hello payload".to_string());
            Self::close_for_resume(sink).await;
            return Flow::End(ConnectionEnd::Reconnect { resume: true });
        };

        let interval = Duration::from_millis(hello.heartbeat_interval);
        debug!(shard_id = %self.shard_id, interval_ms = hello.heartbeat_interval, "hello received");

        *heartbeat = Some(Heartbeat::new(interval));

        // First beat lands at a random point inside the interval so a fleet
        // restart does not beat in lockstep
        let first_beat = interval.mul_f64(rand::thread_rng().gen::<f64>());
        let mut beats = tokio::time::interval_at(TokioInstant::now() + first_beat, interval);
        beats.set_missed_tick_behavior(MissedTickBehavior::Delay);
        *ticker = Some(beats);

        let resume_target = self.session.lock().clone();
        let handshake = match resume_target {
            Some(info) => {
                self.set_status(ShardStatus::Resuming);
                let seq = info.resume_sequence();
                info!(shard_id = %self.shard_id, session_id = %info.session_id, seq, "resuming session");
                GatewayMessage::resume(&ResumePayload {
                    token: self.config.token.clone(),
                    session_id: info.session_id,
                    seq,
                })
            }
            None => {
                self.set_status(ShardStatus::Identifying);
                self.throttle.wait_for_identify(self.shard_id).await;
                info!(shard_id = %self.shard_id, shard_count = self.shard_count, "identifying");
                GatewayMessage::identify(&IdentifyPayload {
                    token: self.config.token.clone(),
                    properties: self.config.identify_properties.clone(),
                    intents: self.config.intents,
                    shard: Some([self.shard_id, self.shard_count]),
                    compress: self.config.effective_identify_compress(),
                })
            }
        };

        let handshake = match handshake {
            Ok(message) => message,
            Err(err) => {
                return Flow::End(ConnectionEnd::Fatal(GatewayError::Serialization(err)));
            }
        };

        if self.send_message(sink, &handshake).await.is_err() {
            return Flow::End(ConnectionEnd::Reconnect { resume: true });
        }
        Flow::Continue
    }

    /// Dispatch: track the sequence, surface READY/RESUMED, forward the rest
    fn on_dispatch(&mut self, message: GatewayMessage) -> Flow {
        let name = message.t.clone().unwrap_or_default();
        let event = GatewayEventType::from_name(&name);

        match event {
            Some(GatewayEventType::Ready) => {
                let Some(ready) = message.as_ready() else {
                    self.emit_debug("malformed READY payload".to_string());
                    return Flow::End(ConnectionEnd::Reconnect { resume: false });
                };

                info!(
                    shard_id = %self.shard_id,
                    session_id = %ready.session_id,
                    "shard is ready"
                );

                *self.session.lock() = Some(SessionInfo {
                    session_id: ready.session_id,
                    sequence: message.s,
                    resume_url: ready.resume_gateway_url,
                    shard_id: self.shard_id,
                    shard_count: self.shard_count,
                });

                self.backoff.reset();
                self.set_status(ShardStatus::Ready);
                self.emit(ShardEvent::Ready {
                    data: message.d.clone().unwrap_or(serde_json::Value::Null),
                });
            }
            Some(GatewayEventType::Resumed) => {
                info!(shard_id = %self.shard_id, "session resumed");
                self.backoff.reset();
                self.set_status(ShardStatus::Ready);
                self.emit(ShardEvent::Resumed);
            }
            _ => {}
        }

        if let Some(seq) = message.s {
            if let Some(info) = self.session.lock().as_mut() {
                if let Some(previous) = info.sequence {
                    if seq > previous + 1 {
                        debug!(
                            shard_id = %self.shard_id,
                            previous, seq, "sequence gap in dispatch stream"
                        );
                    }
                }
                // Last-seen sequence drives later resumes and heartbeats
                info.sequence = Some(info.sequence.map_or(seq, |previous| previous.max(seq)));
            }
        }

        self.emit(ShardEvent::Dispatch {
            event,
            name,
            seq: message.s,
            data: message.d.unwrap_or(serde_json::Value::Null),
        });

        Flow::Continue
    }

    /// Classify a server close code into the next action
    fn classify_close(&self, code: u16) -> ConnectionEnd {
        match CloseCode::from_u16(code) {
            Some(known) if known.is_fatal() => {
                ConnectionEnd::Fatal(GatewayError::from_close_code(known))
            }
            Some(known) => ConnectionEnd::Reconnect {
                resume: known.preserves_session(),
            },
            // Normal closure ends the session on the server side
            None if code == 1000 || code == 1001 => ConnectionEnd::Reconnect { resume: false },
            None => {
                if code != 0 && code != RESUME_CLOSE_CODE {
                    warn!(shard_id = %self.shard_id, code, "unrecognized close code, attempting resume");
                }
                ConnectionEnd::Reconnect { resume: true }
            }
        }
    }

    /// Sleep the backoff delay, staying responsive to destroy
    ///
    /// Returns false when the session was destroyed during the pause.
    async fn backoff_pause(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        debug!(
            shard_id = %self.shard_id,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt = self.backoff.attempts(),
            "pausing before reconnect"
        );

        let pause = tokio::time::sleep(delay);
        tokio::pin!(pause);

        loop {
            tokio::select! {
                () = &mut pause => return true,
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Destroy(_)) | None => return false,
                    // Reconnect is already underway
                    Some(SessionCommand::Connect) => {}
                    Some(SessionCommand::Send(message)) => {
                        debug!(shard_id = %self.shard_id, %message, "dropping send while disconnected");
                    }
                },
            }
        }
    }

    /// Build the connect URL, preferring the session's resume URL
    fn connect_url(&self) -> String {
        let base = self
            .session
            .lock()
            .as_ref()
            .map_or_else(|| self.gateway_url.clone(), |info| info.resume_url.clone());

        let mut url = format!(
            "{}?v={}&encoding=json",
            base.trim_end_matches('/'),
            self.config.version
        );
        if let Some(compression) = self.config.compression {
            url.push_str("&compress=");
            url.push_str(compression.query_value());
        }
        url
    }

    fn current_sequence(&self) -> Option<u64> {
        self.session.lock().as_ref().and_then(|info| info.sequence)
    }

    async fn send_message(&self, sink: &mut WsSink, message: &GatewayMessage) -> Result<(), ()> {
        let text = match FrameCodec::encode(message) {
            Ok(text) => text,
            Err(err) => {
                debug!(shard_id = %self.shard_id, %err, "failed to encode outbound message");
                return Err(());
            }
        };

        if let Err(err) = sink.send(Message::Text(text)).await {
            debug!(shard_id = %self.shard_id, %err, "socket send failed");
            return Err(());
        }
        Ok(())
    }

    /// Close the socket with the self-initiated resume code
    async fn close_for_resume(sink: &mut WsSink) {
        let frame = CloseFrame {
            code: WsCloseCode::from(RESUME_CLOSE_CODE),
            reason: "reconnecting".into(),
        };
        let _ = sink.send(Message::Close(Some(frame))).await;
    }

    fn set_status(&self, status: ShardStatus) {
        self.status.send_replace(status);
    }

    fn emit(&self, event: ShardEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.events.send((self.shard_id, event));
    }

    fn emit_debug(&self, message: String) {
        debug!(shard_id = %self.shard_id, %message);
        self.emit(ShardEvent::Debug { message });
    }
}
