//
// Duplex WebSocket channel to the conversation backend.
//
// A supervisor task owns the socket and reconnects after unexpected closures.
// Callers get a cheap cloneable handle for sending plus a receiver of decoded
// inbound messages in arrival order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tutorcall_core::{
    BackendConfig, CallError, ChannelSettings, ChannelStatus, InboundMessage, MessageSink,
    OutboundMessage, parse_inbound_message,
};
use url::Url;

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(3);
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Supplies the session token at connect time. Implementations read whatever
/// store the application uses; the channel never touches storage itself.
pub trait CredentialSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub ws_url: Url,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl ChannelConfig {
    pub fn from_settings(backend: &BackendConfig, settings: &ChannelSettings) -> anyhow::Result<Self> {
        Ok(Self {
            ws_url: Url::parse(&backend.ws_url)
                .with_context(|| format!("parse channel url: {}", backend.ws_url))?,
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        })
    }
}

#[derive(Clone)]
pub struct ChannelHandle {
    out_tx: mpsc::Sender<String>,
    status_rx: watch::Receiver<ChannelStatus>,
    closed_by_caller: Arc<AtomicBool>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ChannelHandle {
    pub fn status(&self) -> ChannelStatus {
        *self.status_rx.borrow()
    }

    /// Watch connection status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_rx.clone()
    }

    pub fn send(&self, msg: &OutboundMessage) -> Result<(), CallError> {
        if !self.status().is_open() {
            return Err(CallError::SendWhileDisconnected);
        }
        self.out_tx
            .try_send(msg.to_json())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    CallError::ChannelClosed("outbound queue full".into())
                }
                mpsc::error::TrySendError::Closed(_) => CallError::SendWhileDisconnected,
            })
    }

    /// Closes the socket and stops reconnecting. Idempotent.
    pub fn close(&self) {
        if !self.closed_by_caller.swap(true, Ordering::SeqCst) {
            log::info!("channel: closing at caller request");
        }
        let _ = self.shutdown_tx.send(true);
    }
}

impl MessageSink for ChannelHandle {
    fn send(&self, msg: OutboundMessage) -> Result<(), CallError> {
        ChannelHandle::send(self, &msg)
    }

    fn status(&self) -> ChannelStatus {
        ChannelHandle::status(self)
    }

    fn close(&self) {
        ChannelHandle::close(self)
    }
}

pub fn build_channel_url(base: &Url, token: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut().append_pair("token", token);
    url
}

/// Spawns the channel supervisor on the current tokio runtime.
pub fn spawn_channel(
    cfg: ChannelConfig,
    credentials: Arc<dyn CredentialSource>,
) -> (ChannelHandle, mpsc::Receiver<InboundMessage>) {
    let (out_tx, out_rx) = mpsc::channel::<String>(32);
    let (in_tx, in_rx) = mpsc::channel::<InboundMessage>(64);
    let (status_tx, status_rx) = watch::channel(ChannelStatus::Connecting);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let closed_by_caller = Arc::new(AtomicBool::new(false));

    let supervisor = Supervisor {
        cfg,
        credentials,
        out_rx,
        in_tx,
        status_tx,
        shutdown_rx,
        closed_by_caller: closed_by_caller.clone(),
    };
    tokio::spawn(supervisor.run());

    (
        ChannelHandle {
            out_tx,
            status_rx,
            closed_by_caller,
            shutdown_tx: Arc::new(shutdown_tx),
        },
        in_rx,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    Shutdown,
    Lost,
}

struct Supervisor {
    cfg: ChannelConfig,
    credentials: Arc<dyn CredentialSource>,
    out_rx: mpsc::Receiver<String>,
    in_tx: mpsc::Sender<InboundMessage>,
    status_tx: watch::Sender<ChannelStatus>,
    shutdown_rx: watch::Receiver<bool>,
    closed_by_caller: Arc<AtomicBool>,
}

/// Resolves once shutdown was requested or every handle is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

impl Supervisor {
    fn set_status(&self, status: ChannelStatus) {
        let prev = *self.status_tx.borrow();
        if prev != status {
            log::info!("channel status: {prev:?} -> {status:?}");
            self.status_tx.send_replace(status);
        }
    }

    fn stopping(&self) -> bool {
        self.closed_by_caller.load(Ordering::SeqCst) || self.in_tx.is_closed()
    }

    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            if self.stopping() {
                break;
            }

            let Some(token) = self.credentials.token().filter(|t| !t.trim().is_empty()) else {
                log::warn!("channel: no session token available; not connecting");
                break;
            };

            self.set_status(if attempt == 0 {
                ChannelStatus::Connecting
            } else {
                ChannelStatus::Reconnecting
            });
            attempt = attempt.saturating_add(1);

            let url = build_channel_url(&self.cfg.ws_url, &token);
            let connect = tokio::time::timeout(
                self.cfg.connect_timeout,
                tokio_tungstenite::connect_async(url.as_str()),
            );

            let connected = tokio::select! {
                res = connect => Some(res),
                _ = shutdown_requested(&mut self.shutdown_rx) => None,
            };

            let end = match connected {
                None => ConnectionEnd::Shutdown,
                Some(Err(_)) => {
                    log::warn!("channel: connect to {} timed out", self.cfg.ws_url);
                    ConnectionEnd::Lost
                }
                Some(Ok(Err(e))) => {
                    log::warn!("channel: connect to {} failed: {e}", self.cfg.ws_url);
                    ConnectionEnd::Lost
                }
                Some(Ok(Ok((ws, _resp)))) => {
                    self.set_status(ChannelStatus::Open);
                    self.run_connection(ws).await
                }
            };

            // Nothing sent while disconnected is kept for the next socket.
            let mut dropped = 0usize;
            while self.out_rx.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                log::warn!("channel: dropped {dropped} unsent outbound messages");
            }

            if end == ConnectionEnd::Shutdown || self.stopping() {
                break;
            }

            self.set_status(ChannelStatus::Reconnecting);
            log::info!(
                "channel: connection lost; reconnecting in {} ms",
                self.cfg.reconnect_delay.as_millis()
            );
            let resumed = tokio::select! {
                _ = tokio::time::sleep(self.cfg.reconnect_delay) => true,
                _ = shutdown_requested(&mut self.shutdown_rx) => false,
            };
            if !resumed {
                break;
            }
        }

        self.set_status(ChannelStatus::Closed);
    }

    async fn run_connection<S>(&mut self, ws: tokio_tungstenite::WebSocketStream<S>) -> ConnectionEnd
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_write, mut ws_read) = ws.split();

        // Control frames (pongs) get their own queue so they are never stuck behind payloads.
        let (ctrl_tx, mut ctrl_rx) = mpsc::channel::<Message>(8);
        let (data_tx, mut data_rx) = mpsc::channel::<Message>(32);
        let writer = tokio::spawn(async move {
            let mut ws_write = ws_write;
            loop {
                let msg = tokio::select! {
                    biased;
                    m = ctrl_rx.recv() => m,
                    m = data_rx.recv() => m,
                };
                let Some(msg) = msg else { break };
                let res = tokio::time::timeout(WS_SEND_TIMEOUT, ws_write.send(msg)).await;
                if !matches!(res, Ok(Ok(()))) {
                    log::warn!("channel: websocket write failed or timed out");
                    break;
                }
            }
            let _ = ws_write.send(Message::Close(None)).await;
        });

        let end = loop {
            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown_rx) => break ConnectionEnd::Shutdown,

                out = self.out_rx.recv() => {
                    let Some(text) = out else { break ConnectionEnd::Shutdown };
                    if data_tx.try_send(Message::Text(text.into())).is_err() {
                        log::warn!("channel: writer unavailable; dropping outbound message");
                        break ConnectionEnd::Lost;
                    }
                }

                frame = ws_read.next() => {
                    let msg = match frame {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            log::warn!("channel: read failed: {e}");
                            break ConnectionEnd::Lost;
                        }
                        None => break ConnectionEnd::Lost,
                    };

                    let text = match msg {
                        Message::Text(t) => t.to_string(),
                        Message::Binary(b) => String::from_utf8_lossy(&b).to_string(),
                        Message::Ping(p) => {
                            if ctrl_tx.try_send(Message::Pong(p)).is_err() {
                                break ConnectionEnd::Lost;
                            }
                            continue;
                        }
                        Message::Close(frame) => {
                            log::info!("channel: server closed the socket: {frame:?}");
                            break ConnectionEnd::Lost;
                        }
                        _ => continue,
                    };

                    match parse_inbound_message(&text) {
                        Ok(InboundMessage::ConnectionReady) => {
                            log::info!("channel: backend ready");
                        }
                        Ok(msg) => {
                            if self.in_tx.send(msg).await.is_err() {
                                break ConnectionEnd::Shutdown;
                            }
                        }
                        Err(e) => log::warn!("channel: dropping inbound frame: {e}"),
                    }
                }
            }
        };

        // Dropping both queues lets the writer send Close and exit.
        drop(ctrl_tx);
        drop(data_tx);
        let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer).await;
        end
    }
}
