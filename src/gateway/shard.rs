//! Connection lifecycle of one gateway shard.

use std::{sync::Arc, time::Duration};

use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    time::sleep,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode as WsCloseCode, CloseFrame, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};

use super::{
    kokoro::{HeartbeatSignal, Kokoro},
    opcode::CloseCode,
    payload::{ConnectionProperties, GatewayPayload, Identify, Ready, Resume},
    session::{Action, Session},
};
use crate::{
    config::ClientConfig,
    error::{Error, Result},
    timer::Timer,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Events forwarded to the owner of the shard.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready(Box<Ready>),
    Resumed,
    Dispatch { name: String, data: Value },
}

#[derive(Debug)]
enum Ending {
    Shutdown,
    Reconnect { resume: bool },
}

/// Cloneable control handle of a running [`Shard`].
#[derive(Debug, Clone)]
pub struct ShardHandle {
    kokoro: Kokoro,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ShardHandle {
    pub fn latency(&self) -> Duration {
        self.kokoro.latency()
    }

    pub fn kokoro(&self) -> &Kokoro {
        &self.kokoro
    }

    /// Asks the shard to close its connection and return from [`Shard::run`].
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

pub struct Shard {
    config: ClientConfig,
    session: Session,
    kokoro: Kokoro,
    signals: mpsc::Receiver<HeartbeatSignal>,
    events: mpsc::Sender<GatewayEvent>,
    // kept so the receiver never observes a closed channel
    _shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown: watch::Receiver<bool>,
    attempt: u32,
}

impl Shard {
    /// Must be called inside a tokio runtime, the heartbeat driver is spawned here.
    pub fn new(config: ClientConfig, events: mpsc::Sender<GatewayEvent>) -> (Self, ShardHandle) {
        let (signal_tx, signals) = mpsc::channel(8);
        let kokoro = Kokoro::start(config.kokoro.clone(), signal_tx);
        let (shutdown_tx, shutdown) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let handle = ShardHandle {
            kokoro: kokoro.clone(),
            shutdown: Arc::clone(&shutdown_tx),
        };
        let shard = Self {
            config,
            session: Session::new(),
            kokoro,
            signals,
            events,
            _shutdown_tx: shutdown_tx,
            shutdown,
            attempt: 0,
        };
        (shard, handle)
    }

    /// Runs connections until shutdown or an error reconnecting cannot fix.
    pub async fn run(mut self) -> Result<()> {
        let result = self.run_connections().await;
        let _ = self.kokoro.terminate();
        if let Err(e) = &result {
            error!("shard stopped: {}", e);
        }
        result
    }

    async fn run_connections(&mut self) -> Result<()> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            let outcome = self.connection().await;
            self.kokoro.disconnected()?;

            let delay = match outcome {
                Ok(Ending::Shutdown) => return Ok(()),
                Ok(Ending::Reconnect { resume: true }) => Duration::ZERO,
                Ok(Ending::Reconnect { resume: false }) => {
                    self.session.clear();
                    Duration::from_millis(rand::random_range(1_000..5_000))
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if !e.can_resume() {
                        self.session.clear();
                    }
                    if self.config.reconnect.exhausted(self.attempt) {
                        return Err(Error::ReconnectExhausted {
                            attempts: self.attempt,
                        });
                    }
                    let delay = e
                        .retry_after()
                        .unwrap_or_else(|| self.config.reconnect.backoff(self.attempt));
                    self.attempt += 1;
                    warn!(
                        "connection lost: {} (attempt {}, retrying in {}ms)",
                        e,
                        self.attempt,
                        delay.as_millis()
                    );
                    delay
                }
            };

            if !delay.is_zero() && self.pause(delay).await {
                return Ok(());
            }
        }
    }

    /// Sleeps for `delay`, returns whether shutdown was requested meanwhile.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = sleep(delay) => false,
            _ = shutdown_requested(&mut self.shutdown) => true,
        }
    }

    async fn connection(&mut self) -> Result<Ending> {
        // signals queued for the previous socket
        while self.signals.try_recv().is_ok() {}

        let base = match &self.session.resume_url {
            Some(url) if self.session.can_resume() => url.clone(),
            _ => self.config.gateway_url.clone(),
        };
        let url = self.config.connect_url(&base);
        info!(
            "connecting to {} (resuming: {})",
            url,
            self.session.can_resume()
        );

        let (socket, _) = {
            let _t = Timer::new("gateway connect");
            connect_async(url.as_str()).await?
        };
        let (mut write, mut read) = socket.split();

        let hello_timeout = self.config.hello_timeout();
        let no_hello = sleep(hello_timeout);
        tokio::pin!(no_hello);
        let mut greeted = false;

        loop {
            tokio::select! {
                _ = &mut no_hello, if !greeted => {
                    return Err(Error::Gateway(format!(
                        "no hello within {}ms",
                        hello_timeout.as_millis()
                    )));
                }
                _ = shutdown_requested(&mut self.shutdown) => {
                    close(&mut write, 1000, "shutdown").await;
                    return Ok(Ending::Shutdown);
                }
                signal = self.signals.recv() => match signal {
                    Some(HeartbeatSignal::Beat) => {
                        send(&mut write, &GatewayPayload::heartbeat(self.session.sequence)).await?;
                        debug!("sent heartbeat (seq: {:?})", self.session.sequence);
                    }
                    Some(HeartbeatSignal::Zombie) => {
                        close(&mut write, CloseCode::ZOMBIE, "zombied connection").await;
                        return Ok(Ending::Reconnect { resume: true });
                    }
                    None => return Err(Error::KokoroStopped),
                },
                message = read.next() => match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        let payload: GatewayPayload = match serde_json::from_str(&text) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!("failed to parse gateway payload: {}", e);
                                continue;
                            }
                        };
                        for action in self.session.handle(payload)? {
                            greeted |= matches!(action, Action::StartHeartbeat(_));
                            if let Some(ending) = self.apply(action, &mut write).await? {
                                return Ok(ending);
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|frame| (u16::from(frame.code), frame.reason.to_string()))
                            .unwrap_or((1005, String::new()));
                        info!("gateway closed the connection ({}: {})", code, reason);
                        return Err(Error::Closed { code, reason });
                    }
                    // ping, pong and binary frames are not part of the json protocol
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(Error::Gateway("connection ended".into())),
                },
            }
        }
    }

    async fn apply(&mut self, action: Action, write: &mut WsSink) -> Result<Option<Ending>> {
        match action {
            Action::StartHeartbeat(interval) => self.kokoro.connected(interval)?,
            Action::Identify => {
                let identify = Identify {
                    token: self.config.token.clone(),
                    intents: self.config.intents,
                    properties: ConnectionProperties::default(),
                    shard: self.config.shard,
                };
                send(write, &GatewayPayload::identify(&identify)?).await?;
                debug!("sent identify");
            }
            Action::Resume => {
                let (Some(session_id), Some(seq)) =
                    (self.session.session_id.clone(), self.session.sequence)
                else {
                    return Err(Error::Gateway("resume without a session".into()));
                };
                info!("resuming session {} at sequence {}", session_id, seq);
                let resume = Resume {
                    token: self.config.token.clone(),
                    session_id,
                    seq,
                };
                send(write, &GatewayPayload::resume(&resume)?).await?;
            }
            Action::Ack => self.kokoro.ack()?,
            Action::BeatNow => self.kokoro.beat_now()?,
            Action::Ready(ready) => {
                self.attempt = 0;
                info!("{} is connected", ready.user.username);
                return Ok(self.forward(GatewayEvent::Ready(ready)).await);
            }
            Action::Resumed => {
                self.attempt = 0;
                info!("session resumed");
                return Ok(self.forward(GatewayEvent::Resumed).await);
            }
            Action::Dispatch { name, data } => {
                return Ok(self.forward(GatewayEvent::Dispatch { name, data }).await);
            }
            Action::Reconnect { resume } => {
                let code = if resume { CloseCode::ZOMBIE } else { 1000 };
                close(write, code, "reconnecting").await;
                return Ok(Some(Ending::Reconnect { resume }));
            }
        }
        Ok(None)
    }

    async fn forward(&self, event: GatewayEvent) -> Option<Ending> {
        if self.events.send(event).await.is_err() {
            info!("event receiver dropped, closing gateway");
            return Some(Ending::Shutdown);
        }
        None
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // the guard returned by wait_for is not Send, drop it here
    let _ = shutdown.wait_for(|requested| *requested).await;
}

async fn send(write: &mut WsSink, payload: &GatewayPayload) -> Result<()> {
    let text = serde_json::to_string(payload)?;
    write.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

async fn close(write: &mut WsSink, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code: WsCloseCode::from(code),
        reason: reason.into(),
    };
    if let Err(e) = write.send(WsMessage::Close(Some(frame))).await {
        debug!("failed to send close frame: {}", e);
    }
}
