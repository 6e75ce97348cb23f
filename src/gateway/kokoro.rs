//! Heartbeat keepalive for one gateway connection.
//!
//! [`Kokoro`] is a handle to a driver task. The connection reports what
//! happens on the socket (hello received, ack received, socket lost) and the
//! driver answers through a [`HeartbeatSignal`] channel when a heartbeat is
//! due or when the connection stopped acknowledging them.
//!
//! The driver keeps at most one deadline. Every transition drops the old one
//! and computes the next: the beat time while beating, the ack timeout while
//! awaiting an ack, nothing otherwise.

use std::{future::Future, sync::Arc, time::Duration};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{sleep_until, Instant},
};
use typed_builder::TypedBuilder;

use crate::error::{Error, Result};

/// Reported by [`Kokoro::latency`] until a beat was acknowledged.
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(9999);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KokoroState {
    /// The driver is not running.
    Idle,
    /// Waiting for a connection to report its heartbeat interval.
    AwaitingSocket,
    /// Sleeping until the next beat is due.
    Beating,
    /// A beat was sent and its ack has not arrived yet.
    AwaitingAck,
}

/// What the driver asks of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatSignal {
    /// Send a heartbeat now.
    Beat,
    /// The last beat was never acknowledged; drop the socket and reconnect.
    Zombie,
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct KokoroConfig {
    /// Delay the first beat of a connection by a random fraction of the interval.
    #[builder(default = true)]
    #[serde(default = "default_first_beat_jitter")]
    pub first_beat_jitter: bool,

    /// How long to wait for an ack, in milliseconds. Defaults to the interval.
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_timeout_ms: Option<u64>,
}

fn default_first_beat_jitter() -> bool {
    true
}

impl Default for KokoroConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug)]
enum Command {
    Connected(Duration),
    Disconnected,
    Ack,
    BeatNow,
    Restart,
    Terminate,
    Wait(KokoroState, oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Timing {
    last_send: Option<Instant>,
    last_answer: Option<Instant>,
}

impl Timing {
    fn latency(&self) -> Duration {
        match (self.last_send, self.last_answer) {
            (Some(send), Some(answer)) if answer >= send => answer - send,
            _ => DEFAULT_LATENCY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Kokoro {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<KokoroState>,
    timing: Arc<Mutex<Timing>>,
}

impl Kokoro {
    /// Spawns the driver. It starts out waiting for a socket.
    ///
    /// The driver stops when [`Kokoro::terminate`] is called, when every
    /// handle is dropped, or when `signals` is closed.
    pub fn start(config: KokoroConfig, signals: mpsc::Sender<HeartbeatSignal>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(KokoroState::AwaitingSocket);
        let timing = Arc::new(Mutex::new(Timing::default()));

        let driver = Driver {
            config,
            commands: receiver,
            signals,
            state: state_tx,
            timing: Arc::clone(&timing),
            interval: Duration::ZERO,
            last_beat: None,
            deadline: None,
            waiters: Vec::new(),
        };
        tokio::spawn(driver.run());

        Self {
            commands,
            state,
            timing,
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::KokoroStopped)
    }

    /// The connection received hello; start beating every `interval`.
    pub fn connected(&self, interval: Duration) -> Result<()> {
        self.send(Command::Connected(interval))
    }

    /// The socket is gone; stop beating until the next [`Kokoro::connected`].
    pub fn disconnected(&self) -> Result<()> {
        self.send(Command::Disconnected)
    }

    pub fn ack(&self) -> Result<()> {
        self.send(Command::Ack)
    }

    /// The gateway asked for a heartbeat out of schedule.
    pub fn beat_now(&self) -> Result<()> {
        self.send(Command::BeatNow)
    }

    /// Drops any pending beat and forgets the measured latency.
    pub fn restart(&self) -> Result<()> {
        self.send(Command::Restart)
    }

    pub fn terminate(&self) -> Result<()> {
        self.send(Command::Terminate)
    }

    pub fn state(&self) -> KokoroState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<KokoroState> {
        self.state.clone()
    }

    /// Time between the last beat and its ack.
    pub fn latency(&self) -> Duration {
        self.timing.lock().latency()
    }

    /// Resolves once the driver is in `target` or enters it.
    ///
    /// The waiter is registered with the driver when this is called, so every
    /// transition issued afterwards is seen, even one the driver leaves again
    /// within the same turn. Fails with [`Error::KokoroStopped`] if the driver
    /// stops first, unless `target` is [`KokoroState::Idle`].
    pub fn wait_for(
        &self,
        target: KokoroState,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let registered = self.send(Command::Wait(target, tx)).is_ok();
        async move {
            if !registered {
                return match target {
                    KokoroState::Idle => Ok(()),
                    _ => Err(Error::KokoroStopped),
                };
            }
            rx.await.map_err(|_| Error::KokoroStopped)
        }
    }
}

struct Driver {
    config: KokoroConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    signals: mpsc::Sender<HeartbeatSignal>,
    state: watch::Sender<KokoroState>,
    timing: Arc<Mutex<Timing>>,
    interval: Duration,
    last_beat: Option<Instant>,
    deadline: Option<Instant>,
    waiters: Vec<(KokoroState, oneshot::Sender<()>)>,
}

impl Driver {
    async fn run(mut self) {
        debug!("kokoro started");
        loop {
            let running = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Terminate) | None => false,
                    Some(command) => self.handle(command).await,
                },
                _ = sleep_until_some(self.deadline) => self.on_deadline().await,
                _ = self.signals.closed() => {
                    info!("heartbeat receiver dropped, stopping kokoro");
                    false
                }
            };
            if !running {
                break;
            }
        }

        self.commands.close();
        self.transition(KokoroState::Idle, None);
        // waiters queued behind the final command
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Wait(KokoroState::Idle, tx) = command {
                let _ = tx.send(());
            }
        }
        // the rest see their sender dropped and fail as stopped
        self.waiters.clear();
        debug!("kokoro stopped");
    }

    fn current(&self) -> KokoroState {
        *self.state.borrow()
    }

    fn transition(&mut self, to: KokoroState, deadline: Option<Instant>) {
        self.deadline = deadline;
        let from = self.state.send_replace(to);
        if from != to {
            debug!("kokoro {:?} -> {:?}", from, to);
        }
        for (target, tx) in std::mem::take(&mut self.waiters) {
            if target == to {
                let _ = tx.send(());
            } else if !tx.is_closed() {
                self.waiters.push((target, tx));
            }
        }
    }

    fn ack_timeout(&self) -> Duration {
        self.config
            .ack_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.interval)
    }

    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Connected(interval) => {
                self.interval = interval;
                let delay = if self.config.first_beat_jitter {
                    interval.mul_f64(rand::random::<f64>())
                } else {
                    interval
                };
                debug!(
                    "heartbeat interval {}ms, first beat in {}ms",
                    interval.as_millis(),
                    delay.as_millis()
                );
                self.last_beat = None;
                self.transition(KokoroState::Beating, Some(Instant::now() + delay));
                true
            }
            Command::Disconnected => {
                self.last_beat = None;
                self.transition(KokoroState::AwaitingSocket, None);
                true
            }
            Command::Restart => {
                self.last_beat = None;
                *self.timing.lock() = Timing::default();
                self.transition(KokoroState::AwaitingSocket, None);
                true
            }
            Command::Ack => {
                self.on_ack();
                true
            }
            Command::BeatNow => match self.current() {
                KokoroState::Beating => self.beat().await,
                KokoroState::AwaitingAck => {
                    // keep the pending ack deadline, the earlier beat is still owed an answer
                    if !self.emit(HeartbeatSignal::Beat).await {
                        return false;
                    }
                    let now = Instant::now();
                    self.last_beat = Some(now);
                    self.timing.lock().last_send = Some(now);
                    true
                }
                state => {
                    debug!("ignoring heartbeat request while {:?}", state);
                    true
                }
            },
            Command::Wait(target, tx) => {
                if target == self.current() {
                    let _ = tx.send(());
                } else {
                    self.waiters.push((target, tx));
                }
                true
            }
            // handled by the run loop
            Command::Terminate => false,
        }
    }

    async fn on_deadline(&mut self) -> bool {
        match self.current() {
            KokoroState::Beating => self.beat().await,
            KokoroState::AwaitingAck => self.zombie().await,
            _ => {
                self.deadline = None;
                true
            }
        }
    }

    async fn beat(&mut self) -> bool {
        if !self.emit(HeartbeatSignal::Beat).await {
            return false;
        }
        let now = Instant::now();
        self.last_beat = Some(now);
        self.timing.lock().last_send = Some(now);
        let deadline = now + self.ack_timeout();
        self.transition(KokoroState::AwaitingAck, Some(deadline));
        true
    }

    fn on_ack(&mut self) {
        if self.current() != KokoroState::AwaitingAck {
            debug!("ignoring heartbeat ack while {:?}", self.current());
            return;
        }
        let now = Instant::now();
        self.timing.lock().last_answer = Some(now);
        let next = self
            .last_beat
            .map_or(now, |sent| sent + self.interval)
            .max(now);
        self.transition(KokoroState::Beating, Some(next));
    }

    async fn zombie(&mut self) -> bool {
        warn!(
            "heartbeat not acknowledged within {}ms, connection is zombied",
            self.ack_timeout().as_millis()
        );
        self.last_beat = None;
        *self.timing.lock() = Timing::default();
        self.transition(KokoroState::AwaitingSocket, None);
        self.emit(HeartbeatSignal::Zombie).await
    }

    async fn emit(&self, signal: HeartbeatSignal) -> bool {
        if self.signals.send(signal).await.is_err() {
            info!("heartbeat receiver dropped, stopping kokoro");
            return false;
        }
        true
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
