//! Connection bootstrap state machines.
//!
//! Two mirror-image sessions drive a pair of peers from a room code to an
//! open transfer channel. [`OfferSession`] opens the room, publishes the
//! offer, polls for the answer, and sends the file. [`AnswerSession`]
//! joins with the code, publishes the answer, and receives.
//!
//! ## States
//!
//! | State        | Meaning                                            |
//! |--------------|----------------------------------------------------|
//! | `Idle`       | constructed, nothing started                       |
//! | `Starting`   | creating the room                                  |
//! | `Waiting`    | handshake step published, waiting on the peer      |
//! | `Connecting` | polling the relay for the counterpart description  |
//! | `Ready`      | transfer channel open end to end                   |
//! | `Receiving`  | payload flowing in (answer side)                   |
//! | `Completed`  | transfer finished                                  |
//! | `Expired`    | room lapsed, locally or at the store               |
//! | `Failed`     | terminal failure other than expiry                 |
//!
//! Expiry is deliberately distinct from failure: a UI offers "open a new
//! room" for one and "retry" for the other. Cancellation never settles a
//! terminal state; it unwinds silently.
//!
//! Every bootstrap attempt owns fresh instances: the connection, channel,
//! countdown, and cancellation token of a torn-down session are never
//! reused. Reset means construct a new session.

use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::relay::{SignalRole, SignalingRelay};
use crate::room::RoomCode;
use crate::transfer::{
    FileMeta, FileReceiver, FileSender, ReceivedFile, SinkFactory, TransferConfig,
    TransferProgress,
};
use crate::transport::{DataChannel, PeerConnection};

/// Label of the data channel that carries the transfer.
pub const CHANNEL_LABEL: &str = "file";

/// Client-side countdown on a freshly opened room. Mirrors the store TTL;
/// the store stays authoritative for data lifetime, the local clock for UX.
pub const ROOM_COUNTDOWN: Duration = crate::relay::ROOM_TTL;

/// Delay between relay polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(800);

/// Wall-clock budget for one polling loop, measured from loop entry.
pub const POLL_BUDGET: Duration = Duration::from_secs(60);

/// Bounded wait for ICE candidate gathering. Lapsing is not a failure;
/// candidates gathered so far are published.
pub const ICE_GATHER_TIMEOUT: Duration = Duration::from_millis(2500);

/// Observable lifecycle of a bootstrap session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, nothing started.
    Idle,
    /// Creating the room.
    Starting,
    /// Handshake step published, waiting on the peer or the open event.
    Waiting,
    /// Polling the relay for the counterpart description.
    Connecting,
    /// Transfer channel open end to end.
    Ready,
    /// Payload flowing in.
    Receiving,
    /// Transfer finished.
    Completed,
    /// Room lapsed, locally or at the store.
    Expired,
    /// Terminal failure other than expiry.
    Failed,
}

impl SessionState {
    /// Whether the session can make no further progress.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Failed)
    }
}

/// Tunables for a bootstrap attempt.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Client-side room countdown.
    pub countdown: Duration,
    /// Delay between relay polls.
    pub poll_interval: Duration,
    /// Wall-clock budget for one polling loop.
    pub poll_budget: Duration,
    /// Bounded ICE gathering wait.
    pub ice_gather_timeout: Duration,
    /// Transfer-layer settings.
    pub transfer: TransferConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            countdown: ROOM_COUNTDOWN,
            poll_interval: POLL_INTERVAL,
            poll_budget: POLL_BUDGET,
            ice_gather_timeout: ICE_GATHER_TIMEOUT,
            transfer: TransferConfig::default(),
        }
    }
}

/// State plumbing shared by both session flavors.
#[derive(Debug)]
struct SessionCore {
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
}

impl SessionCore {
    fn new(config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            state,
            cancel: CancellationToken::new(),
        }
    }

    fn set_state(&self, next: SessionState) {
        let previous = *self.state.borrow();
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "session state");
        }
        self.state.send_replace(next);
    }

    fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Route a failure to its terminal state. Expiry lands in `Expired`,
    /// cancellation leaves the state untouched, everything else fails.
    fn settle(&self, err: Error) -> Error {
        if err.is_expiry() {
            self.set_state(SessionState::Expired);
        } else if !err.is_cancelled() {
            tracing::warn!(code = err.code(), %err, "session failed");
            self.set_state(SessionState::Failed);
        }
        err
    }
}

/// Poll the relay until the wanted description appears.
///
/// Honors, in order: the cancellation token, the local countdown
/// deadline, and the wall-clock polling budget. Countdown lapse reads as
/// room expiry; budget exhaustion is a timeout.
async fn poll_for_signal<R: SignalingRelay>(
    relay: &R,
    room: &RoomCode,
    role: SignalRole,
    config: &SessionConfig,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> Result<String> {
    let budget_ends = Instant::now() + config.poll_budget;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if deadline.is_some_and(|at| Instant::now() >= at) {
            return Err(Error::RoomNotFound(room.to_string()));
        }

        let signals = relay.poll(room).await?;
        let found = match role {
            SignalRole::Offer => signals.offer,
            SignalRole::Answer => signals.answer,
        };
        if let Some(description) = found {
            return Ok(description);
        }

        if Instant::now() >= budget_ends {
            return Err(Error::Timeout(config.poll_budget.as_secs()));
        }
        tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = tokio::time::sleep(config.poll_interval) => {}
        }
    }
}

/// Wait for the channel's open event, bounded by the countdown deadline
/// when one applies.
async fn wait_until_open<C: DataChannel>(
    channel: &C,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
    room: &RoomCode,
) -> Result<()> {
    let countdown = async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        () = cancel.cancelled() => Err(Error::Cancelled),
        () = countdown => Err(Error::RoomNotFound(room.to_string())),
        result = channel.ready() => result,
    }
}

/// The sending side: opens a room, negotiates, transfers one file.
pub struct OfferSession<R, P>
where
    P: PeerConnection,
{
    relay: R,
    connection: P,
    core: SessionCore,
    sender: FileSender,
    room: Option<RoomCode>,
    expires_at: Option<Instant>,
    channel: Option<P::Channel>,
}

impl<R, P: PeerConnection> std::fmt::Debug for OfferSession<R, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfferSession")
            .field("state", &self.core.current())
            .field("room", &self.room)
            .finish_non_exhaustive()
    }
}

impl<R: SignalingRelay, P: PeerConnection> OfferSession<R, P> {
    /// Create a session with default settings.
    pub fn new(relay: R, connection: P) -> Self {
        Self::with_config(relay, connection, SessionConfig::default())
    }

    /// Create a session with custom settings.
    pub fn with_config(relay: R, connection: P, config: SessionConfig) -> Self {
        let core = SessionCore::new(config);
        let sender =
            FileSender::with_cancellation(core.config.transfer.clone(), core.cancel.clone());
        Self {
            relay,
            connection,
            core,
            sender,
            room: None,
            expires_at: None,
            channel: None,
        }
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.core.state.subscribe()
    }

    /// The state right now.
    #[must_use]
    pub fn current_state(&self) -> SessionState {
        self.core.current()
    }

    /// Subscribe to transfer progress.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.sender.progress()
    }

    /// The room opened by [`OfferSession::open`], if any.
    #[must_use]
    pub fn room(&self) -> Option<&RoomCode> {
        self.room.as_ref()
    }

    /// When the local countdown lapses, if the room is open.
    #[must_use]
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Request cancellation of whatever the session is doing.
    ///
    /// In-flight calls return [`Error::Cancelled`], which is an expected
    /// outcome rather than a failure.
    pub fn cancel(&self) {
        self.core.cancel.cancel();
    }

    /// A handle that cancels this session, for wiring into UI actions.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.core.cancel.clone()
    }

    /// Create the room and start the countdown. Returns the code to show
    /// the user.
    pub async fn open(&mut self) -> Result<RoomCode> {
        if self.room.is_some() {
            return Err(Error::Internal("session already opened".to_string()));
        }
        self.core.set_state(SessionState::Starting);
        let room = match self.relay.create_room().await {
            Ok(room) => room,
            Err(err) => return Err(self.core.settle(err)),
        };
        self.expires_at = Some(Instant::now() + self.core.config.countdown);
        tracing::info!(room = %room, "room opened");
        self.room = Some(room.clone());
        Ok(room)
    }

    /// Negotiate the connection and wait for the transfer channel to open.
    pub async fn connect(&mut self) -> Result<()> {
        let room = self
            .room
            .clone()
            .ok_or_else(|| Error::Internal("connect called before open".to_string()))?;
        match self.drive_connect(&room).await {
            Ok(()) => {
                self.core.set_state(SessionState::Ready);
                Ok(())
            }
            Err(err) => Err(self.core.settle(err)),
        }
    }

    async fn drive_connect(&mut self, room: &RoomCode) -> Result<()> {
        if self.core.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        // The local countdown wins over whatever the store still holds.
        if self.expires_at.is_some_and(|at| Instant::now() >= at) {
            return Err(Error::RoomNotFound(room.to_string()));
        }

        self.core.set_state(SessionState::Waiting);
        // Creating the channel is what kicks off ICE negotiation; the
        // same channel carries the transfer once open.
        let channel = self.connection.create_channel(CHANNEL_LABEL).await?;

        let offer = self.connection.create_offer().await?;
        self.connection.set_local_description(&offer).await?;
        if tokio::time::timeout(self.core.config.ice_gather_timeout, self.connection.ice_complete())
            .await
            .is_err()
        {
            tracing::debug!("candidate gathering window lapsed, publishing what we have");
        }
        let description = self.connection.local_description().await?.unwrap_or(offer);
        self.relay
            .publish(room, SignalRole::Offer, &description)
            .await?;

        self.core.set_state(SessionState::Connecting);
        let answer = poll_for_signal(
            &self.relay,
            room,
            SignalRole::Answer,
            &self.core.config,
            self.expires_at,
            &self.core.cancel,
        )
        .await?;
        self.connection.set_remote_description(&answer).await?;

        self.core.set_state(SessionState::Waiting);
        wait_until_open(&channel, self.expires_at, &self.core.cancel, room).await?;
        self.channel = Some(channel);
        Ok(())
    }

    /// Send the file at `path` over the open channel.
    pub async fn send_path(&mut self, path: &Path) -> Result<()> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| Error::Internal("transfer before the channel is ready".to_string()))?;
        match self.sender.send_path(channel, path).await {
            Ok(()) => {
                self.core.set_state(SessionState::Completed);
                Ok(())
            }
            Err(err) => Err(self.core.settle(err)),
        }
    }

    /// Send bytes from `reader` described by `meta` over the open channel.
    pub async fn send_reader<Rd>(&mut self, reader: Rd, meta: FileMeta) -> Result<()>
    where
        Rd: AsyncRead + Unpin + Send,
    {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| Error::Internal("transfer before the channel is ready".to_string()))?;
        match self.sender.send_reader(channel, reader, meta).await {
            Ok(()) => {
                self.core.set_state(SessionState::Completed);
                Ok(())
            }
            Err(err) => Err(self.core.settle(err)),
        }
    }

    /// Force the expired state and tear down, for hosts whose countdown
    /// display reaches zero while nothing is in flight.
    pub async fn expire(&mut self) {
        self.core.set_state(SessionState::Expired);
        self.teardown().await;
    }

    /// Release everything the attempt holds: cancel in-flight work, close
    /// the channel and connection, clear the countdown. Safe to call any
    /// number of times.
    pub async fn teardown(&mut self) {
        self.core.cancel.cancel();
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        self.connection.close().await;
        self.expires_at = None;
        tracing::debug!("offer session torn down");
    }
}

/// The receiving side: joins a room by code and receives one file.
pub struct AnswerSession<R, P>
where
    P: PeerConnection,
{
    relay: R,
    connection: P,
    core: SessionCore,
    room: RoomCode,
    receiver: Option<FileReceiver>,
    progress_rx: watch::Receiver<TransferProgress>,
    channel: Option<P::Channel>,
}

impl<R, P: PeerConnection> std::fmt::Debug for AnswerSession<R, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerSession")
            .field("state", &self.core.current())
            .field("room", &self.room)
            .finish_non_exhaustive()
    }
}

impl<R: SignalingRelay, P: PeerConnection> AnswerSession<R, P> {
    /// Create a session for the entered code.
    ///
    /// The code is validated locally before anything touches the network;
    /// a malformed code fails here, immediately.
    pub fn new(code: &str, relay: R, connection: P) -> Result<Self> {
        Self::with_config(code, relay, connection, SessionConfig::default())
    }

    /// Create a session with custom settings.
    pub fn with_config(code: &str, relay: R, connection: P, config: SessionConfig) -> Result<Self> {
        let room = RoomCode::parse(code)?;
        let receiver = FileReceiver::new();
        let progress_rx = receiver.progress();
        Ok(Self {
            relay,
            connection,
            core: SessionCore::new(config),
            room,
            receiver: Some(receiver),
            progress_rx,
            channel: None,
        })
    }

    /// The room this session joins.
    #[must_use]
    pub fn room(&self) -> &RoomCode {
        &self.room
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.core.state.subscribe()
    }

    /// The state right now.
    #[must_use]
    pub fn current_state(&self) -> SessionState {
        self.core.current()
    }

    /// Subscribe to transfer progress.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress_rx.clone()
    }

    /// Stream incoming bytes through `factory` instead of buffering them
    /// in memory. Takes effect if installed before the transfer starts.
    pub fn set_sink_factory(&mut self, factory: Box<dyn SinkFactory>) {
        if let Some(receiver) = self.receiver.as_mut() {
            receiver.set_sink_factory(factory);
        }
    }

    /// Request cancellation of whatever the session is doing.
    pub fn cancel(&self) {
        self.core.cancel.cancel();
    }

    /// A handle that cancels this session, for wiring into UI actions.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.core.cancel.clone()
    }

    /// Fetch the offer, publish the answer, and wait for the transfer
    /// channel to open.
    pub async fn connect(&mut self) -> Result<()> {
        match self.drive_connect().await {
            Ok(()) => {
                self.core.set_state(SessionState::Ready);
                Ok(())
            }
            Err(err) => Err(self.core.settle(err)),
        }
    }

    async fn drive_connect(&mut self) -> Result<()> {
        if self.core.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.core.set_state(SessionState::Connecting);
        let offer = poll_for_signal(
            &self.relay,
            &self.room,
            SignalRole::Offer,
            &self.core.config,
            None,
            &self.core.cancel,
        )
        .await?;
        self.connection.set_remote_description(&offer).await?;

        let answer = self.connection.create_answer().await?;
        self.connection.set_local_description(&answer).await?;
        if tokio::time::timeout(self.core.config.ice_gather_timeout, self.connection.ice_complete())
            .await
            .is_err()
        {
            tracing::debug!("candidate gathering window lapsed, publishing what we have");
        }
        let description = self.connection.local_description().await?.unwrap_or(answer);
        self.relay
            .publish(&self.room, SignalRole::Answer, &description)
            .await?;

        self.core.set_state(SessionState::Waiting);
        let channel = tokio::select! {
            () = self.core.cancel.cancelled() => return Err(Error::Cancelled),
            result = self.connection.incoming_channel() => result?,
        };
        wait_until_open(&channel, None, &self.core.cancel, &self.room).await?;
        self.channel = Some(channel);
        Ok(())
    }

    /// Receive the file over the open channel.
    pub async fn receive(&mut self) -> Result<ReceivedFile> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| Error::Internal("receive before the channel is ready".to_string()))?;
        let mut receiver = self
            .receiver
            .take()
            .ok_or_else(|| Error::Internal("transfer already consumed".to_string()))?;

        self.core.set_state(SessionState::Receiving);
        let outcome = tokio::select! {
            () = self.core.cancel.cancelled() => Err(Error::Cancelled),
            result = receiver.run(channel) => result,
        };
        match outcome {
            Ok(file) => {
                self.core.set_state(SessionState::Completed);
                Ok(file)
            }
            Err(err) => Err(self.core.settle(err)),
        }
    }

    /// Release everything the attempt holds. Safe to call any number of
    /// times.
    pub async fn teardown(&mut self) {
        self.core.cancel.cancel();
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        self.connection.close().await;
        // Dropping the receiver releases any buffered transfer state.
        self.receiver.take();
        tracing::debug!("answer session torn down");
    }
}
