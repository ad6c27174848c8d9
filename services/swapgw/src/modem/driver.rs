//! Serial modem driver
//!
//! A single reader task owns the incoming side of the link and every mode
//! transition. Callers wait on the published mode (through a watch channel)
//! and on a single-slot reply channel, each wait bounded by the configured
//! polling window and ended early when the driver closes.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swap_link::{Frame, ModemSetup};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{at, FrameSender, LineCodec, ModemEvent, ModemMode};
use crate::config::ModemConfig;
use crate::dispatch::{Dispatcher, ListenerSet, SubscriptionId};
use crate::error::{GatewayError, Result};
use crate::transport::{BoxedReader, BoxedWriter, Transport, TransportError};

/// Capacity of the ordered event stream handed out by [`Modem::subscribe`]
const DEFAULT_EVENT_BUFFER: usize = 256;

struct ModemInner {
    config: ModemConfig,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    transport_name: String,
    transport_type: String,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    /// Held for a whole enter/exchange/leave cycle and briefly by every send
    exchange: tokio::sync::Mutex<()>,
    mode: watch::Sender<ModemMode>,
    open: AtomicBool,
    session: Mutex<CancellationToken>,
    reply_slot: Mutex<Option<oneshot::Sender<String>>>,
    setup: Mutex<Option<ModemSetup>>,
    listeners: ListenerSet<ModemEvent>,
    dispatcher: Dispatcher,
    events: broadcast::Sender<ModemEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// Driver for a SWAP modem attached through a [`Transport`]
///
/// Cheap to clone; all clones drive the same link.
#[derive(Clone)]
pub struct Modem {
    inner: Arc<ModemInner>,
}

impl fmt::Debug for Modem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Modem")
            .field("transport", &self.inner.transport_name)
            .field("open", &self.is_open())
            .field("mode", &self.mode())
            .finish()
    }
}

impl Modem {
    pub fn new(transport: Box<dyn Transport>, config: ModemConfig, dispatcher: Dispatcher) -> Self {
        Self::with_event_buffer(transport, config, dispatcher, DEFAULT_EVENT_BUFFER)
    }

    /// Like [`Modem::new`] with an explicit capacity for subscriber streams
    pub fn with_event_buffer(
        transport: Box<dyn Transport>,
        config: ModemConfig,
        dispatcher: Dispatcher,
        event_buffer: usize,
    ) -> Self {
        let (mode, _) = watch::channel(ModemMode::Data);
        let (events, _) = broadcast::channel(event_buffer.max(1));
        let transport_name = transport.name().to_string();
        let transport_type = transport.transport_type().to_string();
        let setup = Mutex::new(config.setup);

        Self {
            inner: Arc::new(ModemInner {
                config,
                transport: tokio::sync::Mutex::new(transport),
                transport_name,
                transport_type,
                writer: tokio::sync::Mutex::new(None),
                exchange: tokio::sync::Mutex::new(()),
                mode,
                open: AtomicBool::new(false),
                session: Mutex::new(CancellationToken::new()),
                reply_slot: Mutex::new(None),
                setup,
                listeners: ListenerSet::new(),
                dispatcher,
                events,
                reader: Mutex::new(None),
            }),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the transport and start the reader
    ///
    /// A configuration recorded while closed is applied to the modem.
    pub async fn open(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.open.load(Ordering::SeqCst) {
            debug!("Modem on {} already open", inner.transport_name);
            return Ok(());
        }

        let conn = inner.transport.lock().await.connect().await?;
        let token = CancellationToken::new();
        *inner.session.lock() = token.clone();
        *inner.writer.lock().await = Some(conn.writer);

        let initial = if inner.config.wait_for_ready {
            ModemMode::Init
        } else {
            ModemMode::Data
        };
        inner.mode.send_replace(initial);
        inner.open.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(reader_loop(inner.clone(), conn.reader, token));
        *inner.reader.lock() = Some(handle);
        info!(
            "Modem opened on {} ({}), mode {}",
            inner.transport_name, inner.transport_type, initial
        );

        let pending = *inner.setup.lock();
        if let Some(setup) = pending {
            debug!("Applying recorded modem setup: {}", setup);
            self.exchange_setup(setup).await?;
        }
        Ok(())
    }

    /// Close the link; every waiter is released with an error
    pub async fn close(&self) -> Result<()> {
        let reader = self.inner.reader.lock().take();
        self.inner.shutdown_session("closed by request").await;
        if let Some(handle) = reader {
            let _ = handle.await;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> ModemMode {
        *self.inner.mode.borrow()
    }

    pub fn transport_name(&self) -> &str {
        &self.inner.transport_name
    }

    pub fn transport_type(&self) -> &str {
        &self.inner.transport_type
    }

    // ========================================================================
    // Data frames
    // ========================================================================

    /// Write a frame and notify "sent" listeners
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if !self.is_open() {
            return Err(GatewayError::not_open(format!(
                "cannot send {} on closed modem",
                frame
            )));
        }
        {
            // Never interleave with a configuration exchange
            let _exchange = self.inner.exchange.lock().await;
            let line = format!("{}\r", frame.to_modem_text());
            self.inner.write_raw(&line).await?;
        }
        self.inner.publish(ModemEvent::Sent(frame));
        Ok(())
    }

    /// Register a callback run on the dispatch pool for every event
    pub fn add_listener<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ModemEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Ordered event stream for internal consumers
    ///
    /// A receiver that falls behind loses the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.inner.events.subscribe()
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// The modem's radio configuration
    ///
    /// Cached after the first successful exchange. A closed driver with no
    /// cached value reports all zeros without caching them.
    pub async fn get_configuration(&self) -> Result<ModemSetup> {
        if let Some(setup) = *self.inner.setup.lock() {
            return Ok(setup);
        }
        if !self.is_open() {
            return Ok(ModemSetup::default());
        }

        let _exchange = self.inner.exchange.lock().await;
        if let Some(setup) = *self.inner.setup.lock() {
            return Ok(setup);
        }

        let token = self.inner.session_token();
        self.inner.enter_command_mode(&token).await?;
        let read = self.inner.read_setup(&token).await;
        let left = self.inner.leave_command_mode(&token).await;
        let setup = read?;
        left?;

        info!("Modem configuration: {}", setup);
        *self.inner.setup.lock() = Some(setup);
        Ok(setup)
    }

    /// Change the modem's radio configuration
    ///
    /// On a closed driver the value is only recorded and applied on open.
    pub async fn set_configuration(&self, setup: ModemSetup) -> Result<()> {
        if !self.is_open() {
            debug!("Modem closed, recording setup {} for next open", setup);
            *self.inner.setup.lock() = Some(setup);
            return Ok(());
        }
        self.exchange_setup(setup).await
    }

    async fn exchange_setup(&self, setup: ModemSetup) -> Result<()> {
        let _exchange = self.inner.exchange.lock().await;
        let token = self.inner.session_token();

        self.inner.enter_command_mode(&token).await?;
        let written = self.inner.write_setup(&token, &setup).await;
        let left = self.inner.leave_command_mode(&token).await;
        written?;
        left?;

        info!("Modem configured: {}", setup);
        *self.inner.setup.lock() = Some(setup);
        Ok(())
    }
}

#[async_trait]
impl FrameSender for Modem {
    async fn send_frame(&self, frame: Frame) -> Result<()> {
        self.send(frame).await
    }
}

// ============================================================================
// Driver internals
// ============================================================================

impl ModemInner {
    fn session_token(&self) -> CancellationToken {
        self.session.lock().clone()
    }

    fn current_mode(&self) -> ModemMode {
        *self.mode.borrow()
    }

    fn set_mode(&self, mode: ModemMode) {
        let previous = self.mode.send_replace(mode);
        if previous != mode {
            debug!("Modem mode {} -> {}", previous, mode);
        }
    }

    fn publish(&self, event: ModemEvent) {
        // No receivers is fine
        let _ = self.events.send(event.clone());
        self.listeners.notify(&self.dispatcher, event);
    }

    async fn write_raw(&self, text: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| GatewayError::not_open("modem is not open"))?;

        trace!("SEND: '{}'", text.trim_end());
        let result = async {
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        drop(guard);

        if let Err(e) = result {
            let err = TransportError::SendFailed(format!(
                "write to {} failed: {}",
                self.transport_name, e
            ));
            error!("{}", err);
            self.shutdown_session("write failure").await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Wait until the mode becomes `target`
    ///
    /// `Ok(false)` when the window passes first, `Err(Closed)` when the
    /// driver closes first.
    async fn wait_for_mode(
        &self,
        token: &CancellationToken,
        target: ModemMode,
        window: Duration,
    ) -> Result<bool> {
        let mut rx = self.mode.subscribe();
        let reached = async { rx.wait_for(|mode| *mode == target).await.map(|_| ()) };
        tokio::select! {
            _ = token.cancelled() => Err(GatewayError::closed(format!(
                "modem closed while waiting for {} mode",
                target
            ))),
            res = timeout(window, reached) => match res {
                Ok(Ok(())) => Ok(true),
                Ok(Err(_)) => Err(GatewayError::closed("modem dropped")),
                Err(_) => Ok(false),
            },
        }
    }

    async fn enter_command_mode(&self, token: &CancellationToken) -> Result<()> {
        if self.current_mode() == ModemMode::Init {
            debug!("Waiting for modem ready banner");
            if !self
                .wait_for_mode(token, ModemMode::Data, self.config.ready_timeout())
                .await?
            {
                return Err(GatewayError::mode_timeout(
                    "modem never announced it was ready",
                ));
            }
        }
        if self.current_mode() == ModemMode::Command {
            return Ok(());
        }

        let window = self.config.mode_window();
        let attempts = self.config.escape_retries.max(1);
        for attempt in 1..=attempts {
            self.write_raw(at::ESCAPE).await?;
            if self.wait_for_mode(token, ModemMode::Command, window).await? {
                return Ok(());
            }
            debug!(
                "No command mode acknowledgement (attempt {}/{})",
                attempt, attempts
            );
        }

        warn!(
            "Modem on {} did not enter command mode after {} attempts",
            self.transport_name, attempts
        );
        Err(GatewayError::mode_timeout(format!(
            "no command mode acknowledgement after {} escape attempts",
            attempts
        )))
    }

    async fn leave_command_mode(&self, token: &CancellationToken) -> Result<()> {
        if self.current_mode() != ModemMode::Command {
            return Ok(());
        }
        self.write_raw(&format!("{}\r", at::LEAVE_COMMAND_MODE)).await?;
        if self
            .wait_for_mode(token, ModemMode::Data, self.config.mode_window())
            .await?
        {
            return Ok(());
        }
        warn!("Modem on {} did not acknowledge ATO", self.transport_name);
        Err(GatewayError::mode_timeout("no data mode acknowledgement"))
    }

    /// Send one AT request and wait for its single reply line
    async fn at_request(&self, token: &CancellationToken, cmd: &str) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        *self.reply_slot.lock() = Some(tx);
        self.write_raw(&format!("{}\r", cmd)).await?;

        let reply = tokio::select! {
            _ = token.cancelled() => Err(GatewayError::closed(format!(
                "modem closed while waiting for reply to {}",
                cmd
            ))),
            res = timeout(self.config.response_timeout(), rx) => match res {
                Ok(Ok(line)) => Ok(line),
                Ok(Err(_)) => Err(GatewayError::closed(format!(
                    "modem closed while waiting for reply to {}",
                    cmd
                ))),
                Err(_) => {
                    self.reply_slot.lock().take();
                    Err(GatewayError::timeout(format!("no reply to {}", cmd)))
                },
            },
        };
        if let Ok(line) = &reply {
            debug!("AT {} -> {}", cmd, line);
        }
        reply
    }

    async fn read_setup(&self, token: &CancellationToken) -> Result<ModemSetup> {
        let channel = at::parse_channel(&self.at_request(token, at::READ_CHANNEL).await?)?;
        let network_id = at::parse_network_id(&self.at_request(token, at::READ_NETWORK_ID).await?)?;
        let address = at::parse_address(&self.at_request(token, at::READ_ADDRESS).await?)?;
        Ok(ModemSetup::new(channel, network_id, address))
    }

    async fn write_setup(&self, token: &CancellationToken, setup: &ModemSetup) -> Result<()> {
        for cmd in at::write_commands(setup) {
            let reply = self.at_request(token, &cmd).await?;
            at::check_write_reply(&cmd, &reply)?;
        }
        Ok(())
    }

    /// Interpret one line from the modem
    ///
    /// Runs on the reader task; never waits on anything.
    fn handle_line(&self, line: &str) {
        trace!("RECV: '{}'", line);

        if Frame::is_frame_line(line) {
            // The peer may interleave frames with a configuration exchange
            if self.current_mode() != ModemMode::Data {
                self.set_mode(ModemMode::Data);
            }
            match Frame::decode(line) {
                Ok(frame) => self.publish(ModemEvent::Received(frame)),
                Err(e) => warn!("Dropping malformed frame line '{}': {}", line, e),
            }
            return;
        }

        match line {
            at::OK_COMMAND_MODE => self.set_mode(ModemMode::Command),
            at::OK_DATA_MODE | at::MODEM_READY => self.set_mode(ModemMode::Data),
            reply if self.current_mode() == ModemMode::Command => {
                match self.reply_slot.lock().take() {
                    Some(tx) => {
                        let _ = tx.send(reply.to_string());
                    },
                    None => debug!("Unsolicited command mode line '{}'", reply),
                }
            },
            other => trace!("Ignoring non-frame line '{}'", other),
        }
    }

    /// Tear down the current session once
    async fn shutdown_session(&self, reason: &str) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        self.session.lock().cancel();
        // Dropping the sender wakes a pending AT request
        self.reply_slot.lock().take();

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        info!("Modem on {} closed: {}", self.transport_name, reason);
        self.publish(ModemEvent::Closed);
    }
}

async fn reader_loop(inner: Arc<ModemInner>, reader: BoxedReader, token: CancellationToken) {
    let mut lines = FramedRead::new(reader, LineCodec::new(inner.config.max_line_length));

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = lines.next() => next,
        };
        match next {
            Some(Ok(line)) => inner.handle_line(&line),
            Some(Err(e)) => {
                let err = TransportError::ConnectionLost(format!(
                    "read from {} failed: {}",
                    inner.transport_name, e
                ));
                error!("{}", err);
                inner.shutdown_session("read failure").await;
                break;
            },
            None => {
                warn!("Modem link {} reached end of stream", inner.transport_name);
                inner.shutdown_session("link closed by peer").await;
                break;
            },
        }
    }
    debug!("Modem reader on {} stopped", inner.transport_name);
}
