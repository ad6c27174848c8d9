//! Mock transport and a scriptable modem for tests
//!
//! [`MockTransport`] hands the driver one end of an in-memory pipe. The other
//! end is a [`ModemPeer`], which tests either drive by hand or hand to a
//! [`SimulatedModem`] that answers escapes, `ATO` and AT requests the way the
//! real modem firmware does.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swap_link::ModemSetup;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::traits::{Connection, Transport, TransportError};
use crate::modem::at;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Transport backed by an in-memory pipe
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    stream: Option<DuplexStream>,
}

impl MockTransport {
    /// Create a transport and the modem-side end of its pipe
    pub fn pair() -> (Self, ModemPeer) {
        let (driver_side, modem_side) = tokio::io::duplex(PIPE_CAPACITY);
        let transport = Self {
            name: "mock".to_string(),
            stream: Some(driver_side),
        };
        (transport, ModemPeer::new(modem_side))
    }

    /// A transport whose connect always fails
    pub fn unavailable() -> Self {
        Self {
            name: "mock-unavailable".to_string(),
            stream: None,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn transport_type(&self) -> &str {
        "mock"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<Connection, TransportError> {
        let stream = self.stream.take().ok_or_else(|| {
            TransportError::ConnectionFailed(format!("{} has no link available", self.name))
        })?;
        Ok(Connection::from_stream(stream))
    }
}

/// The modem's end of a mock link
#[derive(Debug)]
pub struct ModemPeer {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
    buf: Vec<u8>,
}

impl ModemPeer {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer,
            buf: Vec::new(),
        }
    }

    /// Write one CRLF-terminated line towards the driver
    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await
    }

    /// Next thing the driver wrote: the bare escape sequence or one line
    ///
    /// Returns `None` once the driver side is gone.
    pub async fn next_command(&mut self) -> io::Result<Option<String>> {
        loop {
            let skip = self
                .buf
                .iter()
                .take_while(|b| **b == b'\r' || **b == b'\n')
                .count();
            self.buf.drain(..skip);

            if self.buf.starts_with(at::ESCAPE.as_bytes()) {
                self.buf.drain(..at::ESCAPE.len());
                return Ok(Some(at::ESCAPE.to_string()));
            }
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\r' || *b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line[..pos]).into_owned();
                return Ok(Some(text));
            }

            let mut chunk = [0u8; 256];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Like [`ModemPeer::next_command`] but gives up after `within`
    pub async fn expect_command(&mut self, within: Duration) -> Option<String> {
        match tokio::time::timeout(within, self.next_command()).await {
            Ok(Ok(cmd)) => cmd,
            _ => None,
        }
    }
}

#[derive(Debug)]
struct SimState {
    setup: Mutex<ModemSetup>,
    ack_escape: AtomicBool,
    ack_data: AtomicBool,
    escapes: AtomicUsize,
    at_log: Mutex<Vec<String>>,
}

/// A modem firmware stand-in running on its own task
#[derive(Debug)]
pub struct SimulatedModem {
    state: Arc<SimState>,
    inject_tx: mpsc::UnboundedSender<String>,
    data_rx: mpsc::UnboundedReceiver<String>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SimulatedModem {
    /// Start answering on `peer` with the given radio configuration
    pub fn spawn(peer: ModemPeer, setup: ModemSetup) -> Self {
        let state = Arc::new(SimState {
            setup: Mutex::new(setup),
            ack_escape: AtomicBool::new(true),
            ack_data: AtomicBool::new(true),
            escapes: AtomicUsize::new(0),
            at_log: Mutex::new(Vec::new()),
        });
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let task = tokio::spawn(run_simulation(
            peer,
            state.clone(),
            inject_rx,
            data_tx,
            token.clone(),
        ));

        Self {
            state,
            inject_tx,
            data_rx,
            token,
            task,
        }
    }

    /// Push a line (frame, banner, anything) to the driver
    pub fn inject(&self, line: impl Into<String>) {
        let _ = self.inject_tx.send(line.into());
    }

    pub fn announce_ready(&self) {
        self.inject(at::MODEM_READY);
    }

    /// Next data-mode line the driver transmitted
    pub async fn next_data_line(&mut self, within: Duration) -> Option<String> {
        tokio::time::timeout(within, self.data_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Data-mode lines already transmitted, without waiting
    pub fn drain_data_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.data_rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    pub fn setup(&self) -> ModemSetup {
        *self.state.setup.lock()
    }

    /// Escape sequences seen so far
    pub fn escape_attempts(&self) -> usize {
        self.state.escapes.load(Ordering::SeqCst)
    }

    /// AT commands received in command mode, in order
    pub fn at_commands(&self) -> Vec<String> {
        self.state.at_log.lock().clone()
    }

    pub fn set_ack_escape(&self, ack: bool) {
        self.state.ack_escape.store(ack, Ordering::SeqCst);
    }

    pub fn set_ack_data(&self, ack: bool) {
        self.state.ack_data.store(ack, Ordering::SeqCst);
    }

    /// Drop the link; the driver sees end of stream
    pub async fn disconnect(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

async fn run_simulation(
    mut peer: ModemPeer,
    state: Arc<SimState>,
    mut inject_rx: mpsc::UnboundedReceiver<String>,
    data_tx: mpsc::UnboundedSender<String>,
    token: CancellationToken,
) {
    let mut command_mode = false;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            Some(line) = inject_rx.recv() => {
                if peer.send_line(&line).await.is_err() {
                    break;
                }
            },
            cmd = peer.next_command() => {
                let cmd = match cmd {
                    Ok(Some(cmd)) => cmd,
                    _ => break,
                };
                let reply = simulate_command(&state, &mut command_mode, &cmd, &data_tx);
                if let Some(reply) = reply {
                    if peer.send_line(&reply).await.is_err() {
                        break;
                    }
                }
            },
        }
    }
    debug!("Simulated modem stopped");
}

fn simulate_command(
    state: &SimState,
    command_mode: &mut bool,
    cmd: &str,
    data_tx: &mpsc::UnboundedSender<String>,
) -> Option<String> {
    if cmd == at::ESCAPE {
        state.escapes.fetch_add(1, Ordering::SeqCst);
        if state.ack_escape.load(Ordering::SeqCst) {
            *command_mode = true;
            return Some(at::OK_COMMAND_MODE.to_string());
        }
        return None;
    }

    if !*command_mode {
        let _ = data_tx.send(cmd.to_string());
        return None;
    }

    state.at_log.lock().push(cmd.to_string());
    if cmd == at::LEAVE_COMMAND_MODE {
        if state.ack_data.load(Ordering::SeqCst) {
            *command_mode = false;
            return Some(at::OK_DATA_MODE.to_string());
        }
        return None;
    }

    let mut setup = state.setup.lock();
    let reply = match cmd {
        "ATCH?" => setup.channel.to_string(),
        "ATSW?" => format!("{:04X}", setup.network_id),
        "ATDA?" => format!("{:02X}", setup.address),
        _ => {
            let applied = if let Some(v) = cmd.strip_prefix("ATCH=") {
                v.trim().parse::<u8>().map(|v| setup.channel = v).is_ok()
            } else if let Some(v) = cmd.strip_prefix("ATSW=") {
                u16::from_str_radix(v.trim(), 16)
                    .map(|v| setup.network_id = v)
                    .is_ok()
            } else if let Some(v) = cmd.strip_prefix("ATDA=") {
                u8::from_str_radix(v.trim(), 16)
                    .map(|v| setup.address = v)
                    .is_ok()
            } else {
                false
            };
            let reply = if applied { at::OK } else { at::ERROR };
            reply.to_string()
        },
    };
    Some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peer_splits_escape_and_lines() {
        let (mut transport, mut peer) = MockTransport::pair();
        let mut conn = transport.connect().await.unwrap();
        conn.writer.write_all(b"+++ATCH?\rATO\r").await.unwrap();
        conn.writer.flush().await.unwrap();

        let within = Duration::from_secs(1);
        assert_eq!(peer.expect_command(within).await.as_deref(), Some("+++"));
        assert_eq!(peer.expect_command(within).await.as_deref(), Some("ATCH?"));
        assert_eq!(peer.expect_command(within).await.as_deref(), Some("ATO"));
    }

    #[tokio::test]
    async fn test_connect_only_once() {
        let (mut transport, _peer) = MockTransport::pair();
        assert!(transport.connect().await.is_ok());
        assert!(transport.connect().await.is_err());
        assert!(MockTransport::unavailable().connect().await.is_err());
    }

    #[test]
    fn test_simulated_command_replies() {
        let state = SimState {
            setup: Mutex::new(ModemSetup::new(4, 0xB547, 0x01)),
            ack_escape: AtomicBool::new(true),
            ack_data: AtomicBool::new(true),
            escapes: AtomicUsize::new(0),
            at_log: Mutex::new(Vec::new()),
        };
        let (data_tx, mut data_rx) = mpsc::unbounded_channel();
        let mut mode = false;

        assert_eq!(
            simulate_command(&state, &mut mode, "0500", &data_tx),
            None
        );
        assert_eq!(data_rx.try_recv().unwrap(), "0500");

        assert_eq!(
            simulate_command(&state, &mut mode, "+++", &data_tx).as_deref(),
            Some(at::OK_COMMAND_MODE)
        );
        assert_eq!(
            simulate_command(&state, &mut mode, "ATSW?", &data_tx).as_deref(),
            Some("B547")
        );
        assert_eq!(
            simulate_command(&state, &mut mode, "ATDA=2A", &data_tx).as_deref(),
            Some("OK")
        );
        assert_eq!(state.setup.lock().address, 0x2A);
        assert_eq!(
            simulate_command(&state, &mut mode, "ATXX", &data_tx).as_deref(),
            Some("ERROR")
        );
        assert_eq!(
            simulate_command(&state, &mut mode, "ATO", &data_tx).as_deref(),
            Some(at::OK_DATA_MODE)
        );
        assert!(!mode);
    }
}
