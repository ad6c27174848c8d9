//! TCP relay
//!
//! Mirrors modem traffic to TCP clients and lets clients put frames on the
//! air. Every frame the modem receives or sends is written to each client
//! as one encoded line. A client line that parses as a frame (with or
//! without the radio-quality prefix) is sent through the modem; the other
//! clients see it through the normal "sent" path.

use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use swap_link::Frame;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, Result};
use crate::modem::{LineCodec, Modem, ModemEvent};

/// Lines queued per client before new ones are dropped
const CLIENT_QUEUE: usize = 256;

const MAX_CLIENT_LINE: usize = 1024;

struct RelayInner {
    modem: Modem,
    local_addr: SocketAddr,
    clients: Mutex<HashMap<u64, mpsc::Sender<String>>>,
    /// Frames sent on behalf of a client, not echoed back to that client
    own_frames: Mutex<Vec<(u64, Frame)>>,
    next_client: AtomicU64,
    token: CancellationToken,
}

/// TCP mirror of the modem's frame traffic
pub struct TcpRelay {
    inner: Arc<RelayInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for TcpRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpRelay")
            .field("local_addr", &self.local_addr())
            .field("clients", &self.client_count())
            .finish()
    }
}

impl TcpRelay {
    /// Bind `bind` and start relaying
    pub async fn start(modem: Modem, bind: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| GatewayError::io(format!("relay cannot bind {}: {}", bind, e)))?;
        let local_addr = listener.local_addr()?;

        let inner = Arc::new(RelayInner {
            modem,
            local_addr,
            clients: Mutex::new(HashMap::new()),
            own_frames: Mutex::new(Vec::new()),
            next_client: AtomicU64::new(1),
            token: CancellationToken::new(),
        });

        let events = inner.modem.subscribe();
        let tasks = vec![
            tokio::spawn(fan_out(inner.clone(), events)),
            tokio::spawn(accept_loop(inner.clone(), listener)),
        ];
        info!("Relay listening on {}", local_addr);

        Ok(Self {
            inner,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.lock().len()
    }

    /// Disconnect every client and stop listening
    pub async fn close(&self) {
        self.inner.token.cancel();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.inner.clients.lock().clear();
        info!("Relay on {} closed", self.inner.local_addr);
    }
}

impl RelayInner {
    fn broadcast(&self, frame: &Frame, skip: Option<u64>) {
        let line = frame.encode();
        self.clients.lock().retain(|id, tx| {
            if Some(*id) == skip {
                return true;
            }
            match tx.try_send(line.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Relay client {} is not keeping up, dropped a frame", id);
                    true
                },
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Client that asked for `frame` to be sent, if any
    fn take_origin(&self, frame: &Frame) -> Option<u64> {
        let mut own = self.own_frames.lock();
        let pos = own.iter().position(|(_, f)| f == frame)?;
        Some(own.remove(pos).0)
    }

    async fn send_for_client(&self, client: u64, line: &str) {
        let parsed = if line.starts_with('(') {
            Frame::decode(line)
        } else {
            Frame::from_modem_text(line)
        };
        let frame = match parsed {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Relay client {}: ignoring '{}': {}", client, line, e);
                return;
            },
        };

        self.own_frames.lock().push((client, frame.clone()));
        if let Err(e) = self.modem.send(frame.clone()).await {
            warn!("Relay client {}: send of {} failed: {}", client, frame, e);
            let mut own = self.own_frames.lock();
            if let Some(pos) = own.iter().position(|(c, f)| *c == client && *f == frame) {
                own.remove(pos);
            }
        }
    }
}

async fn fan_out(inner: Arc<RelayInner>, mut events: tokio::sync::broadcast::Receiver<ModemEvent>) {
    loop {
        let event = tokio::select! {
            _ = inner.token.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(ModemEvent::Received(frame)) => inner.broadcast(&frame, None),
            Ok(ModemEvent::Sent(frame)) => {
                let origin = inner.take_origin(&frame);
                inner.broadcast(&frame, origin);
            },
            Ok(ModemEvent::Closed) => {},
            Err(RecvError::Lagged(n)) => warn!("Relay fell behind the modem, {} frames lost", n),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn accept_loop(inner: Arc<RelayInner>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = inner.token.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    let id = inner.next_client.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
                    inner.clients.lock().insert(id, tx);
                    info!("Relay client {} connected from {}", id, peer);
                    tokio::spawn(serve_client(inner.clone(), id, peer, stream, rx));
                },
                Err(e) => error!("Relay accept failed: {}", e),
            },
        }
    }
}

async fn serve_client(
    inner: Arc<RelayInner>,
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    mut outbound: mpsc::Receiver<String>,
) {
    let _ = stream.set_nodelay(true);
    let (reader, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LineCodec::new(MAX_CLIENT_LINE));

    loop {
        tokio::select! {
            _ = inner.token.cancelled() => break,
            line = lines.next() => match line {
                Some(Ok(line)) => inner.send_for_client(id, &line).await,
                Some(Err(e)) => {
                    warn!("Relay client {} read error: {}", id, e);
                    break;
                },
                None => break,
            },
            out = outbound.recv() => match out {
                Some(line) => {
                    let write = async {
                        writer.write_all(line.as_bytes()).await?;
                        writer.write_all(b"\r\n").await
                    };
                    if let Err(e) = write.await {
                        warn!("Relay client {} write error: {}", id, e);
                        break;
                    }
                },
                None => break,
            },
        }
    }

    inner.clients.lock().remove(&id);
    info!("Relay client {} ({}) disconnected", id, peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModemConfig;
    use crate::dispatch::Dispatcher;
    use crate::transport::MockTransport;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    async fn read_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line.trim().to_string()
    }

    #[tokio::test]
    async fn test_received_frames_reach_clients() {
        let (transport, mut peer) = MockTransport::pair();
        let modem = Modem::new(Box::new(transport), ModemConfig::default(), Dispatcher::new(1, 16));
        modem.open().await.unwrap();
        let relay = TcpRelay::start(modem.clone(), "127.0.0.1:0").await.unwrap();

        let client = TcpStream::connect(relay.local_addr()).await.unwrap();
        let (read, _write) = client.into_split();
        let mut reader = BufReader::new(read);
        while relay.client_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let frame = Frame::status(1, 11, vec![0xAB]).with_radio(0x10, 0x20);
        peer.send_line(&frame.encode()).await.unwrap();
        assert_eq!(read_line(&mut reader).await, frame.encode());

        relay.close().await;
        modem.close().await.unwrap();
    }
}
