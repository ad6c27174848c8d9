//! Device registry
//!
//! The gateway follows the modem's frame stream on one routing task. It
//! creates a [`Node`] the first time an address shows up, feeds STATUS
//! frames into the node's register store and resolves product identities
//! through the device library.
//!
//! Discovery order for an unseen address:
//! 1. the node is inserted into the registry
//! 2. a QUERY for its product code is sent (when the code is unknown)
//! 3. `NodeDiscovered` is dispatched to listeners

pub mod endpoint;
pub mod node;
pub mod register;
pub mod value;

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use swap_link::{Frame, FrameType, ProductCode, StandardRegister};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::dispatch::{Dispatcher, ListenerSet, SubscriptionId};
use crate::library::DeviceLibrary;
use crate::modem::{FrameSender, Modem, ModemEvent};

pub use endpoint::{Endpoint, EndpointEvent};
pub use node::Node;
pub use register::{Register, RegisterEvent, RegisterStore};
pub use value::Value;

/// Something the application may want to know about the network
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// First frame from a new address
    NodeDiscovered(Arc<Node>),
    /// A node reported a (new) product code
    NodeIdentified(Arc<Node>),
    /// A STATUS frame updated a register
    RegisterChanged(RegisterEvent),
}

struct GatewayInner {
    modem: Modem,
    sender: Arc<dyn FrameSender>,
    library: Option<Arc<dyn DeviceLibrary>>,
    config: GatewayConfig,
    dispatcher: Dispatcher,
    nodes: Mutex<BTreeMap<u8, Arc<Node>>>,
    listeners: ListenerSet<GatewayEvent>,
    token: CancellationToken,
    router: Mutex<Option<JoinHandle<()>>>,
}

/// Registry of the nodes seen on the network
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("modem", &self.inner.modem)
            .field("nodes", &self.inner.nodes.lock().len())
            .finish()
    }
}

impl Gateway {
    /// Start following `modem`
    ///
    /// The modem may be opened before or after this call.
    pub fn start(
        modem: Modem,
        library: Option<Arc<dyn DeviceLibrary>>,
        config: GatewayConfig,
        dispatcher: Dispatcher,
    ) -> Self {
        let events = modem.subscribe();
        let inner = Arc::new(GatewayInner {
            sender: Arc::new(modem.clone()),
            modem,
            library,
            config,
            dispatcher,
            nodes: Mutex::new(BTreeMap::new()),
            listeners: ListenerSet::new(),
            token: CancellationToken::new(),
            router: Mutex::new(None),
        });

        let handle = tokio::spawn(route_events(inner.clone(), events));
        *inner.router.lock() = Some(handle);
        info!(
            "Gateway started (local address {:02X})",
            inner.config.local_address
        );
        Self { inner }
    }

    pub fn modem(&self) -> &Modem {
        &self.inner.modem
    }

    pub fn local_address(&self) -> u8 {
        self.inner.config.local_address
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.inner.nodes.lock().values().cloned().collect()
    }

    pub fn node(&self, address: u8) -> Option<Arc<Node>> {
        self.inner.nodes.lock().get(&address).cloned()
    }

    pub fn add_listener<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Stop routing; nodes are kept until the gateway is dropped
    pub async fn close(&self) {
        self.inner.token.cancel();
        let handle = self.inner.router.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Gateway closed");
    }
}

impl GatewayInner {
    async fn handle_frame(&self, frame: Frame) {
        let sender = self.discover(frame.sender()).await;

        if frame.kind() != FrameType::Status {
            // QUERY/COMMAND traffic only makes its sender known
            return;
        }

        let node = match sender {
            Some(node) if node.address() == frame.register_address() => node,
            _ => match self.discover(frame.register_address()).await {
                Some(node) => node,
                None => return,
            },
        };

        let event = node
            .store()
            .update(frame.register_id(), frame.payload().clone());
        debug!("Node {:02X} updated by {}", event.node, frame);
        self.listeners
            .notify(&self.dispatcher, GatewayEvent::RegisterChanged(event));

        if frame.register_id() == StandardRegister::ProductCode.id() {
            self.resolve_identity(&node, frame.payload());
        }
    }

    /// Look up or create the node at `address`
    ///
    /// `None` for our own address.
    async fn discover(&self, address: u8) -> Option<Arc<Node>> {
        if address == self.config.local_address {
            return None;
        }

        let (node, created) = {
            let mut nodes = self.nodes.lock();
            match nodes.get(&address) {
                Some(node) => (node.clone(), false),
                None => {
                    let node = Arc::new(Node::new(
                        address,
                        self.config.local_address,
                        self.sender.clone(),
                        self.dispatcher.clone(),
                    ));
                    nodes.insert(address, node.clone());
                    (node, true)
                },
            }
        };

        if created {
            info!("Discovered node {:02X}", address);
            if node.identity().is_none() {
                if let Err(e) = node.query(StandardRegister::ProductCode.id()).await {
                    warn!("Product code query to node {:02X} failed: {}", address, e);
                }
            }
            self.listeners
                .notify(&self.dispatcher, GatewayEvent::NodeDiscovered(node.clone()));
        }
        Some(node)
    }

    fn resolve_identity(&self, node: &Arc<Node>, payload: &[u8]) {
        let code = match ProductCode::from_register(payload) {
            Ok(code) => code,
            Err(e) => {
                warn!("Node {:02X} sent a bad product code: {}", node.address(), e);
                return;
            },
        };
        if node.identify(code, self.library.as_deref()) {
            self.listeners
                .notify(&self.dispatcher, GatewayEvent::NodeIdentified(node.clone()));
        }
    }
}

async fn route_events(
    inner: Arc<GatewayInner>,
    mut events: tokio::sync::broadcast::Receiver<ModemEvent>,
) {
    loop {
        let event = tokio::select! {
            _ = inner.token.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(ModemEvent::Received(frame)) => inner.handle_frame(frame).await,
            Ok(ModemEvent::Sent(_)) => {},
            Ok(ModemEvent::Closed) => debug!("Modem closed, gateway waiting for it to reopen"),
            Err(RecvError::Lagged(n)) => {
                warn!("Gateway fell behind the modem, {} frames lost", n);
            },
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Gateway routing stopped");
}
