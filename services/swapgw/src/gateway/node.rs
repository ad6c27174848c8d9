//! Network nodes

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use swap_link::bytes::read_be_uint;
use swap_link::{ProductCode, StandardRegister};
use tracing::{debug, info};

use super::endpoint::Endpoint;
use super::register::{Register, RegisterStore};
use crate::dispatch::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::library::{DeviceDefinition, DeviceLibrary};
use crate::modem::FrameSender;

/// A remote device on the network
pub struct Node {
    address: u8,
    store: RegisterStore,
    dispatcher: Dispatcher,
    identity: Mutex<Option<ProductCode>>,
    definition: RwLock<Option<Arc<DeviceDefinition>>>,
    endpoints: RwLock<Vec<Arc<Endpoint>>>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("identity", &self.identity())
            .field("endpoints", &self.endpoints.read().len())
            .finish()
    }
}

impl Node {
    pub(crate) fn new(
        address: u8,
        local_address: u8,
        sender: Arc<dyn FrameSender>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            address,
            store: RegisterStore::new(address, local_address, sender, dispatcher.clone()),
            dispatcher,
            identity: Mutex::new(None),
            definition: RwLock::new(None),
            endpoints: RwLock::new(Vec::new()),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Product identity, once the product-code register has been reported
    pub fn identity(&self) -> Option<ProductCode> {
        *self.identity.lock()
    }

    /// Library definition for the identified product
    pub fn definition(&self) -> Option<Arc<DeviceDefinition>> {
        self.definition.read().clone()
    }

    pub fn store(&self) -> &RegisterStore {
        &self.store
    }

    pub fn registers(&self) -> Vec<Arc<Register>> {
        self.store.registers()
    }

    pub fn register(&self, id: u8) -> Arc<Register> {
        self.store.register(id)
    }

    /// Cached value of a register
    pub fn read(&self, id: u8) -> Option<Bytes> {
        self.store.read(id)
    }

    pub async fn write(&self, id: u8, value: impl Into<Bytes>) -> Result<()> {
        self.store.write(id, value).await
    }

    pub async fn query(&self, id: u8) -> Result<()> {
        self.store.query(id).await
    }

    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.read().clone()
    }

    /// Endpoint by name; needs a resolved identity with a library definition
    pub fn endpoint(&self, name: &str) -> Result<Arc<Endpoint>> {
        if self.definition.read().is_none() {
            let reason = match self.identity() {
                Some(code) => format!("node {:02X} ({}) has no device definition", self.address, code),
                None => format!("node {:02X} has not reported its product code", self.address),
            };
            return Err(GatewayError::unresolved_identity(reason));
        }
        self.endpoints
            .read()
            .iter()
            .find(|ep| ep.name() == name)
            .cloned()
            .ok_or_else(|| GatewayError::endpoint_not_found(format!("{} on node {:02X}", name, self.address)))
    }

    /// Network id from the standard register, when reported
    pub fn network_id(&self) -> Option<u16> {
        self.standard_value(StandardRegister::NetworkId)
            .map(|v| v as u16)
    }

    /// Radio channel from the standard register, when reported
    pub fn channel(&self) -> Option<u8> {
        self.standard_value(StandardRegister::FrequencyChannel)
            .map(|v| v as u8)
    }

    fn standard_value(&self, register: StandardRegister) -> Option<u64> {
        let value = self.store.read(register.id())?;
        read_be_uint(&value, 0, register.length()).ok()
    }

    /// Resolve the product identity and build endpoints from the library
    ///
    /// Returns `false` when the identity is unchanged.
    pub(crate) fn identify(&self, code: ProductCode, library: Option<&dyn DeviceLibrary>) -> bool {
        {
            let mut identity = self.identity.lock();
            if *identity == Some(code) {
                return false;
            }
            *identity = Some(code);
        }

        let definition =
            library.and_then(|lib| lib.find_device(code.manufacturer_id, code.product_id));
        let mut endpoints = Vec::new();

        match &definition {
            Some(def) => {
                for reg_def in &def.registers {
                    let register = self.store.register(reg_def.id);
                    register.declare_length(reg_def.effective_length());
                    for ep_def in &reg_def.endpoints {
                        endpoints.push(Arc::new(Endpoint::new(
                            ep_def.clone(),
                            &register,
                            self.dispatcher.clone(),
                        )));
                    }
                }
                info!(
                    "Node {:02X} identified as {} {} ({}), {} endpoints",
                    self.address,
                    def.manufacturer,
                    def.product,
                    code,
                    endpoints.len()
                );
            },
            None => {
                info!(
                    "Node {:02X} reports product {}, no device definition available",
                    self.address, code
                );
            },
        }

        let replaced = std::mem::replace(&mut *self.endpoints.write(), endpoints);
        for endpoint in replaced {
            endpoint.detach();
        }
        *self.definition.write() = definition;
        debug!("Node {:02X} identity set to {}", self.address, code);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{EndpointDefinition, EndpointKind, MemoryLibrary, RegisterDefinition};
    use async_trait::async_trait;
    use swap_link::Frame;

    struct NullSender;

    #[async_trait]
    impl FrameSender for NullSender {
        async fn send_frame(&self, _frame: Frame) -> Result<()> {
            Ok(())
        }
    }

    fn node() -> Node {
        Node::new(7, 0xFF, Arc::new(NullSender), Dispatcher::new(1, 16))
    }

    fn library() -> MemoryLibrary {
        let lib = MemoryLibrary::new();
        lib.insert(
            DeviceDefinition::new(1, 2)
                .with_names("Acme", "Meter")
                .with_register(
                    RegisterDefinition::new(11, "Readings").with_length(3).with_endpoint(
                        EndpointDefinition::new("level", EndpointKind::Integer, 0, 2),
                    ),
                ),
        )
        .unwrap();
        lib
    }

    #[tokio::test]
    async fn test_endpoint_before_identity() {
        let node = node();
        assert!(matches!(
            node.endpoint("level"),
            Err(GatewayError::UnresolvedIdentity(_))
        ));

        // Identified, but the library does not know the product
        assert!(node.identify(ProductCode::new(9, 9), Some(&library())));
        assert!(matches!(
            node.endpoint("level"),
            Err(GatewayError::UnresolvedIdentity(_))
        ));
    }

    #[tokio::test]
    async fn test_identify_builds_endpoints() {
        let node = node();
        let lib = library();

        assert!(node.identify(ProductCode::new(1, 2), Some(&lib)));
        assert!(!node.identify(ProductCode::new(1, 2), Some(&lib)));

        assert_eq!(node.endpoints().len(), 1);
        assert_eq!(node.register(11).length(), Some(3));
        assert!(node.endpoint("level").is_ok());
        assert!(matches!(
            node.endpoint("missing"),
            Err(GatewayError::EndpointNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_new_identity_releases_old_endpoints() {
        let node = node();
        let lib = library();
        assert!(node.identify(ProductCode::new(1, 2), Some(&lib)));

        let level = node.endpoint("level").unwrap();
        level.add_listener(None, |_| {}).unwrap();
        assert_eq!(node.register(11).listener_count(), 1);

        assert!(node.identify(ProductCode::new(1, 3), Some(&lib)));
        assert!(node.endpoints().is_empty());
        assert!(!level.is_subscribed());
        assert_eq!(level.listener_count(), 0);
        assert_eq!(node.register(11).listener_count(), 0);
    }

    #[tokio::test]
    async fn test_standard_register_conveniences() {
        let node = node();
        assert_eq!(node.network_id(), None);

        node.store().update(8, Bytes::from_static(&[0xB5, 0x47]));
        node.store().update(4, Bytes::from_static(&[3]));
        assert_eq!(node.network_id(), Some(0xB547));
        assert_eq!(node.channel(), Some(3));
    }
}
