//! Device definition library
//!
//! The gateway asks the library for the definition of a product once a
//! node's product code is known. A miss leaves the node with raw register
//! access only.

pub mod definition;
pub mod file;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;

pub use definition::{
    DeviceDefinition, Direction, EndpointDefinition, EndpointKind, Position, RegisterDefinition,
    Size, Unit,
};
pub use file::FileLibrary;

/// Lookup of device definitions by product identity
pub trait DeviceLibrary: Send + Sync + fmt::Debug {
    fn find_device(&self, manufacturer_id: u32, product_id: u32) -> Option<Arc<DeviceDefinition>>;
}

/// In-memory library
#[derive(Debug, Default)]
pub struct MemoryLibrary {
    devices: RwLock<HashMap<(u32, u32), Arc<DeviceDefinition>>>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a definition, replacing any with the same identity
    pub fn insert(&self, definition: DeviceDefinition) -> Result<()> {
        definition.validate()?;
        let key = (definition.manufacturer_id, definition.product_id);
        debug!("Library: added {}", definition.product_code());
        self.devices.write().insert(key, Arc::new(definition));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

impl DeviceLibrary for MemoryLibrary {
    fn find_device(&self, manufacturer_id: u32, product_id: u32) -> Option<Arc<DeviceDefinition>> {
        self.devices
            .read()
            .get(&(manufacturer_id, product_id))
            .cloned()
    }
}

/// Several libraries searched in order; the first hit wins
#[derive(Debug, Default)]
pub struct CompoundLibrary {
    libraries: Vec<Arc<dyn DeviceLibrary>>,
}

impl CompoundLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, library: Arc<dyn DeviceLibrary>) -> Self {
        self.libraries.push(library);
        self
    }
}

impl DeviceLibrary for CompoundLibrary {
    fn find_device(&self, manufacturer_id: u32, product_id: u32) -> Option<Arc<DeviceDefinition>> {
        self.libraries
            .iter()
            .find_map(|lib| lib.find_device(manufacturer_id, product_id))
    }
}
