//! Register store
//!
//! Each node keeps a cache of its register values. The cache changes only
//! when a STATUS frame arrives or a local write has been sent successfully;
//! a failed write leaves it untouched.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use swap_link::{Frame, StandardRegister};
use tracing::{debug, warn};

use crate::dispatch::{Dispatcher, ListenerSet, SubscriptionId};
use crate::error::{GatewayError, Result};
use crate::modem::FrameSender;

/// A register received a new value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterEvent {
    pub node: u8,
    pub register: u8,
    pub value: Bytes,
}

/// One register of one node
pub struct Register {
    node: u8,
    id: u8,
    local_address: u8,
    length: Mutex<Option<usize>>,
    value: Mutex<Option<Bytes>>,
    listeners: ListenerSet<RegisterEvent>,
    sender: Arc<dyn FrameSender>,
    dispatcher: Dispatcher,
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Register")
            .field("node", &self.node)
            .field("id", &self.id)
            .field("length", &self.length())
            .field("value", &self.value())
            .finish()
    }
}

impl Register {
    fn new(
        node: u8,
        id: u8,
        local_address: u8,
        sender: Arc<dyn FrameSender>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            node,
            id,
            local_address,
            length: Mutex::new(StandardRegister::from_id(id).map(StandardRegister::length)),
            value: Mutex::new(None),
            listeners: ListenerSet::new(),
            sender,
            dispatcher,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn node(&self) -> u8 {
        self.node
    }

    /// Declared length, known for standard registers and after identification
    pub fn length(&self) -> Option<usize> {
        *self.length.lock()
    }

    pub(crate) fn declare_length(&self, length: usize) {
        *self.length.lock() = Some(length);
    }

    /// Cached value; `None` until a value has been observed
    pub fn value(&self) -> Option<Bytes> {
        self.value.lock().clone()
    }

    /// Send a COMMAND carrying `value`; the cache follows once it is sent
    pub async fn write(&self, value: impl Into<Bytes>) -> Result<()> {
        let value = value.into();
        if let Some(length) = self.length() {
            if value.len() != length {
                return Err(GatewayError::type_mismatch(format!(
                    "register {:02X}/{:02X} is {} bytes, got {}",
                    self.node,
                    self.id,
                    length,
                    value.len()
                )));
            }
        }

        let frame = Frame::command(self.local_address, self.node, self.id, value.clone());
        self.sender.send_frame(frame).await?;
        debug!(
            "Register {:02X}/{:02X} written: {}",
            self.node,
            self.id,
            hex_string(&value)
        );
        self.store(value);
        Ok(())
    }

    /// Ask the node to report this register; the answer arrives as a STATUS
    pub async fn query(&self) -> Result<()> {
        let frame = Frame::query(self.local_address, self.node, self.id);
        self.sender.send_frame(frame).await
    }

    pub fn add_listener<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&RegisterEvent) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Apply a value reported by the node
    pub(crate) fn update(&self, value: Bytes) -> RegisterEvent {
        if let Some(length) = self.length() {
            if value.len() != length {
                warn!(
                    "Register {:02X}/{:02X} reported {} bytes, declared {}",
                    self.node,
                    self.id,
                    value.len(),
                    length
                );
            }
        }
        self.store(value)
    }

    fn store(&self, value: Bytes) -> RegisterEvent {
        *self.value.lock() = Some(value.clone());
        let event = RegisterEvent {
            node: self.node,
            register: self.id,
            value,
        };
        self.listeners.notify(&self.dispatcher, event.clone());
        event
    }
}

/// All registers of one node
pub struct RegisterStore {
    node: u8,
    local_address: u8,
    sender: Arc<dyn FrameSender>,
    dispatcher: Dispatcher,
    registers: Mutex<BTreeMap<u8, Arc<Register>>>,
}

impl fmt::Debug for RegisterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterStore")
            .field("node", &self.node)
            .field("registers", &self.registers.lock().len())
            .finish()
    }
}

impl RegisterStore {
    pub(crate) fn new(
        node: u8,
        local_address: u8,
        sender: Arc<dyn FrameSender>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            node,
            local_address,
            sender,
            dispatcher,
            registers: Mutex::new(BTreeMap::new()),
        }
    }

    /// The register with `id`, created empty on first use
    pub fn register(&self, id: u8) -> Arc<Register> {
        self.registers
            .lock()
            .entry(id)
            .or_insert_with(|| {
                Arc::new(Register::new(
                    self.node,
                    id,
                    self.local_address,
                    self.sender.clone(),
                    self.dispatcher.clone(),
                ))
            })
            .clone()
    }

    /// The register with `id` if it has been seen or declared
    pub fn get(&self, id: u8) -> Option<Arc<Register>> {
        self.registers.lock().get(&id).cloned()
    }

    pub fn registers(&self) -> Vec<Arc<Register>> {
        self.registers.lock().values().cloned().collect()
    }

    /// Cached value of a register, `None` if it never received one
    pub fn read(&self, id: u8) -> Option<Bytes> {
        self.get(id).and_then(|reg| reg.value())
    }

    pub async fn write(&self, id: u8, value: impl Into<Bytes>) -> Result<()> {
        self.register(id).write(value).await
    }

    pub async fn query(&self, id: u8) -> Result<()> {
        self.register(id).query().await
    }

    pub(crate) fn update(&self, id: u8, value: Bytes) -> RegisterEvent {
        self.register(id).update(value)
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use swap_link::FrameType;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingSender {
        frames: Mutex<Vec<Frame>>,
        fail: bool,
    }

    #[async_trait]
    impl FrameSender for RecordingSender {
        async fn send_frame(&self, frame: Frame) -> Result<()> {
            if self.fail {
                return Err(GatewayError::not_open("test sender"));
            }
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    fn store_with(sender: Arc<RecordingSender>) -> RegisterStore {
        RegisterStore::new(0x05, 0xFF, sender, Dispatcher::new(1, 16))
    }

    #[tokio::test]
    async fn test_unknown_register_reads_none() {
        let store = store_with(Arc::new(RecordingSender::default()));
        assert_eq!(store.read(12), None);
        assert_eq!(store.register(12).value(), None);
        assert_eq!(store.read(12), None);
    }

    #[tokio::test]
    async fn test_query_sends_without_touching_cache() {
        let sender = Arc::new(RecordingSender::default());
        let store = store_with(sender.clone());

        store.query(0).await.unwrap();

        let frames = sender.frames.lock().clone();
        assert_eq!(frames, vec![Frame::query(0xFF, 0x05, 0)]);
        assert_eq!(store.read(0), None);
    }

    #[tokio::test]
    async fn test_write_updates_cache_and_notifies() {
        let sender = Arc::new(RecordingSender::default());
        let store = store_with(sender.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.register(12).add_listener(move |ev: &RegisterEvent| {
            let _ = tx.send(ev.clone());
        });

        store.write(12, vec![1u8, 2]).await.unwrap();

        assert_eq!(store.read(12).as_deref(), Some(&[1u8, 2][..]));
        let frames = sender.frames.lock().clone();
        assert_eq!(frames[0].kind(), FrameType::Command);
        assert_eq!(frames[0].payload().as_ref(), &[1, 2]);

        let ev = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.register, 12);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache() {
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..Default::default()
        });
        let store = store_with(sender);
        store.update(12, Bytes::from_static(&[9]));

        assert!(store.write(12, vec![1u8]).await.is_err());
        assert_eq!(store.read(12).as_deref(), Some(&[9u8][..]));
    }

    #[tokio::test]
    async fn test_write_length_checked_for_declared_registers() {
        let store = store_with(Arc::new(RecordingSender::default()));
        // Frequency channel is one byte
        let err = store.write(4, vec![1u8, 2]).await.unwrap_err();
        assert!(matches!(err, GatewayError::TypeMismatch(_)));
        assert_eq!(store.read(4), None);
    }
}
