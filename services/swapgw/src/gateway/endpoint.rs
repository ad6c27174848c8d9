//! Typed endpoints
//!
//! An endpoint reads and writes one field of a register through its
//! declared type and, optionally, a named unit. Writes always send the
//! whole register: the field is patched into the current value (or a zeroed
//! buffer of the register's length) and every other byte is kept.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use swap_link::bytes::{
    decode_text, read_be_uint, read_field, test_bit, truncate_text, write_be_uint, write_bit,
    write_field,
};
use tracing::{debug, trace};

use super::register::{Register, RegisterEvent};
use super::value::Value;
use crate::dispatch::{Dispatcher, SubscriptionId};
use crate::error::{GatewayError, Result};
use crate::library::{Direction, EndpointDefinition, EndpointKind, Unit};

/// An endpoint produced a new value
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointEvent {
    pub node: u8,
    pub endpoint: String,
    pub value: Value,
    /// Unit the value is expressed in, `None` for raw values
    pub unit: Option<String>,
}

type EndpointCallback = Arc<dyn Fn(&EndpointEvent) + Send + Sync>;

struct EndpointListener {
    id: SubscriptionId,
    unit: Option<Unit>,
    callback: EndpointCallback,
}

/// Typed, unit-aware view onto part of a register
pub struct Endpoint {
    definition: EndpointDefinition,
    node: u8,
    register_id: u8,
    register: Weak<Register>,
    dispatcher: Dispatcher,
    listeners: Mutex<Vec<EndpointListener>>,
    /// Our listener on the register while we have listeners of our own
    subscription: Mutex<Option<SubscriptionId>>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.definition.name)
            .field("kind", &self.definition.kind)
            .field("node", &self.node)
            .field("register", &self.register_id)
            .finish()
    }
}

impl Endpoint {
    pub(crate) fn new(
        definition: EndpointDefinition,
        register: &Arc<Register>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            definition,
            node: register.node(),
            register_id: register.id(),
            register: Arc::downgrade(register),
            dispatcher,
            listeners: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn kind(&self) -> EndpointKind {
        self.definition.kind
    }

    pub fn direction(&self) -> Direction {
        self.definition.direction
    }

    pub fn definition(&self) -> &EndpointDefinition {
        &self.definition
    }

    pub fn node(&self) -> u8 {
        self.node
    }

    pub fn register_id(&self) -> u8 {
        self.register_id
    }

    pub fn units(&self) -> &[Unit] {
        &self.definition.units
    }

    fn register(&self) -> Result<Arc<Register>> {
        self.register.upgrade().ok_or_else(|| {
            GatewayError::closed(format!(
                "register {:02X}/{:02X} of endpoint '{}' no longer exists",
                self.node, self.register_id, self.definition.name
            ))
        })
    }

    fn unit(&self, name: &str) -> Result<&Unit> {
        self.definition.unit(name).ok_or_else(|| {
            GatewayError::no_such_unit(format!("'{}' on endpoint '{}'", name, self.definition.name))
        })
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Current raw value; `None` until the register has a value
    pub fn value(&self) -> Result<Option<Value>> {
        self.read(None)
    }

    /// Current value in the named unit
    pub fn value_in(&self, unit: &str) -> Result<Option<Value>> {
        let unit = self.unit(unit)?;
        self.read(Some(unit))
    }

    fn read(&self, unit: Option<&Unit>) -> Result<Option<Value>> {
        match self.register()?.value() {
            Some(bytes) => self.decode(&bytes, unit).map(Some),
            None => Ok(None),
        }
    }

    fn decode(&self, bytes: &[u8], unit: Option<&Unit>) -> Result<Value> {
        let def = &self.definition;
        let offset = def.position.byte;
        let width = def.size.bytes;

        let value = match def.kind {
            EndpointKind::Binary => Value::Bool(test_bit(bytes, offset, def.position.bit)?),
            EndpointKind::Integer => {
                let raw = read_be_uint(bytes, offset, width)? as i64;
                match unit {
                    Some(unit) => Value::Integer(unit.to_physical(raw as f64).round() as i64),
                    None => Value::Integer(raw),
                }
            },
            EndpointKind::Number => {
                let raw = read_be_uint(bytes, offset, width)? as f64;
                Value::Number(unit.map_or(raw, |u| u.to_physical(raw)))
            },
            EndpointKind::String => Value::Text(decode_text(read_field(bytes, offset, width)?)),
            EndpointKind::ByteString => Value::Bytes(read_field(bytes, offset, width)?.to_vec()),
        };
        Ok(value)
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write a raw value
    pub async fn set_value(&self, value: impl Into<Value>) -> Result<()> {
        self.write(value.into(), None).await
    }

    /// Write a value expressed in the named unit
    pub async fn set_value_in(&self, unit: &str, value: impl Into<Value>) -> Result<()> {
        let unit = self.unit(unit)?.clone();
        self.write(value.into(), Some(&unit)).await
    }

    async fn write(&self, value: Value, unit: Option<&Unit>) -> Result<()> {
        let register = self.register()?;
        let declared = register.length();
        let length = declared.unwrap_or_else(|| self.definition.end_byte());

        let mut buf = register.value().map(|b| b.to_vec()).unwrap_or_default();
        if buf.len() < length || (declared.is_some() && buf.len() != length) {
            buf.resize(length, 0);
        }
        self.encode(&mut buf, &value, unit)?;

        debug!(
            "Endpoint '{}' on node {:02X} <- {}",
            self.definition.name, self.node, value
        );
        register.write(buf).await
    }

    fn encode(&self, buf: &mut [u8], value: &Value, unit: Option<&Unit>) -> Result<()> {
        let def = &self.definition;
        let offset = def.position.byte;
        let width = def.size.bytes;

        match (def.kind, value) {
            (EndpointKind::Binary, Value::Bool(on)) => {
                write_bit(buf, offset, def.position.bit, *on)?;
            },
            (EndpointKind::Integer | EndpointKind::Number, Value::Integer(_) | Value::Number(_)) => {
                let raw = match (unit, value) {
                    (None, Value::Integer(i)) => *i,
                    _ => {
                        let physical = value.as_f64().unwrap_or_default();
                        let raw = unit.map_or(physical, |u| u.to_raw(physical)).round();
                        if !raw.is_finite() {
                            return Err(GatewayError::type_mismatch(format!(
                                "{} does not give a finite raw value for '{}'",
                                value, def.name
                            )));
                        }
                        raw as i64
                    },
                };
                // Two's complement, truncated to the field
                write_be_uint(buf, offset, width, raw as u64)?;
            },
            (EndpointKind::String, Value::Text(text)) => {
                let text = truncate_text(text, width);
                write_field(buf, offset, width, text.as_bytes())?;
            },
            (EndpointKind::ByteString, Value::Bytes(data)) => {
                write_field(buf, offset, width, data)?;
            },
            (kind, other) => {
                return Err(GatewayError::type_mismatch(format!(
                    "endpoint '{}' of type {} cannot take a {} value",
                    def.name,
                    kind,
                    other.type_name()
                )));
            },
        }
        Ok(())
    }

    // ========================================================================
    // Change notification
    // ========================================================================

    /// Call `listener` with every new value, converted to `unit` if given
    ///
    /// The endpoint listens on its register only while it has listeners.
    pub fn add_listener<F>(self: &Arc<Self>, unit: Option<&str>, listener: F) -> Result<SubscriptionId>
    where
        F: Fn(&EndpointEvent) + Send + Sync + 'static,
    {
        let unit = unit.map(|name| self.unit(name).cloned()).transpose()?;
        let register = self.register()?;
        let id = SubscriptionId::next();

        let mut listeners = self.listeners.lock();
        listeners.push(EndpointListener {
            id,
            unit,
            callback: Arc::new(listener),
        });

        let mut subscription = self.subscription.lock();
        if subscription.is_none() {
            let me = Arc::downgrade(self);
            *subscription = Some(register.add_listener(move |event: &RegisterEvent| {
                if let Some(endpoint) = me.upgrade() {
                    endpoint.on_register_changed(event);
                }
            }));
            trace!("Endpoint '{}' subscribed to its register", self.definition.name);
        }
        Ok(id)
    }

    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        let removed = listeners.len() != before;

        if listeners.is_empty() {
            if let Some(sub) = self.subscription.lock().take() {
                if let Some(register) = self.register.upgrade() {
                    register.remove_listener(sub);
                }
                trace!("Endpoint '{}' unsubscribed from its register", self.definition.name);
            }
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Drop all listeners and stop listening on the register
    pub(crate) fn detach(&self) {
        self.listeners.lock().clear();
        if let Some(sub) = self.subscription.lock().take() {
            if let Some(register) = self.register.upgrade() {
                register.remove_listener(sub);
            }
        }
    }

    /// Whether the endpoint currently listens on its register
    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    fn on_register_changed(&self, event: &RegisterEvent) {
        let listeners: Vec<(Option<Unit>, EndpointCallback)> = self
            .listeners
            .lock()
            .iter()
            .map(|l| (l.unit.clone(), l.callback.clone()))
            .collect();

        for (unit, callback) in listeners {
            let value = match self.decode(&event.value, unit.as_ref()) {
                Ok(value) => value,
                Err(e) => {
                    debug!(
                        "Endpoint '{}' cannot decode register update: {}",
                        self.definition.name, e
                    );
                    continue;
                },
            };
            let event = EndpointEvent {
                node: self.node,
                endpoint: self.definition.name.clone(),
                value,
                unit: unit.map(|u| u.name),
            };
            self.dispatcher.dispatch(move || callback(&event));
        }
    }
}
