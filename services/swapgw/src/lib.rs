//! SWAP Gateway
//!
//! Connects a host process to a network of low-power SWAP wireless nodes
//! through a serial modem.
//!
//! # Architecture
//!
//! ```text
//!  Transport (serial / tcp)
//!      │ lines
//!  Modem driver ── Init / Data / Command mode, AT configuration exchange
//!      │ ModemEvent (Received / Sent / Closed)
//!  Gateway ──────── node registry, product identification
//!      │
//!  Node ─ RegisterStore ─ Register ─ Endpoint (typed value, units)
//! ```
//!
//! Application callbacks run on a bounded [`dispatch::Dispatcher`]; the
//! modem reader never waits on them.

pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod library;
pub mod modem;
pub mod relay;
pub mod transport;

pub use bootstrap::Runtime;
pub use config::AppConfig;
pub use dispatch::{Dispatcher, ListenerSet, SubscriptionId};
pub use error::{GatewayError, Result};
pub use gateway::{Endpoint, EndpointEvent, Gateway, GatewayEvent, Node, RegisterEvent, Value};
pub use library::{DeviceDefinition, DeviceLibrary, FileLibrary, MemoryLibrary};
pub use modem::{FrameSender, Modem, ModemEvent, ModemMode};
pub use relay::TcpRelay;
