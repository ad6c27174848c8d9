//! Transport layer
//!
//! A transport opens the byte stream the modem is attached to and hands it
//! over as independent read and write halves. Everything above it speaks
//! lines; the transport knows nothing about SWAP.
//!
//! - **Serial**: the physical modem on a serial device
//! - **TCP**: a modem exposed through a serial-to-network bridge or relay
//! - **Mock**: in-memory pipe with a scriptable modem on the other end

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod serial;
pub mod tcp;
pub mod traits;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockTransport, ModemPeer, SimulatedModem};
pub use serial::{SerialTransport, SerialTransportConfig};
pub use tcp::{TcpTransport, TcpTransportConfig};
pub use traits::{BoxedReader, BoxedWriter, Connection, Transport, TransportError};
