//! Service assembly
//!
//! Builds the transport, modem, gateway and optional relay from an
//! [`AppConfig`] and tears them down in reverse order.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{AppConfig, LibraryConfig, TransportKind, TransportSection};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::library::{DeviceLibrary, FileLibrary};
use crate::modem::Modem;
use crate::relay::TcpRelay;
use crate::transport::{SerialTransport, TcpTransport, Transport};

/// Create the transport selected by the configuration
pub fn create_transport(section: &TransportSection) -> Result<Box<dyn Transport>> {
    let transport: Box<dyn Transport> = match section.kind {
        TransportKind::Serial => Box::new(SerialTransport::new(section.serial.clone())?),
        TransportKind::Tcp => Box::new(TcpTransport::new(section.tcp.clone())?),
    };
    info!(
        "Transport: {} ({})",
        transport.name(),
        transport.transport_type()
    );
    Ok(transport)
}

/// Load the device library directory, if one is configured
pub async fn load_library(config: &LibraryConfig) -> Result<Option<Arc<dyn DeviceLibrary>>> {
    match &config.dir {
        Some(dir) => {
            let library = FileLibrary::load(dir).await?;
            if library.is_empty() {
                warn!("Device library {} has no usable definitions", dir.display());
            }
            Ok(Some(Arc::new(library)))
        },
        None => {
            info!("No device library configured, nodes get raw register access only");
            Ok(None)
        },
    }
}

/// Everything a running gateway service owns
#[derive(Debug)]
pub struct Runtime {
    pub dispatcher: Dispatcher,
    pub modem: Modem,
    pub gateway: Gateway,
    pub relay: Option<TcpRelay>,
}

impl Runtime {
    /// Start with the transport the configuration names
    pub async fn start(config: &AppConfig) -> Result<Self> {
        let transport = create_transport(&config.transport)?;
        Self::start_with_transport(config, transport).await
    }

    /// Start on an already constructed transport
    pub async fn start_with_transport(
        config: &AppConfig,
        transport: Box<dyn Transport>,
    ) -> Result<Self> {
        let library = load_library(&config.library).await?;
        let dispatcher = Dispatcher::new(
            config.gateway.dispatch_workers,
            config.gateway.dispatch_queue,
        );

        let modem = Modem::with_event_buffer(
            transport,
            config.modem.clone(),
            dispatcher.clone(),
            config.gateway.frame_buffer,
        );
        // Follow the modem before it opens so no frame is missed
        let gateway = Gateway::start(
            modem.clone(),
            library,
            config.gateway.clone(),
            dispatcher.clone(),
        );
        modem.open().await?;

        let relay = if config.relay.enabled {
            Some(TcpRelay::start(modem.clone(), &config.relay.bind).await?)
        } else {
            None
        };

        Ok(Self {
            dispatcher,
            modem,
            gateway,
            relay,
        })
    }

    /// Close relay, gateway and modem, in that order
    pub async fn shutdown(self) -> Result<()> {
        if let Some(relay) = &self.relay {
            relay.close().await;
        }
        self.gateway.close().await;
        let closed = self.modem.close().await;
        self.dispatcher.shutdown().await;
        closed
    }
}
