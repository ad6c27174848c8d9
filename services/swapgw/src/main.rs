//! SWAP gateway service
//!
//! Opens the modem, follows the network and logs what it sees until
//! Ctrl-C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use common::{ServiceArgs, ServiceInfo};
use swapgw::config::TransportKind;
use swapgw::{AppConfig, GatewayEvent, Runtime};

#[derive(Debug, Parser)]
#[command(
    name = "swapgw",
    version = env!("CARGO_PKG_VERSION"),
    about = "SWAP wireless sensor gateway",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,

    /// Serial device the modem is attached to
    #[arg(short = 'p', long)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(short = 'b', long)]
    baud: Option<u32>,

    /// Reach the modem over TCP instead (host:port)
    #[arg(long, conflicts_with = "port")]
    tcp: Option<String>,

    /// Directory of device definition files
    #[arg(long)]
    library: Option<PathBuf>,

    /// Start the TCP relay on this address
    #[arg(long)]
    relay: Option<String>,
}

impl Cli {
    /// Command-line settings win over file and environment
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(port) = &self.port {
            config.transport.kind = TransportKind::Serial;
            config.transport.serial.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.transport.serial.baud_rate = baud;
        }
        if let Some(addr) = &self.tcp {
            let (host, port) = addr
                .rsplit_once(':')
                .with_context(|| format!("--tcp expects host:port, got '{}'", addr))?;
            config.transport.kind = TransportKind::Tcp;
            config.transport.tcp.host = host.to_string();
            config.transport.tcp.port = port
                .parse()
                .with_context(|| format!("invalid TCP port '{}'", port))?;
        }
        if let Some(dir) = &self.library {
            config.library.dir = Some(dir.clone());
        }
        if let Some(bind) = &self.relay {
            config.relay.enabled = true;
            config.relay.bind = bind.clone();
        }
        if let Some(level) = &self.service.log_level {
            config.service.logging.level = level.to_lowercase();
        }
        if self.service.no_color {
            config.service.logging.color = false;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.service.config.as_deref())
        .context("failed to load configuration")?;
    cli.apply(&mut config)?;

    common::init_logging(&config.service.name, &config.service.logging)
        .context("failed to initialise logging")?;

    let service_info = ServiceInfo::new(
        config.service.name.clone(),
        env!("CARGO_PKG_VERSION"),
        "SWAP wireless sensor gateway",
    );
    if config.service.logging.color {
        common::print_startup_banner(&service_info);
    }

    config.validate().context("invalid configuration")?;
    if cli.service.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let shutdown = common::shutdown_token();
    let runtime = Runtime::start(&config)
        .await
        .context("failed to start gateway")?;
    info!(
        "Gateway running on {} ({})",
        runtime.modem.transport_name(),
        runtime.modem.transport_type()
    );

    runtime.gateway.add_listener(|event: &GatewayEvent| match event {
        GatewayEvent::NodeDiscovered(node) => {
            info!("Node {:02X} discovered", node.address());
        },
        GatewayEvent::NodeIdentified(node) => match node.definition() {
            Some(def) => info!(
                "Node {:02X} is {} {} ({} endpoints)",
                node.address(),
                def.manufacturer,
                def.product,
                node.endpoints().len()
            ),
            None => info!(
                "Node {:02X} reports an unknown product",
                node.address()
            ),
        },
        GatewayEvent::RegisterChanged(change) => {
            let hex: String = change.value.iter().map(|b| format!("{:02X}", b)).collect();
            info!(
                "Node {:02X} register {:02X} = {}",
                change.node, change.register, hex
            );
        },
    });

    match runtime.modem.get_configuration().await {
        Ok(setup) => info!("Modem setup: {}", setup),
        Err(e) => error!("Could not read modem setup: {}", e),
    }

    shutdown.cancelled().await;
    info!("Shutting down");

    runtime.shutdown().await.context("shutdown failed")?;
    info!("Stopped");
    Ok(())
}
