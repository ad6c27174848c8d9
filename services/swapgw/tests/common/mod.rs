//! Shared fixtures for the gateway integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use swap_link::ModemSetup;
use swapgw::config::{GatewayConfig, ModemConfig};
use swapgw::library::DeviceLibrary;
use swapgw::transport::{MockTransport, SimulatedModem};
use swapgw::{Dispatcher, Gateway, GatewayEvent, Modem};
use tokio::sync::mpsc;

pub const WITHIN: Duration = Duration::from_secs(2);

/// Short polling windows so timeout paths finish quickly
pub fn fast_modem_config() -> ModemConfig {
    ModemConfig {
        poll_interval_ms: 10,
        poll_attempts: 5,
        escape_retries: 3,
        response_timeout_ms: 500,
        ready_timeout_ms: 500,
        ..Default::default()
    }
}

pub fn default_setup() -> ModemSetup {
    ModemSetup::new(0, 0xB547, 0x01)
}

/// Closed modem wired to a simulated modem
pub fn simulated_modem(config: ModemConfig) -> (Modem, SimulatedModem) {
    let (transport, peer) = MockTransport::pair();
    let sim = SimulatedModem::spawn(peer, default_setup());
    // One worker keeps listener callbacks in arrival order
    let modem = Modem::new(Box::new(transport), config, Dispatcher::new(1, 256));
    (modem, sim)
}

/// Open modem plus a gateway whose events land on a channel
pub struct GatewayFixture {
    pub modem: Modem,
    pub gateway: Gateway,
    pub sim: SimulatedModem,
    pub events: mpsc::UnboundedReceiver<GatewayEvent>,
}

impl GatewayFixture {
    pub async fn start(library: Option<Arc<dyn DeviceLibrary>>) -> Self {
        let (transport, peer) = MockTransport::pair();
        let sim = SimulatedModem::spawn(peer, default_setup());
        let dispatcher = Dispatcher::new(1, 256);
        let modem = Modem::new(Box::new(transport), fast_modem_config(), dispatcher.clone());

        let gateway = Gateway::start(modem.clone(), library, GatewayConfig::default(), dispatcher);
        let (tx, events) = mpsc::unbounded_channel();
        gateway.add_listener(move |event: &GatewayEvent| {
            let _ = tx.send(event.clone());
        });
        modem.open().await.unwrap();

        Self {
            modem,
            gateway,
            sim,
            events,
        }
    }

    pub async fn next_event(&mut self) -> GatewayEvent {
        tokio::time::timeout(WITHIN, self.events.recv())
            .await
            .expect("no gateway event in time")
            .expect("gateway event channel closed")
    }

    /// Wait for the next event matching `pred`, skipping others
    pub async fn wait_for<F>(&mut self, pred: F) -> GatewayEvent
    where
        F: Fn(&GatewayEvent) -> bool,
    {
        loop {
            let event = self.next_event().await;
            if pred(&event) {
                return event;
            }
        }
    }

    /// Events already delivered, after letting in-flight ones settle
    pub async fn drain_events(&mut self) -> Vec<GatewayEvent> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn shutdown(self) {
        self.gateway.close().await;
        self.modem.close().await.unwrap();
        self.sim.disconnect().await;
    }
}
