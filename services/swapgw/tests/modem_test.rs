//! Modem driver integration tests
//!
//! The driver talks to a simulated modem over an in-memory link:
//! - mode switching and its timeout
//! - reading and writing the radio configuration
//! - listener notification and link loss

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use common::{default_setup, fast_modem_config, simulated_modem, WITHIN};
use std::time::{Duration, Instant};
use swap_link::{Frame, ModemSetup};
use swapgw::transport::{MockTransport, SimulatedModem};
use swapgw::{Dispatcher, GatewayError, Modem, ModemEvent, ModemMode};
use tokio::sync::mpsc;

#[tokio::test]
async fn test_escape_gives_up_after_retries() {
    let (modem, mut sim) = simulated_modem(fast_modem_config());
    sim.set_ack_escape(false);
    modem.open().await.unwrap();

    let err = modem.get_configuration().await.unwrap_err();
    assert!(matches!(err, GatewayError::ModeTimeout(_)), "got {:?}", err);
    assert_eq!(sim.escape_attempts(), 3);
    assert_eq!(modem.mode(), ModemMode::Data);
    assert!(modem.is_open());

    // Data traffic is unaffected by the failed switch
    let frame = Frame::query(0xFF, 0x05, 0x0B);
    modem.send(frame.clone()).await.unwrap();
    assert_eq!(
        sim.next_data_line(WITHIN).await.as_deref(),
        Some(frame.to_modem_text().as_str())
    );
}

#[tokio::test]
async fn test_set_configuration_writes_each_field() {
    let (modem, sim) = simulated_modem(fast_modem_config());
    modem.open().await.unwrap();

    let setup = ModemSetup::new(5, 0x1234, 0x2A);
    modem.set_configuration(setup).await.unwrap();

    assert_eq!(sim.setup(), setup);
    assert_eq!(
        sim.at_commands(),
        vec!["ATCH=05", "ATSW=1234", "ATDA=2A", "ATO"]
    );
    assert_eq!(modem.mode(), ModemMode::Data);

    // The written value is served from the cache
    assert_eq!(modem.get_configuration().await.unwrap(), setup);
    assert_eq!(sim.escape_attempts(), 1);
}

#[tokio::test]
async fn test_setup_recorded_while_closed_is_applied_on_open() {
    let (modem, sim) = simulated_modem(fast_modem_config());
    let setup = ModemSetup::new(7, 0xBEEF, 0x10);

    modem.set_configuration(setup).await.unwrap();
    assert_eq!(sim.escape_attempts(), 0);

    modem.open().await.unwrap();
    assert_eq!(sim.setup(), setup);
    assert_eq!(modem.get_configuration().await.unwrap(), setup);
}

#[tokio::test]
async fn test_listeners_see_received_and_sent_frames() {
    let (modem, sim) = simulated_modem(fast_modem_config());
    let (tx, mut rx) = mpsc::unbounded_channel();
    modem.add_listener(move |event: &ModemEvent| {
        let _ = tx.send(event.clone());
    });
    modem.open().await.unwrap();

    let status = Frame::status(3, 11, vec![0x01, 0x02]).with_radio(0x30, 0x40);
    sim.inject(status.encode());
    let query = Frame::query(0xFF, 3, 11);
    modem.send(query.clone()).await.unwrap();

    let mut seen = Vec::new();
    while seen.len() < 2 {
        let event = tokio::time::timeout(WITHIN, rx.recv()).await.unwrap().unwrap();
        seen.push(event);
    }
    assert!(seen.contains(&ModemEvent::Received(status)));
    assert!(seen.contains(&ModemEvent::Sent(query)));
}

#[tokio::test]
async fn test_link_loss_closes_driver() {
    let (modem, sim) = simulated_modem(fast_modem_config());
    modem.open().await.unwrap();
    let mut events = modem.subscribe();

    sim.disconnect().await;

    let event = tokio::time::timeout(WITHIN, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, ModemEvent::Closed);
    assert!(!modem.is_open());

    let err = modem.send(Frame::query(0xFF, 1, 0)).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotOpen(_)));
}

#[tokio::test]
async fn test_close_unblocks_configuration_waiter() {
    let (modem, sim) = simulated_modem(fast_modem_config());
    sim.set_ack_escape(false);
    modem.open().await.unwrap();

    let waiter = {
        let modem = modem.clone();
        tokio::spawn(async move { modem.get_configuration().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    modem.close().await.unwrap();

    let result = tokio::time::timeout(WITHIN, waiter).await.unwrap().unwrap();
    assert!(result.is_err());
    assert!(!modem.is_open());
}

#[tokio::test]
async fn test_reopen_is_noop_while_open() {
    let (modem, _sim) = simulated_modem(fast_modem_config());
    modem.open().await.unwrap();
    modem.open().await.unwrap();
    assert!(modem.is_open());
    modem.close().await.unwrap();
    modem.close().await.unwrap();
    assert!(!modem.is_open());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_listeners_do_not_stall_exchanges() {
    let (transport, peer) = MockTransport::pair();
    let sim = SimulatedModem::spawn(peer, default_setup());
    let modem = Modem::new(
        Box::new(transport),
        fast_modem_config(),
        Dispatcher::new(4, 64),
    );
    // More blocked callbacks than runtime threads
    for _ in 0..4 {
        modem.add_listener(|event: &ModemEvent| {
            if matches!(event, ModemEvent::Received(_)) {
                std::thread::sleep(Duration::from_millis(1500));
            }
        });
    }
    modem.open().await.unwrap();

    sim.inject(Frame::status(3, 11, vec![0x01]).encode());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    assert_eq!(modem.get_configuration().await.unwrap(), default_setup());
    assert!(
        started.elapsed() < Duration::from_millis(1000),
        "configuration read took {:?}",
        started.elapsed()
    );
    modem.close().await.unwrap();
}
