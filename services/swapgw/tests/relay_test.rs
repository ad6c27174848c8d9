//! TCP relay integration tests

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use common::{fast_modem_config, simulated_modem, WITHIN};
use std::time::Duration;
use swap_link::Frame;
use swapgw::TcpRelay;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(relay: &TcpRelay, expected_clients: usize) -> Self {
        let stream = TcpStream::connect(relay.local_addr()).await.unwrap();
        let (read, writer) = stream.into_split();
        tokio::time::timeout(WITHIN, async {
            while relay.client_count() < expected_clients {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(WITHIN, self.reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line.trim().to_string()
    }

    async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r\n").await.unwrap();
    }
}

#[tokio::test]
async fn test_client_frame_goes_on_air_without_echo() {
    let (modem, mut sim) = simulated_modem(fast_modem_config());
    modem.open().await.unwrap();
    let relay = TcpRelay::start(modem.clone(), "127.0.0.1:0").await.unwrap();

    let mut origin = Client::connect(&relay, 1).await;
    let mut watcher = Client::connect(&relay, 2).await;

    let command = Frame::command(0x01, 0x05, 11, vec![0x01]);
    origin.send_line(&command.encode()).await;

    assert_eq!(
        sim.next_data_line(WITHIN).await.as_deref(),
        Some(command.to_modem_text().as_str())
    );
    assert_eq!(watcher.read_line().await, command.encode());

    // The origin's next line is network traffic, not its own frame
    let status = Frame::status(0x05, 11, vec![0x01]).with_radio(0x2C, 0x30);
    sim.inject(status.encode());
    assert_eq!(origin.read_line().await, status.encode());
    assert_eq!(watcher.read_line().await, status.encode());

    relay.close().await;
    modem.close().await.unwrap();
}

#[tokio::test]
async fn test_client_garbage_is_ignored() {
    let (modem, mut sim) = simulated_modem(fast_modem_config());
    modem.open().await.unwrap();
    let relay = TcpRelay::start(modem.clone(), "127.0.0.1:0").await.unwrap();

    let mut client = Client::connect(&relay, 1).await;
    client.send_line("hello there").await;
    // Modem text without the radio prefix is accepted too
    let query = Frame::query(0x01, 0x07, 0);
    client.send_line(&query.to_modem_text()).await;

    assert_eq!(
        sim.next_data_line(WITHIN).await.as_deref(),
        Some(query.to_modem_text().as_str())
    );
    assert_eq!(relay.client_count(), 1);

    relay.close().await;
    modem.close().await.unwrap();
}
