// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation
)]

//! Integration tests for file transfers relayed over real TCP connections.
//!
//! Files travel inline on the same connection as chat lines, so every test
//! also checks that the line stream is still in sync after the payload.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyperchat_proto::codec::{StreamReader, StreamWriter};
use hyperchat_proto::frame::FileHeader;
use hyperchat_relay::relay::{self, RelayState};
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Helpers
// =============================================================================

struct Client {
    reader: StreamReader<BufReader<OwnedReadHalf>>,
    writer: StreamWriter<OwnedWriteHalf>,
}

impl Client {
    async fn join(addr: SocketAddr, handle: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        let mut client = Self {
            reader: StreamReader::new(BufReader::new(read)),
            writer: StreamWriter::new(write),
        };
        client.writer.write_line(handle).await.unwrap();
        assert_eq!(
            client.recv().await.as_deref(),
            Some(format!("Server: Welcome, {handle}!").as_str())
        );
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_line(line).await.unwrap();
    }

    async fn recv(&mut self) -> Option<String> {
        timeout(WAIT, self.reader.read_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
    }

    /// Reads an announcement, the marker line, and the whole file.
    async fn recv_file(&mut self) -> (String, FileHeader, Vec<u8>) {
        let announce = self.recv().await.expect("announcement");
        assert_eq!(self.recv().await.as_deref(), Some(":file"));
        let header = timeout(WAIT, self.reader.read_file_header())
            .await
            .expect("timed out waiting for header")
            .unwrap();
        let data = timeout(WAIT, self.reader.file_body(header.size, 4096).read_to_end())
            .await
            .expect("timed out waiting for payload")
            .unwrap();
        (announce, header, data)
    }

    async fn assert_silent(&mut self) {
        let pending = timeout(Duration::from_millis(150), self.reader.read_line()).await;
        assert!(pending.is_err(), "unexpected line: {pending:?}");
    }
}

/// Joins alice, bob, and carol and drains the join notices.
async fn three_clients(addr: SocketAddr) -> (Client, Client, Client) {
    let mut alice = Client::join(addr, "alice").await;
    let mut bob = Client::join(addr, "bob").await;
    alice.recv().await;
    let carol = Client::join(addr, "carol").await;
    alice.recv().await;
    bob.recv().await;
    (alice, bob, carol)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn file_reaches_every_other_client_byte_identical() {
    let (addr, _server) = relay::start_server("127.0.0.1:0").await.unwrap();
    let (mut alice, mut bob, mut carol) = three_clients(addr).await;

    // Larger than one chunk and not a multiple of the chunk size.
    let data = payload(50_001);
    alice
        .writer
        .send_file(":file", "report.pdf", &data, 1500)
        .await
        .unwrap();
    alice.send("done sending").await;

    for client in [&mut bob, &mut carol] {
        let (announce, header, received) = client.recv_file().await;
        assert_eq!(announce, "Server: alice has sent a file: report.pdf");
        assert_eq!(header, FileHeader::new("report.pdf", 50_001));
        assert_eq!(received, data);
        assert_eq!(
            client.recv().await.as_deref(),
            Some("Server: File sent successfully!")
        );
        assert_eq!(client.recv().await.as_deref(), Some("alice: done sending"));
    }
    alice.assert_silent().await;
}

#[tokio::test]
async fn empty_file_is_relayed() {
    let (addr, _server) = relay::start_server("127.0.0.1:0").await.unwrap();
    let mut alice = Client::join(addr, "alice").await;
    let mut bob = Client::join(addr, "bob").await;
    alice.recv().await;

    alice.writer.send_file(":file", "empty.txt", &[], 4096).await.unwrap();

    let (_, header, received) = bob.recv_file().await;
    assert_eq!(header, FileHeader::new("empty.txt", 0));
    assert!(received.is_empty());
    assert_eq!(
        bob.recv().await.as_deref(),
        Some("Server: File sent successfully!")
    );
}

#[tokio::test]
async fn directed_file_reaches_only_recipient() {
    let (addr, _server) = relay::start_server("127.0.0.1:0").await.unwrap();
    let (mut alice, mut bob, mut carol) = three_clients(addr).await;

    let data = payload(9000);
    alice
        .writer
        .send_file(":file @bob", "secret.bin", &data, 4096)
        .await
        .unwrap();

    let (announce, header, received) = bob.recv_file().await;
    assert_eq!(announce, "Server: alice has sent a file: secret.bin");
    assert_eq!(header.name, "secret.bin");
    assert_eq!(received, data);
    assert_eq!(
        bob.recv().await.as_deref(),
        Some("Server: File sent successfully!")
    );
    carol.assert_silent().await;
    alice.assert_silent().await;
}

#[tokio::test]
async fn directed_file_to_absent_handle_is_dropped() {
    let (addr, _server) = relay::start_server("127.0.0.1:0").await.unwrap();
    let mut alice = Client::join(addr, "alice").await;
    let mut bob = Client::join(addr, "bob").await;
    alice.recv().await;

    alice
        .writer
        .send_file(":file @zed", "lost.bin", &payload(3000), 1024)
        .await
        .unwrap();
    alice.send("after the file").await;

    assert_eq!(
        alice.recv().await.as_deref(),
        Some("Server: User not found! (try using :list to see active users).")
    );
    // The payload was consumed: the next line is routed normally.
    assert_eq!(bob.recv().await.as_deref(), Some("alice: after the file"));
}

#[tokio::test]
async fn oversized_file_is_refused_and_stream_stays_in_sync() {
    let state = Arc::new(RelayState::with_config(1000, 256));
    let (addr, _server) = relay::start_server_with_state("127.0.0.1:0", state)
        .await
        .unwrap();
    let mut alice = Client::join(addr, "alice").await;
    let mut bob = Client::join(addr, "bob").await;
    alice.recv().await;

    alice
        .writer
        .send_file(":file", "huge.iso", &payload(4000), 1024)
        .await
        .unwrap();
    alice.send("small talk").await;

    assert_eq!(
        alice.recv().await.as_deref(),
        Some("Server: File too large: 4000 bytes (max 1000)")
    );
    assert_eq!(bob.recv().await.as_deref(), Some("alice: small talk"));
}

#[tokio::test]
async fn sender_disconnect_mid_file_pads_and_reports_failure() {
    let (addr, _server) = relay::start_server("127.0.0.1:0").await.unwrap();
    let mut alice = Client::join(addr, "alice").await;
    let mut bob = Client::join(addr, "bob").await;
    alice.recv().await;

    alice.send(":file").await;
    alice
        .writer
        .write_file_header(&FileHeader::new("partial.bin", 1000))
        .await
        .unwrap();
    alice.writer.write_chunk(&[0xab; 400]).await.unwrap();
    alice.writer.flush().await.unwrap();
    drop(alice);

    let (_, header, received) = bob.recv_file().await;
    assert_eq!(header.size, 1000);
    assert_eq!(received.len(), 1000);
    assert!(received[..400].iter().all(|&b| b == 0xab));
    assert!(received[400..].iter().all(|&b| b == 0));
    assert_eq!(bob.recv().await.as_deref(), Some("Server: File not sent!"));
    assert_eq!(
        bob.recv().await.as_deref(),
        Some("Server: alice has left the chat!")
    );
}

#[tokio::test]
async fn chat_and_files_interleave_without_corruption() {
    let (addr, _server) = relay::start_server("127.0.0.1:0").await.unwrap();
    let mut alice = Client::join(addr, "alice").await;
    let mut bob = Client::join(addr, "bob").await;
    alice.recv().await;

    let first = payload(700);
    let second = payload(12_345);
    alice.send("before").await;
    alice.writer.send_file(":file", "one.bin", &first, 100).await.unwrap();
    alice.send("between").await;
    alice.writer.send_file(":file", "two.bin", &second, 4096).await.unwrap();
    alice.send("after").await;

    assert_eq!(bob.recv().await.as_deref(), Some("alice: before"));
    let (_, header, received) = bob.recv_file().await;
    assert_eq!(header.name, "one.bin");
    assert_eq!(received, first);
    assert_eq!(bob.recv().await.as_deref(), Some("Server: File sent successfully!"));
    assert_eq!(bob.recv().await.as_deref(), Some("alice: between"));
    let (_, header, received) = bob.recv_file().await;
    assert_eq!(header.name, "two.bin");
    assert_eq!(received, second);
    assert_eq!(bob.recv().await.as_deref(), Some("Server: File sent successfully!"));
    assert_eq!(bob.recv().await.as_deref(), Some("alice: after"));
}
