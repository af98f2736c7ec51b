// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for chat routing over real TCP connections.
//!
//! Each test starts an in-process relay on an OS-assigned port and drives it
//! with plain TCP clients speaking the line protocol.

use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyperchat_proto::codec::{StreamReader, StreamWriter};
use hyperchat_relay::relay::{self, RelayState};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

// =============================================================================
// Helpers
// =============================================================================

struct Client {
    reader: StreamReader<BufReader<OwnedReadHalf>>,
    writer: StreamWriter<OwnedWriteHalf>,
}

impl Client {
    /// Connects, announces `handle`, and waits for the welcome line so the
    /// handle is known to be registered.
    async fn join(addr: SocketAddr, handle: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        let mut client = Self {
            reader: StreamReader::new(BufReader::new(read)),
            writer: StreamWriter::new(write),
        };
        client.send(handle).await;
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
        timeout(Duration::from_secs(2), self.reader.read_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
    }

    async fn assert_silent(&mut self) {
        let pending = timeout(Duration::from_millis(150), self.reader.read_line()).await;
        assert!(pending.is_err(), "unexpected line: {pending:?}");
    }
}

async fn start() -> SocketAddr {
    let (addr, _handle) = relay::start_server("127.0.0.1:0").await.unwrap();
    addr
}

/// Joins alice, bob, and carol in that order and drains the join notices.
async fn three_clients(addr: SocketAddr) -> (Client, Client, Client) {
    let mut alice = Client::join(addr, "alice").await;
    let mut bob = Client::join(addr, "bob").await;
    assert_eq!(alice.recv().await.as_deref(), Some("Server: bob has entered the chat!"));
    let carol = Client::join(addr, "carol").await;
    assert_eq!(alice.recv().await.as_deref(), Some("Server: carol has entered the chat!"));
    assert_eq!(bob.recv().await.as_deref(), Some("Server: carol has entered the chat!"));
    (alice, bob, carol)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn alice_bob_carol_scenario() {
    let addr = start().await;
    let (mut alice, mut bob, mut carol) = three_clients(addr).await;

    alice.send("hello").await;
    assert_eq!(bob.recv().await.as_deref(), Some("alice: hello"));
    assert_eq!(carol.recv().await.as_deref(), Some("alice: hello"));

    alice.send("@bob hi").await;
    assert_eq!(bob.recv().await.as_deref(), Some("alice: hi"));

    bob.send(":list").await;
    assert_eq!(
        bob.recv().await.as_deref(),
        Some("Server: Active users: @alice, @bob, @carol")
    );

    drop(carol);
    assert_eq!(alice.recv().await.as_deref(), Some("Server: carol has left the chat!"));
    assert_eq!(bob.recv().await.as_deref(), Some("Server: carol has left the chat!"));

    bob.send(":list").await;
    assert_eq!(
        bob.recv().await.as_deref(),
        Some("Server: Active users: @alice, @bob")
    );

    // Alice never saw her own messages or bob's :list replies.
    alice.assert_silent().await;
}

#[tokio::test]
async fn directed_to_absent_handle_notifies_only_sender() {
    let addr = start().await;
    let (mut alice, mut bob, mut carol) = three_clients(addr).await;

    alice.send("@zed are you there").await;
    assert_eq!(
        alice.recv().await.as_deref(),
        Some("Server: User not found! (try using :list to see active users).")
    );
    alice.assert_silent().await;
    bob.assert_silent().await;
    carol.assert_silent().await;
}

#[tokio::test]
async fn broadcast_after_departure_still_reaches_others() {
    let addr = start().await;
    let (mut alice, mut bob, carol) = three_clients(addr).await;

    drop(carol);
    assert_eq!(alice.recv().await.as_deref(), Some("Server: carol has left the chat!"));
    assert_eq!(bob.recv().await.as_deref(), Some("Server: carol has left the chat!"));

    alice.send("still there?").await;
    assert_eq!(bob.recv().await.as_deref(), Some("alice: still there?"));
}

#[tokio::test]
async fn quit_closes_connection() {
    let addr = start().await;
    let mut alice = Client::join(addr, "alice").await;
    let mut bob = Client::join(addr, "bob").await;
    alice.recv().await;

    bob.send(":quit").await;
    assert_eq!(alice.recv().await.as_deref(), Some("Server: bob has left the chat!"));
    assert_eq!(bob.recv().await, None);
}

#[tokio::test]
async fn duplicate_handle_rejected_first_keeps_working() {
    let addr = start().await;
    let mut alice = Client::join(addr, "alice").await;
    let mut bob = Client::join(addr, "bob").await;
    alice.recv().await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, write) = stream.into_split();
    let mut impostor = Client {
        reader: StreamReader::new(BufReader::new(read)),
        writer: StreamWriter::new(write),
    };
    impostor.send("alice").await;
    assert_eq!(
        impostor.recv().await.as_deref(),
        Some("Server: Handle 'alice' is already in use!")
    );
    assert_eq!(impostor.recv().await, None);

    bob.send("@alice still you?").await;
    assert_eq!(alice.recv().await.as_deref(), Some("bob: still you?"));
}

#[tokio::test]
async fn handle_is_free_again_after_disconnect() {
    let addr = start().await;
    let mut alice = Client::join(addr, "alice").await;
    let bob = Client::join(addr, "bob").await;
    alice.recv().await;

    drop(bob);
    assert_eq!(alice.recv().await.as_deref(), Some("Server: bob has left the chat!"));

    let _bob_again = Client::join(addr, "bob").await;
    assert_eq!(alice.recv().await.as_deref(), Some("Server: bob has entered the chat!"));
}

#[tokio::test]
async fn crlf_clients_are_understood() {
    let addr = start().await;
    let mut alice = Client::join(addr, "alice").await;
    let mut bob = Client::join(addr, "bob").await;
    alice.recv().await;

    bob.send("@alice over crlf\r").await;
    assert_eq!(alice.recv().await.as_deref(), Some("bob: over crlf"));
}

#[tokio::test]
async fn empty_lines_are_relayed() {
    let addr = start().await;
    let mut alice = Client::join(addr, "alice").await;
    let mut bob = Client::join(addr, "bob").await;
    alice.recv().await;

    bob.send("").await;
    bob.send("   ").await;
    assert_eq!(alice.recv().await.as_deref(), Some("bob: "));
    assert_eq!(alice.recv().await.as_deref(), Some("bob:    "));
}

/// Runs the relay the way the binary does: `serve` on its own runtime, which
/// is dropped as soon as `serve` returns. The client must still have read the
/// shutdown notice followed by end of stream.
#[test]
fn shutdown_notice_is_delivered_before_the_runtime_exits() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let client = std::thread::spawn(move || {
        let stream = std::net::TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut writer = stream.try_clone().unwrap();
        writer.write_all(b"alice\n").unwrap();
        let mut reader = std::io::BufReader::new(stream);

        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "Server: Welcome, alice!\n");
        stop_tx.send(()).unwrap();

        let mut rest = Vec::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            rest.push(line.trim_end().to_string());
        }
        rest
    });

    rt.block_on(relay::serve(listener, Arc::new(RelayState::new()), async move {
        let _ = stop_rx.await;
    }));
    drop(rt);

    let rest = client.join().unwrap();
    assert_eq!(rest, vec!["Server: Relay shutting down!"]);
}
