use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use chat_relay::{
    client::Connection,
    event::{read_event, Envelope},
    server::RelayServer,
};
use serde_json::json;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{tcp::OwnedReadHalf, TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout},
};

#[tokio::test]
async fn enter_is_broadcast_to_everyone_but_the_sender() -> Result<()> {
    let (addr, shutdown, server) = start_relay().await?;

    let mut alice = connect_synced(addr, "alice", vec![]).await?;
    let mut bob = connect_synced(addr, "bob", vec![&mut alice]).await?;
    let mut carol = connect_synced(addr, "carol", vec![&mut alice, &mut bob]).await?;

    alice
        .send(&Envelope::Enter(json!({"name": "alice"})))
        .await?;

    let seen_by_bob = recv_timeout(&mut bob).await?;
    assert_eq!(seen_by_bob, Envelope::Enter(json!({"name": "alice"})));
    let seen_by_carol = recv_timeout(&mut carol).await?;
    assert_eq!(seen_by_carol, Envelope::Enter(json!({"name": "alice"})));

    // Alice must not have received her own entry: the very next event she
    // sees is the marker published after it.
    let marker = Envelope::Publish(json!({"marker": true}));
    alice.send(&marker).await?;
    assert_eq!(recv_timeout(&mut alice).await?, marker);
    assert_eq!(recv_timeout(&mut bob).await?, marker);
    assert_eq!(recv_timeout(&mut carol).await?, marker);

    stop_relay(shutdown, server).await
}

#[tokio::test]
async fn publish_echoes_back_to_the_sender() -> Result<()> {
    let (addr, shutdown, server) = start_relay().await?;

    let mut alice = connect_synced(addr, "alice", vec![]).await?;
    let mut bob = connect_synced(addr, "bob", vec![&mut alice]).await?;

    let message = Envelope::Publish(json!({"text": "hi"}));
    alice.send(&message).await?;

    assert_eq!(recv_timeout(&mut alice).await?, message);
    assert_eq!(recv_timeout(&mut bob).await?, message);

    stop_relay(shutdown, server).await
}

#[tokio::test]
async fn delete_carries_the_uid_to_every_client() -> Result<()> {
    let (addr, shutdown, server) = start_relay().await?;

    let mut alice = connect_synced(addr, "alice", vec![]).await?;
    let mut bob = connect_synced(addr, "bob", vec![&mut alice]).await?;

    alice.send(&Envelope::Delete("msg-42".into())).await?;

    assert_eq!(
        recv_timeout(&mut alice).await?,
        Envelope::Delete("msg-42".into())
    );
    assert_eq!(
        recv_timeout(&mut bob).await?,
        Envelope::Delete("msg-42".into())
    );

    stop_relay(shutdown, server).await
}

#[tokio::test]
async fn update_reaches_every_client() -> Result<()> {
    let (addr, shutdown, server) = start_relay().await?;

    let mut alice = connect_synced(addr, "alice", vec![]).await?;
    let mut bob = connect_synced(addr, "bob", vec![&mut alice]).await?;

    let edit = Envelope::Update(json!({"uid": "msg-42", "text": "hi, edited"}));
    bob.send(&edit).await?;

    assert_eq!(recv_timeout(&mut alice).await?, edit);
    assert_eq!(recv_timeout(&mut bob).await?, edit);

    stop_relay(shutdown, server).await
}

#[tokio::test]
async fn duplicate_events_are_delivered_twice() -> Result<()> {
    let (addr, shutdown, server) = start_relay().await?;

    let mut alice = connect_synced(addr, "alice", vec![]).await?;
    let mut bob = connect_synced(addr, "bob", vec![&mut alice]).await?;

    let message = Envelope::Publish(json!({"text": "again"}));
    alice.send(&message).await?;
    alice.send(&message).await?;

    assert_eq!(recv_timeout(&mut bob).await?, message);
    assert_eq!(recv_timeout(&mut bob).await?, message);

    stop_relay(shutdown, server).await
}

#[tokio::test]
async fn fan_out_with_no_recipients_is_silent() -> Result<()> {
    let (addr, shutdown, server) = start_relay().await?;

    let mut alice = connect_synced(addr, "alice", vec![]).await?;

    // Nobody else is connected, so the entry goes nowhere. The session must
    // survive it: the marker published afterwards still echoes back.
    alice
        .send(&Envelope::Enter(json!({"name": "alice"})))
        .await?;

    let marker = Envelope::Publish(json!({"marker": true}));
    alice.send(&marker).await?;
    assert_eq!(recv_timeout(&mut alice).await?, marker);

    stop_relay(shutdown, server).await
}

#[tokio::test]
async fn departed_clients_are_skipped_without_error() -> Result<()> {
    let (addr, shutdown, server) = start_relay().await?;

    let mut alice = connect_synced(addr, "alice", vec![]).await?;
    let mut bob = connect_synced(addr, "bob", vec![&mut alice]).await?;
    let mut carol = connect_synced(addr, "carol", vec![&mut alice, &mut bob]).await?;

    alice.close().await?;

    bob.send(&Envelope::Enter(json!({"name": "bob"}))).await?;
    assert_eq!(
        recv_timeout(&mut carol).await?,
        Envelope::Enter(json!({"name": "bob"}))
    );

    // The relay keeps serving the remaining connections.
    let message = Envelope::Publish(json!({"text": "still here"}));
    bob.send(&message).await?;
    assert_eq!(recv_timeout(&mut bob).await?, message);
    assert_eq!(recv_timeout(&mut carol).await?, message);

    stop_relay(shutdown, server).await
}

#[tokio::test]
async fn partial_reads_survive_an_interleaved_fan_out() -> Result<()> {
    let (addr, shutdown, server) = start_relay().await?;

    // Alice speaks raw bytes so the test controls exactly where her line is
    // split; a frame relayed to her mid-line must not corrupt the read.
    let stream = TcpStream::connect(addr).await?;
    let (alice_read, mut alice_write) = stream.into_split();
    let mut alice_read = BufReader::new(alice_read);

    let sync = Envelope::Publish(json!({"sync": "alice"}));
    let mut line = serde_json::to_vec(&sync)?;
    line.push(b'\n');
    alice_write.write_all(&line).await?;
    assert_eq!(read_raw_timeout(&mut alice_read).await?, sync);

    let mut bob = connect_synced(addr, "bob", vec![]).await?;
    let bob_sync = Envelope::Publish(json!({"sync": "bob"}));
    assert_eq!(read_raw_timeout(&mut alice_read).await?, bob_sync);

    // First half of a publish, no newline; give the server time to consume it.
    let full = br#"{"event":"publishEvent","data":{"text":"hi"}}"#;
    alice_write.write_all(&full[..20]).await?;
    alice_write.flush().await?;
    sleep(Duration::from_millis(100)).await;

    // Bob publishes, so a frame is delivered to Alice while her line is
    // still incomplete.
    let nudge = Envelope::Publish(json!({"text": "interleaved"}));
    bob.send(&nudge).await?;
    assert_eq!(recv_timeout(&mut bob).await?, nudge);
    assert_eq!(read_raw_timeout(&mut alice_read).await?, nudge);

    // The completed line must still relay to everyone.
    alice_write.write_all(&full[20..]).await?;
    alice_write.write_all(b"\n").await?;
    alice_write.flush().await?;

    let published = Envelope::Publish(json!({"text": "hi"}));
    assert_eq!(recv_timeout(&mut bob).await?, published);
    assert_eq!(read_raw_timeout(&mut alice_read).await?, published);

    stop_relay(shutdown, server).await
}

async fn start_relay() -> Result<(SocketAddr, oneshot::Sender<()>, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let server = RelayServer::new(listener, None);
    let addr = server.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let _ = server.run_until(shutdown).await;
    });

    Ok((addr, shutdown_tx, handle))
}

async fn stop_relay(shutdown: oneshot::Sender<()>, server: JoinHandle<()>) -> Result<()> {
    let _ = shutdown.send(());
    let _ = server.await;
    Ok(())
}

/// Connect and publish a sync marker, waiting for its echo on the new
/// connection and on every already-connected peer. The echo proves the
/// server registered the new session before the test proceeds; without it a
/// scenario could race the accept loop and miss a fan-out.
async fn connect_synced(
    addr: SocketAddr,
    tag: &str,
    peers: Vec<&mut Connection>,
) -> Result<Connection> {
    let mut connection = Connection::open(addr).await?;
    let marker = Envelope::Publish(json!({"sync": tag}));
    connection.send(&marker).await?;

    assert_eq!(recv_timeout(&mut connection).await?, marker);
    for peer in peers {
        assert_eq!(recv_timeout(peer).await?, marker);
    }

    Ok(connection)
}

async fn recv_timeout(connection: &mut Connection) -> Result<Envelope> {
    let event = timeout(Duration::from_secs(1), connection.recv()).await??;
    event.context("connection closed before the expected event")
}

async fn read_raw_timeout(reader: &mut BufReader<OwnedReadHalf>) -> Result<Envelope> {
    let event = timeout(Duration::from_secs(1), read_event(reader)).await??;
    event.context("raw connection closed before the expected event")
}
