//! End-to-end tests through real loopback sockets

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pgsniff::events::EventSink;
use pgsniff::metrics::Metrics;
use pgsniff::protocol::{DecodeEvent, Direction};
use pgsniff::{Config, ConnectionManager, RelayEngine, ShutdownCoordinator};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn untyped(code: u32, rest: &[u8]) -> Vec<u8> {
    let mut frame = ((rest.len() + 8) as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(&code.to_be_bytes());
    frame.extend_from_slice(rest);
    frame
}

fn typed(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![tag];
    frame.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

async fn start_proxy(
    upstream_addr: SocketAddr,
) -> (Arc<ConnectionManager>, SocketAddr, mpsc::UnboundedReceiver<DecodeEvent>) {
    let mut config = Config::default();
    config.proxy.listen_addr = "127.0.0.1:0".parse().unwrap();
    config.proxy.upstream_addr = upstream_addr.to_string();
    config.proxy.shutdown_timeout = Duration::from_secs(5);
    let config = Arc::new(config);

    let (tx, rx) = mpsc::unbounded_channel();
    let events: Arc<dyn EventSink> = Arc::new(tx);
    let metrics = Arc::new(Metrics::new().unwrap());
    let engine = Arc::new(RelayEngine::from_config(&config, events, metrics));

    let manager = Arc::new(ConnectionManager::bind(config, engine).await.unwrap());
    let proxy_addr = manager.get_bind_addr().unwrap();
    (manager, proxy_addr, rx)
}

async fn wait_for_sessions(manager: &ConnectionManager, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while manager.get_active_connections() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session count did not settle");
}

#[tokio::test]
async fn test_query_is_relayed_and_decoded() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let (manager, proxy_addr, mut events) = start_proxy(upstream_addr).await;

    let runner = Arc::clone(&manager);
    let proxy = tokio::spawn(async move { runner.run().await });

    let ssl_request = untyped(80877103, b"");
    let startup = untyped(196608, b"user\0postgres\0\0");
    let query = typed(b'Q', b"SELECT 1");
    let mut greeting = typed(b'R', &[0, 0, 0, 0]);
    greeting.extend(typed(b'Z', b"I"));

    // Fake PostgreSQL server
    let server = {
        let (startup_len, query_len, greeting) = (startup.len(), query.len(), greeting.clone());
        tokio::spawn(async move {
            let (mut db, _) = upstream.accept().await.unwrap();
            let mut ssl = [0u8; 8];
            db.read_exact(&mut ssl).await.unwrap();
            db.write_all(b"N").await.unwrap();

            let mut startup = vec![0u8; startup_len];
            db.read_exact(&mut startup).await.unwrap();
            db.write_all(&greeting).await.unwrap();

            let mut query = vec![0u8; query_len];
            db.read_exact(&mut query).await.unwrap();

            // Client close must reach the server
            let mut rest = Vec::new();
            db.read_to_end(&mut rest).await.unwrap();
            (ssl.to_vec(), startup, query, rest)
        })
    };

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(&ssl_request).await.unwrap();
    let mut answer = [0u8; 1];
    client.read_exact(&mut answer).await.unwrap();
    assert_eq!(&answer, b"N");

    client.write_all(&startup).await.unwrap();
    let mut received = vec![0u8; greeting.len()];
    client.read_exact(&mut received).await.unwrap();
    assert_eq!(received, greeting);

    client.write_all(&query).await.unwrap();
    wait_for_sessions(&manager, 1).await;
    drop(client);

    let (seen_ssl, seen_startup, seen_query, rest) =
        timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert_eq!(seen_ssl, ssl_request);
    assert_eq!(seen_startup, startup);
    assert_eq!(seen_query, query);
    assert!(rest.is_empty());

    wait_for_sessions(&manager, 0).await;
    assert_eq!(manager.get_accepted_connections(), 1);

    let mut client_events = Vec::new();
    let mut server_events = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event.direction {
            Direction::ClientToServer => client_events.push(event),
            Direction::ServerToClient => server_events.push(event),
        }
    }

    assert_eq!(client_events.len(), 3);
    assert_eq!(client_events[0].startup_code(), Some(80877103));
    assert_eq!(client_events[1].startup_code(), Some(196608));
    assert_eq!(client_events[2].tag, Some(b'Q'));
    assert_eq!(&client_events[2].payload[..], b"SELECT 1");

    let tags: Vec<_> = server_events.iter().map(|e| e.tag).collect();
    assert_eq!(tags, vec![Some(b'R'), Some(b'Z')]);

    proxy.abort();
}

#[tokio::test]
async fn test_dial_failure_stops_the_acceptor() {
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = unused.local_addr().unwrap();
    drop(unused);

    let (manager, proxy_addr, _events) = start_proxy(dead_addr).await;
    let client = tokio::spawn(TcpStream::connect(proxy_addr));

    let result = timeout(Duration::from_secs(5), manager.run()).await.unwrap();
    let err = result.unwrap_err();
    assert!(err.to_string().contains("Failed to dial upstream"), "unexpected error: {:#}", err);

    let _ = client.await;
}

#[tokio::test]
async fn test_graceful_shutdown_closes_live_sessions() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let (manager, proxy_addr, _events) = start_proxy(upstream_addr).await;

    let runner = Arc::clone(&manager);
    let proxy = tokio::spawn(async move { runner.run().await });

    let server = tokio::spawn(async move {
        let (mut db, _) = upstream.accept().await.unwrap();
        let mut rest = Vec::new();
        db.read_to_end(&mut rest).await.unwrap();
        rest
    });

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    wait_for_sessions(&manager, 1).await;

    let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
    coordinator.shutdown_connection_manager(&manager).await.unwrap();
    assert_eq!(manager.get_active_connections(), 0);

    // Both ends observe the close
    let rest = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert!(rest.is_empty());
    let mut buf = Vec::new();
    client.read_to_end(&mut buf).await.unwrap();
    assert!(buf.is_empty());

    let stopped = timeout(Duration::from_secs(5), proxy).await.unwrap().unwrap();
    assert!(stopped.is_ok());
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_session_logs_carry_session_and_peer_addresses() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let (manager, proxy_addr, _events) = start_proxy(upstream_addr).await;

    let runner = Arc::clone(&manager);
    let proxy = tokio::spawn(async move { runner.run().await });

    let client = TcpStream::connect(proxy_addr).await.unwrap();
    let client_addr = client.local_addr().unwrap();
    let (db, _) = upstream.accept().await.unwrap();
    wait_for_sessions(&manager, 1).await;
    drop(client);
    wait_for_sessions(&manager, 0).await;
    drop(db);
    proxy.abort();

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("session{session_id="), "{}", output);
    assert!(output.contains(&format!("client={}", client_addr)), "{}", output);
    assert!(output.contains(&format!("upstream={}", upstream_addr)), "{}", output);
}
