use map_reduce_core::host_registry::HostRegistry;
use map_reduce_core::in_memory_partition_store::InMemoryPartitionStore;
use map_reduce_core::partition_store::PartitionStore;
use map_reduce_core::partitioner::Partitioner;
use map_reduce_tcp_shuffle::framing::bind_listener;
use map_reduce_tcp_shuffle::peer_shuffle_sender::PeerShuffleSender;
use map_reduce_tcp_shuffle::peer_shuffle_server::PeerShuffleServer;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

async fn start_server(
    own_index: usize,
    num_workers: usize,
) -> (PeerShuffleServer, InMemoryPartitionStore) {
    let listener = bind_listener("127.0.0.1:0").await.unwrap();
    let store = InMemoryPartitionStore::new();
    let server = PeerShuffleServer::serve(
        listener,
        own_index,
        Partitioner::new(num_workers).unwrap(),
        store.clone(),
        CancellationToken::new(),
    )
    .unwrap();
    (server, store)
}

/// Writes raw bytes, half-closes and waits for the server to hang up
async fn send_raw(addr: SocketAddr, payload: &[u8]) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(payload).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_merges_records_from_concurrent_peers() {
    // Arrange
    let (server, store) = start_server(0, 1).await;
    let addr = server.local_addr();

    // Act
    let peers: Vec<_> = (0..8)
        .map(|peer| {
            tokio::spawn(async move {
                let payload = format!("shared:1\npeer{}:{}\nshared:2\n", peer, peer + 1);
                send_raw(addr, payload.as_bytes()).await;
            })
        })
        .collect();
    for peer in peers {
        peer.await.unwrap();
    }

    // Assert
    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.get("shared"), Some(&24));
    for peer in 0..8u64 {
        assert_eq!(snapshot.get(&format!("peer{}", peer)), Some(&(peer + 1)));
    }
    server.close().await;
}

#[tokio::test]
async fn test_malformed_records_are_skipped() {
    let (server, store) = start_server(0, 1).await;

    send_raw(
        server.local_addr(),
        b"good:3\nno-separator\n:5\nbad:count\n\ngood:4\r\nlast:1",
    )
    .await;

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.get("good"), Some(&7));
    assert_eq!(snapshot.get("last"), Some(&1));
    assert_eq!(snapshot.len(), 2);
    server.close().await;
}

#[tokio::test]
async fn test_records_owned_elsewhere_are_dropped() {
    // Arrange
    let partitioner = Partitioner::new(2).unwrap();
    let (server, store) = start_server(1, 2).await;
    let tokens = ["a", "b", "c", "d", "e", "f", "g", "h"];
    let payload: String = tokens.iter().map(|t| format!("{}:1\n", t)).collect();

    // Act
    send_raw(server.local_addr(), payload.as_bytes()).await;

    // Assert
    let snapshot = store.snapshot().await;
    for token in tokens {
        let owned = partitioner.partition(token) == 1;
        assert_eq!(snapshot.contains_key(token), owned, "token {}", token);
    }
    server.close().await;
}

#[tokio::test]
async fn test_closed_server_refuses_connections() {
    let (server, _store) = start_server(0, 1).await;
    let addr = server.local_addr();

    server.close().await;

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_all_to_all_shuffle_between_three_workers() {
    // Arrange
    let mut listeners = Vec::new();
    for _ in 0..3 {
        listeners.push(bind_listener("127.0.0.1:0").await.unwrap());
    }
    let registry = Arc::new(HostRegistry::from_endpoints(
        listeners
            .iter()
            .map(|l| ("127.0.0.1", l.local_addr().unwrap().port())),
    ));
    let partitioner = Partitioner::new(3).unwrap();
    let mut servers = Vec::new();
    let mut stores = Vec::new();
    for (index, listener) in listeners.into_iter().enumerate() {
        let store = InMemoryPartitionStore::new();
        servers.push(
            PeerShuffleServer::serve(
                listener,
                index,
                partitioner,
                store.clone(),
                CancellationToken::new(),
            )
            .unwrap(),
        );
        stores.push(store);
    }
    let local_counts: Vec<HashMap<String, u64>> = (0..3)
        .map(|worker| {
            ["apple", "banana", "cherry", "date", "elder", "fig"]
                .iter()
                .map(|t| (t.to_string(), worker as u64 + 1))
                .collect()
        })
        .collect();

    // Act
    for (worker, counts) in local_counts.into_iter().enumerate() {
        let sender = PeerShuffleSender::new(worker, registry.clone()).unwrap();
        let summary = sender.shuffle(counts, &stores[worker]).await;
        assert_eq!(summary.dropped, 0);
        assert_eq!(summary.kept_local + summary.sent, 6);
    }

    // Assert
    for (worker, store) in stores.iter().enumerate() {
        for (token, count) in store.snapshot().await {
            assert_eq!(partitioner.partition(&token), worker);
            assert_eq!(count, 1 + 2 + 3);
        }
    }
    let mut total = 0;
    for store in &stores {
        total += store.len().await;
    }
    assert_eq!(total, 6);
    for server in servers {
        server.close().await;
    }
}

#[tokio::test]
async fn test_unreachable_peer_drops_its_records() {
    // Arrange
    let listener = bind_listener("127.0.0.1:0").await.unwrap();
    let dead_port = listener.local_addr().unwrap().port();
    drop(listener);
    let registry = Arc::new(HostRegistry::from_endpoints(vec![
        ("127.0.0.1", 1),
        ("127.0.0.1", dead_port),
    ]));
    let partitioner = Partitioner::new(2).unwrap();
    let tokens = ["a", "b", "c", "d", "e", "f", "g", "h"];
    let remote = tokens
        .iter()
        .filter(|t| partitioner.partition(t) == 1)
        .count();
    let store = InMemoryPartitionStore::new();
    let sender = PeerShuffleSender::new(0, registry).unwrap();

    // Act
    let summary = sender
        .shuffle(tokens.iter().map(|t| (t.to_string(), 1)), &store)
        .await;

    // Assert
    assert_eq!(summary.dropped, remote);
    assert_eq!(summary.sent, 0);
    assert_eq!(summary.kept_local, tokens.len() - remote);
    assert_eq!(store.len().await, tokens.len() - remote);
}

#[tokio::test]
async fn test_long_record_does_not_end_connection() {
    let (server, store) = start_server(0, 1).await;
    let long_token = "z".repeat(100_000);

    send_raw(
        server.local_addr(),
        format!("before:1\n{}:2\nafter:3\n", long_token).as_bytes(),
    )
    .await;

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.get(&long_token), Some(&2));
    assert_eq!(snapshot.get("before"), Some(&1));
    assert_eq!(snapshot.get("after"), Some(&3));
    server.close().await;
}
