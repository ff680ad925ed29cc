//! Relay behaviour over real loopback sockets.

use dnspilot::config::{GroupConfig, RelayConfig};
use dnspilot::events::{EventBus, StatusEvent};
use dnspilot::relay::RelayEngine;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Spawn an upstream on `ip:port` answering every query with `prefix` + query.
async fn answering_upstream(ip: &str, port: u16, prefix: &'static [u8]) -> SocketAddr {
    let socket = UdpSocket::bind((ip, port)).await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        while let Ok((len, from)) = socket.recv_from(&mut buf).await {
            let mut reply = prefix.to_vec();
            reply.extend_from_slice(&buf[..len]);
            let _ = socket.send_to(&reply, from).await;
        }
    });
    addr
}

fn relay_config(upstream_port: u16, fallback: Vec<IpAddr>) -> RelayConfig {
    RelayConfig {
        bind_addr: "127.0.0.1".parse().unwrap(),
        ports: vec![0],
        upstream_port,
        forward_timeout_ms: 200,
        fallback,
        restart_settle_ms: 10,
        join_timeout_ms: 200,
        ..RelayConfig::default()
    }
}

fn groups(name: &str, servers: &[&str]) -> GroupConfig {
    let mut groups = BTreeMap::new();
    groups.insert(
        name.to_string(),
        servers.iter().map(|s| s.parse().unwrap()).collect(),
    );
    GroupConfig {
        groups,
        ..GroupConfig::default()
    }
}

async fn ask(relay: SocketAddr, query: &[u8]) -> Option<Vec<u8>> {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(query, relay).await.unwrap();
    let mut buf = [0u8; 512];
    let (len, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .ok()?
        .ok()?;
    assert_eq!(from, relay);
    Some(buf[..len].to_vec())
}

#[tokio::test]
async fn test_reply_from_second_resolver_reaches_client() {
    let answering = answering_upstream("127.0.0.2", 0, b"second:").await;
    let port = answering.port();
    // Same port on another loopback address, never answers
    let _silent = UdpSocket::bind(("127.0.0.1", port)).await.unwrap();

    let relay = RelayEngine::new(
        relay_config(port, vec![]),
        groups("T", &["127.0.0.1", "127.0.0.2"]),
        EventBus::new(),
    );
    let addr = relay.start("T").await.unwrap();

    let reply = ask(addr, b"\x12\x34query").await.unwrap();
    assert_eq!(reply, b"second:\x12\x34query".to_vec());

    let stats = relay.stats();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.forwarded, 1);
    assert_eq!(stats.fallback, 0);
    relay.stop().await;
}

#[tokio::test]
async fn test_fallback_list_answers_when_group_fails() {
    let fallback = answering_upstream("127.0.0.3", 0, b"fallback:").await;
    let port = fallback.port();
    let _silent = UdpSocket::bind(("127.0.0.1", port)).await.unwrap();

    let relay = RelayEngine::new(
        relay_config(port, vec!["127.0.0.3".parse().unwrap()]),
        groups("T", &["127.0.0.1"]),
        EventBus::new(),
    );
    let addr = relay.start("T").await.unwrap();

    let reply = ask(addr, b"q").await.unwrap();
    assert_eq!(reply, b"fallback:q".to_vec());
    assert_eq!(relay.stats().fallback, 1);
    relay.stop().await;
}

#[tokio::test]
async fn test_unanswered_query_gets_no_reply() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = silent.local_addr().unwrap().port();

    let relay = RelayEngine::new(
        relay_config(port, vec![]),
        groups("T", &["127.0.0.1"]),
        EventBus::new(),
    );
    let addr = relay.start("T").await.unwrap();

    assert!(ask(addr, b"q").await.is_none());
    assert_eq!(relay.stats().failed, 1);
    relay.stop().await;
}

#[tokio::test]
async fn test_concurrent_clients_get_their_own_replies() {
    let upstream = answering_upstream("127.0.0.1", 0, b"").await;

    let relay = RelayEngine::new(
        relay_config(upstream.port(), vec![]),
        groups("T", &["127.0.0.1"]),
        EventBus::new(),
    );
    let addr = relay.start("T").await.unwrap();

    let mut tasks = Vec::new();
    for i in 0u8..8 {
        tasks.push(tokio::spawn(async move {
            let query = vec![i, i, b'q'];
            (query.clone(), ask(addr, &query).await)
        }));
    }
    for task in tasks {
        let (query, reply) = task.await.unwrap();
        assert_eq!(reply, Some(query));
    }
    relay.stop().await;
}

#[tokio::test]
async fn test_soft_restart_moves_to_new_group() {
    let a = answering_upstream("127.0.0.4", 0, b"A:").await;
    let port = a.port();
    answering_upstream("127.0.0.5", port, b"B:").await;

    let mut config = groups("A", &["127.0.0.4"]);
    config.groups.insert("B".to_string(), vec!["127.0.0.5".parse().unwrap()]);

    let events = EventBus::new();
    let mut rx = events.subscribe();
    let relay = RelayEngine::new(relay_config(port, vec![]), config, events);

    let addr = relay.start("A").await.unwrap();
    assert_eq!(ask(addr, b"x").await.unwrap(), b"A:x".to_vec());

    relay.soft_restart(Some("B")).await.unwrap();
    let addr = relay.local_addr().unwrap();
    assert_eq!(ask(addr, b"x").await.unwrap(), b"B:x".to_vec());

    relay.stop().await;
    assert!(relay.local_addr().is_none());

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    assert!(matches!(&seen[0], StatusEvent::Active { group, .. } if group == "A"));
    assert!(matches!(&seen[1], StatusEvent::Active { group, .. } if group == "B"));
    assert_eq!(seen[2], StatusEvent::Stopped);
}

#[tokio::test]
async fn test_stop_is_safe_during_restart() {
    let relay = RelayEngine::new(
        RelayConfig {
            restart_settle_ms: 200,
            ..relay_config(53, vec![])
        },
        GroupConfig::default(),
        EventBus::new(),
    );
    relay.start("A").await.unwrap();

    let restarting = Arc::clone(&relay);
    let restart = tokio::spawn(async move { restarting.soft_restart(None).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    relay.stop().await;

    restart.await.unwrap().unwrap();
    assert!(!relay.is_running());
    assert!(relay.local_addr().is_none());
}
