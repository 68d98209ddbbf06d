// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests: a real proxy on loopback TCP, driven through
//! `ProxyClient` against the in-process driver backend.

mod common;

use std::time::Duration;

use cqlrelay_core::driver::DriverError;
use cqlrelay_protocol::client::ProxyClient;
use cqlrelay_protocol::order::{Consistency, Order, OrderKind};

use common::start_proxy;

#[tokio::test]
async fn insert_with_parameters_round_trips() {
    let proxy = start_proxy().await;
    let client = ProxyClient::connect_to(proxy.runtime.client_addr());

    let order = Order {
        kind: OrderKind::Success,
        cql: "INSERT INTO pages (key, column1, value) VALUES (?, ?, ?)".to_string(),
        consistency: Consistency::Quorum,
        parameters: vec![b"page-1".to_vec(), b"title".to_vec()],
        ..Order::default()
    };
    let result = client.send_order(&order).await.unwrap();
    assert!(result.succeeded);
    assert!(result.blobs.is_empty());

    let applied = proxy.cluster.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].cql, order.cql);
    assert_eq!(applied[0].parameters, order.parameters);

    proxy.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn cursor_declare_fetch_close_over_the_wire() {
    let proxy = start_proxy().await;
    proxy.cluster.set_pages(
        "SELECT value FROM pages",
        vec![
            vec![vec![b"r0".to_vec()], vec![b"r1".to_vec()]],
            vec![vec![b"r2".to_vec()]],
        ],
    );
    let client = ProxyClient::connect_to(proxy.runtime.client_addr());

    // Declare returns a non-negative cursor handle plus buffered rows.
    let declare = Order {
        kind: OrderKind::Declare,
        cql: "SELECT value FROM pages".to_string(),
        paging_size: Some(10),
        ..Order::default()
    };
    let result = client.send_order(&declare).await.unwrap();
    assert!(result.succeeded);
    let cursor = result.handle_at(0).expect("cursor handle") as u16;
    assert_eq!(result.blobs.len(), 3);

    // Fetch returns further rows, then an empty set marking exhaustion.
    let fetch = Order {
        kind: OrderKind::Fetch,
        cursor_index: Some(cursor),
        ..Order::default()
    };
    let result = client.send_order(&fetch).await.unwrap();
    assert_eq!(result.blobs, vec![b"r2".to_vec()]);
    let result = client.send_order(&fetch).await.unwrap();
    assert!(result.succeeded);
    assert!(result.blobs.is_empty());

    // Close succeeds once, then the handle is dead.
    let close = Order {
        kind: OrderKind::Close,
        cursor_index: Some(cursor),
        ..Order::default()
    };
    assert!(client.send_order(&close).await.unwrap().succeeded);
    let result = client.send_order(&close).await.unwrap();
    assert!(!result.succeeded);

    proxy.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn batch_lifecycle_over_the_wire() {
    let proxy = start_proxy().await;
    let client = ProxyClient::connect_to(proxy.runtime.client_addr());

    let result = client
        .send_order(&Order::new(OrderKind::BatchDeclare, ""))
        .await
        .unwrap();
    let batch = result.handle_at(0).unwrap() as u16;

    for i in 0..4 {
        let add = Order {
            kind: OrderKind::BatchAdd,
            cql: format!("INSERT INTO queue (key) VALUES ({i})"),
            batch_index: Some(batch),
            ..Order::default()
        };
        assert!(client.send_order(&add).await.unwrap().succeeded);
    }
    assert!(proxy.cluster.applied().is_empty());

    let commit = Order {
        kind: OrderKind::BatchCommit,
        batch_index: Some(batch),
        ..Order::default()
    };
    assert!(client.send_order(&commit).await.unwrap().succeeded);
    assert_eq!(proxy.cluster.applied().len(), 4);

    proxy.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn cursors_are_connection_local() {
    let proxy = start_proxy().await;
    let first = ProxyClient::connect_to(proxy.runtime.client_addr());
    let second = ProxyClient::connect_to(proxy.runtime.client_addr());

    let declare = Order::new(OrderKind::Declare, "SELECT value FROM pages");
    let a = first.send_order(&declare).await.unwrap();
    let b = second.send_order(&declare).await.unwrap();
    // Each connection has its own handle table, both start at zero.
    assert_eq!(a.handle_at(0), Some(0));
    assert_eq!(b.handle_at(0), Some(0));

    // Closing on one connection does not touch the other.
    let close = Order {
        kind: OrderKind::Close,
        cursor_index: Some(0),
        ..Order::default()
    };
    assert!(first.send_order(&close).await.unwrap().succeeded);
    assert!(second.send_order(&close).await.unwrap().succeeded);

    proxy.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn session_loss_closes_connection_and_recovers() {
    let proxy = start_proxy().await;
    let client = ProxyClient::connect_to(proxy.runtime.client_addr());

    // Warm the connection.
    client
        .send_order(&Order::new(OrderKind::Success, "INSERT 1"))
        .await
        .unwrap();

    // The shared session dies mid-statement: the connection drops with
    // no structured error.
    proxy
        .cluster
        .fail_next_statement(DriverError::NoHostsAvailable("cluster down".to_string()));
    let err = client
        .send_order(&Order::new(OrderKind::Success, "INSERT 2"))
        .await;
    assert!(err.is_err());

    // The reconnection machine establishes a new session generation.
    let mut session_rx = proxy.runtime.state().session_rx.clone();
    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let generation = session_rx.borrow().as_ref().map(|s| s.generation);
            if generation >= Some(2) {
                break;
            }
            session_rx.changed().await.unwrap();
        }
    });
    deadline.await.expect("reconnect within deadline");

    // The client reconnects and is served again.
    let result = client
        .send_order(&Order::new(OrderKind::Success, "INSERT 3"))
        .await
        .unwrap();
    assert!(result.succeeded);

    proxy.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn describe_is_cached_across_connections_until_ddl() {
    let proxy = start_proxy().await;
    proxy.cluster.set_schema(b"description-blob".to_vec());

    let first = ProxyClient::connect_to(proxy.runtime.client_addr());
    let second = ProxyClient::connect_to(proxy.runtime.client_addr());
    let describe = Order::new(OrderKind::Describe, "");

    let result = first.send_order(&describe).await.unwrap();
    assert_eq!(result.blobs, vec![b"description-blob".to_vec()]);
    second.send_order(&describe).await.unwrap();
    assert_eq!(proxy.cluster.schema_loads(), 1, "cache shared process-wide");

    // DDL through one connection invalidates for everyone.
    let ddl = Order {
        kind: OrderKind::Success,
        cql: "CREATE TABLE extra (key BLOB PRIMARY KEY)".to_string(),
        clear_cluster_description: true,
        ..Order::default()
    };
    first.send_order(&ddl).await.unwrap();
    second.send_order(&describe).await.unwrap();
    assert_eq!(proxy.cluster.schema_loads(), 2);

    proxy.runtime.shutdown().await.unwrap();
}
