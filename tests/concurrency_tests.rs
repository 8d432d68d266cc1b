//! Concurrent writers: unique generated ids and serialized overwrites.

mod common;

use axum::http::StatusCode;
use common::{TestServer, server::body_string};
use std::{collections::HashSet, sync::Arc};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pastes_get_distinct_ids() {
    let server = Arc::new(TestServer::new().await);

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let server = server.clone();
            tokio::spawn(async move {
                let text = format!("paste number {}", i);
                let id = server.paste(&text).await;
                (id, text)
            })
        })
        .collect();

    let mut ids = HashSet::new();
    let mut stored = Vec::new();
    for handle in handles {
        let (id, text) = handle.await.unwrap();
        assert!(ids.insert(id.clone()), "duplicate id {id}");
        stored.push((id, text));
    }

    for (id, text) in stored {
        let response = server.get(&format!("/{}", id)).await;
        assert_eq!(body_string(response).await, text);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overwrites_leave_one_complete_file() {
    let server = Arc::new(TestServer::new().await);

    let bodies: Vec<String> = (0..10).map(|i| format!("{i}").repeat(100)).collect();
    let handles: Vec<_> = bodies
        .iter()
        .cloned()
        .map(|body| {
            let server = server.clone();
            tokio::spawn(async move { server.put("shared.txt", body).await.status() })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::CREATED);
    }

    let response = server.get("/shared.txt").await;
    let served = body_string(response).await;
    assert!(bodies.contains(&served), "torn read: {served}");
    assert_eq!(server.blob_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reads_during_overwrites_see_whole_versions() {
    let server = Arc::new(TestServer::new().await);
    let first = "a".repeat(512);
    let second = "b".repeat(512);
    server.put("doc.txt", first.clone()).await;

    let writer = {
        let server = server.clone();
        let (first, second) = (first.clone(), second.clone());
        tokio::spawn(async move {
            for i in 0..20 {
                let body = if i % 2 == 0 { second.clone() } else { first.clone() };
                assert_eq!(server.put("doc.txt", body).await.status(), StatusCode::CREATED);
            }
        })
    };

    for _ in 0..20 {
        let response = server.get("/doc.txt").await;
        assert_eq!(response.status(), StatusCode::OK);
        let served = body_string(response).await;
        assert!(served == first || served == second, "torn read: {served}");
    }

    writer.await.unwrap();
}
