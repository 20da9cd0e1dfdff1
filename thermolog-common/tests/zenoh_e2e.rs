//! End-to-end tests with Zenoh pub/sub.
//!
//! These tests verify that sensor payloads survive a trip through Zenoh.
//!
//! Note: Zenoh requires multi-thread tokio runtime.
//! Each test uses a unique key prefix to avoid interference.

use std::time::Duration;
use thermolog_common::{NewReading, ZenohConfig, connect};

/// Generate a unique test prefix to avoid test interference.
fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}", nanos)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zenoh_pubsub_reading() {
    let topic = format!("{}/dht22", unique_prefix());

    let session = connect(&ZenohConfig::default())
        .await
        .expect("Failed to open Zenoh session");

    let subscriber = session
        .declare_subscriber(&topic)
        .await
        .expect("Failed to create subscriber");

    // Give subscriber time to set up
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reading = NewReading {
        temperature: Some(23.5),
        humidity: Some(41.0),
        heat_index: None,
        timestamp: Some(1_700_000_000),
    };

    session
        .put(&topic, reading.to_payload().expect("Failed to encode"))
        .await
        .expect("Failed to publish");

    let received = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for message")
        .expect("Failed to receive message");

    let payload = received.payload().to_bytes();
    let decoded = NewReading::decode(&payload).expect("Failed to decode");

    assert_eq!(decoded, reading);
    assert_eq!(decoded.heat_index, None);

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zenoh_preserves_publish_order() {
    let topic = format!("{}/dht22", unique_prefix());

    let session = connect(&ZenohConfig::default())
        .await
        .expect("Failed to open Zenoh session");

    let subscriber = session
        .declare_subscriber(&topic)
        .await
        .expect("Failed to create subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    for ts in 0..5 {
        let reading = NewReading {
            timestamp: Some(ts),
            ..Default::default()
        };
        session
            .put(&topic, reading.to_payload().unwrap())
            .await
            .unwrap();
    }

    let mut timestamps = Vec::new();
    for _ in 0..5 {
        let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
            .await
            .expect("Timeout")
            .expect("Failed to receive");
        let decoded = NewReading::decode(&sample.payload().to_bytes()).unwrap();
        timestamps.push(decoded.timestamp.unwrap());
    }

    assert_eq!(timestamps, vec![0, 1, 2, 3, 4]);

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}
