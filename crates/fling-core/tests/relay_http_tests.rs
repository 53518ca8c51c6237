//! HTTP relay round-trips exercising the server and client together.
//!
//! A real server binds an ephemeral localhost port; [`HttpRelay`] talks
//! to it over the wire exactly the way remote peers do.

#![cfg(all(feature = "web", feature = "client"))]

use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use fling_core::config::RelayConfig;
use fling_core::relay::client::HttpRelay;
use fling_core::relay::{SignalRole, SignalingRelay, SignalingService};
use fling_core::room::RoomCode;
use fling_core::session::{AnswerSession, OfferSession, SessionConfig};
use fling_core::store::MemoryStore;
use fling_core::transfer::FileMeta;
use fling_core::transport::memory::memory_pair;
use fling_core::web::RelayServer;
use fling_core::Error;

type StopHandle = (tokio::sync::oneshot::Sender<()>, tokio::task::JoinHandle<()>);

async fn spawn_relay() -> (String, StopHandle) {
    let config = RelayConfig {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        ..RelayConfig::default()
    };
    let service = Arc::new(SignalingService::new(MemoryStore::new()));
    let bound = RelayServer::new(config, service).bind().await.expect("bind");
    let base = format!("http://{}", bound.local_addr());

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        bound
            .serve(async {
                let _ = stop_rx.await;
            })
            .await
            .expect("serve");
    });
    (base, (stop_tx, handle))
}

async fn stop_relay((stop, handle): StopHandle) {
    let _ = stop.send(());
    handle.await.expect("server task");
}

/// The HTTP client drives create, publish, and poll against a live server.
#[tokio::test]
async fn test_http_relay_roundtrip() {
    let (base, stopper) = spawn_relay().await;
    let relay = HttpRelay::new(base);

    let room = relay.create_room().await.expect("create");
    relay
        .publish(&room, SignalRole::Offer, "sdp-offer")
        .await
        .expect("publish offer");

    let signals = relay.poll(&room).await.expect("poll");
    assert_eq!(signals.offer.as_deref(), Some("sdp-offer"));
    assert!(signals.answer.is_none());

    relay
        .publish(&room, SignalRole::Answer, "sdp-answer")
        .await
        .expect("publish answer");
    let signals = relay.poll(&room).await.expect("poll");
    assert_eq!(signals.offer.as_deref(), Some("sdp-offer"));
    assert_eq!(signals.answer.as_deref(), Some("sdp-answer"));

    stop_relay(stopper).await;
}

/// Error statuses map back onto domain errors.
#[tokio::test]
async fn test_http_relay_maps_error_statuses() {
    let (base, stopper) = spawn_relay().await;
    let relay = HttpRelay::new(base);

    let absent = RoomCode::parse("ZZZZ99").expect("code");
    let err = relay.poll(&absent).await.expect_err("absent room");
    assert!(matches!(err, Error::RoomNotFound(_)));

    let err = relay
        .publish(&absent, SignalRole::Offer, "sdp")
        .await
        .expect_err("absent room");
    assert!(matches!(err, Error::RoomNotFound(_)));

    stop_relay(stopper).await;
}

/// Full bootstrap across the HTTP relay with the in-process transport.
#[tokio::test]
async fn test_sessions_bootstrap_over_http_relay() {
    let (base, stopper) = spawn_relay().await;
    let (left, right) = memory_pair();
    let quick = SessionConfig {
        poll_interval: Duration::from_millis(10),
        ..SessionConfig::default()
    };

    let mut offer = OfferSession::with_config(HttpRelay::new(base.clone()), left, quick.clone());
    let room = offer.open().await.expect("open");

    let mut answer = AnswerSession::with_config(room.as_str(), HttpRelay::new(base), right, quick)
        .expect("join");

    let (offer_connected, answer_connected) = tokio::join!(offer.connect(), answer.connect());
    offer_connected.expect("offer connect");
    answer_connected.expect("answer connect");

    let payload = b"over the wire".to_vec();
    let meta = FileMeta {
        name: "wire.txt".to_string(),
        size: payload.len() as u64,
        mime: "text/plain".to_string(),
    };
    let (sent, received) = tokio::join!(
        offer.send_reader(Cursor::new(payload.clone()), meta),
        answer.receive()
    );
    sent.expect("send");
    let file = received.expect("receive");
    assert_eq!(file.contents.as_deref(), Some(payload.as_slice()));

    stop_relay(stopper).await;
}
