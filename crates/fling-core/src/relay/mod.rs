//! Room signaling over a key-value store.
//!
//! The relay never interprets session descriptions; it parks them under
//! per-room keys so two peers can find each other. Each room `R` owns
//! three keys, all sharing one TTL window:
//!
//! | Key              | Value                          |
//! |------------------|--------------------------------|
//! | `room:R:exists`  | liveness marker                |
//! | `room:R:offer`   | offerer's session description  |
//! | `room:R:answer`  | answerer's session description |
//!
//! Earlier deployments stored one combined JSON record under `room:R`;
//! [`SignalingService::poll`] still reads that shape when the dedicated
//! keys are empty.

#[cfg(feature = "client")]
pub mod client;
pub mod wire;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::room::RoomCode;
use crate::store::KvStore;
use crate::DEFAULT_ROOM_TTL_SECS;

/// How long every room key lives after its latest write.
pub const ROOM_TTL: Duration = Duration::from_secs(DEFAULT_ROOM_TTL_SECS);

/// Candidate codes drawn before a collision is accepted anyway.
pub const MAX_CREATE_ATTEMPTS: u32 = 5;

/// Which side of the exchange a published description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalRole {
    /// The peer that opened the room and sends the file.
    Offer,
    /// The peer that joined with the code and receives the file.
    Answer,
}

impl SignalRole {
    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        }
    }
}

impl std::fmt::Display for SignalRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the descriptions published to a room so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSignals {
    /// Offerer's session description, if published.
    pub offer: Option<String>,
    /// Answerer's session description, if published.
    pub answer: Option<String>,
}

/// Combined room record written by earlier deployments.
#[derive(Debug, Default, Deserialize)]
struct LegacyRecord {
    #[serde(default)]
    offer: Option<String>,
    #[serde(default)]
    answer: Option<String>,
}

/// The three rendezvous operations the bootstrap flow needs.
///
/// Sessions are generic over this trait, so they run identically against
/// an in-process [`SignalingService`] or the HTTP client in [`client`].
#[async_trait]
pub trait SignalingRelay: Send + Sync {
    /// Open a fresh room and return its code.
    async fn create_room(&self) -> Result<RoomCode>;

    /// Publish a session description under the given role.
    async fn publish(&self, room: &RoomCode, role: SignalRole, description: &str) -> Result<()>;

    /// Fetch whatever descriptions the room currently holds.
    async fn poll(&self, room: &RoomCode) -> Result<RoomSignals>;
}

fn exists_key(room: &RoomCode) -> String {
    format!("room:{room}:exists")
}

fn role_key(room: &RoomCode, role: SignalRole) -> String {
    format!("room:{room}:{role}")
}

fn legacy_key(room: &RoomCode) -> String {
    format!("room:{room}")
}

/// Signaling operations over a [`KvStore`] backend.
#[derive(Debug, Clone)]
pub struct SignalingService<S> {
    store: S,
    ttl: Duration,
}

impl<S: KvStore> SignalingService<S> {
    /// Create a service with the default room TTL.
    pub fn new(store: S) -> Self {
        Self::with_ttl(store, ROOM_TTL)
    }

    /// Create a service with a custom room TTL.
    pub fn with_ttl(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Open a room using the given code source.
    ///
    /// Draws up to [`MAX_CREATE_ATTEMPTS`] candidates, keeping the first
    /// one without a live room behind it. If every draw collides the last
    /// candidate is claimed anyway; with 34^6 codes that means the store
    /// is effectively full and refusing service helps nobody.
    pub async fn create_room_with<F>(&self, mut generate: F) -> Result<RoomCode>
    where
        F: FnMut() -> RoomCode + Send,
    {
        let mut code = generate();
        for attempt in 1..MAX_CREATE_ATTEMPTS {
            if self.store.get(&exists_key(&code)).await?.is_none() {
                break;
            }
            tracing::debug!(attempt, room = %code, "room code collision, drawing again");
            code = generate();
        }

        self.store.set(&exists_key(&code), "1", self.ttl).await?;
        tracing::info!(room = %code, "room created");
        Ok(code)
    }
}

#[async_trait]
impl<S: KvStore> SignalingRelay for SignalingService<S> {
    async fn create_room(&self) -> Result<RoomCode> {
        self.create_room_with(RoomCode::generate).await
    }

    async fn publish(&self, room: &RoomCode, role: SignalRole, description: &str) -> Result<()> {
        let exists = exists_key(room);
        if self.store.get(&exists).await?.is_none() {
            return Err(Error::RoomNotFound(room.to_string()));
        }

        self.store
            .set(&role_key(room, role), description, self.ttl)
            .await?;
        // An active room slides its whole expiry window forward.
        self.store.set(&exists, "1", self.ttl).await?;

        tracing::debug!(room = %room, role = %role, "description published");
        Ok(())
    }

    async fn poll(&self, room: &RoomCode) -> Result<RoomSignals> {
        if self.store.get(&exists_key(room)).await?.is_none() {
            return Err(Error::RoomNotFound(room.to_string()));
        }

        let offer = self.store.get(&role_key(room, SignalRole::Offer)).await?;
        let answer = self.store.get(&role_key(room, SignalRole::Answer)).await?;

        if offer.is_none() && answer.is_none() {
            if let Some(raw) = self.store.get(&legacy_key(room)).await? {
                match serde_json::from_str::<LegacyRecord>(&raw) {
                    Ok(record) => {
                        return Ok(RoomSignals {
                            offer: record.offer,
                            answer: record.answer,
                        });
                    }
                    // Unreadable legacy records count as empty, not broken.
                    Err(err) => {
                        tracing::debug!(room = %room, %err, "ignoring unreadable legacy record");
                    }
                }
            }
        }

        Ok(RoomSignals { offer, answer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> SignalingService<MemoryStore> {
        SignalingService::new(MemoryStore::new())
    }

    fn fixed(code: &str) -> RoomCode {
        RoomCode::parse(code).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_poll_empty() {
        let relay = service();
        let room = relay.create_room().await.unwrap();

        let signals = relay.poll(&room).await.unwrap();
        assert_eq!(signals, RoomSignals::default());
    }

    #[tokio::test]
    async fn test_publish_poll_roundtrip() {
        let relay = service();
        let room = relay.create_room().await.unwrap();

        relay
            .publish(&room, SignalRole::Offer, "v=0 offer-sdp")
            .await
            .unwrap();
        relay
            .publish(&room, SignalRole::Answer, "v=0 answer-sdp")
            .await
            .unwrap();

        let signals = relay.poll(&room).await.unwrap();
        assert_eq!(signals.offer.as_deref(), Some("v=0 offer-sdp"));
        assert_eq!(signals.answer.as_deref(), Some("v=0 answer-sdp"));
    }

    #[tokio::test]
    async fn test_publish_to_unknown_room_fails() {
        let relay = service();
        let room = fixed("7XK2QF");

        let err = relay
            .publish(&room, SignalRole::Offer, "sdp")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn test_poll_unknown_room_fails() {
        let relay = service();
        let err = relay.poll(&fixed("7XK2QF")).await.unwrap_err();
        assert!(matches!(err, Error::RoomNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_expires_after_ttl() {
        let relay = service();
        let room = relay.create_room().await.unwrap();

        tokio::time::advance(ROOM_TTL + Duration::from_secs(1)).await;

        let err = relay.poll(&room).await.unwrap_err();
        assert!(err.is_expiry());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_slides_expiry_window() {
        let relay = service();
        let room = relay.create_room().await.unwrap();

        tokio::time::advance(Duration::from_secs(200)).await;
        relay
            .publish(&room, SignalRole::Offer, "sdp")
            .await
            .unwrap();

        // Past the original deadline but inside the refreshed window.
        tokio::time::advance(Duration::from_secs(250)).await;
        let signals = relay.poll(&room).await.unwrap();
        assert_eq!(signals.offer.as_deref(), Some("sdp"));
    }

    #[tokio::test]
    async fn test_legacy_record_fallback() {
        let store = MemoryStore::new();
        let relay = SignalingService::new(store.clone());
        let room = fixed("7XK2QF");

        store.set(&exists_key(&room), "1", ROOM_TTL).await.unwrap();
        store
            .set(
                &legacy_key(&room),
                r#"{"offer":"legacy-offer","answer":"legacy-answer"}"#,
                ROOM_TTL,
            )
            .await
            .unwrap();

        let signals = relay.poll(&room).await.unwrap();
        assert_eq!(signals.offer.as_deref(), Some("legacy-offer"));
        assert_eq!(signals.answer.as_deref(), Some("legacy-answer"));
    }

    #[tokio::test]
    async fn test_unreadable_legacy_record_reads_as_empty() {
        let store = MemoryStore::new();
        let relay = SignalingService::new(store.clone());
        let room = fixed("7XK2QF");

        store.set(&exists_key(&room), "1", ROOM_TTL).await.unwrap();
        store
            .set(&legacy_key(&room), "{not json", ROOM_TTL)
            .await
            .unwrap();

        let signals = relay.poll(&room).await.unwrap();
        assert_eq!(signals, RoomSignals::default());
    }

    #[tokio::test]
    async fn test_dedicated_keys_shadow_legacy_record() {
        let store = MemoryStore::new();
        let relay = SignalingService::new(store.clone());
        let room = fixed("7XK2QF");

        store.set(&exists_key(&room), "1", ROOM_TTL).await.unwrap();
        store
            .set(&legacy_key(&room), r#"{"offer":"stale"}"#, ROOM_TTL)
            .await
            .unwrap();
        relay
            .publish(&room, SignalRole::Offer, "current")
            .await
            .unwrap();

        let signals = relay.poll(&room).await.unwrap();
        assert_eq!(signals.offer.as_deref(), Some("current"));
        assert_eq!(signals.answer, None);
    }

    #[tokio::test]
    async fn test_create_retries_on_collision() {
        let relay = service();
        let taken = [fixed("AAAAAA"), fixed("BBBBBB"), fixed("CCCCCC")];
        for code in &taken {
            relay
                .create_room_with(|| code.clone())
                .await
                .unwrap();
        }

        let mut draws = taken.iter().cloned().chain([fixed("DDDDDD")]);
        let room = relay
            .create_room_with(|| draws.next().unwrap())
            .await
            .unwrap();

        assert_eq!(room, fixed("DDDDDD"));
    }

    #[tokio::test]
    async fn test_create_accepts_code_after_exhausted_retries() {
        let relay = service();
        let stuck = fixed("AAAAAA");
        relay.create_room_with(|| stuck.clone()).await.unwrap();

        let mut calls = 0u32;
        let room = relay
            .create_room_with(|| {
                calls += 1;
                stuck.clone()
            })
            .await
            .unwrap();

        assert_eq!(room, stuck);
        assert_eq!(calls, MAX_CREATE_ATTEMPTS);
    }
}
