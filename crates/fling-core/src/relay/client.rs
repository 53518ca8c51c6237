//! HTTP client for a remote signaling relay.
//!
//! Speaks the wire shapes in [`super::wire`] against any server exposing
//! the relay API, the bundled one included. Error statuses map back onto
//! the domain: 404 is [`Error::RoomNotFound`], 400 is
//! [`Error::InvalidRoom`], anything else is a network failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::{Error, Result};
use crate::room::RoomCode;

use super::wire::{CreateRoomResponse, PublishRequest, PublishResponse};
use super::{RoomSignals, SignalRole, SignalingRelay};

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// [`SignalingRelay`] backed by a remote relay's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    http: Client,
    base_url: String,
}

impl HttpRelay {
    /// Create a client for the relay at `base_url`, for example
    /// `https://relay.example.com`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// The relay this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn rooms_url(&self) -> String {
        format!("{}/api/rooms", self.base_url)
    }

    fn room_url(&self, room: &RoomCode) -> String {
        format!("{}/api/rooms/{room}", self.base_url)
    }
}

async fn ensure_success(room: &RoomCode, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::NOT_FOUND => Err(Error::RoomNotFound(room.to_string())),
        StatusCode::BAD_REQUEST => Err(Error::InvalidRoom(room.to_string())),
        _ => {
            let detail = response.text().await.unwrap_or_default();
            Err(Error::Network(format!("relay returned {status}: {detail}")))
        }
    }
}

#[async_trait]
impl SignalingRelay for HttpRelay {
    async fn create_room(&self) -> Result<RoomCode> {
        let response = self
            .http
            .post(self.rooms_url())
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| Error::Network(format!("create room request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "relay returned {} creating a room",
                response.status()
            )));
        }

        let created: CreateRoomResponse = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("malformed create room response: {e}")))?;
        RoomCode::parse(&created.room_id)
    }

    async fn publish(&self, room: &RoomCode, role: SignalRole, description: &str) -> Result<()> {
        let request = PublishRequest {
            role,
            data: description.to_string(),
        };
        let response = self
            .http
            .post(self.room_url(room))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("publish request failed: {e}")))?;
        let response = ensure_success(room, response).await?;

        let ack: PublishResponse = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("malformed publish response: {e}")))?;
        if ack.ok {
            Ok(())
        } else {
            Err(Error::Network(
                "relay did not acknowledge the publish".to_string(),
            ))
        }
    }

    async fn poll(&self, room: &RoomCode) -> Result<RoomSignals> {
        let response = self
            .http
            .get(self.room_url(room))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| Error::Network(format!("poll request failed: {e}")))?;
        let response = ensure_success(room, response).await?;

        response
            .json()
            .await
            .map_err(|e| Error::Network(format!("malformed poll response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let relay = HttpRelay::new("http://relay.test/");
        assert_eq!(relay.base_url(), "http://relay.test");
        assert_eq!(relay.rooms_url(), "http://relay.test/api/rooms");
    }

    #[test]
    fn test_room_url_embeds_the_code() {
        let relay = HttpRelay::new("http://relay.test");
        let room = RoomCode::parse("AB12CD").unwrap();
        assert_eq!(relay.room_url(&room), "http://relay.test/api/rooms/AB12CD");
    }
}
