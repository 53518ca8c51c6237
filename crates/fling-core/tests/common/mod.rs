//! Common test utilities for Fling integration tests.
//!
//! This module provides shared functionality for integration tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use fling_core::relay::{RoomSignals, SignalRole, SignalingRelay, SignalingService};
use fling_core::room::RoomCode;
use fling_core::store::MemoryStore;
use fling_core::Result;

/// Create a temporary directory for test files.
///
/// The directory is cleaned up when the returned `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// In-memory relay that mints a predetermined room code, so tests can
/// assert on exact codes instead of random draws.
#[derive(Clone)]
pub struct ScriptedRelay {
    inner: SignalingService<MemoryStore>,
    code: RoomCode,
}

impl ScriptedRelay {
    pub fn new(code: &str) -> Self {
        Self {
            inner: SignalingService::new(MemoryStore::new()),
            code: RoomCode::parse(code).expect("scripted code must be valid"),
        }
    }
}

#[async_trait]
impl SignalingRelay for ScriptedRelay {
    async fn create_room(&self) -> Result<RoomCode> {
        self.inner.create_room_with(|| self.code.clone()).await
    }

    async fn publish(&self, room: &RoomCode, role: SignalRole, description: &str) -> Result<()> {
        self.inner.publish(room, role, description).await
    }

    async fn poll(&self, room: &RoomCode) -> Result<RoomSignals> {
        self.inner.poll(room).await
    }
}
