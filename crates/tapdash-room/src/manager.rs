//! Room registry: creates, tracks, and sweeps rooms by code.

use std::collections::HashMap;

use rand::Rng;
use tapdash_protocol::{PlayerId, ROOM_CODE_LEN, RoomCode};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::room::spawn_room;
use crate::{PlayerSender, RoomConfig, RoomError, RoomHandle};

/// Characters room codes are drawn from.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Maps room codes to running room actors.
///
/// This is the entry point for room operations from the gateway. Shared
/// behind a `tokio::sync::Mutex`; hold the lock only to look up or insert
/// handles, never across a call into a room.
pub struct RoomRegistry {
    rooms: HashMap<RoomCode, RoomHandle>,
    config: RoomConfig,
}

impl RoomRegistry {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            rooms: HashMap::new(),
            config: config.validated(),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Creates a room under a fresh code and spawns its actor.
    ///
    /// `host_sender` receives every event the room emits.
    pub fn create_room(
        &mut self,
        host_id: PlayerId,
        host_sender: PlayerSender,
    ) -> RoomHandle {
        let code = self.unused_code();
        let handle =
            spawn_room(code.clone(), host_id, host_sender, self.config.clone());
        self.rooms.insert(code.clone(), handle.clone());
        tracing::info!(room_code = %code, %host_id, rooms = self.rooms.len(), "room created");
        handle
    }

    /// Finds a live room.
    ///
    /// # Errors
    /// [`RoomError::NotFound`] if the code is unknown or its actor has
    /// already stopped.
    pub fn lookup(&self, code: &RoomCode) -> Result<RoomHandle, RoomError> {
        self.rooms
            .get(code)
            .filter(|handle| !handle.is_closed())
            .cloned()
            .ok_or_else(|| RoomError::NotFound(code.clone()))
    }

    /// Removes a room and tells its actor to stop.
    pub async fn delete_room(&mut self, code: &RoomCode) -> Result<(), RoomError> {
        let handle = self
            .rooms
            .remove(code)
            .ok_or_else(|| RoomError::NotFound(code.clone()))?;
        // The actor may already be gone; either way it is unreachable now.
        let _ = handle.shutdown().await;
        tracing::info!(room_code = %code, "room deleted");
        Ok(())
    }

    /// Returns cloned handles to all rooms.
    ///
    /// Useful when callers need to perform async operations on rooms
    /// without holding the registry lock.
    pub fn handles(&self) -> Vec<RoomHandle> {
        self.rooms.values().cloned().collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_codes(&self) -> Vec<RoomCode> {
        self.rooms.keys().cloned().collect()
    }

    /// Asks every room whether it should go, then deletes the ones that
    /// said yes or no longer answer.
    ///
    /// Handles are snapshotted first so the lock is not held while rooms
    /// are queried.
    pub async fn sweep(registry: &Mutex<Self>, now: Instant) -> Vec<RoomCode> {
        let handles = registry.lock().await.handles();

        let mut doomed = Vec::new();
        for handle in handles {
            match handle.sweep(now).await {
                Ok(false) => {}
                Ok(true) | Err(_) => doomed.push(handle.room_code().clone()),
            }
        }

        if !doomed.is_empty() {
            let mut registry = registry.lock().await;
            for code in &doomed {
                if registry.rooms.remove(code).is_some() {
                    tracing::info!(room_code = %code, "room swept");
                }
            }
            tracing::info!(
                swept = doomed.len(),
                remaining = registry.rooms.len(),
                "room sweep complete"
            );
        }
        doomed
    }

    /// Shuts down every room. Used on server shutdown.
    pub async fn shutdown_all(&mut self) {
        for (code, handle) in self.rooms.drain() {
            if handle.shutdown().await.is_err() {
                tracing::debug!(room_code = %code, "room already stopped");
            }
        }
    }

    fn unused_code(&self) -> RoomCode {
        let mut rng = rand::rng();
        loop {
            let raw: String = (0..ROOM_CODE_LEN)
                .map(|_| {
                    char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())])
                })
                .collect();
            let Ok(code) = RoomCode::parse(&raw) else {
                continue;
            };
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}
