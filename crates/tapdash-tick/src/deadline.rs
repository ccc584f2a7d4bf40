//! One-shot cancellable timer.

use tokio::time::{self, Instant};

/// A single pending timeout that yields a payload when it fires.
///
/// The payload is usually the race epoch the deadline was armed for, so
/// the owner can tell a current deadline from a stale one.
#[derive(Debug)]
pub struct Deadline<T> {
    armed: Option<(Instant, T)>,
}

impl<T> Deadline<T> {
    /// A deadline with nothing armed.
    pub fn pending() -> Self {
        Self { armed: None }
    }

    /// Arms the deadline for `at`, replacing (and returning) any payload
    /// that was already armed.
    pub fn arm(&mut self, at: Instant, payload: T) -> Option<T> {
        self.armed.replace((at, payload)).map(|(_, p)| p)
    }

    /// Cancels the deadline. Idempotent.
    pub fn disarm(&mut self) -> Option<T> {
        self.armed.take().map(|(_, p)| p)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// When the deadline fires, if armed.
    pub fn at(&self) -> Option<Instant> {
        self.armed.as_ref().map(|(at, _)| *at)
    }

    /// Waits for the deadline and disarms it, returning the payload.
    ///
    /// Pends forever while disarmed.
    pub async fn wait(&mut self) -> T {
        let Some(at) = self.at() else {
            return std::future::pending().await;
        };
        time::sleep_until(at).await;
        match self.armed.take() {
            Some((_, payload)) => payload,
            None => std::future::pending().await,
        }
    }
}

impl<T> Default for Deadline<T> {
    fn default() -> Self {
        Self::pending()
    }
}
