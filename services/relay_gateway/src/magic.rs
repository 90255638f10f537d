//! Rolling magic values.
//!
//! Relays stamp the current magic into forwarded packets as an anti-spoof
//! tag. The backend rotates the tuple on a fixed cadence; relays accept
//! the upcoming and previous values around rotation edges.

use arc_swap::ArcSwap;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use types::MAGIC_BYTES;

pub const MAGIC_ROTATION_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagicValues {
    pub upcoming: [u8; MAGIC_BYTES],
    pub current: [u8; MAGIC_BYTES],
    pub previous: [u8; MAGIC_BYTES],
}

fn random_magic() -> [u8; MAGIC_BYTES] {
    let mut value = [0u8; MAGIC_BYTES];
    rand::thread_rng().fill_bytes(&mut value);
    value
}

impl MagicValues {
    pub fn generate() -> Self {
        Self {
            upcoming: random_magic(),
            current: random_magic(),
            previous: random_magic(),
        }
    }

    /// Shift: upcoming becomes current, current becomes previous, and a
    /// fresh upcoming is drawn.
    pub fn rotated(&self) -> Self {
        Self {
            upcoming: random_magic(),
            current: self.upcoming,
            previous: self.current,
        }
    }
}

/// Spawn the rotator over a shared magic handle.
pub fn spawn_rotator(magic: Arc<ArcSwap<MagicValues>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAGIC_ROTATION_INTERVAL);
        ticker.tick().await; // immediate first tick
        loop {
            ticker.tick().await;
            let next = magic.load().rotated();
            magic.store(Arc::new(next));
            tracing::debug!("rotated magic values");
        }
    })
}
