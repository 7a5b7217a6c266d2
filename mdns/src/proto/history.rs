use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

const EXPIRE_INTERVAL: Duration = Duration::from_secs(10);

type Hash = [u8; 32];

struct HashEntry {
    hash: Hash,
    expire_time: Instant,
}

/// Fingerprints of recently transmitted messages, used to recognize our own
/// multicasts when they are received back via the group.
#[derive(Default)]
pub(crate) struct TxMessageHistory {
    entries: Vec<HashEntry>,
}

impl TxMessageHistory {
    pub(crate) fn add(&mut self, message: &[u8], now: Instant) {
        let hash = calculate_hash(message);
        let expire_time = now + EXPIRE_INTERVAL;

        match self.entries.iter_mut().find(|entry| entry.hash == hash) {
            Some(entry) => entry.expire_time = expire_time,
            None => self.entries.push(HashEntry { hash, expire_time }),
        }
    }

    pub(crate) fn contains(&self, message: &[u8]) -> bool {
        let hash = calculate_hash(message);
        self.entries.iter().any(|entry| entry.hash == hash)
    }

    pub(crate) fn prune(&mut self, now: Instant) {
        self.entries.retain(|entry| entry.expire_time > now);
    }

    pub(crate) fn next_expire_time(&self) -> Option<Instant> {
        self.entries.iter().map(|entry| entry.expire_time).min()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

fn calculate_hash(message: &[u8]) -> Hash {
    let mut sha256 = Sha256::new();
    sha256.update(message);
    sha256.finalize().into()
}
