//! Durable storage of the running total and the consumption history.
//!
//! One [`PersistedRecord`] is kept in NVS, written to two alternating
//! slots so that a power cut during a write can only damage the slot being
//! written:
//!
//! ```text
//!   commit N ──▶ slot N % 2        (rec_a / rec_b)
//!   load     ──▶ decode both, keep the valid one with the highest write_seq
//! ```
//!
//! Slot layout (little-endian, ≤ [`STORE_BLOCK_SIZE`] bytes):
//!
//! ```text
//!   ┌──────┬─────┬──────────────────────┬──────────┐
//!   │ "HM" │ ver │ postcard(record)     │ sha256⁴  │
//!   └──────┴─────┴──────────────────────┴──────────┘
//! ```
//!
//! The trailing 4 bytes are the first bytes of the SHA-256 digest of
//! everything before them.  A slot that fails any check is ignored; if no
//! slot survives, the store starts from zero.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};
use crate::config::{MAX_HISTORY, STORE_BLOCK_SIZE};
use crate::scheduler::{deadline_reached, elapsed_ms};

/// NVS namespace holding the accumulator record slots.
pub const NAMESPACE: &str = "hidrometro";
const SLOT_KEYS: [&str; 2] = ["rec_a", "rec_b"];

const MAGIC: [u8; 2] = *b"HM";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1;
const CHECKSUM_LEN: usize = 4;

/// Minimum spacing between a write and a requested (out-of-interval)
/// commit.  Requests arriving sooner stay pending.
pub const FORCED_COMMIT_SPACING_MS: u32 = 5_000;

// ───────────────────────────────────────────────────────────────
// Record
// ───────────────────────────────────────────────────────────────

/// The persisted accumulator state.
///
/// `history` is a ring of at most `capacity` samples.  While filling,
/// samples are appended and `head` stays 0; once full, `head` is the
/// index of the oldest sample and the next write overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub total_liters: f64,
    history: heapless::Vec<f64, MAX_HISTORY>,
    head: u16,
    pub write_seq: u32,
}

impl PersistedRecord {
    /// An empty record (total 0, no history, sequence 0).
    pub fn empty() -> Self {
        Self {
            total_liters: 0.0,
            history: heapless::Vec::new(),
            head: 0,
            write_seq: 0,
        }
    }

    /// Add `sample` to a ring of `capacity` entries, overwriting the
    /// oldest once full.
    pub fn push_sample(&mut self, sample: f64, capacity: usize) {
        let capacity = capacity.clamp(1, MAX_HISTORY);
        if self.history.len() > capacity {
            self.resize_history(capacity);
        }
        if self.history.len() < capacity {
            // Cannot fail: len < capacity <= MAX_HISTORY.
            let _ = self.history.push(sample);
            return;
        }
        let head = self.head as usize;
        self.history[head] = sample;
        self.head = ((head + 1) % capacity) as u16;
    }

    /// History samples, oldest first.
    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        let split = (self.head as usize).min(self.history.len());
        let (newer, older) = self.history.split_at(split);
        older.iter().chain(newer.iter()).copied()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Re-lay the ring out oldest→newest in a ring of `capacity`,
    /// keeping the newest samples.
    pub fn resize_history(&mut self, capacity: usize) {
        let capacity = capacity.clamp(1, MAX_HISTORY);
        let skip = self.history.len().saturating_sub(capacity);
        let mut ring = heapless::Vec::new();
        for sample in self.history().skip(skip) {
            let _ = ring.push(sample);
        }
        self.history = ring;
        self.head = 0;
    }

    /// Structural checks a checksum cannot catch (a well-formed but
    /// nonsensical record from a future or buggy writer).
    fn is_plausible(&self) -> bool {
        let head_ok = if self.history.is_empty() {
            self.head == 0
        } else {
            (self.head as usize) < self.history.len()
        };
        head_ok
            && self.total_liters.is_finite()
            && self.total_liters >= 0.0
            && self.history.iter().all(|s| s.is_finite())
    }
}

// ───────────────────────────────────────────────────────────────
// Slot codec
// ───────────────────────────────────────────────────────────────

/// Encode `record` into `buf`, returning the slot length.
pub fn encode_record(
    record: &PersistedRecord,
    buf: &mut [u8; STORE_BLOCK_SIZE],
) -> Result<usize, PersistError> {
    buf[..MAGIC.len()].copy_from_slice(&MAGIC);
    buf[MAGIC.len()] = FORMAT_VERSION;

    let body_len = postcard::to_slice(record, &mut buf[HEADER_LEN..STORE_BLOCK_SIZE - CHECKSUM_LEN])
        .map_err(|_| PersistError::Encode)?
        .len();
    let end = HEADER_LEN + body_len;

    let digest = hmac_sha256::Hash::hash(&buf[..end]);
    buf[end..end + CHECKSUM_LEN].copy_from_slice(&digest[..CHECKSUM_LEN]);
    Ok(end + CHECKSUM_LEN)
}

/// Decode one slot.  `None` for anything that is not an intact record.
pub fn decode_record(bytes: &[u8]) -> Option<PersistedRecord> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN || bytes.len() > STORE_BLOCK_SIZE {
        return None;
    }
    if bytes[..MAGIC.len()] != MAGIC || bytes[MAGIC.len()] != FORMAT_VERSION {
        return None;
    }

    let (signed, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let digest = hmac_sha256::Hash::hash(signed);
    if digest[..CHECKSUM_LEN] != *checksum {
        return None;
    }

    let (record, rest) = postcard::take_from_bytes::<PersistedRecord>(&signed[HEADER_LEN..]).ok()?;
    if !rest.is_empty() || !record.is_plausible() {
        return None;
    }
    Some(record)
}

// ───────────────────────────────────────────────────────────────
// Store
// ───────────────────────────────────────────────────────────────

/// Result of [`PersistenceStore::load`].
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// A valid record was found.
    Restored(PersistedRecord),
    /// Nothing stored yet (first boot).
    Empty,
    /// Something was stored but no slot passed validation.  The store
    /// starts from zero.
    Corrupt,
}

/// Errors from [`PersistenceStore::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistError {
    /// `save` called before `load`.
    NotLoaded,
    /// The record did not fit in a slot.
    Encode,
    /// The total to commit was negative or not finite.
    InvalidTotal,
    /// The storage backend refused the write.
    Storage(StorageError),
}

impl core::fmt::Display for PersistError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotLoaded => write!(f, "store not loaded"),
            Self::Encode => write!(f, "record encoding failed"),
            Self::InvalidTotal => write!(f, "total is not a finite non-negative number"),
            Self::Storage(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreState {
    Uninitialized,
    Ready,
}

/// Owns the in-memory copy of the record and the commit cadence.
pub struct PersistenceStore {
    state: StoreState,
    record: PersistedRecord,
    history_size: usize,
    save_interval_ms: u32,
    /// Anchor for the save interval.  `None` until the first commit check.
    last_commit_ms: Option<u32>,
    /// When the last write was attempted, for spacing requested commits.
    last_write_ms: Option<u32>,
    commit_requested: bool,
    total_at_last_commit: f64,
}

impl PersistenceStore {
    pub fn new(history_size: u16, save_interval_ms: u32) -> Self {
        Self {
            state: StoreState::Uninitialized,
            record: PersistedRecord::empty(),
            history_size: (history_size as usize).clamp(1, MAX_HISTORY),
            save_interval_ms,
            last_commit_ms: None,
            last_write_ms: None,
            commit_requested: false,
            total_at_last_commit: 0.0,
        }
    }

    /// Read both slots and adopt the newest valid record.
    ///
    /// Never fails: absent and corrupt stores both leave the store `Ready`
    /// with a zero total.  Calling `load` again re-reads storage.
    pub fn load(&mut self, storage: &impl StoragePort) -> LoadOutcome {
        let mut found_any = false;
        let mut best: Option<PersistedRecord> = None;

        for key in SLOT_KEYS {
            let mut buf = [0u8; STORE_BLOCK_SIZE];
            let len = match storage.read(NAMESPACE, key, &mut buf) {
                Ok(len) => len,
                Err(StorageError::NotFound) => continue,
                Err(e) => {
                    warn!("persist: slot {} unreadable: {}", key, e);
                    found_any = true;
                    continue;
                }
            };
            found_any = true;

            match decode_record(&buf[..len]) {
                Some(rec) => {
                    if best.as_ref().is_none_or(|b| rec.write_seq > b.write_seq) {
                        best = Some(rec);
                    }
                }
                None => warn!("persist: slot {} failed validation ({} bytes)", key, len),
            }
        }

        self.state = StoreState::Ready;
        self.commit_requested = false;

        let outcome = match best {
            Some(mut rec) => {
                if rec.history_len() > self.history_size
                    || (rec.head != 0 && rec.history_len() != self.history_size)
                {
                    info!(
                        "persist: history ring {} -> {} entries",
                        rec.history_len(),
                        self.history_size
                    );
                    rec.resize_history(self.history_size);
                }
                info!(
                    "persist: restored {:.3} L (seq {}, {} history samples)",
                    rec.total_liters,
                    rec.write_seq,
                    rec.history_len()
                );
                self.record = rec.clone();
                LoadOutcome::Restored(rec)
            }
            None if found_any => {
                warn!("persist: no valid record, starting from zero");
                self.record = PersistedRecord::empty();
                LoadOutcome::Corrupt
            }
            None => {
                info!("persist: no stored record (first boot)");
                self.record = PersistedRecord::empty();
                LoadOutcome::Empty
            }
        };
        self.total_at_last_commit = self.record.total_liters;
        outcome
    }

    /// Commit `total` and one history sample.  Returns the new `write_seq`.
    ///
    /// On failure the in-memory record is left as it was.
    pub fn save(
        &mut self,
        storage: &mut impl StoragePort,
        total_liters: f64,
        history_sample: f64,
        now_ms: u32,
    ) -> Result<u32, PersistError> {
        if self.state != StoreState::Ready {
            return Err(PersistError::NotLoaded);
        }
        if !total_liters.is_finite() || total_liters < 0.0 || !history_sample.is_finite() {
            warn!("persist: refusing to commit total {}", total_liters);
            return Err(PersistError::InvalidTotal);
        }

        let mut next = self.record.clone();
        next.total_liters = total_liters;
        next.push_sample(history_sample, self.history_size);
        next.write_seq = next.write_seq.wrapping_add(1);

        let mut buf = [0u8; STORE_BLOCK_SIZE];
        let len = encode_record(&next, &mut buf)?;
        let key = SLOT_KEYS[(next.write_seq % 2) as usize];

        // Rearm the interval even on failure so a dead flash is not
        // hammered every tick.
        self.last_commit_ms = Some(now_ms);
        self.last_write_ms = Some(now_ms);
        self.commit_requested = false;

        storage
            .write(NAMESPACE, key, &buf[..len])
            .map_err(PersistError::Storage)?;

        self.total_at_last_commit = total_liters;
        self.record = next;
        Ok(self.record.write_seq)
    }

    /// Ask for a commit ahead of the save interval.  Requests are served
    /// at most once per [`FORCED_COMMIT_SPACING_MS`] and repeated requests
    /// coalesce into one write.
    pub fn request_commit(&mut self) {
        self.commit_requested = true;
    }

    /// `true` if the save interval has elapsed, or a commit is requested
    /// and the previous write is far enough back.
    pub fn commit_due(&self, now_ms: u32) -> bool {
        if self.state != StoreState::Ready {
            return false;
        }
        self.request_due(now_ms) || self.interval_due(now_ms)
    }

    fn interval_due(&self, now_ms: u32) -> bool {
        match self.last_commit_ms {
            Some(last) => deadline_reached(now_ms, last.wrapping_add(self.save_interval_ms)),
            None => false,
        }
    }

    fn request_due(&self, now_ms: u32) -> bool {
        self.commit_requested
            && match self.last_write_ms {
                Some(last) => elapsed_ms(now_ms, last) >= FORCED_COMMIT_SPACING_MS,
                None => true,
            }
    }

    /// Commit if due.  The history sample is the consumption since the
    /// previous commit (0 across a reset).
    pub fn maybe_commit(
        &mut self,
        storage: &mut impl StoragePort,
        total_liters: f64,
        now_ms: u32,
    ) -> Option<Result<u32, PersistError>> {
        if self.last_commit_ms.is_none() {
            self.last_commit_ms = Some(now_ms);
        }
        if !self.commit_due(now_ms) {
            return None;
        }
        // A request for a total that is already on flash needs no write.
        if !self.interval_due(now_ms)
            && self.last_write_ms.is_some()
            && total_liters == self.total_at_last_commit
        {
            self.commit_requested = false;
            return None;
        }
        let sample = (total_liters - self.total_at_last_commit).max(0.0);
        Some(self.save(storage, total_liters, sample, now_ms))
    }

    pub fn is_ready(&self) -> bool {
        self.state == StoreState::Ready
    }

    pub fn record(&self) -> &PersistedRecord {
        &self.record
    }

    pub fn commit_requested(&self) -> bool {
        self.commit_requested
    }
}
