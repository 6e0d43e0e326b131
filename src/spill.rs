//! On-disk spill tier.
//!
//! A `SpillQueue` keeps its items in a single append file of length-prefixed
//! JSON records, with a read cursor chasing a write cursor:
//!
//! ```text
//! {dir}/spill.q
//!   [u32 len][record] [u32 len][record] ...
//!    ^read cursor                        ^write cursor
//! ```
//!
//! The file is truncated back to zero whenever the queue drains, so space is
//! reclaimed without compaction. The backing file is also truncated at open:
//! the tier buffers overflow for a running process and makes no promises
//! across crashes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::monitor::DEFAULT_POLL_PERIOD;
use crate::core::{AddError, BlockingQueue, CancelToken, Error, Result, TakeError};

const SPILL_FILE: &str = "spill.q";
const LEN_PREFIX: u64 = 4;

#[derive(Debug, Clone)]
pub struct SpillConfig {
    /// Maximum number of queued records; `None` is unbounded.
    pub max_items: Option<u64>,
    /// Upper bound on every internal wait slice.
    pub poll_period: Duration,
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            max_items: None,
            poll_period: DEFAULT_POLL_PERIOD,
        }
    }
}

/// Disk-backed FIFO tier for items that serialize with `serde`.
pub struct SpillQueue<T> {
    state: Mutex<SpillState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<u64>,
    poll_period: Duration,
    path: PathBuf,
    _items: PhantomData<fn(T) -> T>,
}

struct SpillState {
    file: File,
    read_offset: u64,
    write_offset: u64,
    count: u64,
    disposed: bool,
}

impl<T> SpillQueue<T> {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(dir, SpillConfig::default())
    }

    pub fn with_config(dir: impl AsRef<Path>, config: SpillConfig) -> Result<Self> {
        if config.poll_period.is_zero() {
            return Err(Error::InvalidArgument("poll period must be non-zero"));
        }
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(SPILL_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            state: Mutex::new(SpillState {
                file,
                read_offset: 0,
                write_offset: 0,
                count: 0,
                disposed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: config.max_items,
            poll_period: config.poll_period,
            path,
            _items: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, SpillState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_room(&self, state: &SpillState) -> bool {
        match self.capacity {
            Some(capacity) => state.count < capacity,
            None => true,
        }
    }
}

fn append_record(state: &mut SpillState, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::InvalidArgument("record exceeds 4 GiB"))?;
    state.file.seek(SeekFrom::Start(state.write_offset))?;
    state.file.write_all(&len.to_le_bytes())?;
    state.file.write_all(bytes)?;
    state.write_offset += LEN_PREFIX + bytes.len() as u64;
    state.count += 1;
    Ok(())
}

fn consume_record(state: &mut SpillState) -> Result<Vec<u8>> {
    state.file.seek(SeekFrom::Start(state.read_offset))?;
    let mut len_bytes = [0u8; LEN_PREFIX as usize];
    state.file.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut bytes = vec![0u8; len];
    state.file.read_exact(&mut bytes)?;

    state.read_offset += LEN_PREFIX + len as u64;
    state.count -= 1;
    if state.count == 0 {
        // Drained: reclaim the file instead of compacting it.
        state.read_offset = 0;
        state.write_offset = 0;
        state.file.set_len(0)?;
    }
    Ok(bytes)
}

impl<T: Serialize + DeserializeOwned + Send> BlockingQueue<T> for SpillQueue<T> {
    fn try_add(
        &self,
        item: T,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<(), AddError<T>> {
        let bytes = match serde_json::to_vec(&item) {
            Ok(bytes) => bytes,
            Err(err) => return Err(AddError::Rejected(item, err.into())),
        };

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();
        loop {
            if state.disposed {
                return Err(AddError::Rejected(item, Error::Disposed));
            }
            if token.is_cancelled() {
                return Err(AddError::Rejected(item, Error::Cancelled));
            }
            if self.has_room(&state) {
                if let Err(err) = append_record(&mut state, &bytes) {
                    return Err(AddError::Rejected(item, err));
                }
                self.not_empty.notify_one();
                return Ok(());
            }

            let mut slice = self.poll_period;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(AddError::Full(item));
                }
                slice = slice.min(remaining);
            }
            let (next, _) = self
                .not_full
                .wait_timeout(state, slice)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }

    fn try_take(
        &self,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<T, TakeError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();
        loop {
            if state.disposed {
                return Err(TakeError::Fault(Error::Disposed));
            }
            if token.is_cancelled() {
                return Err(TakeError::Fault(Error::Cancelled));
            }
            if state.count > 0 {
                let bytes = consume_record(&mut state).map_err(TakeError::Fault)?;
                self.not_full.notify_one();
                let item = serde_json::from_slice(&bytes)
                    .map_err(|err| TakeError::Fault(err.into()))?;
                return Ok(item);
            }

            let mut slice = self.poll_period;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(TakeError::Empty);
                }
                slice = slice.min(remaining);
            }
            let (next, _) = self
                .not_empty
                .wait_timeout(state, slice)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }

    fn add_forced(&self, item: T) -> Result<()> {
        let bytes = serde_json::to_vec(&item)?;
        let mut state = self.lock();
        if state.disposed {
            return Err(Error::Disposed);
        }
        append_record(&mut state, &bytes)?;
        self.not_empty.notify_one();
        Ok(())
    }

    fn len(&self) -> Option<u64> {
        Some(self.lock().count)
    }

    fn capacity(&self) -> Option<u64> {
        self.capacity
    }

    fn is_empty(&self) -> bool {
        self.lock().count == 0
    }

    fn dispose(&self) {
        let mut state = self.lock();
        state.disposed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}
