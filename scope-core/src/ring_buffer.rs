//! # Sample Ring Buffer
//!
//! Fixed-capacity store of the most recent raw ADC codes, shared between the
//! ingestion thread (writer) and the analysis tick (reader).
//!
//! The buffer is pre-filled at construction so its length is always exactly
//! its capacity; the oldest sample is dropped on every push. All access goes
//! through a single mutex that is held only for the push or the copy.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::ScopeError;

/// Raw sample as produced by the source: a 10-bit ADC code.
pub type RawSample = u16;

/// Value the buffer is pre-filled with before any sample arrives.
pub const NEUTRAL_SAMPLE: RawSample = 0;

/// Thread-safe, lossy FIFO of the last `capacity` samples.
#[derive(Debug)]
pub struct SampleRingBuffer {
    samples: Mutex<VecDeque<RawSample>>,
    capacity: usize,
}

impl SampleRingBuffer {
    /// Creates a buffer of `capacity` samples, all set to [`NEUTRAL_SAMPLE`].
    pub fn new(capacity: usize) -> Result<Self, ScopeError> {
        if capacity == 0 {
            return Err(ScopeError::ZeroCapacity);
        }
        let samples = std::iter::repeat_n(NEUTRAL_SAMPLE, capacity).collect();
        Ok(Self {
            samples: Mutex::new(samples),
            capacity,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends one sample, evicting the oldest.
    pub fn push(&self, sample: RawSample) {
        let mut samples = self.lock();
        samples.pop_front();
        samples.push_back(sample);
    }

    /// Appends a batch of samples under a single lock acquisition.
    ///
    /// The batch is collected before locking, so the iterator never runs
    /// while the window is held.
    pub fn push_many<I>(&self, batch: I)
    where
        I: IntoIterator<Item = RawSample>,
    {
        let batch: Vec<RawSample> = batch.into_iter().collect();
        let mut samples = self.lock();
        for sample in batch {
            samples.pop_front();
            samples.push_back(sample);
        }
    }

    /// Copies the current window, oldest sample first.
    pub fn snapshot(&self) -> Vec<RawSample> {
        let samples = self.lock();
        samples.iter().copied().collect()
    }

    // A panic while holding the lock cannot leave the deque shorter than
    // `capacity`: pop_front and push_back are paired with no fallible code
    // between them, so the poisoned data is still a valid window.
    fn lock(&self) -> MutexGuard<'_, VecDeque<RawSample>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
