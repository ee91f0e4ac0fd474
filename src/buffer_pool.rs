//! Size-classed recycling pool backing event payloads.
//!
//! Buffers live in power-of-two slabs from 64 bytes up to 4 KiB. A producer
//! takes a lease sized to the upcoming payload, fills it, and seals it into a
//! shared handle so events can be cloned without copying. Dropping the last
//! handle returns the allocation to its slab.

use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

const MIN_CLASS: usize = 64;
const MAX_CLASS: usize = 4096;
const SLABS: usize = 7; // 64, 128, 256, 512, 1024, 2048, 4096
const STASH_PER_SLAB: usize = 64;

struct Slab {
    size: usize,
    stash: Mutex<Vec<Vec<u8>>>,
}

impl Slab {
    fn new(size: usize) -> Slab {
        let mut stash = Vec::with_capacity(STASH_PER_SLAB);
        for _ in 0..STASH_PER_SLAB {
            stash.push(vec![0u8; size]);
        }
        Slab {
            size,
            stash: Mutex::new(stash),
        }
    }

    fn take(&self) -> Vec<u8> {
        self.stash
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.size])
    }

    fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        buf.resize(self.size, 0);
        let mut stash = self.stash.lock();
        if stash.len() < STASH_PER_SLAB {
            stash.push(buf);
        }
    }
}

static SLAB_TABLE: OnceLock<Vec<Slab>> = OnceLock::new();

fn slabs() -> &'static [Slab] {
    SLAB_TABLE.get_or_init(|| (0..SLABS).map(|i| Slab::new(MIN_CLASS << i)).collect())
}

#[inline]
fn slab_index(len: usize) -> usize {
    let size = len.clamp(1, MAX_CLASS).next_power_of_two().max(MIN_CLASS);
    (size.trailing_zeros() - MIN_CLASS.trailing_zeros()) as usize
}

/// Exclusive write access to a pooled buffer before it is sealed.
pub struct PayloadLease {
    slab: usize,
    data: Option<Vec<u8>>,
}

impl PayloadLease {
    /// Borrow the backing bytes for filling.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data
            .as_mut()
            .expect("payload lease already sealed")
            .as_mut_slice()
    }

    /// Seal the first `len` bytes into a shared handle.
    pub fn seal(mut self, len: usize) -> PayloadRef {
        let mut data = self.data.take().expect("payload lease already sealed");
        data.truncate(len.min(data.len()));
        PayloadRef {
            inner: Arc::new(PayloadInner {
                slab: self.slab,
                data: Some(data),
            }),
        }
    }
}

impl Drop for PayloadLease {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            slabs()[self.slab].put(data);
        }
    }
}

#[derive(Debug)]
struct PayloadInner {
    slab: usize,
    data: Option<Vec<u8>>,
}

impl Drop for PayloadInner {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            slabs()[self.slab].put(data);
        }
    }
}

/// Shared, cheaply cloneable view of a sealed payload.
#[derive(Debug, Clone)]
pub struct PayloadRef {
    inner: Arc<PayloadInner>,
}

impl PayloadRef {
    pub fn as_slice(&self) -> &[u8] {
        self.inner.data.as_deref().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.data.as_ref().map_or(0, |d| d.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Take a lease sized for `size_hint` bytes.
pub fn take(size_hint: usize) -> PayloadLease {
    let slab = slab_index(size_hint);
    PayloadLease {
        slab,
        data: Some(slabs()[slab].take()),
    }
}
