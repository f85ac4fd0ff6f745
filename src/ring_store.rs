// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Fixed-capacity byte arena backing the command stream.

The store is addressed with *logical* offsets: `u64` positions that only ever grow.
The physical byte for a logical offset is `offset % capacity`.  Because slices are
released strictly in FIFO order, the free region is always the single logical range
`[write position, oldest unreleased byte + capacity)`, and free space can be tracked as
one scalar instead of per-region bookkeeping.

Nothing here synchronizes.  The store hands out raw regions; ownership of each region
is established elsewhere:

* [WriteCursor] owns everything between its position and its limit, and is the only
  way to obtain writable bytes.
* A [crate::queue::Slice] owns its sealed range until it is released.

# Wraparound

Records never straddle the physical end of the buffer.  When a reservation does not
fit in the bytes left before the end, those bytes become padding and the reservation
starts again at physical offset 0.  If at least [HEADER_SIZE] bytes of padding exist, a
wrap marker is written at the start of the padding so a reader knows to skip ahead.
Shorter padding is implicit: a reader that finds fewer than [HEADER_SIZE] bytes before
the end skips them unconditionally.
*/

use std::cell::UnsafeCell;
use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Alignment of every record in the store, and of the store's capacity.
pub const RECORD_ALIGN: usize = 8;
/// Size of the length/opcode prefix in front of each record.
pub const HEADER_SIZE: usize = 8;
/// Length value marking the rest of the physical buffer as padding.
pub(crate) const WRAP_MARKER: u32 = u32::MAX;

/// Rounds `n` up to a multiple of `align`, which must be a power of two.
pub const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// The shared payload bytes.  See the module documentation.
pub struct RingStore {
    bytes: Box<[UnsafeCell<u8>]>,
}

// Regions are only touched by whoever owns them (write cursor or slice), and ownership
// changes hands under the queue's mutex, which orders the accesses.
unsafe impl Send for RingStore {}
unsafe impl Sync for RingStore {}

impl Debug for RingStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingStore")
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl RingStore {
    /**
    Creates a zero-filled store.

    # Panics
    If `capacity` is zero or not a multiple of [RECORD_ALIGN].
    */
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingStore capacity must be nonzero");
        assert_eq!(
            capacity % RECORD_ALIGN,
            0,
            "RingStore capacity must be a multiple of {RECORD_ALIGN}"
        );
        RingStore {
            bytes: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Physical index for a logical offset.
    pub fn physical_offset(&self, offset: u64) -> usize {
        (offset % self.capacity() as u64) as usize
    }

    /// Number of bytes between `offset` and the physical end of the buffer.
    pub fn contiguous_from(&self, offset: u64) -> usize {
        self.capacity() - self.physical_offset(offset)
    }

    fn region_ptr(&self, offset: u64, len: usize) -> *mut u8 {
        let start = self.physical_offset(offset);
        assert!(
            start + len <= self.capacity(),
            "region {offset}+{len} straddles the end of the ring store"
        );
        //UnsafeCell<u8> has the same layout as u8, and the pointer keeps the provenance of the whole slice
        unsafe { UnsafeCell::raw_get(self.bytes.as_ptr()).add(start) }
    }

    /**
    Mutable access to a region.

    # Safety
    The caller must own `[offset, offset+len)` exclusively for the lifetime of the
    returned slice: no reader or other writer may touch those bytes meanwhile.
    */
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn region_mut(&self, offset: u64, len: usize) -> &mut [u8] {
        let ptr = self.region_ptr(offset, len);
        unsafe { std::slice::from_raw_parts_mut(ptr, len) }
    }

    /**
    Shared access to a region.

    # Safety
    No writer may touch `[offset, offset+len)` for the lifetime of the returned slice.
    */
    pub(crate) unsafe fn region(&self, offset: u64, len: usize) -> &[u8] {
        let ptr = self.region_ptr(offset, len);
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }
}

/**
The producer's allocation state over a [RingStore].

`position` is the next logical byte to hand out.  `limit` is the logical end of the
space the producer may use: the oldest unreleased byte plus the capacity, as last
observed by the producer.  The consumer only ever moves the real limit forward, so a
stale `limit` is always safe; it is refreshed by [crate::queue::CommandBufferQueue::flush].
*/
pub struct WriteCursor {
    store: Arc<RingStore>,
    position: u64,
    limit: u64,
}

impl Debug for WriteCursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteCursor")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .finish()
    }
}

impl WriteCursor {
    pub(crate) fn new(store: Arc<RingStore>) -> Self {
        let limit = store.capacity() as u64;
        WriteCursor {
            store,
            position: 0,
            limit,
        }
    }

    /// Logical offset of the next reserved byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Capacity minus the bytes in flight, as last observed by the producer.
    pub fn bytes_free(&self) -> usize {
        (self.limit - self.position) as usize
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    pub(crate) fn store(&self) -> &Arc<RingStore> {
        &self.store
    }

    pub(crate) fn set_limit(&mut self, limit: u64) {
        debug_assert!(limit >= self.limit, "write limit moved backwards");
        debug_assert!(limit - self.position <= self.store.capacity() as u64);
        self.limit = limit;
    }

    /// Total bytes (including wrap padding) a reservation of `n` would consume right now.
    pub fn cost_of(&self, n: usize) -> usize {
        let remaining = self.store.contiguous_from(self.position);
        if n <= remaining { n } else { remaining + n }
    }

    /**
    Reserves `n` contiguous bytes at the write position.

    If the bytes left before the physical end are too few, they are skipped as padding
    (see the module documentation) and count against free space.
    */
    pub fn reserve(&mut self, n: usize) -> Result<Reservation<'_>, ReserveError> {
        let capacity = self.store.capacity();
        if n > capacity {
            return Err(ReserveError::TooLarge {
                requested: n,
                capacity,
            });
        }
        let needed = self.cost_of(n);
        let free = self.bytes_free();
        if needed > free {
            return Err(ReserveError::Exhausted {
                requested: n,
                padding: needed - n,
                free,
            });
        }
        self.skip(needed - n);
        let offset = self.position;
        self.position += n as u64;
        //safety: as above, and the returned borrow keeps the cursor from handing it out twice
        let bytes = unsafe { self.store.region_mut(offset, n) };
        Ok(Reservation { offset, bytes })
    }

    /**
    Pads out the rest of the physical buffer so the next reservation starts at its
    beginning.  Returns the padding written, which is zero when already there.

    The padding must be free.
    */
    pub(crate) fn pad_to_wrap(&mut self) -> usize {
        if self.store.physical_offset(self.position) == 0 {
            return 0;
        }
        let padding = self.store.contiguous_from(self.position);
        assert!(
            padding <= self.bytes_free(),
            "wrap padding of {padding} bytes but only {free} are free",
            free = self.bytes_free()
        );
        self.skip(padding);
        padding
    }

    fn skip(&mut self, padding: usize) {
        if padding >= HEADER_SIZE {
            //safety: [position, limit) belongs to the cursor
            let marker = unsafe { self.store.region_mut(self.position, HEADER_SIZE) };
            marker[..4].copy_from_slice(&WRAP_MARKER.to_le_bytes());
            marker[4..].fill(0);
        }
        self.position += padding as u64;
    }
}

/// Bytes handed out by [WriteCursor::reserve].
#[derive(Debug)]
pub struct Reservation<'a> {
    offset: u64,
    bytes: &'a mut [u8],
}

impl Reservation<'_> {
    /// Logical offset of the first byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Deref for Reservation<'_> {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        self.bytes
    }
}

impl DerefMut for Reservation<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReserveError {
    /// More bytes than are free right now.  Releasing slices may fix this.
    ///
    /// `padding` is the wrap padding the reservation would have needed on top of `requested`.
    #[error("requested {requested} bytes (plus {padding} of wrap padding) but only {free} are free")]
    Exhausted {
        requested: usize,
        padding: usize,
        free: usize,
    },
    /// More bytes than the store can ever hold.
    #[error("requested {requested} bytes from a store of {capacity}")]
    TooLarge { requested: usize, capacity: usize },
}
