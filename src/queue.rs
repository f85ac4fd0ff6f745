// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Producer/consumer handoff of command-buffer slices.
//!
//! # Overview
//!
//! [CommandBufferQueue] owns the [RingStore] and the bookkeeping around it.  The recording
//! thread writes commands through its [WriteCursor], then calls [CommandBufferQueue::flush],
//! which seals everything written since the previous flush into one [Slice].  The driver
//! thread receives slices from [CommandBufferQueue::wait_for_commands], executes them, and
//! hands each back with [CommandBufferQueue::release_buffer].
//!
//! # Backpressure
//!
//! `flush` is the only place the producer blocks.  After sealing, it waits until at least
//! `required_size` bytes are free, which bounds memory at `buffer_size` however far ahead the
//! producer tries to run.  Recording itself never blocks.
//!
//! # Synchronization
//!
//! One mutex and one condition variable.  The mutex guards the bookkeeping scalars and the
//! pending list only; payload bytes are never touched under the lock.  They are handed from
//! producer to consumer by moving the [Slice] through the pending list, and back by
//! [CommandBufferQueue::release_buffer].
//!
//! # Shutdown
//!
//! [CommandBufferQueue::request_exit] is sticky.  It wakes a consumer in `wait_for_commands`
//! (which returns whatever is still pending, then empty) and a producer in `flush` (which
//! stops waiting for space that will never be released).

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::command::Commands;
use crate::config::QueueConfig;
use crate::ring_store::{RingStore, WriteCursor};
use crate::sys::time::{Duration, Instant};

/**
One sealed, contiguous region of recorded commands.

Owned by the consumer from [CommandBufferQueue::wait_for_commands] until it is passed to
[CommandBufferQueue::release_buffer].  There is no way to copy a slice, and releasing one
consumes it, so it can be neither used after release nor released twice.
*/
#[must_use = "slices must be returned with CommandBufferQueue::release_buffer or the space leaks"]
pub struct Slice {
    sequence: u64,
    begin: u64,
    end: u64,
    store: Arc<RingStore>,
}

impl Debug for Slice {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slice")
            .field("sequence", &self.sequence)
            .field("begin", &self.begin)
            .field("end", &self.end)
            .finish()
    }
}

impl Slice {
    /// Position of this slice in flush order, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Logical offset of the first byte.
    pub fn begin(&self) -> u64 {
        self.begin
    }

    /// Logical offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Bytes occupied in the store, wrap padding included.
    pub fn len(&self) -> usize {
        (self.end - self.begin) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// The commands in this slice, in recording order.
    pub fn commands(&self) -> Commands<'_> {
        Commands::new(self)
    }

    pub(crate) fn store(&self) -> &RingStore {
        &self.store
    }
}

/// A snapshot of queue diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub capacity: usize,
    pub required_size: usize,
    pub bytes_free: usize,
    /// Largest number of bytes seen in flight at a flush or refresh.
    pub high_watermark: usize,
    pub slices_flushed: u64,
    pub slices_released: u64,
    pub slices_pending: usize,
    /// Number of flushes that had to wait for the consumer.
    pub backpressure_stalls: u64,
    /// Total time spent in those waits.
    pub stalled_for: Duration,
}

#[derive(Debug)]
struct State {
    free_space: usize,
    high_watermark: usize,
    exit_requested: bool,
    pending: VecDeque<Slice>,
    //logical end of the most recently sealed slice
    flushed: u64,
    //logical end of the most recently released slice
    reclaimed: u64,
    next_sequence: u64,
    next_release: u64,
    backpressure_stalls: u64,
    stalled_for: Duration,
}

/**
Hands command-buffer slices from one producer thread to one consumer thread.

See the module documentation for the protocol.
*/
pub struct CommandBufferQueue {
    config: QueueConfig,
    store: Arc<RingStore>,
    state: Mutex<State>,
    changed: Condvar,
    cursor_claimed: AtomicBool,
}

impl Debug for CommandBufferQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBufferQueue")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

impl CommandBufferQueue {
    pub fn new(config: QueueConfig) -> Self {
        logwise::info_sync!(
            "Creating CommandBufferQueue required_size={required_size} buffer_size={buffer_size}",
            required_size = config.required_size(),
            buffer_size = config.buffer_size()
        );
        CommandBufferQueue {
            config,
            store: Arc::new(RingStore::new(config.buffer_size())),
            state: Mutex::new(State {
                free_space: config.buffer_size(),
                high_watermark: 0,
                exit_requested: false,
                pending: VecDeque::new(),
                flushed: 0,
                reclaimed: 0,
                next_sequence: 0,
                next_release: 0,
                backpressure_stalls: 0,
                stalled_for: Duration::ZERO,
            }),
            changed: Condvar::new(),
            cursor_claimed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    pub fn required_size(&self) -> usize {
        self.config.required_size()
    }

    pub fn capacity(&self) -> usize {
        self.config.buffer_size()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("CommandBufferQueue state poisoned")
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.changed
            .wait(guard)
            .expect("CommandBufferQueue state poisoned")
    }

    fn check_cursor(&self, cursor: &WriteCursor) {
        assert!(
            Arc::ptr_eq(cursor.store(), &self.store),
            "WriteCursor belongs to a different CommandBufferQueue"
        );
    }

    /**
    Claims the producer side of the queue.

    There is exactly one cursor per queue; later calls fail with [QueueError::CursorClaimed].
    */
    pub fn write_cursor(&self) -> Result<WriteCursor, QueueError> {
        if self.cursor_claimed.swap(true, Ordering::AcqRel) {
            return Err(QueueError::CursorClaimed);
        }
        Ok(WriteCursor::new(self.store.clone()))
    }

    /**
    Seals the bytes written since the previous flush into a slice, then applies backpressure.

    1.  If `cursor` advanced since the previous flush, everything in between becomes one
        new [Slice], which is queued for the consumer.  Otherwise nothing is queued.
    2.  Blocks until `required_size` bytes of records are guaranteed to fit, or exit is
        requested.

    Records never straddle the physical end of the store, so the bytes left before it may
    be lost to padding.  When those bytes are fewer than `required_size`, step 2 waits for
    them on top of `required_size`.  If the two together exceed the capacity, the cursor
    is padded to the start of the store instead, and the padding is sealed like any
    other bytes.

    On return `cursor` sees all space released so far.
    */
    pub fn flush(&self, cursor: &mut WriteCursor) {
        self.check_cursor(cursor);
        let capacity = self.capacity();
        let required = self.required_size();
        let mut state = self.lock();
        cursor.set_limit(state.reclaimed + capacity as u64);

        let stub = self.store.contiguous_from(cursor.position());
        let wrap = stub < required && stub + required > capacity;
        if wrap && stub <= cursor.bytes_free() {
            cursor.pad_to_wrap();
        }
        self.seal(&mut state, cursor.position());
        if wrap && self.store.physical_offset(cursor.position()) != 0 {
            //the bytes up to the end are still held by unreleased slices; pad once they are free
            state = self.wait_for_space(state, stub);
            if state.exit_requested {
                cursor.set_limit(state.reclaimed + capacity as u64);
                return;
            }
            cursor.set_limit(state.reclaimed + capacity as u64);
            cursor.pad_to_wrap();
            self.seal(&mut state, cursor.position());
        }

        let stub = self.store.contiguous_from(cursor.position());
        let needed = if stub < required {
            stub + required
        } else {
            required
        };
        state = self.wait_for_space(state, needed);
        cursor.set_limit(state.reclaimed + capacity as u64);
    }

    fn seal(&self, state: &mut State, end: u64) {
        if end == state.flushed {
            return;
        }
        let begin = state.flushed;
        let len = (end - begin) as usize;
        assert!(
            len <= state.free_space,
            "command buffer overflow: {len} bytes written with {free} free",
            free = state.free_space
        );
        state.free_space -= len;
        let in_flight = self.capacity() - state.free_space;
        state.high_watermark = state.high_watermark.max(in_flight);
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.flushed = end;
        state.pending.push_back(Slice {
            sequence,
            begin,
            end,
            store: self.store.clone(),
        });
        logwise::trace_sync!(
            "flush sealed slice {sequence} of {len} bytes",
            sequence = sequence,
            len = len
        );
        self.changed.notify_all();
    }

    fn wait_for_space<'a>(
        &self,
        mut state: MutexGuard<'a, State>,
        needed: usize,
    ) -> MutexGuard<'a, State> {
        if state.free_space >= needed || state.exit_requested {
            return state;
        }
        logwise::warn_sync!(
            "flush blocked: {free} bytes free, {needed} needed",
            free = state.free_space,
            needed = needed
        );
        let interval = logwise::perfwarn_begin!("CommandBufferQueue::flush backpressure");
        let started = Instant::now();
        while state.free_space < needed && !state.exit_requested {
            state = self.wait(state);
        }
        state.backpressure_stalls += 1;
        state.stalled_for += started.elapsed();
        drop(interval);
        state
    }

    /**
    Lets `cursor` see space released since its last flush, without sealing anything.

    Bytes written but not yet flushed count toward [Self::high_watermark] from here on.
    */
    pub fn refresh(&self, cursor: &mut WriteCursor) {
        self.check_cursor(cursor);
        let mut state = self.lock();
        let in_flight = (cursor.position() - state.reclaimed) as usize;
        state.high_watermark = state.high_watermark.max(in_flight);
        cursor.set_limit(state.reclaimed + self.capacity() as u64);
    }

    /**
    Blocks until slices are pending or exit is requested, then takes every pending slice.

    Slices come back in flush order.  An empty result means exit was requested and nothing
    is pending; every later call returns empty immediately.
    */
    pub fn wait_for_commands(&self) -> Vec<Slice> {
        let mut state = self.lock();
        while state.pending.is_empty() && !state.exit_requested {
            state = self.wait(state);
        }
        state.pending.drain(..).collect()
    }

    /**
    Returns a slice's bytes to free space and wakes a producer waiting in [Self::flush].

    # Panics
    If `slice` is not the oldest unreleased slice, or belongs to another queue.  Releasing
    out of order would corrupt the free-space accounting.
    */
    pub fn release_buffer(&self, slice: Slice) {
        assert!(
            Arc::ptr_eq(&slice.store, &self.store),
            "Slice belongs to a different CommandBufferQueue"
        );
        let mut state = self.lock();
        assert_eq!(
            slice.sequence, state.next_release,
            "slices must be released in the order they were received"
        );
        debug_assert_eq!(slice.begin, state.reclaimed);
        state.next_release += 1;
        state.reclaimed = slice.end;
        state.free_space += slice.len();
        debug_assert!(
            state.free_space <= self.capacity(),
            "free space {free} exceeds capacity",
            free = state.free_space
        );
        self.changed.notify_all();
    }

    /// Unblocks both sides, permanently.
    pub fn request_exit(&self) {
        let mut state = self.lock();
        if !state.exit_requested {
            logwise::info_sync!("CommandBufferQueue exit requested");
        }
        state.exit_requested = true;
        self.changed.notify_all();
    }

    pub fn is_exit_requested(&self) -> bool {
        self.lock().exit_requested
    }

    /**
    Largest number of bytes seen in flight, written or sealed but not yet released.
    Monotonic.

    It is sampled when the producer flushes or refreshes its cursor, so bytes written
    after the last of those are not counted yet.
    */
    pub fn high_watermark(&self) -> usize {
        self.lock().high_watermark
    }

    /// Bytes not held by the producer's sealed-but-unreleased slices.
    pub fn bytes_free(&self) -> usize {
        self.lock().free_space
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            capacity: self.capacity(),
            required_size: self.required_size(),
            bytes_free: state.free_space,
            high_watermark: state.high_watermark,
            slices_flushed: state.next_sequence,
            slices_released: state.next_release,
            slices_pending: state.pending.len(),
            backpressure_stalls: state.backpressure_stalls,
            stalled_for: state.stalled_for,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum QueueError {
    #[error("the queue's write cursor was already claimed")]
    CursorClaimed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn queue(required: usize, buffer: usize) -> Arc<CommandBufferQueue> {
        Arc::new(CommandBufferQueue::new(
            QueueConfig::new(required, buffer).unwrap(),
        ))
    }

    fn write(cursor: &mut WriteCursor, n: usize) {
        cursor.reserve(n).unwrap().fill(1);
    }

    #[test]
    fn one_flush_one_slice() {
        let q = queue(64, 256);
        let mut cursor = q.write_cursor().unwrap();
        write(&mut cursor, 40);
        write(&mut cursor, 24);
        q.flush(&mut cursor);
        let slices = q.wait_for_commands();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 64);
        assert_eq!(slices[0].sequence(), 0);
        assert_eq!(q.bytes_free(), 192);
        for slice in slices {
            q.release_buffer(slice);
        }
        assert_eq!(q.bytes_free(), 256);
    }

    #[test]
    fn empty_flush_enqueues_nothing() {
        let q = queue(64, 256);
        let mut cursor = q.write_cursor().unwrap();
        q.flush(&mut cursor);
        q.flush(&mut cursor);
        assert_eq!(q.stats().slices_flushed, 0);
        q.request_exit();
        assert!(q.wait_for_commands().is_empty());
    }

    #[test]
    fn second_cursor_is_refused() {
        let q = queue(64, 256);
        let _cursor = q.write_cursor().unwrap();
        assert_eq!(q.write_cursor().unwrap_err(), QueueError::CursorClaimed);
    }

    #[test]
    fn slices_come_back_in_flush_order() {
        let q = queue(8, 256);
        let mut cursor = q.write_cursor().unwrap();
        for n in [8, 16, 24] {
            write(&mut cursor, n);
            q.flush(&mut cursor);
        }
        let slices = q.wait_for_commands();
        let lens: Vec<_> = slices.iter().map(Slice::len).collect();
        assert_eq!(lens, vec![8, 16, 24]);
        let sequences: Vec<_> = slices.iter().map(Slice::sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        for slice in slices {
            q.release_buffer(slice);
        }
        assert_eq!(q.stats().slices_released, 3);
    }

    #[test]
    #[should_panic(expected = "released in the order")]
    fn out_of_order_release_panics() {
        let q = queue(8, 256);
        let mut cursor = q.write_cursor().unwrap();
        write(&mut cursor, 8);
        q.flush(&mut cursor);
        write(&mut cursor, 8);
        q.flush(&mut cursor);
        let mut slices = q.wait_for_commands();
        let second = slices.pop().unwrap();
        q.release_buffer(second);
    }

    #[test]
    fn high_watermark_is_monotonic() {
        let q = queue(8, 128);
        let mut cursor = q.write_cursor().unwrap();
        write(&mut cursor, 96);
        q.flush(&mut cursor);
        assert_eq!(q.high_watermark(), 96);
        for slice in q.wait_for_commands() {
            q.release_buffer(slice);
        }
        write(&mut cursor, 16);
        q.flush(&mut cursor);
        assert_eq!(q.high_watermark(), 96);
    }

    #[test]
    fn flush_blocks_until_release() {
        let q = queue(64, 128);
        let mut cursor = q.write_cursor().unwrap();
        write(&mut cursor, 64);
        q.flush(&mut cursor);
        let returned = Arc::new(AtomicBool::new(false));
        let producer = {
            let q = q.clone();
            let returned = returned.clone();
            thread::spawn(move || {
                write(&mut cursor, 32);
                //32 free, but 32 bytes before the end plus 64 required are needed
                q.flush(&mut cursor);
                returned.store(true, Ordering::SeqCst);
                cursor
            })
        };
        thread::sleep(std::time::Duration::from_millis(50));
        assert!(!returned.load(Ordering::SeqCst));
        let mut slices = q.wait_for_commands().into_iter();
        //the first slice may arrive alone or together with the second
        let first = slices.next().unwrap();
        assert_eq!(first.len(), 64);
        q.release_buffer(first);
        let cursor = producer.join().unwrap();
        assert!(returned.load(Ordering::SeqCst));
        assert!(cursor.bytes_free() >= 64);
        assert_eq!(q.stats().backpressure_stalls, 1);
        for slice in slices {
            q.release_buffer(slice);
        }
    }

    #[test]
    fn refresh_counts_unflushed_bytes() {
        let q = queue(64, 256);
        let mut cursor = q.write_cursor().unwrap();
        write(&mut cursor, 96);
        assert_eq!(q.high_watermark(), 0);
        q.refresh(&mut cursor);
        assert_eq!(q.high_watermark(), 96);
        q.flush(&mut cursor);
        assert_eq!(q.high_watermark(), 96);
    }

    #[test]
    fn flush_leaves_room_past_the_wrap() {
        let q = queue(64, 128);
        let mut cursor = q.write_cursor().unwrap();
        write(&mut cursor, 32);
        q.flush(&mut cursor);
        for slice in q.wait_for_commands() {
            q.release_buffer(slice);
        }
        write(&mut cursor, 64);
        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                //64 free, but a 64 byte record at 96 costs 32 of padding too
                q.flush(&mut cursor);
                cursor
            })
        };
        let slices = q.wait_for_commands();
        assert_eq!(slices[0].len(), 64);
        for slice in slices {
            q.release_buffer(slice);
        }
        let mut cursor = producer.join().unwrap();
        assert!(cursor.cost_of(64) <= cursor.bytes_free());
        assert_eq!(cursor.reserve(64).unwrap().offset(), 128);
    }

    #[test]
    fn flush_pads_when_waiting_could_never_make_room() {
        let q = queue(64, 96);
        let mut cursor = q.write_cursor().unwrap();
        write(&mut cursor, 48);
        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                //48 before the end plus 64 required is more than the store holds
                q.flush(&mut cursor);
                cursor
            })
        };
        let slices = q.wait_for_commands();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 96);
        for slice in slices {
            q.release_buffer(slice);
        }
        let mut cursor = producer.join().unwrap();
        assert_eq!(cursor.position(), 96);
        assert_eq!(cursor.reserve(64).unwrap().offset(), 96);
    }

    #[test]
    fn exit_unblocks_consumer() {
        let q = queue(8, 64);
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.wait_for_commands().len())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        q.request_exit();
        assert_eq!(consumer.join().unwrap(), 0);
        assert!(q.is_exit_requested());
    }

    #[test]
    fn exit_unblocks_producer() {
        let q = queue(64, 64);
        let mut cursor = q.write_cursor().unwrap();
        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                write(&mut cursor, 8);
                q.flush(&mut cursor);
            })
        };
        thread::sleep(std::time::Duration::from_millis(20));
        q.request_exit();
        producer.join().unwrap();
    }

    #[test]
    fn exit_returns_pending_first() {
        let q = queue(8, 64);
        let mut cursor = q.write_cursor().unwrap();
        write(&mut cursor, 8);
        q.flush(&mut cursor);
        q.request_exit();
        let slices = q.wait_for_commands();
        assert_eq!(slices.len(), 1);
        for slice in slices {
            q.release_buffer(slice);
        }
        assert!(q.wait_for_commands().is_empty());
        assert!(q.wait_for_commands().is_empty());
    }
}
