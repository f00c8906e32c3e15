//! ISR → processing double buffer for the electrical ADC stream.
//!
//! ```text
//!   sampling ISR ──push_pair──▶ [ back block ]      ┌─ swap when full ─┐
//!                               [ front block ] ◀───┘                  │
//!   processing task ◀──take()── front (READY → BORROWED → FREE) ───────┘
//! ```
//!
//! The ISR only ever writes the back block and the consumer only reads the
//! front block while it holds a [`BlockGuard`]. When the back block fills
//! and the front block is still borrowed, the ISR restarts the back block
//! instead of stopping and counts an overrun. A ready block that was never
//! taken is replaced by the newer one, also counted as an overrun.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};

/// Voltage/current sample pairs per block.
pub const BLOCK_PAIRS: usize = 2048;
/// Interleaved `u16` values per block.
pub const BLOCK_LEN: usize = BLOCK_PAIRS * 2;

const FREE: u8 = 0;
const READY: u8 = 1;
const BORROWED: u8 = 2;
const SWAPPING: u8 = 3;

pub struct AdcDoubleBuffer {
    blocks: [UnsafeCell<[u16; BLOCK_LEN]>; 2],
    /// Index of the block the ISR is filling.
    back: AtomicUsize,
    /// Write position inside the back block.
    pos: AtomicUsize,
    /// State of the front block.
    front: AtomicU8,
    overruns: AtomicU32,
    completed: AtomicU32,
}

// SAFETY: the producer writes only the back block, the consumer reads only
// the front block while it is BORROWED, and the swap happens only when the
// front block is not BORROWED (enforced by the `front` state machine).
unsafe impl Sync for AdcDoubleBuffer {}

impl AdcDoubleBuffer {
    pub const fn new() -> Self {
        Self {
            blocks: [UnsafeCell::new([0; BLOCK_LEN]), UnsafeCell::new([0; BLOCK_LEN])],
            back: AtomicUsize::new(0),
            pos: AtomicUsize::new(0),
            front: AtomicU8::new(FREE),
            overruns: AtomicU32::new(0),
            completed: AtomicU32::new(0),
        }
    }

    /// Append one sample pair. Producer side; call from a single context.
    pub fn push_pair(&self, voltage: u16, current: u16) {
        let back = self.back.load(Ordering::Acquire);
        let pos = self.pos.load(Ordering::Relaxed);
        // SAFETY: single producer; the back block is never read by the consumer.
        unsafe {
            let block = &mut *self.blocks[back].get();
            block[pos] = voltage;
            block[pos + 1] = current;
        }
        let next = pos + 2;
        if next < BLOCK_LEN {
            self.pos.store(next, Ordering::Relaxed);
            return;
        }
        self.pos.store(0, Ordering::Relaxed);
        self.complete_block(back);
    }

    fn complete_block(&self, back: usize) {
        let state = self.front.load(Ordering::Acquire);
        if state == BORROWED {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if self
            .front
            .compare_exchange(state, SWAPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Consumer borrowed in between; keep its block intact.
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if state == READY {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        self.back.store(1 - back, Ordering::Release);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.front.store(READY, Ordering::Release);
    }

    /// Borrow the newest complete block, if one is waiting.
    pub fn take(&self) -> Option<BlockGuard<'_>> {
        self.front
            .compare_exchange(READY, BORROWED, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        let front = 1 - self.back.load(Ordering::Acquire);
        Some(BlockGuard { buf: self, index: front })
    }

    /// Blocks dropped or restarted because the consumer was late.
    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Blocks handed over to the consumer side.
    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::Relaxed)
    }
}

impl Default for AdcDoubleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Read access to the front block; releases it on drop.
pub struct BlockGuard<'a> {
    buf: &'a AdcDoubleBuffer,
    index: usize,
}

impl core::ops::Deref for BlockGuard<'_> {
    type Target = [u16];

    fn deref(&self) -> &[u16] {
        // SAFETY: the front block is BORROWED, so the producer never swaps
        // it back in while this guard lives.
        unsafe { &*self.buf.blocks[self.index].get() }
    }
}

impl Drop for BlockGuard<'_> {
    fn drop(&mut self) {
        self.buf.front.store(FREE, Ordering::Release);
    }
}
