//! Row-major staging buffers and the pool that recycles them.

use std::sync::mpsc::{self, Receiver, Sender};

use super::slot::{Slot, SLOT_WIDTH};

/// One row group's worth of rows laid out row-major, one slot per field.
///
/// Slot `(row, ordinal)` lives at byte `(row * columns + ordinal) * SLOT_WIDTH`.
#[derive(Debug)]
pub struct StagingBuffer {
    bytes: Vec<u8>,
    columns: usize,
    capacity_rows: usize,
    rows: usize,
}

impl StagingBuffer {
    pub fn new(capacity_rows: usize, columns: usize) -> Self {
        Self {
            bytes: vec![0; capacity_rows * columns * SLOT_WIDTH],
            columns,
            capacity_rows,
            rows: 0,
        }
    }

    /// Number of committed rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn capacity_rows(&self) -> usize {
        self.capacity_rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn is_full(&self) -> bool {
        self.rows >= self.capacity_rows
    }

    #[inline]
    fn offset(&self, row: usize, ordinal: usize) -> usize {
        (row * self.columns + ordinal) * SLOT_WIDTH
    }

    /// Write a slot into the row currently being filled.
    #[inline]
    pub fn write_slot(&mut self, ordinal: usize, slot: Slot) {
        debug_assert!(ordinal < self.columns);
        debug_assert!(!self.is_full());
        let at = self.offset(self.rows, ordinal);
        self.bytes[at..at + SLOT_WIDTH].copy_from_slice(&slot);
    }

    /// Mark the row being filled as complete.
    pub fn commit_row(&mut self) {
        debug_assert!(!self.is_full());
        self.rows += 1;
    }

    /// Slots of one column across all committed rows.
    pub fn column_slots(&self, ordinal: usize) -> impl Iterator<Item = &[u8]> + '_ {
        let stride = self.columns * SLOT_WIDTH;
        let end = self.rows * stride;
        (ordinal * SLOT_WIDTH..end)
            .step_by(stride.max(1))
            .map(move |at| &self.bytes[at..at + SLOT_WIDTH])
    }

    /// Zero the buffer and forget its rows so it can be filled again.
    pub fn reset(&mut self) {
        let used = ((self.rows + 1).min(self.capacity_rows)) * self.columns * SLOT_WIDTH;
        self.bytes[..used].fill(0);
        self.rows = 0;
    }
}

/// Hands out staging buffers, reusing the ones the flush worker sends back.
///
/// Buffers travel by value: the producer owns the buffer it fills, the worker
/// owns the one it is flushing, and a spent buffer only comes back through the
/// recycler channel.
#[derive(Debug)]
pub struct BufferPool {
    capacity_rows: usize,
    columns: usize,
    returned: Receiver<StagingBuffer>,
    recycler: Sender<StagingBuffer>,
    allocated: usize,
}

impl BufferPool {
    pub fn new(capacity_rows: usize, columns: usize) -> Self {
        let (recycler, returned) = mpsc::channel();
        Self {
            capacity_rows,
            columns,
            returned,
            recycler,
            allocated: 0,
        }
    }

    /// Handle the flush worker uses to give buffers back.
    pub fn recycler(&self) -> BufferRecycler {
        BufferRecycler(self.recycler.clone())
    }

    /// Take a returned buffer if one is waiting, otherwise allocate.
    pub fn acquire(&mut self) -> StagingBuffer {
        match self.returned.try_recv() {
            Ok(buffer) => buffer,
            Err(_) => {
                self.allocated += 1;
                StagingBuffer::new(self.capacity_rows, self.columns)
            }
        }
    }

    /// Total buffers allocated over the pool's lifetime.
    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

#[derive(Debug, Clone)]
pub struct BufferRecycler(Sender<StagingBuffer>);

impl BufferRecycler {
    pub fn recycle(&self, mut buffer: StagingBuffer) {
        buffer.reset();
        // The pool is gone once the writer shuts down; the buffer is simply dropped.
        let _ = self.0.send(buffer);
    }
}
