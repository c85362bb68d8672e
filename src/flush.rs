//! Background flushing of staging buffers.
//!
//! The producer fills one [`StagingBuffer`] while a single worker thread
//! transposes and writes the previous one. Buffers move through a rendezvous
//! channel, so a handoff only completes once the worker is ready for it and
//! no more than two buffers ever exist.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, info};

use crate::schema::TableSchema;
use crate::sink::{ColumnarSink, SinkError, SinkSummary};
use crate::staging::{BufferPool, BufferRecycler, DictionarySnapshot, SlotError, StagingBuffer};
use crate::transpose::transpose;

/// Errors raised by the flush worker.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error("failed to decode row group {sequence}: {source}")]
    Transpose {
        sequence: u64,
        #[source]
        source: SlotError,
    },

    #[error("failed to write row group {sequence}: {source}")]
    Sink {
        sequence: u64,
        #[source]
        source: SinkError,
    },

    #[error("failed to close sink: {0}")]
    Close(#[source] SinkError),

    #[error("failed to start flush worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("flush worker received data before the sink was opened")]
    NotOpened,

    #[error("flush worker panicked")]
    WorkerPanicked,

    #[error("flush worker exited early")]
    WorkerExited,
}

/// Where the coordinator is in its lifecycle, as seen by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// Worker started, sink not opened yet.
    Idle,
    /// The producer is filling a buffer.
    Filling,
    /// The producer is waiting for the worker to take a full buffer.
    Handoff,
    /// The queue is closed and the worker is finishing.
    ShuttingDown,
    /// The worker exited cleanly and the sink is closed.
    Drained,
    /// The worker failed; nothing more will be written.
    Failed,
}

/// Totals reported by the worker when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Row groups written by this worker.
    pub row_groups: usize,
    /// Rows written by this worker.
    pub rows: usize,
    /// What the sink reported on close, including any row groups it already held.
    pub sink: SinkSummary,
}

/// A full (or final partial) buffer and the dictionary it refers to.
struct FlushBatch {
    buffer: StagingBuffer,
    snapshot: DictionarySnapshot,
    sequence: u64,
}

enum WorkerMessage {
    /// The sink to write to. Always the first message.
    Open {
        sink: Box<dyn ColumnarSink>,
        schema: TableSchema,
        recycler: BufferRecycler,
    },
    Flush(FlushBatch),
}

type WorkerResult = Result<WorkerSummary, FlushError>;

/// Producer side of the flush pipeline.
pub struct FlushCoordinator {
    label: String,
    sender: Option<SyncSender<WorkerMessage>>,
    worker: Option<JoinHandle<WorkerResult>>,
    pool: Option<BufferPool>,
    state: FlushState,
    sequence: u64,
}

impl FlushCoordinator {
    /// Start the worker thread. It waits for [`FlushCoordinator::open`].
    pub fn spawn(label: &str) -> Result<Self, FlushError> {
        let (sender, receiver) = mpsc::sync_channel::<WorkerMessage>(0);
        let worker = thread::Builder::new()
            .name(format!("rowquet-flush-{label}"))
            .spawn(move || worker_main(receiver))?;

        Ok(Self {
            label: label.to_string(),
            sender: Some(sender),
            worker: Some(worker),
            pool: None,
            state: FlushState::Idle,
            sequence: 0,
        })
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    /// Buffers allocated so far. Stays at two or fewer.
    pub fn buffers_allocated(&self) -> usize {
        self.pool.as_ref().map_or(0, BufferPool::allocated)
    }

    /// Give the opened sink to the worker and return the first buffer to fill.
    pub fn open(
        &mut self,
        sink: Box<dyn ColumnarSink>,
        schema: TableSchema,
        rows_per_group: usize,
    ) -> Result<StagingBuffer, FlushError> {
        let mut pool = BufferPool::new(rows_per_group, schema.len());
        let message = WorkerMessage::Open {
            sink,
            schema,
            recycler: pool.recycler(),
        };
        self.send(message)?;

        let buffer = pool.acquire();
        self.pool = Some(pool);
        self.state = FlushState::Filling;
        Ok(buffer)
    }

    /// Hand a full buffer to the worker, blocking until it is taken, and
    /// return an empty buffer for the next row group.
    pub fn hand_off(
        &mut self,
        buffer: StagingBuffer,
        snapshot: DictionarySnapshot,
    ) -> Result<StagingBuffer, FlushError> {
        self.state = FlushState::Handoff;
        self.send_batch(buffer, snapshot)?;
        self.state = FlushState::Filling;

        let pool = self.pool.as_mut().ok_or(FlushError::NotOpened)?;
        Ok(pool.acquire())
    }

    /// Surface a worker failure without blocking.
    pub fn check(&mut self) -> Result<(), FlushError> {
        let finished = self.worker.as_ref().is_some_and(JoinHandle::is_finished);
        if finished && self.state != FlushState::Drained {
            return Err(self.join_failed());
        }
        Ok(())
    }

    /// Flush `remaining` if it holds rows, close the queue and wait for the
    /// worker to write everything and close the sink.
    pub fn shutdown(
        &mut self,
        remaining: Option<(StagingBuffer, DictionarySnapshot)>,
    ) -> Result<WorkerSummary, FlushError> {
        self.state = FlushState::ShuttingDown;
        if let Some((buffer, snapshot)) = remaining {
            if !buffer.is_empty() {
                self.send_batch(buffer, snapshot)?;
            }
        }

        // Dropping the sender is the worker's signal to finish.
        self.sender = None;
        let result = self.join();
        self.state = match result {
            Ok(_) => FlushState::Drained,
            Err(_) => FlushState::Failed,
        };
        if let Ok(summary) = &result {
            info!(
                label = %self.label,
                row_groups = summary.row_groups,
                rows = summary.rows,
                "flush worker drained"
            );
        }
        result
    }

    fn send_batch(
        &mut self,
        buffer: StagingBuffer,
        snapshot: DictionarySnapshot,
    ) -> Result<(), FlushError> {
        let batch = FlushBatch {
            buffer,
            snapshot,
            sequence: self.sequence,
        };
        self.send(WorkerMessage::Flush(batch))?;
        self.sequence += 1;
        Ok(())
    }

    fn send(&mut self, message: WorkerMessage) -> Result<(), FlushError> {
        let Some(sender) = &self.sender else {
            return Err(FlushError::WorkerExited);
        };
        if sender.send(message).is_err() {
            // The receiver only goes away when the worker returns.
            return Err(self.join_failed());
        }
        Ok(())
    }

    /// Join a worker that stopped while the producer still had work for it.
    fn join_failed(&mut self) -> FlushError {
        self.sender = None;
        self.state = FlushState::Failed;
        match self.join() {
            Err(e) => e,
            Ok(_) => FlushError::WorkerExited,
        }
    }

    fn join(&mut self) -> WorkerResult {
        match self.worker.take() {
            Some(handle) => handle.join().unwrap_or(Err(FlushError::WorkerPanicked)),
            None => Err(FlushError::WorkerExited),
        }
    }
}

impl Drop for FlushCoordinator {
    fn drop(&mut self) {
        self.sender = None;
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn worker_main(receiver: Receiver<WorkerMessage>) -> WorkerResult {
    let (mut sink, schema, recycler) = match receiver.recv() {
        Ok(WorkerMessage::Open {
            sink,
            schema,
            recycler,
        }) => (sink, schema, recycler),
        Ok(WorkerMessage::Flush(_)) => return Err(FlushError::NotOpened),
        // Closed before any row was complete: nothing to write.
        Err(_) => return Ok(WorkerSummary::default()),
    };

    let mut summary = WorkerSummary::default();
    while let Ok(message) = receiver.recv() {
        let batch = match message {
            WorkerMessage::Flush(batch) => batch,
            WorkerMessage::Open { .. } => return Err(FlushError::WorkerExited),
        };

        let rows = batch.buffer.rows();
        write_row_group(sink.as_mut(), &schema, &batch)?;
        summary.row_groups += 1;
        summary.rows += rows;
        debug!(sequence = batch.sequence, rows, "flushed row group");

        recycler.recycle(batch.buffer);
    }

    summary.sink = sink.close().map_err(FlushError::Close)?;
    Ok(summary)
}

fn write_row_group(
    sink: &mut dyn ColumnarSink,
    schema: &TableSchema,
    batch: &FlushBatch,
) -> Result<(), FlushError> {
    let sequence = batch.sequence;
    let columns = transpose(&batch.buffer, schema, &batch.snapshot)
        .map_err(|source| FlushError::Transpose { sequence, source })?;

    let sink_err = |source: SinkError| FlushError::Sink { sequence, source };
    let mut group = sink.begin_row_group().map_err(sink_err)?;
    for (ordinal, values) in columns.into_iter().enumerate() {
        group.append_column(ordinal, values).map_err(sink_err)?;
    }
    group.finish().map_err(sink_err)
}
