//! # Pipeline Orchestrator
//!
//! Owns the ring buffer and the two worker threads that share it.
//!
//! ## Architecture
//! - **Ingestion thread**: reads lines from the [`SampleSource`] and pushes
//!   valid samples into the ring buffer
//! - **Tick thread**: on a fixed interval, snapshots the buffer, runs the
//!   [`FrameProcessor`] and hands the frame to the [`FrameSink`]
//! - **Shutdown**: an atomic running flag plus a crossbeam shutdown channel;
//!   each worker reports completion on its own channel so `stop()` can wait
//!   a bounded time and detach anything still blocked in a read

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::AnalysisFrame;
use crate::config::ScopeConfig;
use crate::error::ScopeError;
use crate::filter::FilterSpec;
use crate::processing::FrameProcessor;
use crate::ring_buffer::SampleRingBuffer;
use crate::source::{SampleSource, run_ingestion};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consumer of analysis frames, called synchronously from the tick thread.
pub trait FrameSink: Send {
    fn present(&mut self, frame: AnalysisFrame);
}

impl<F> FrameSink for F
where
    F: FnMut(AnalysisFrame) + Send,
{
    fn present(&mut self, frame: AnalysisFrame) {
        self(frame)
    }
}

/// Sink forwarding frames over a channel.
///
/// The send blocks while the channel is full, so a bounded channel makes a
/// slow consumer delay the next tick instead of queueing frames.
pub fn channel_sink(sender: Sender<AnalysisFrame>) -> impl FrameSink {
    move |frame: AnalysisFrame| {
        if sender.send(frame).is_err() {
            debug!("[TICK] Frame receiver dropped");
        }
    }
}

/// Shared, runtime-adjustable filter selection.
///
/// Clones refer to the same setting. The pipeline reads it once per tick.
#[derive(Debug, Clone, Default)]
pub struct FilterControl {
    spec: Arc<Mutex<FilterSpec>>,
}

impl FilterControl {
    pub fn new(spec: FilterSpec) -> Self {
        Self {
            spec: Arc::new(Mutex::new(spec)),
        }
    }

    pub fn get(&self) -> FilterSpec {
        *lock(&self.spec)
    }

    pub fn set(&self, spec: FilterSpec) {
        info!("[PIPELINE] Filter set to {:?}", spec);
        *lock(&self.spec) = spec;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Running,
}

/// A worker thread that signals on `done` as its last action.
struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl Worker {
    fn spawn<F>(name: &'static str, body: F) -> Result<Self, ScopeError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                body();
                let _ = done_tx.send(());
            })
            .map_err(ScopeError::Spawn)?;
        Ok(Self {
            name,
            handle,
            done: done_rx,
        })
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Joins the thread if it finishes within `timeout`, otherwise detaches it.
    fn join_within(self, timeout: Duration) {
        match self.done.recv_timeout(timeout) {
            // Disconnected means the body panicked before signalling.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    warn!("[PIPELINE] {} thread panicked", self.name);
                } else {
                    debug!("[PIPELINE] {} thread joined", self.name);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "[PIPELINE] {} thread still busy after {:?}, detaching",
                    self.name, timeout
                );
            }
        }
    }
}

/// Threads and signals belonging to one Running period.
struct Workers {
    running: Arc<AtomicBool>,
    shutdown_tx: Sender<()>,
    ingest: Worker,
    ticker: Worker,
}

/// Acquisition-and-analysis pipeline with a Stopped/Running lifecycle.
pub struct Pipeline {
    config: ScopeConfig,
    buffer: Arc<SampleRingBuffer>,
    filter: FilterControl,
    source: Arc<Mutex<Box<dyn SampleSource>>>,
    sink: Arc<Mutex<Box<dyn FrameSink>>>,
    processor: Arc<Mutex<FrameProcessor>>,
    workers: Option<Workers>,
}

impl Pipeline {
    /// Builds a stopped pipeline. The filter starts at `config.filter`.
    pub fn new<S, K>(config: ScopeConfig, source: S, sink: K) -> Result<Self, ScopeError>
    where
        S: SampleSource + 'static,
        K: FrameSink + 'static,
    {
        config.validate()?;
        let buffer = Arc::new(SampleRingBuffer::new(config.acquisition.buffer_size)?);
        let processor = FrameProcessor::new(&config);
        let source: Box<dyn SampleSource> = Box::new(source);
        let sink: Box<dyn FrameSink> = Box::new(sink);
        Ok(Self {
            filter: FilterControl::new(config.filter),
            buffer,
            source: Arc::new(Mutex::new(source)),
            sink: Arc::new(Mutex::new(sink)),
            processor: Arc::new(Mutex::new(processor)),
            workers: None,
            config,
        })
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        match self.workers {
            Some(_) => PipelineState::Running,
            None => PipelineState::Stopped,
        }
    }

    /// Handle to the filter selection; changes apply from the next tick.
    pub fn filter_control(&self) -> FilterControl {
        self.filter.clone()
    }

    pub fn buffer(&self) -> Arc<SampleRingBuffer> {
        Arc::clone(&self.buffer)
    }

    /// True while the ingestion thread of the current run is alive.
    pub fn ingestion_active(&self) -> bool {
        self.workers
            .as_ref()
            .is_some_and(|workers| !workers.ingest.is_finished())
    }

    /// Runs one tick on the calling thread and returns the frame instead of
    /// presenting it.
    pub fn tick_once(&self) -> AnalysisFrame {
        let window = self.buffer.snapshot();
        lock(&self.processor).process(&window, self.filter.get())
    }

    /// Stopped → Running. A no-op when already running.
    pub fn start(&mut self) -> Result<(), ScopeError> {
        if self.workers.is_some() {
            debug!("[PIPELINE] start() ignored, already running");
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let ingest = {
            let source = Arc::clone(&self.source);
            let buffer = Arc::clone(&self.buffer);
            let running = Arc::clone(&running);
            Worker::spawn("scope-ingest", move || {
                // A reader detached by an earlier stop() still holds this lock
                // until its blocked read returns.
                let mut source = lock(&source);
                info!("[INGEST] Starting ingestion loop");
                run_ingestion(&mut **source, &buffer, &running);
            })?
        };

        let ticker = {
            let buffer = Arc::clone(&self.buffer);
            let filter = self.filter.clone();
            let processor = Arc::clone(&self.processor);
            let sink = Arc::clone(&self.sink);
            let tick_running = Arc::clone(&running);
            let interval = self.config.acquisition.tick_interval();
            let spawned = Worker::spawn("scope-tick", move || {
                run_ticks(interval, &tick_running, &shutdown_rx, || {
                    let window = buffer.snapshot();
                    let frame = lock(&processor).process(&window, filter.get());
                    lock(&sink).present(frame);
                });
            });
            match spawned {
                Ok(worker) => worker,
                Err(e) => {
                    running.store(false, Ordering::Release);
                    ingest.join_within(self.config.acquisition.join_timeout());
                    return Err(e);
                }
            }
        };

        info!(
            "[PIPELINE] Running: {} Hz, {} sample window, tick every {:?}",
            self.config.acquisition.sample_rate,
            self.buffer.capacity(),
            self.config.acquisition.tick_interval()
        );
        self.workers = Some(Workers {
            running,
            shutdown_tx,
            ingest,
            ticker,
        });
        Ok(())
    }

    /// Running → Stopped. A no-op when already stopped.
    ///
    /// An in-flight tick completes. An ingestion read that is blocked is left
    /// to return on its own; its thread is detached after the join timeout.
    pub fn stop(&mut self) {
        let Some(workers) = self.workers.take() else {
            debug!("[PIPELINE] stop() ignored, already stopped");
            return;
        };

        workers.running.store(false, Ordering::Release);
        let _ = workers.shutdown_tx.try_send(());

        let timeout = self.config.acquisition.join_timeout();
        workers.ticker.join_within(timeout);
        workers.ingest.join_within(timeout);
        info!("[PIPELINE] Stopped");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Calls `on_tick` every `interval` until shutdown is signalled.
///
/// Ticks that fall due while `on_tick` is still running are dropped by the
/// ticker channel rather than queued.
fn run_ticks<F: FnMut()>(
    interval: Duration,
    running: &AtomicBool,
    shutdown_rx: &Receiver<()>,
    mut on_tick: F,
) {
    let ticker = crossbeam_channel::tick(interval);
    loop {
        crossbeam_channel::select! {
            recv(ticker) -> _ => {
                if !running.load(Ordering::Acquire) {
                    break;
                }
                on_tick();
            },
            recv(shutdown_rx) -> _ => {
                debug!("[TICK] Received shutdown signal");
                break;
            },
        }
    }
}
