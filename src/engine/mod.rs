//! Buffer streaming engine.
//!
//! The engine owns the loop that moves bytes from an input source into a
//! [`HardwareBuffer`]:
//!
//! 1. pick the fill strategy from the window stride ([`FillPath`])
//! 2. fill the window, honouring the [`SampleBudget`]
//! 3. push the filled samples
//! 4. in benchmark mode, feed the push duration to the [`ThroughputMeter`]
//! 5. in cyclic mode, idle until a stop is requested
//!
//! The loop runs while [`RunControl::is_running`] holds. It never destroys
//! the buffer; the caller does that once the engine returns, whatever the
//! exit reason.

pub mod budget;
pub mod fill;
pub mod throughput;

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::hardware::HardwareBuffer;
use crate::shutdown::{RunControl, EXIT_FAILURE};

pub use budget::SampleBudget;
pub use fill::{read_full, Fill, FillContext, FillPath};
pub use throughput::{Throughput, ThroughputMeter, PUSHES_PER_REPORT};

/// Why the streaming loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopExit {
    /// The run state left `Running` (budget spent or signal)
    #[default]
    Stopped,
    /// The input source reached end of stream
    InputExhausted,
    /// Reading the input source failed
    InputFailed,
    /// Pushing to the device failed or was cancelled
    PushFailed,
}

impl fmt::Display for LoopExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::InputExhausted => write!(f, "input exhausted"),
            Self::InputFailed => write!(f, "input failed"),
            Self::PushFailed => write!(f, "push failed"),
        }
    }
}

/// What one run of the engine achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Successful pushes
    pub pushes: u64,
    /// Samples committed to the device, including whole windows pushed after
    /// an empty per-sample fill
    pub samples: u64,
    /// Bytes committed to the device
    pub bytes: u64,
    /// Why the loop ended
    pub exit: LoopExit,
}

/// Streaming loop over one hardware buffer.
pub struct StreamEngine {
    sample_size: usize,
    budget: SampleBudget,
    cyclic: bool,
    benchmark: bool,
    idle_tick: Duration,
    control: Arc<RunControl>,
}

impl StreamEngine {
    /// Engine for samples of `sample_size` bytes, configured from `config`.
    pub fn new(config: &StreamConfig, sample_size: usize, control: Arc<RunControl>) -> Self {
        Self {
            sample_size,
            budget: SampleBudget::from_count(config.samples),
            cyclic: config.cyclic,
            benchmark: config.benchmark,
            idle_tick: config.idle_tick,
            control,
        }
    }

    /// Remaining sample budget.
    pub fn budget(&self) -> SampleBudget {
        self.budget
    }

    /// Run the loop until a stop request, end of input or a push failure.
    ///
    /// Throughput reports are written to `report` in benchmark mode.
    pub fn run<B, R, W>(&mut self, buffer: &mut B, input: &mut R, report: &mut W) -> StreamSummary
    where
        B: HardwareBuffer + ?Sized,
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let mut meter = ThroughputMeter::new(buffer.capacity(), self.sample_size);
        let mut summary = StreamSummary::default();

        info!(
            capacity = buffer.capacity(),
            sample_size = self.sample_size,
            cyclic = self.cyclic,
            benchmark = self.benchmark,
            budget = ?self.budget.remaining(),
            "Streaming started"
        );

        summary.exit = loop {
            if !self.control.is_running() {
                break LoopExit::Stopped;
            }

            let started = self.benchmark.then(Instant::now);

            let path = FillPath::select(buffer.step(), self.sample_size);
            let mut ctx = FillContext {
                sample_size: self.sample_size,
                cyclic: self.cyclic,
                budget: &mut self.budget,
                control: &self.control,
            };
            let fill = match path {
                FillPath::Direct => fill::fill_direct(buffer, input, &mut ctx),
                FillPath::PerSample => fill::fill_per_sample(buffer, input, &mut ctx),
            };

            let (samples, input_ended) = match fill {
                Fill::Ready {
                    samples,
                    input_ended,
                } => (samples, input_ended),
                Fill::Exhausted { read } => {
                    debug!(read = read, "Input ended before the buffer was filled");
                    break LoopExit::InputExhausted;
                }
                Fill::Failed(e) => {
                    error!("Unable to read input: {}", e);
                    self.control.stop_gracefully(EXIT_FAILURE);
                    break LoopExit::InputFailed;
                }
            };

            // A per-sample scan that filled nothing still loads the window
            let samples = match path {
                FillPath::PerSample if samples == 0 && !input_ended => {
                    debug!("Per-sample fill was empty, pushing the whole window");
                    buffer.capacity()
                }
                _ => samples,
            };

            if samples > 0 {
                if let Err(e) = buffer.push(samples) {
                    if e.is_cancelled() {
                        debug!("Push cancelled");
                    } else {
                        error!("{}", e);
                        self.control.stop_gracefully(EXIT_FAILURE);
                    }
                    break LoopExit::PushFailed;
                }
                summary.pushes += 1;
                summary.samples += samples as u64;
                summary.bytes += (samples * self.sample_size) as u64;
            }

            if input_ended {
                break LoopExit::InputExhausted;
            }

            if let Some(started) = started {
                if let Some(rate) = meter.record(started.elapsed()) {
                    if let Err(e) = write!(report, "\x1b[2K\rThroughput: {}", rate)
                        .and_then(|_| report.flush())
                    {
                        warn!("Unable to write throughput report: {}", e);
                    }
                }
            }

            if self.cyclic {
                debug!("Cyclic buffer loaded, idling");
                while self.control.idle(self.idle_tick) {}
            }
        };

        info!(
            pushes = summary.pushes,
            samples = summary.samples,
            bytes = summary.bytes,
            exit = %summary.exit,
            "Streaming finished"
        );
        summary
    }
}
