//! Buffer fill strategies.
//!
//! A window whose stride equals the sample size holds exactly the enabled
//! channels back to back, so input bytes are copied straight into it. Any
//! other layout is filled slot by slot through the buffer's per-sample
//! visitor.

use std::io::{self, Read};

use tracing::{debug, error, trace};

use crate::engine::budget::SampleBudget;
use crate::hardware::{HardwareBuffer, SampleFlow};
use crate::shutdown::{RunControl, EXIT_SUCCESS};

/// Fill strategy for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPath {
    /// Copy input bytes straight into the window
    Direct,
    /// Fill one channel slot at a time
    PerSample,
}

impl FillPath {
    /// Pick the strategy for a window of stride `step`.
    pub fn select(step: usize, sample_size: usize) -> Self {
        if step == sample_size {
            Self::Direct
        } else {
            Self::PerSample
        }
    }
}

/// Result of filling one window.
#[derive(Debug)]
pub enum Fill {
    /// `samples` samples are ready to push.
    Ready {
        /// Whole samples written into the window
        samples: usize,
        /// Input ended while filling; stop after this push
        input_ended: bool,
    },
    /// Input ended before a direct fill completed; nothing to push.
    Exhausted {
        /// Bytes read before the end of input
        read: usize,
    },
    /// Reading the input failed during a direct fill; nothing to push.
    Failed(io::Error),
}

/// Read until `buf` is full or the input ends.
///
/// Returns the number of bytes read; fewer than `buf.len()` means the input
/// reached end of stream. Interrupted reads are retried.
pub fn read_full<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Parameters shared by both fill strategies.
pub struct FillContext<'a> {
    /// Bytes per sample of the enabled channel set
    pub sample_size: usize,
    /// Whether the buffer replays its first fill
    pub cyclic: bool,
    /// Remaining sample budget
    pub budget: &'a mut SampleBudget,
    /// Stop authority, told when the budget runs out
    pub control: &'a RunControl,
}

impl FillContext<'_> {
    fn budget_spent(&self) {
        if !self.cyclic {
            debug!("Sample budget exhausted");
            self.control.stop_gracefully(EXIT_SUCCESS);
        }
    }
}

/// Fill the window with a single contiguous copy from `input`.
pub fn fill_direct<B, R>(buffer: &mut B, input: &mut R, ctx: &mut FillContext<'_>) -> Fill
where
    B: HardwareBuffer + ?Sized,
    R: Read + ?Sized,
{
    let window = buffer.window();
    let len = ctx.budget.clamp_bytes(window.len(), ctx.sample_size);

    let read = match read_full(input, &mut window[..len]) {
        Ok(read) => read,
        Err(e) => return Fill::Failed(e),
    };
    if read < len {
        return Fill::Exhausted { read };
    }

    let samples = len / ctx.sample_size;
    trace!(samples = samples, bytes = len, "Direct fill");
    if ctx.budget.consume(samples as u64) {
        ctx.budget_spent();
    }

    Fill::Ready {
        samples,
        input_ended: false,
    }
}

/// Fill the window one channel slot at a time.
///
/// Read errors and scan errors are logged and end the scan early; whatever
/// was filled up to that point is still pushed, or the whole window when
/// nothing was.
pub fn fill_per_sample<B, R>(buffer: &mut B, input: &mut R, ctx: &mut FillContext<'_>) -> Fill
where
    B: HardwareBuffer + ?Sized,
    R: Read + ?Sized,
{
    let mut samples = 0usize;
    let mut input_ended = false;
    let mut budget_hit = false;
    let budget = &mut *ctx.budget;

    let scan = buffer.foreach_sample(&mut |slot| {
        let wanted = slot.data.len();
        match read_full(input, slot.data) {
            Ok(n) if n == wanted => {}
            Ok(_) => {
                input_ended = true;
                return SampleFlow::Stop;
            }
            Err(e) => {
                error!(channel = slot.channel, "Unable to read sample: {}", e);
                return SampleFlow::Stop;
            }
        }

        if !slot.last_in_sample {
            return SampleFlow::Continue;
        }
        samples += 1;
        if budget.consume(1) {
            budget_hit = true;
            return SampleFlow::Stop;
        }
        SampleFlow::Continue
    });

    if let Err(e) = scan {
        error!("{}", e);
    }
    if budget_hit {
        ctx.budget_spent();
    }
    if input_ended {
        debug!(samples = samples, "Input ended during per-sample fill");
    }
    trace!(samples = samples, "Per-sample fill");

    Fill::Ready {
        samples,
        input_ended,
    }
}
