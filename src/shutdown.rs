//! Run state and cancellation coordination.
//!
//! [`RunControl`] is the single authority the streaming loop polls. It is
//! shared between the loop and the signal watcher, which talk only through:
//!
//! - one atomic run flag ([`RunControl::is_running`])
//! - one explicit "cancel the outstanding buffer operation" request, issued
//!   on the buffer canceller armed by the session
//!
//! The watcher never touches the buffer beyond [`BufferCancel::cancel`]. The
//! session disarms the canceller before destroying the buffer, so the
//! watcher can never reach a destroyed buffer.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::hardware::BufferCancel;

/// Process exit code for a successful run.
pub const EXIT_SUCCESS: i32 = 0;

/// Process exit code for configuration and setup failures.
pub const EXIT_FAILURE: i32 = 1;

/// Termination signals the watcher reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// Operator interrupt (SIGINT / Ctrl-C)
    Interrupt,
    /// Termination request (SIGTERM)
    Terminate,
    /// Controlling terminal hung up (SIGHUP)
    Hangup,
    /// Write to a closed pipe (SIGPIPE)
    Pipe,
}

impl TerminationSignal {
    /// Signal number, used as the process exit code.
    #[cfg(unix)]
    pub fn number(self) -> i32 {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Hangup => libc::SIGHUP,
            Self::Pipe => libc::SIGPIPE,
        }
    }

    /// Signal number, used as the process exit code.
    #[cfg(not(unix))]
    pub fn number(self) -> i32 {
        match self {
            Self::Interrupt => 2,
            Self::Terminate => 15,
            Self::Hangup => 1,
            Self::Pipe => 13,
        }
    }
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
            Self::Hangup => write!(f, "SIGHUP"),
            Self::Pipe => write!(f, "SIGPIPE"),
        }
    }
}

/// Tri-state run state. Leaving `Running` is permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Streaming
    Running,
    /// Stop requested by the engine itself (budget exhausted)
    StoppingGracefully(i32),
    /// Stop requested by a termination signal
    StoppingFatally(TerminationSignal),
}

impl RunState {
    /// Exit code the process should return in this state.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Running => EXIT_SUCCESS,
            Self::StoppingGracefully(code) => code,
            Self::StoppingFatally(signal) => signal.number(),
        }
    }
}

/// Shared run/stop authority for one write session.
pub struct RunControl {
    running: AtomicBool,
    state: Mutex<RunState>,
    wake: Condvar,
    canceller: Mutex<Option<Arc<dyn BufferCancel>>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(true),
            state: Mutex::new(RunState::Running),
            wake: Condvar::new(),
            canceller: Mutex::new(None),
        }
    }
}

impl RunControl {
    /// Create a control in the `Running` state.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether the loop should keep going.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Exit code for the current run state.
    pub fn exit_code(&self) -> i32 {
        self.state().exit_code()
    }

    /// Request a graceful stop with `code`.
    ///
    /// Ignored once any stop has been requested.
    pub fn stop_gracefully(&self, code: i32) {
        let mut state = self.state.lock();
        if *state != RunState::Running {
            return;
        }
        *state = RunState::StoppingGracefully(code);
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_all();
        debug!(code = code, "Graceful stop requested");
    }

    /// Request a stop on behalf of `signal` and cancel the armed buffer.
    ///
    /// A signal overrides a pending graceful stop; the first signal wins over
    /// later ones. Returns `false` if a signal-driven stop was already
    /// pending.
    pub fn stop_fatally(&self, signal: TerminationSignal) -> bool {
        {
            let mut state = self.state.lock();
            if let RunState::StoppingFatally(_) = *state {
                return false;
            }
            *state = RunState::StoppingFatally(signal);
            self.running.store(false, Ordering::SeqCst);
            self.wake.notify_all();
        }

        info!(signal = %signal, "Termination requested");

        if let Some(canceller) = self.canceller.lock().as_ref() {
            debug!("Cancelling outstanding buffer operation");
            canceller.cancel();
        }
        true
    }

    /// Make `canceller` reachable from [`stop_fatally`](Self::stop_fatally).
    ///
    /// If a signal already arrived, the buffer is cancelled right away.
    pub fn arm(&self, canceller: Arc<dyn BufferCancel>) {
        let mut slot = self.canceller.lock();
        if let RunState::StoppingFatally(_) = self.state() {
            canceller.cancel();
        }
        *slot = Some(canceller);
    }

    /// Detach the canceller before its buffer is destroyed.
    pub fn disarm(&self) {
        self.canceller.lock().take();
    }

    /// Sleep up to `tick`, waking early on a stop request.
    ///
    /// Returns whether the loop is still running.
    pub fn idle(&self, tick: Duration) -> bool {
        let mut state = self.state.lock();
        if *state == RunState::Running {
            let _ = self
                .wake
                .wait_while_for(&mut state, |s| *s == RunState::Running, tick);
        }
        *state == RunState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[derive(Default)]
    struct CountingCancel(AtomicUsize);

    impl BufferCancel for CountingCancel {
        fn cancel(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_graceful_stop_is_monotonic() {
        let control = RunControl::new();
        assert!(control.is_running());
        assert_eq!(control.exit_code(), EXIT_SUCCESS);

        control.stop_gracefully(0);
        assert!(!control.is_running());
        control.stop_gracefully(7);
        assert_eq!(control.state(), RunState::StoppingGracefully(0));
    }

    #[test]
    fn test_signal_overrides_graceful_stop() {
        let control = RunControl::new();
        control.stop_gracefully(0);
        assert!(control.stop_fatally(TerminationSignal::Terminate));
        assert_eq!(
            control.exit_code(),
            TerminationSignal::Terminate.number()
        );
        assert!(!control.stop_fatally(TerminationSignal::Interrupt));
        assert_eq!(
            control.state(),
            RunState::StoppingFatally(TerminationSignal::Terminate)
        );
    }

    #[test]
    fn test_signal_cancels_armed_buffer_only() {
        let control = RunControl::new();
        let cancel = Arc::new(CountingCancel::default());
        control.arm(cancel.clone());
        control.stop_gracefully(0);
        assert_eq!(cancel.0.load(Ordering::SeqCst), 0);

        control.stop_fatally(TerminationSignal::Interrupt);
        assert_eq!(cancel.0.load(Ordering::SeqCst), 1);

        let control = RunControl::new();
        control.arm(cancel.clone());
        control.disarm();
        control.stop_fatally(TerminationSignal::Interrupt);
        assert_eq!(cancel.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_arm_after_signal_cancels_immediately() {
        let control = RunControl::new();
        control.stop_fatally(TerminationSignal::Hangup);
        let cancel = Arc::new(CountingCancel::default());
        control.arm(cancel.clone());
        assert_eq!(cancel.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_idle_wakes_on_stop() {
        let control = RunControl::new();
        let waker = Arc::clone(&control);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.stop_gracefully(0);
        });

        let start = Instant::now();
        while control.idle(Duration::from_secs(5)) {}
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_idle_is_bounded_by_tick() {
        let control = RunControl::new();
        let start = Instant::now();
        assert!(control.idle(Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
