//! Termination signal watcher.
//!
//! Signals are handled synchronously on a dedicated thread running a small
//! current-thread Tokio runtime, never in an async signal handler. This lets
//! the watcher call [`RunControl::stop_fatally`], which cancels the armed
//! hardware buffer, without restricting itself to async-signal-safe calls.
//!
//! The first signal requests a stop. A second signal means cleanup is stuck
//! (for example the loop is blocked reading a silent input), so the process
//! exits immediately with the signal number, skipping cleanup.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::error::Result;
use crate::shutdown::{RunControl, TerminationSignal};

/// Install the termination handlers and spawn the watcher thread.
///
/// Handlers are installed before this returns, so a signal arriving right
/// after is already routed to `control`. The thread lives until the process
/// exits.
pub fn spawn_signal_watcher(control: Arc<RunControl>) -> Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let signals = {
        let _guard = runtime.enter();
        signal_stream()?
    };

    let handle = thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || runtime.block_on(watch(control, signals)))?;

    Ok(handle)
}

async fn watch(control: Arc<RunControl>, mut signals: SignalStream) {
    let mut received = 0usize;

    loop {
        let signal = signals.recv().await;
        received += 1;

        if received > 1 {
            warn!(signal = %signal, "Second termination signal, exiting without cleanup");
            std::process::exit(signal.number());
        }

        control.stop_fatally(signal);
    }
}

#[cfg(unix)]
fn signal_stream() -> std::io::Result<SignalStream> {
    use tokio::signal::unix::{signal, SignalKind};

    Ok(SignalStream {
        interrupt: signal(SignalKind::interrupt())?,
        terminate: signal(SignalKind::terminate())?,
        hangup: signal(SignalKind::hangup())?,
        pipe: signal(SignalKind::pipe())?,
    })
}

#[cfg(unix)]
struct SignalStream {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
    pipe: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalStream {
    async fn recv(&mut self) -> TerminationSignal {
        tokio::select! {
            _ = self.interrupt.recv() => TerminationSignal::Interrupt,
            _ = self.terminate.recv() => TerminationSignal::Terminate,
            _ = self.hangup.recv() => TerminationSignal::Hangup,
            _ = self.pipe.recv() => TerminationSignal::Pipe,
        }
    }
}

#[cfg(not(unix))]
fn signal_stream() -> std::io::Result<SignalStream> {
    Ok(SignalStream)
}

#[cfg(not(unix))]
struct SignalStream;

#[cfg(not(unix))]
impl SignalStream {
    async fn recv(&mut self) -> TerminationSignal {
        // Console close and Ctrl-C are both reported as a termination request
        let _ = tokio::signal::ctrl_c().await;
        TerminationSignal::Terminate
    }
}
