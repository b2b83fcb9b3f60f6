//! # iio_writedev
//!
//! Streams raw sample bytes from a blocking input (standard input for the
//! `iio-writedev` binary) into the output channels of an Industrial I/O
//! device, through a bounded hardware buffer.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: capability traits for contexts, devices and buffers,
//!   plus the mock backend and the libiio backend (feature `iio_hardware`).
//! - **`engine`**: the streaming loop, its two fill strategies, the sample
//!   budget and the benchmark throughput meter.
//! - **`session`**: setup (device, trigger, channels, sample size, buffer),
//!   the run, and teardown.
//! - **`shutdown`**: the run state shared between the loop and the signal
//!   watcher, and the exit codes derived from it.
//! - **`signals`**: the dedicated signal-watching thread.
//! - **`config`**: the validated [`StreamConfig`] of one run.
//! - **`settings`**: layered settings (defaults, TOML file, environment).
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: the [`WriteDevError`] type.
//!
//! ## Example
//!
//! ```
//! use std::io::Cursor;
//! use iio_writedev::hardware::mock::MockContext;
//! use iio_writedev::{RunControl, StreamConfig, WriteSession};
//!
//! let config = StreamConfig::builder()
//!     .device("mock-dac")
//!     .buffer_size(64)
//!     .samples(128)
//!     .build()?;
//! let session = WriteSession::open(MockContext::demo(), config)?;
//!
//! let control = RunControl::new();
//! let mut input = Cursor::new(vec![0u8; 128 * 4]);
//! let outcome = session.run(&mut input, &control, &mut std::io::sink());
//! assert_eq!(outcome.exit_code, 0);
//! assert_eq!(outcome.summary.pushes, 2);
//! # Ok::<(), iio_writedev::WriteDevError>(())
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod session;
pub mod settings;
pub mod shutdown;
pub mod signals;

pub use config::{StreamConfig, StreamConfigBuilder};
pub use engine::{LoopExit, StreamEngine, StreamSummary};
pub use error::{Result, WriteDevError};
pub use session::{SessionOutcome, WriteSession};
pub use shutdown::{RunControl, RunState, TerminationSignal, EXIT_FAILURE, EXIT_SUCCESS};
