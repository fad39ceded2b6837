//! A deterministic record-and-replay core for native processes running
//! under `ptrace`: a round-robin record-time `Scheduler` and a
//! branch-exact replay-time `SignalPositioner`, sharing one `ThreadContext`
//! data model and a fixed-capacity `ThreadRegistry`.
//!
//! Trace-file encoding, process bootstrap, and a command surface are
//! deliberately out of scope; see `trace_frame::TraceEventSource` for the
//! seam where a real trace reader plugs in.

#[macro_use]
pub mod log;
#[macro_use]
pub mod assert;

pub mod config;
pub mod hpc;
pub mod ptrace_options;
pub mod registers;
pub mod registry;
pub mod scheduler;
pub mod scoped_fd;
pub mod signal_positioner;
pub mod thread_context;
pub mod trace_frame;
pub mod wait_status;

pub use registry::ThreadRegistry;
pub use scheduler::Scheduler;
pub use signal_positioner::{process_signal, Disposition};
pub use thread_context::{ExecState, ThreadContext};
