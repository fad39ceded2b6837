//! Minimal hand-rolled logging, in the style the rest of the tracer uses:
//! no `log`/`tracing` dependency, just a level-gated `eprintln!` and a pair
//! of `fatal!` macros that print a diagnostic and then actually stop the
//! process, because §7 of the design is explicit that divergence from a
//! recorded trace must halt immediately rather than propagate as an error.

use std::env;
use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub enum LogLevel {
    LogFatal = 0,
    LogWarn = 1,
    LogInfo = 2,
    LogDebug = 3,
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::LogInfo as u8);

/// Reads `RTRACE_LOG` once lazily; `LogLevel::set_from_env` is idempotent
/// so tests may call it more than once.
impl LogLevel {
    pub fn set_from_env() {
        let level = match env::var("RTRACE_LOG").as_deref() {
            Ok("debug") => LogLevel::LogDebug,
            Ok("warn") => LogLevel::LogWarn,
            Ok("fatal") => LogLevel::LogFatal,
            _ => LogLevel::LogInfo,
        };
        CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
    }

    pub fn enabled(self) -> bool {
        self as u8 <= CURRENT_LEVEL.load(Ordering::Relaxed)
    }
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        if $crate::log::LogLevel::enabled($level) {
            eprintln!("[{:?}] {}", $level, format!($($arg)*));
        }
    };
}

/// Print a diagnostic to stderr and abort the process. Used for contract
/// violations: registry slot collisions, overshoot, `found_spot != 1`,
/// unexpected wait-status, HPC-signal provenance mismatches, and the like.
/// There is no `Result` to return here: the whole point of these checks is
/// that the replay has already diverged from the recorded trace and cannot
/// be allowed to continue.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        eprintln!("[FATAL] {}", format!($($arg)*));
        std::process::abort();
    }};
}

/// Like `fatal!` but for conditions that are user/environment errors rather
/// than internal logic bugs (e.g. missing permissions) -- kept separate so
/// the two can be told apart by a reader, matching the teacher's
/// `fatal!`/`clean_fatal!` split.
#[macro_export]
macro_rules! clean_fatal {
    ($($arg:tt)*) => {{
        eprintln!("{}", format!($($arg)*));
        std::process::exit(1);
    }};
}
