//! `ed_assert!`/`ed_assert_eq!` -- assertions that tag their diagnostic with
//! the tid of the thread whose contract was violated, mirroring the
//! `ed_assert!(t, ...)` call sites scattered through the teacher's
//! `replay_syscall.rs`/`record_session.rs`. These are for the "contract
//! violation" half of the error taxonomy in spec.md §7: always fatal,
//! never recoverable.

/// Anything that can identify the tid involved in a contract violation.
pub trait Diagnosable {
    fn diag_tid(&self) -> libc::pid_t;
}

#[macro_export]
macro_rules! ed_assert {
    ($ctx:expr, $cond:expr) => {
        if !$cond {
            $crate::fatal!(
                "tid {}: assertion failed: {}",
                $crate::assert::Diagnosable::diag_tid($ctx),
                stringify!($cond)
            );
        }
    };
    ($ctx:expr, $cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::fatal!(
                "tid {}: {}",
                $crate::assert::Diagnosable::diag_tid($ctx),
                format!($($arg)*)
            );
        }
    };
}

#[macro_export]
macro_rules! ed_assert_eq {
    ($ctx:expr, $a:expr, $b:expr) => {
        match (&$a, &$b) {
            (a_val, b_val) => {
                if *a_val != *b_val {
                    $crate::fatal!(
                        "tid {}: assertion failed: `(left == right)`\n  left: `{:?}`,\n right: `{:?}`",
                        $crate::assert::Diagnosable::diag_tid($ctx),
                        a_val,
                        b_val
                    );
                }
            }
        }
    };
}
