//! `ThreadContext`: the per-thread state shared by both the recorder and
//! replayer pipelines (spec.md §3, field-for-field).

use crate::assert::Diagnosable;
use crate::hpc::Hpc;
use crate::scoped_fd::ScopedFd;
use crate::trace_frame::TraceFrame;
use crate::wait_status::WaitStatus;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExecState {
    Start,
    InSyscall,
    InSyscallDone,
    Running,
}

pub struct ThreadContext {
    pub child_tid: libc::pid_t,
    pub child_mem_fd: ScopedFd,
    pub status: WaitStatus,
    pub exec_state: ExecState,
    /// Governs round-robin pressure; unbounded below, capped above by
    /// `Config::max_switch_counter`.
    pub switch_counter: i64,
    pub allow_ctx_switch: bool,
    pub hpc: Hpc,
    /// Current trace record being replayed; `None` outside of replay or
    /// before the first event has been loaded.
    pub trace: Option<TraceFrame>,
    pub child_sig: i32,
    pub replay_sig: i32,
}

impl ThreadContext {
    /// Zeroed/defaulted context for a freshly registered thread, mirroring
    /// `rec_sched_register_thread`'s `sys_malloc_zero` followed by an
    /// explicit `hpc` init/start (§3 Lifecycle). The caller is expected to
    /// follow up with ptrace attach and `hpc.init()`/`hpc.start()`.
    pub fn new(child_tid: libc::pid_t) -> ThreadContext {
        ThreadContext {
            child_tid,
            child_mem_fd: ScopedFd::default(),
            status: WaitStatus::EMPTY,
            exec_state: ExecState::Start,
            switch_counter: 0,
            allow_ctx_switch: true,
            hpc: Hpc::new(child_tid),
            trace: None,
            child_sig: 0,
            replay_sig: 0,
        }
    }

}

impl Diagnosable for ThreadContext {
    fn diag_tid(&self) -> libc::pid_t {
        self.child_tid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_starts_allow_ctx_switch() {
        let ctx = ThreadContext::new(42);
        assert!(ctx.allow_ctx_switch);
        assert_eq!(ctx.exec_state, ExecState::Start);
        assert_eq!(ctx.switch_counter, 0);
        assert_eq!(ctx.child_sig, 0);
    }
}
