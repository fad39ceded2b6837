//! Bitflags for the options passed to `PTRACE_SETOPTIONS` when a new
//! thread is registered (spec.md §3, `rec_sched_register_thread`'s
//! `sys_ptrace_setup` call). The teacher depends on the `bitflags` crate
//! for option-style bitmasks (see its `CloneFlags`-shaped enums in
//! `task_interface/task.rs`); this is the real `bitflags!` invocation
//! the crate's Cargo.toml was carried along for.

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct PtraceOptions: libc::c_int {
        /// Stop the tracee with `SIGTRAP | (PTRACE_EVENT_EXIT << 8)`
        /// before it exits, so the scheduler can deregister it cleanly
        /// instead of racing a real exit notification.
        const EXITKILL = libc::PTRACE_O_EXITKILL;
        /// Report clone/fork/vfork children as `PTRACE_EVENT_*` stops
        /// rather than ordinary `SIGTRAP`, and auto-attach to them.
        const TRACECLONE = libc::PTRACE_O_TRACECLONE;
        const TRACEFORK = libc::PTRACE_O_TRACEFORK;
        const TRACEVFORK = libc::PTRACE_O_TRACEVFORK;
        /// Distinguish a plain `execve` trap from ordinary `SIGTRAP`.
        const TRACEEXEC = libc::PTRACE_O_TRACEEXEC;
        /// Distinguish syscall-entry/exit traps from signal-delivery
        /// traps by setting bit 7 of the reported signal.
        const TRACESYSGOOD = libc::PTRACE_O_TRACESYSGOOD;
        /// Report the tracee's exit via `PTRACE_EVENT_EXIT` before the
        /// kernel actually reaps it, giving the scheduler one last
        /// chance to read its final register file.
        const TRACEEXIT = libc::PTRACE_O_TRACEEXIT;
    }
}

impl Default for PtraceOptions {
    /// The option set `rec_sched_register_thread` installs on every
    /// newly registered thread.
    fn default() -> PtraceOptions {
        PtraceOptions::EXITKILL
            | PtraceOptions::TRACECLONE
            | PtraceOptions::TRACEFORK
            | PtraceOptions::TRACEVFORK
            | PtraceOptions::TRACEEXEC
            | PtraceOptions::TRACESYSGOOD
            | PtraceOptions::TRACEEXIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_includes_exitkill() {
        assert!(PtraceOptions::default().contains(PtraceOptions::EXITKILL));
    }

    #[test]
    fn bits_are_disjoint() {
        let all = [
            PtraceOptions::EXITKILL,
            PtraceOptions::TRACECLONE,
            PtraceOptions::TRACEFORK,
            PtraceOptions::TRACEVFORK,
            PtraceOptions::TRACEEXEC,
            PtraceOptions::TRACESYSGOOD,
            PtraceOptions::TRACEEXIT,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_eq!(*a & *b, PtraceOptions::empty());
            }
        }
    }
}
