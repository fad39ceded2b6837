//! The fixed-capacity, direct-mapped `ThreadRegistry` (spec.md §4.4), and
//! the registration/deregistration lifecycle from §3. Per the "Global
//! registry → explicit ownership" design note in spec.md §9, this is an
//! explicit object passed to the scheduler rather than process-global
//! state, and it owns the scan cursor alongside the table.

use crate::config::Config;
use crate::ptrace_options::PtraceOptions;
use crate::scoped_fd::ScopedFd;
use crate::thread_context::{ExecState, ThreadContext};
use nix::sys::ptrace;
use nix::unistd::Pid;
use std::io;

pub struct ThreadRegistry {
    slots: Vec<Option<ThreadContext>>,
    active_count: usize,
    /// Round-robin scan position; moves only inside `Scheduler::select_next`.
    pub cursor: usize,
}

impl ThreadRegistry {
    pub fn new() -> ThreadRegistry {
        let num_max_threads = Config::get().num_max_threads;
        let mut slots = Vec::with_capacity(num_max_threads);
        slots.resize_with(num_max_threads, || None);
        ThreadRegistry {
            slots,
            active_count: 0,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn slot(&self, index: usize) -> Option<&ThreadContext> {
        self.slots[index].as_ref()
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut ThreadContext> {
        self.slots[index].as_mut()
    }

    pub fn find(&self, tid: libc::pid_t) -> Option<&ThreadContext> {
        self.slot(Config::get().hash(tid))
            .filter(|ctx| ctx.child_tid == tid)
    }

    pub fn find_mut(&mut self, tid: libc::pid_t) -> Option<&mut ThreadContext> {
        let index = Config::get().hash(tid);
        self.slots[index]
            .as_mut()
            .filter(|ctx| ctx.child_tid == tid)
    }

    /// `rec_sched_register_thread(parent, child)`: opens the child's
    /// memory handle, attaches via ptrace, installs the standard option
    /// set, and starts HPC with the initial quantum
    /// `Config::max_record_interval`. `parent` is accepted for symmetry
    /// with the original signature (used by callers to decide whether
    /// this is the very first thread of the group) but plays no role in
    /// the registry's own bookkeeping.
    pub fn register_thread(
        &mut self,
        _parent: libc::pid_t,
        child: libc::pid_t,
    ) -> io::Result<&mut ThreadContext> {
        let cfg = Config::get();
        crate::ed_assert!(
            &DiagTid(child),
            child != crate::config::EMPTY_TID && child < cfg.max_tid,
            "tid {} outside the legal range (0, {})",
            child,
            cfg.max_tid
        );
        let index = cfg.hash(child);
        crate::ed_assert!(
            &DiagTid(child),
            self.slots[index].is_none(),
            "registry slot {} already occupied",
            index
        );

        let mem_path = format!("/proc/{}/mem", child);
        let mem_fd = unsafe {
            libc::open(
                std::ffi::CString::new(mem_path).unwrap().as_ptr(),
                libc::O_RDWR,
            )
        };
        if mem_fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let pid = Pid::from_raw(child);
        ptrace::attach(pid).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        unsafe {
            let mut status = 0;
            libc::waitpid(child, &mut status, 0);
        }
        ptrace::setoptions(
            pid,
            ptrace::Options::from_bits_truncate(PtraceOptions::default().bits()),
        )
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;

        let mut ctx = ThreadContext::new(child);
        ctx.child_mem_fd = ScopedFd::from_raw(mem_fd);
        ctx.exec_state = ExecState::Running;
        ctx.switch_counter = cfg.max_switch_counter;
        ctx.hpc.init()?;
        ctx.hpc.start(cfg.max_record_interval)?;

        self.slots[index] = Some(ctx);
        self.active_count += 1;
        Ok(self.slots[index].as_mut().unwrap())
    }

    /// `rec_sched_deregister_thread`. Ordering is fixed by spec.md §4.4:
    /// stop HPC, close the memory fd, ptrace-detach, then drain
    /// `waitpid(tid, __WALL|__WCLONE)` until it reports the thread truly
    /// gone, only then freeing the slot.
    pub fn deregister_thread(&mut self, tid: libc::pid_t) {
        let index = Config::get().hash(tid);
        let mut ctx = match self.slots[index].take() {
            Some(ctx) if ctx.child_tid == tid => ctx,
            other => {
                self.slots[index] = other;
                crate::fatal!("deregister_thread: tid {} not registered", tid);
            }
        };

        ctx.hpc.cleanup();
        ctx.child_mem_fd.close();
        let _ = ptrace::detach(Pid::from_raw(tid), None);

        loop {
            let rc = unsafe { libc::waitpid(tid, std::ptr::null_mut(), libc::__WALL | libc::__WCLONE) };
            if rc < 0 {
                break;
            }
        }

        self.active_count -= 1;
    }

    /// Sends `SIGINT` to every registered thread's tid (spec.md §4.2).
    pub fn exit_all(&self) {
        for slot in &self.slots {
            if let Some(ctx) = slot {
                unsafe {
                    libc::kill(ctx.child_tid, libc::SIGINT);
                }
            }
        }
    }

    /// Test-only seam: the scheduler's unit tests exercise the round-robin
    /// and parking logic against synthetic contexts, without a real ptrace
    /// attach or HPC fd underneath them.
    #[cfg(test)]
    pub fn test_insert(&mut self, index: usize, ctx: ThreadContext) {
        self.slots[index] = Some(ctx);
        self.active_count += 1;
    }
}

impl Default for ThreadRegistry {
    fn default() -> ThreadRegistry {
        ThreadRegistry::new()
    }
}

/// Lets `ed_assert!` tag a diagnostic with a tid before a `ThreadContext`
/// exists yet (registration failure path).
struct DiagTid(libc::pid_t);
impl crate::assert::Diagnosable for DiagTid {
    fn diag_tid(&self) -> libc::pid_t {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_registry_is_empty() {
        let reg = ThreadRegistry::new();
        assert_eq!(reg.active_count(), 0);
        assert!(reg.find(1).is_none());
    }

    #[test]
    fn capacity_matches_config() {
        let reg = ThreadRegistry::new();
        assert_eq!(reg.capacity(), Config::get().num_max_threads);
    }
}
