//! Hardware performance counter quantum primitive (spec.md §4.1).
//!
//! Both the scheduler (quantum accounting) and the signal positioner
//! (branch-exact replay) treat this purely as a contract: `init`, `start`,
//! `reset`, `read_rbc_up`, `stop`, `stop_down`, `cleanup`. This module
//! gives that contract one concrete body, the same way the original C
//! `hpc.c` and rr's `PerfCounters` do: a raw `perf_event_open(2)` syscall
//! (there is no safe wrapper in `libc` or `nix` for this call, so it goes
//! through `libc::syscall` directly, as the teacher does for the handful
//! of ptrace requests it doesn't have a typed wrapper for) counting
//! retired conditional branches, plus a companion fd-owning "down"
//! counter armed to deliver `SIGIO` to the owning tid when it overflows.

use crate::scoped_fd::ScopedFd;
use std::io;
use std::mem;

const PERF_TYPE_HARDWARE: u32 = 0;
const PERF_COUNT_HW_BRANCH_INSTRUCTIONS: u64 = 4;
const PERF_FLAG_FD_CLOEXEC: u64 = 1 << 3;

// Bit offsets within perf_event_attr's packed flag word, from the kernel's
// uapi/linux/perf_event.h. We model that word as a single u64 rather than
// a bitfield struct -- same layout, explicit bit math instead of relying
// on the compiler to pack bitfields identically to the kernel ABI.
const ATTR_DISABLED: u64 = 1 << 0;
const ATTR_EXCLUDE_KERNEL: u64 = 1 << 5;
const ATTR_EXCLUDE_HV: u64 = 1 << 6;
const ATTR_ENABLE_ON_EXEC: u64 = 1 << 12;

const PERF_EVENT_IOC_ENABLE: libc::c_ulong = 0x2400;
const PERF_EVENT_IOC_DISABLE: libc::c_ulong = 0x2401;
const PERF_EVENT_IOC_REFRESH: libc::c_ulong = 0x2402;
const PERF_EVENT_IOC_RESET: libc::c_ulong = 0x2403;
const PERF_EVENT_IOC_PERIOD: libc::c_ulong = 0x4008_2404;

#[repr(C)]
#[derive(Copy, Clone)]
struct PerfEventAttr {
    type_: u32,
    size: u32,
    config: u64,
    sample_period_or_freq: u64,
    sample_type: u64,
    read_format: u64,
    flags: u64,
    wakeup_events_or_watermark: u32,
    bp_type: u32,
    config1_or_bp_addr: u64,
    config2_or_bp_len: u64,
    branch_sample_type: u64,
    sample_regs_user: u64,
    sample_stack_user: u32,
    clockid: i32,
    sample_regs_intr: u64,
    aux_watermark: u32,
    sample_max_stack: u16,
    __reserved_3: u16,
}

impl PerfEventAttr {
    fn branch_counter(wakeup_events: u32, sample_period: u64) -> PerfEventAttr {
        let attr: PerfEventAttr = unsafe { mem::zeroed() };
        PerfEventAttr {
            type_: PERF_TYPE_HARDWARE,
            size: mem::size_of::<PerfEventAttr>() as u32,
            config: PERF_COUNT_HW_BRANCH_INSTRUCTIONS,
            sample_period_or_freq: sample_period,
            flags: ATTR_DISABLED | ATTR_EXCLUDE_KERNEL | ATTR_EXCLUDE_HV | ATTR_ENABLE_ON_EXEC,
            wakeup_events_or_watermark: wakeup_events,
            ..attr
        }
    }
}

unsafe fn perf_event_open(attr: &PerfEventAttr, tid: libc::pid_t) -> io::Result<ScopedFd> {
    let rc = libc::syscall(
        libc::SYS_perf_event_open,
        attr as *const PerfEventAttr,
        tid,
        -1i32,
        -1i32,
        PERF_FLAG_FD_CLOEXEC,
    );
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ScopedFd::from_raw(rc as i32))
    }
}

fn ioctl_no_arg(fd: &ScopedFd, request: libc::c_ulong) -> io::Result<()> {
    let rc = unsafe { libc::ioctl(fd.get(), request, 0) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn ioctl_period(fd: &ScopedFd, period: u64) -> io::Result<()> {
    let rc = unsafe { libc::ioctl(fd.get(), PERF_EVENT_IOC_PERIOD, &period as *const u64) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub struct Hpc {
    child_tid: libc::pid_t,
    rbc_up: ScopedFd,
    rbc_down: ScopedFd,
}

impl Hpc {
    pub fn new(child_tid: libc::pid_t) -> Hpc {
        Hpc {
            child_tid,
            rbc_up: ScopedFd::default(),
            rbc_down: ScopedFd::default(),
        }
    }

    /// Opens both counters, disabled, with the down-counter already owned
    /// by `child_tid` for `SIGIO` delivery (§4.1: "fcntl(F_GETOWN) on the
    /// down-counter's fd must return the tid that armed it").
    pub fn init(&mut self) -> io::Result<()> {
        let up_attr = PerfEventAttr::branch_counter(0, 0);
        self.rbc_up = unsafe { perf_event_open(&up_attr, self.child_tid)? };

        let down_attr = PerfEventAttr::branch_counter(1, 0);
        let down = unsafe { perf_event_open(&down_attr, self.child_tid)? };
        let rc = unsafe { libc::fcntl(down.get(), libc::F_SETOWN, self.child_tid) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        let flags = unsafe { libc::fcntl(down.get(), libc::F_GETFL) };
        let rc = unsafe { libc::fcntl(down.get(), libc::F_SETFL, flags | libc::O_ASYNC) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        self.rbc_down = down;
        Ok(())
    }

    /// Starts both counters with `threshold` branches armed on the down
    /// counter (`MAX_RECORD_INTERVAL` at registration time, `trace.rbc_up
    /// - SKID_SIZE` during replay positioning).
    pub fn start(&mut self, threshold: u64) -> io::Result<()> {
        ioctl_no_arg(&self.rbc_up, PERF_EVENT_IOC_ENABLE)?;
        ioctl_period(&self.rbc_down, threshold)?;
        ioctl_no_arg(&self.rbc_down, PERF_EVENT_IOC_ENABLE)?;
        ioctl_no_arg(&self.rbc_down, PERF_EVENT_IOC_REFRESH)
    }

    /// Rearms the down counter at a new threshold without reopening it;
    /// leaves `rbc_up` running and uninterrupted.
    pub fn reset(&mut self, threshold: u64) -> io::Result<()> {
        ioctl_no_arg(&self.rbc_down, PERF_EVENT_IOC_RESET)?;
        ioctl_period(&self.rbc_down, threshold)?;
        ioctl_no_arg(&self.rbc_down, PERF_EVENT_IOC_ENABLE)?;
        ioctl_no_arg(&self.rbc_down, PERF_EVENT_IOC_REFRESH)
    }

    pub fn read_rbc_up(&self) -> io::Result<u64> {
        let mut count: u64 = 0;
        let n = unsafe {
            libc::read(
                self.rbc_up.get(),
                &mut count as *mut u64 as *mut libc::c_void,
                mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(count)
        }
    }

    pub fn stop(&mut self) -> io::Result<()> {
        ioctl_no_arg(&self.rbc_up, PERF_EVENT_IOC_DISABLE)
    }

    pub fn stop_down(&mut self) -> io::Result<()> {
        ioctl_no_arg(&self.rbc_down, PERF_EVENT_IOC_DISABLE)
    }

    /// Closes both fds. Deregistration (§4.4) requires this to happen
    /// before the memory fd is closed.
    pub fn cleanup(&mut self) {
        self.rbc_up.close();
        self.rbc_down.close();
    }

    /// The sole signal-provenance check from §4.1: does the down
    /// counter's owner match the tid we expect the `SIGIO` to have come
    /// from?
    pub fn down_owner_tid(&self) -> libc::pid_t {
        unsafe { libc::fcntl(self.rbc_down.get(), libc::F_GETOWN) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_has_expected_config() {
        let attr = PerfEventAttr::branch_counter(1, 945);
        assert_eq!(attr.type_, PERF_TYPE_HARDWARE);
        assert_eq!(attr.config, PERF_COUNT_HW_BRANCH_INSTRUCTIONS);
        assert_eq!(attr.sample_period_or_freq, 945);
        assert_eq!(attr.wakeup_events_or_watermark, 1);
        assert_ne!(attr.flags & ATTR_DISABLED, 0);
    }

    #[test]
    fn new_handle_has_closed_fds() {
        let hpc = Hpc::new(1234);
        assert!(!hpc.rbc_up.is_open());
        assert!(!hpc.rbc_down.is_open());
    }
}
