//! The replay-time `SignalPositioner` (spec.md §4.3), reproducing
//! `compensate_branch_count`/`rep_process_signal` from the original
//! `rep_process_signal.c` branch-for-branch, with the sign-trick
//! dispatch replaced by matching on `StopReason` (§9 REDESIGN).

use crate::config::{SKID_SIZE, SLOW_PATH_THRESHOLD};
use crate::registers::{compare_register_files, MismatchBehavior, Registers, X86_TF_FLAG, X86_VM_FLAG};
use crate::thread_context::ThreadContext;
use crate::trace_frame::{StopReason, SyntheticEvent};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

const RDTSC_OPCODE: [u8; 2] = [0x0f, 0x31];
const TRAP_STOP: i32 = 0x57f;
const SEGV_STOP: i32 = 0xb7f;

/// Signal from the replayer's point of view: either it should be
/// delivered to the child at the found spot, or the event is synchronous
/// and must be deferred to the next syscall boundary.
#[derive(Debug, Eq, PartialEq)]
pub enum Disposition {
    Delivered,
    Deferred,
}

fn pid_of(ctx: &ThreadContext) -> Pid {
    Pid::from_raw(ctx.child_tid)
}

fn read_regs(ctx: &ThreadContext) -> Registers {
    match ptrace::getregs(pid_of(ctx)) {
        Ok(regs) => Registers::from_ptrace(regs),
        Err(e) => crate::fatal!("tid {}: ptrace getregs failed: {}", ctx.child_tid, e),
    }
}

fn write_regs(ctx: &ThreadContext, regs: &Registers) {
    if let Err(e) = ptrace::setregs(pid_of(ctx), *regs.raw()) {
        crate::fatal!("tid {}: ptrace setregs failed: {}", ctx.child_tid, e);
    }
}

fn raw_waitpid(tid: libc::pid_t) -> i32 {
    let mut status: libc::c_int = 0;
    let rc = unsafe { libc::waitpid(tid, &mut status, 0) };
    if rc != tid {
        crate::fatal!("waitpid returned {} for tid {}", rc, tid);
    }
    status
}

/// `singlestep(ctx, sig, expected_status)`: one ptrace single-step
/// injecting `sig`, wait for it, assert the returned raw status matches
/// `expected_status` exactly. Clears `status`/`child_sig` afterward.
pub fn singlestep(ctx: &mut ThreadContext, sig: i32, expected_status: i32) {
    let signal = if sig == 0 { None } else { Signal::try_from(sig).ok() };
    if let Err(e) = ptrace::step(pid_of(ctx), signal) {
        crate::fatal!("tid {}: ptrace singlestep failed: {}", ctx.child_tid, e);
    }
    let status = raw_waitpid(ctx.child_tid);
    crate::ed_assert_eq!(ctx, status, expected_status);
    ctx.status = crate::wait_status::WaitStatus::new(0);
    ctx.child_sig = 0;
}

/// `goto_next_event`: resumes the child until the next trace-worthy stop,
/// recording the resulting wait status and pending signal on the context.
pub fn resume_to_next_event(ctx: &mut ThreadContext) {
    if let Err(e) = ptrace::cont(pid_of(ctx), None) {
        crate::fatal!("tid {}: ptrace cont failed: {}", ctx.child_tid, e);
    }
    let status = raw_waitpid(ctx.child_tid);
    let ws = crate::wait_status::WaitStatus::new(status);
    ctx.status = ws;
    ctx.child_sig = ws.stop_sig().unwrap_or(0);
}

fn stop_sig_of(ctx: &ThreadContext) -> i32 {
    ctx.status.stop_sig().unwrap_or(0)
}

/// `compensate_branch_count`: single-steps the child to the exact branch
/// count and register state recorded for the current trace frame, then
/// either breaks to deliver `sig` or returns having absorbed it.
pub fn compensate_branch_count(ctx: &mut ThreadContext, sig: i32) {
    let trace = ctx.trace.clone().expect("compensate_branch_count requires a loaded trace frame");
    let rbc_rec = trace.rbc_up;
    let mut rbc_now = ctx
        .hpc
        .read_rbc_up()
        .unwrap_or_else(|e| crate::fatal!("tid {}: read_rbc_up failed: {}", ctx.child_tid, e));

    if rbc_now > rbc_rec {
        crate::fatal!(
            "tid {}: hpc overcounted in asynchronous event, recorded: {} now: {} (event {:?}, global_time {})",
            ctx.child_tid,
            rbc_rec,
            rbc_now,
            trace.stop_reason,
            trace.global_time
        );
    }

    let mut found_spot = 0u32;

    while rbc_now < rbc_rec {
        singlestep(ctx, 0, TRAP_STOP);
        rbc_now = ctx
            .hpc
            .read_rbc_up()
            .unwrap_or_else(|e| crate::fatal!("tid {}: read_rbc_up failed: {}", ctx.child_tid, e));
    }

    while rbc_now == rbc_rec {
        let regs = read_regs(ctx);

        if sig == libc::SIGSEGV {
            // The child should now be poised to re-fault at the same
            // instruction; resume it there.
            if let Err(e) = ptrace::syscall(pid_of(ctx), None) {
                crate::fatal!("tid {}: ptrace syscall-resume failed: {}", ctx.child_tid, e);
            }
            let status = raw_waitpid(ctx.child_tid);
            ctx.status = crate::wait_status::WaitStatus::new(status);
        }

        let result = compare_register_files(
            &regs,
            &trace.recorded_regs,
            X86_TF_FLAG | X86_VM_FLAG,
            MismatchBehavior::ExpectMismatches,
        );

        if result.is_match() {
            found_spot += 1;
            if sig == libc::SIGSEGV {
                singlestep(ctx, 0, SEGV_STOP);
            }
            break;
        }

        singlestep(ctx, 0, TRAP_STOP);
        rbc_now = ctx
            .hpc
            .read_rbc_up()
            .unwrap_or_else(|e| crate::fatal!("tid {}: read_rbc_up failed: {}", ctx.child_tid, e));
    }

    crate::ed_assert!(
        ctx,
        found_spot == 1,
        "cannot find signal {} at global_time {} (found_spot = {})",
        sig,
        trace.global_time,
        found_spot
    );
}

/// `rep_process_signal`: dispatches on the current trace frame's
/// `StopReason` and drives the child to the recorded delivery point.
pub fn process_signal(ctx: &mut ThreadContext) -> Disposition {
    crate::ed_assert!(ctx, ctx.child_sig == 0, "signal still pending from a previous event");
    let trace = ctx.trace.clone().expect("process_signal requires a loaded trace frame");

    match trace.stop_reason {
        StopReason::Synthetic(SyntheticEvent::RdtscEmul) => {
            resume_to_next_event(ctx);
            crate::ed_assert_eq!(ctx, stop_sig_of(ctx), libc::SIGSEGV);

            let mut buf = [0u8; 2];
            let rip = read_regs(ctx).ip();
            ctx.child_mem_fd
                .pread(&mut buf, rip)
                .unwrap_or_else(|e| crate::fatal!("tid {}: reading instruction failed: {}", ctx.child_tid, e));
            crate::ed_assert_eq!(ctx, buf, RDTSC_OPCODE);

            let mut regs = read_regs(ctx);
            regs.set_eax(trace.recorded_regs.eax());
            regs.set_edx(trace.recorded_regs.edx());
            regs.set_ip(rip + RDTSC_OPCODE.len() as u64);
            write_regs(ctx, &regs);

            let after = read_regs(ctx);
            let result = compare_register_files(&after, &trace.recorded_regs, 0, MismatchBehavior::ExpectMismatches);
            crate::ed_assert!(ctx, result.is_match());

            ctx.child_sig = 0;
            Disposition::Delivered
        }

        StopReason::Synthetic(SyntheticEvent::UserSched) => {
            crate::ed_assert!(ctx, trace.rbc_up > 0);
            // rbc_up < SKID_SIZE wraps to a huge threshold that never fires,
            // same as the unsigned underflow in the original C.
            ctx.hpc
                .reset(trace.rbc_up.wrapping_sub(SKID_SIZE))
                .unwrap_or_else(|e| crate::fatal!("tid {}: hpc reset failed: {}", ctx.child_tid, e));
            resume_to_next_event(ctx);

            if ctx.hpc.down_owner_tid() == ctx.child_tid {
                ctx.child_sig = 0;
                ctx.hpc
                    .stop_down()
                    .unwrap_or_else(|e| crate::fatal!("tid {}: hpc stop_down failed: {}", ctx.child_tid, e));
                compensate_branch_count(ctx, 0);
                ctx.hpc
                    .stop()
                    .unwrap_or_else(|e| crate::fatal!("tid {}: hpc stop failed: {}", ctx.child_tid, e));
                Disposition::Delivered
            } else {
                crate::fatal!(
                    "tid {}: internal error: next event should be a scheduler preemption but signal provenance does not match",
                    ctx.child_tid
                );
            }
        }

        StopReason::Signal(sig @ (libc::SIGIO | libc::SIGCHLD)) => {
            if trace.rbc_up == 0 {
                ctx.replay_sig = sig;
                return Disposition::Deferred;
            }

            ctx.hpc
                .reset(trace.rbc_up.wrapping_sub(SKID_SIZE))
                .unwrap_or_else(|e| crate::fatal!("tid {}: hpc reset failed: {}", ctx.child_tid, e));

            if trace.rbc_up <= SLOW_PATH_THRESHOLD {
                ctx.hpc
                    .stop_down()
                    .unwrap_or_else(|e| crate::fatal!("tid {}: hpc stop_down failed: {}", ctx.child_tid, e));
                compensate_branch_count(ctx, sig);
                ctx.hpc
                    .stop()
                    .unwrap_or_else(|e| crate::fatal!("tid {}: hpc stop failed: {}", ctx.child_tid, e));
            } else {
                if let Err(e) = ptrace::syscall(pid_of(ctx), None) {
                    crate::fatal!("tid {}: ptrace syscall-resume failed: {}", ctx.child_tid, e);
                }
                let status = raw_waitpid(ctx.child_tid);
                ctx.status = crate::wait_status::WaitStatus::new(status);
                crate::ed_assert_eq!(ctx, stop_sig_of(ctx), libc::SIGIO);
                ctx.child_sig = 0;
                ctx.status = crate::wait_status::WaitStatus::new(0);

                compensate_branch_count(ctx, sig);
                ctx.hpc
                    .stop()
                    .unwrap_or_else(|e| crate::fatal!("tid {}: hpc stop failed: {}", ctx.child_tid, e));
                ctx.hpc
                    .stop_down()
                    .unwrap_or_else(|e| crate::fatal!("tid {}: hpc stop_down failed: {}", ctx.child_tid, e));
            }
            Disposition::Delivered
        }

        StopReason::Signal(libc::SIGSEGV) => {
            if trace.rbc_up == 0 && trace.page_faults == 0 {
                ctx.replay_sig = libc::SIGSEGV;
                return Disposition::Deferred;
            }

            if let Err(e) = ptrace::syscall(pid_of(ctx), None) {
                crate::fatal!("tid {}: ptrace syscall-resume failed: {}", ctx.child_tid, e);
            }
            let status = raw_waitpid(ctx.child_tid);
            ctx.status = crate::wait_status::WaitStatus::new(status);
            crate::ed_assert_eq!(ctx, stop_sig_of(ctx), libc::SIGSEGV);

            let regs = read_regs(ctx);
            let result = compare_register_files(&regs, &trace.recorded_regs, 0, MismatchBehavior::ExpectMismatches);
            crate::ed_assert!(ctx, result.is_match());

            singlestep(ctx, libc::SIGSEGV, TRAP_STOP);
            Disposition::Delivered
        }

        StopReason::Signal(other) => {
            crate::fatal!("tid {}: unknown signal {} -- bailing out", ctx.child_tid, other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rdtsc_opcode_is_two_bytes() {
        assert_eq!(RDTSC_OPCODE.len(), 2);
    }

    #[test]
    fn trap_and_segv_stop_constants_match_wait_status_module() {
        assert_eq!(TRAP_STOP, crate::wait_status::TRAP_STOP);
        assert_eq!(SEGV_STOP, crate::wait_status::SEGV_STOP);
    }
}
