//! Thin CLI driver wiring the library's pieces together. Process creation
//! and bootstrap (spawning the very first tracee) are out of scope (see
//! spec.md §1); this attaches to already-running tids instead, the same
//! narrowed surface the teacher's own `commands/` module exposes through
//! one `RdCommand` per subcommand, trimmed here to the one this crate
//! actually implements.

use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus as NixWaitStatus};
use nix::unistd::Pid;
use rtrace::log::LogLevel;
use rtrace::{clean_fatal, log, Scheduler, ThreadRegistry};
use std::io;

trait RtraceCommand {
    fn run(&mut self) -> io::Result<()>;
}

struct AttachCommand {
    tids: Vec<libc::pid_t>,
}

impl RtraceCommand for AttachCommand {
    fn run(&mut self) -> io::Result<()> {
        let mut registry = ThreadRegistry::new();
        for &tid in &self.tids {
            log!(LogLevel::LogInfo, "registering tid {}", tid);
            registry.register_thread(0, tid)?;
        }

        let mut scheduler = Scheduler::new();
        let mut current: Option<libc::pid_t> = None;

        while registry.active_count() > 0 {
            current = Some(scheduler.select_next(&mut registry, current));
            let tid = current.unwrap();
            log!(LogLevel::LogDebug, "resuming tid {}", tid);

            if let Err(e) = ptrace::cont(Pid::from_raw(tid), None) {
                clean_fatal!("ptrace resume failed for tid {}: {}", tid, e);
            }

            match waitpid(Pid::from_raw(tid), Some(WaitPidFlag::__WALL)) {
                Ok(NixWaitStatus::Exited(_, _)) | Ok(NixWaitStatus::Signaled(..)) => {
                    log!(LogLevel::LogInfo, "tid {} exited, deregistering", tid);
                    registry.deregister_thread(tid);
                    current = None;
                }
                Ok(NixWaitStatus::Stopped(_, sig)) => {
                    if let Some(ctx) = registry.find_mut(tid) {
                        ctx.switch_counter -= 1;
                        ctx.child_sig = sig as i32;
                    }
                }
                Ok(_) => {}
                Err(e) => clean_fatal!("waitpid failed for tid {}: {}", tid, e),
            }
        }

        Ok(())
    }
}

fn usage() -> ! {
    eprintln!("usage: rtrace attach <tid> [<tid> ...]");
    std::process::exit(2);
}

fn main() {
    LogLevel::set_from_env();

    let mut args = std::env::args().skip(1);
    let sub = match args.next() {
        Some(sub) => sub,
        None => usage(),
    };

    let mut cmd: Box<dyn RtraceCommand> = match sub.as_str() {
        "attach" => {
            let tids: Vec<libc::pid_t> = args
                .map(|a| a.parse().unwrap_or_else(|_| usage()))
                .collect();
            if tids.is_empty() {
                usage();
            }
            Box::new(AttachCommand { tids })
        }
        _ => usage(),
    };

    if let Err(e) = cmd.run() {
        clean_fatal!("{}", e);
    }
}

