//! A single-architecture (x86_64) register file, the flags that make it
//! up, and the comparator used by the signal positioner to decide whether
//! the live child has reached the recorded instruction boundary.
//!
//! The teacher's `registers.rs` carries a 32/64-bit union and widens
//! 32-bit register files into 64-bit ones because it traces both x86 and
//! x64 tracees. spec.md's portability non-goal drops that requirement, so
//! this version keeps only the native `user_regs_struct` and the
//! accessors the scheduler and positioner actually need.

use libc::user_regs_struct;
use serde::{Deserialize, Serialize};

/// Trap flag: set while single-stepping is in effect.
pub const X86_TF_FLAG: u64 = 1 << 8;
/// Virtual-8086 mode flag.
pub const X86_VM_FLAG: u64 = 1 << 17;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MismatchBehavior {
    ExpectMismatches,
    LogMismatches,
    BailOnMismatch,
}

#[derive(Copy, Clone)]
pub struct Registers(pub user_regs_struct);

impl Registers {
    pub fn from_ptrace(regs: user_regs_struct) -> Registers {
        Registers(regs)
    }

    pub fn raw(&self) -> &user_regs_struct {
        &self.0
    }

    pub fn raw_mut(&mut self) -> &mut user_regs_struct {
        &mut self.0
    }

    pub fn ip(&self) -> u64 {
        self.0.rip
    }

    pub fn set_ip(&mut self, ip: u64) {
        self.0.rip = ip;
    }

    pub fn flags(&self) -> u64 {
        self.0.eflags
    }

    pub fn set_flags(&mut self, value: u64) {
        self.0.eflags = value;
    }

    /// `rdtsc` writes its 64-bit result split across EAX:EDX, zero-extended
    /// into RAX/RDX in 64-bit mode. These two accessors model exactly that
    /// 32-bit view without a separate 32-bit `Registers` variant.
    pub fn eax(&self) -> u32 {
        self.0.rax as u32
    }

    pub fn set_eax(&mut self, value: u32) {
        self.0.rax = value as u64;
    }

    pub fn edx(&self) -> u32 {
        self.0.rdx as u32
    }

    pub fn set_edx(&mut self, value: u32) {
        self.0.rdx = value as u64;
    }
}

/// `user_regs_struct` has no serde impl of its own (it comes straight from
/// `libc`, not written with serialization in mind), so trace frames carry
/// this plain field-for-field shadow instead, the way the teacher's
/// `TraceHeader` is its own serializable shadow of on-disk state rather
/// than a derive on a raw kernel type.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct RegistersData {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub orig_rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub eflags: u64,
    pub rsp: u64,
    pub ss: u64,
    pub fs_base: u64,
    pub gs_base: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
}

impl From<&Registers> for RegistersData {
    fn from(r: &Registers) -> RegistersData {
        let u = &r.0;
        RegistersData {
            r15: u.r15,
            r14: u.r14,
            r13: u.r13,
            r12: u.r12,
            rbp: u.rbp,
            rbx: u.rbx,
            r11: u.r11,
            r10: u.r10,
            r9: u.r9,
            r8: u.r8,
            rax: u.rax,
            rcx: u.rcx,
            rdx: u.rdx,
            rsi: u.rsi,
            rdi: u.rdi,
            orig_rax: u.orig_rax,
            rip: u.rip,
            cs: u.cs,
            eflags: u.eflags,
            rsp: u.rsp,
            ss: u.ss,
            fs_base: u.fs_base,
            gs_base: u.gs_base,
            ds: u.ds,
            es: u.es,
            fs: u.fs,
            gs: u.gs,
        }
    }
}

impl From<RegistersData> for Registers {
    fn from(d: RegistersData) -> Registers {
        let mut u: user_regs_struct = unsafe { std::mem::zeroed() };
        u.r15 = d.r15;
        u.r14 = d.r14;
        u.r13 = d.r13;
        u.r12 = d.r12;
        u.rbp = d.rbp;
        u.rbx = d.rbx;
        u.r11 = d.r11;
        u.r10 = d.r10;
        u.r9 = d.r9;
        u.r8 = d.r8;
        u.rax = d.rax;
        u.rcx = d.rcx;
        u.rdx = d.rdx;
        u.rsi = d.rsi;
        u.rdi = d.rdi;
        u.orig_rax = d.orig_rax;
        u.rip = d.rip;
        u.cs = d.cs;
        u.eflags = d.eflags;
        u.rsp = d.rsp;
        u.ss = d.ss;
        u.fs_base = d.fs_base;
        u.gs_base = d.gs_base;
        u.ds = d.ds;
        u.es = d.es;
        u.fs = d.fs;
        u.gs = d.gs;
        Registers(u)
    }
}

/// Result of comparing two register files, with an explicit flag mask
/// rather than the original C code's "check == 0 || check == 0x80" magic
/// return values (spec.md §9 Design Notes calls for exactly this).
#[derive(Debug, Eq, PartialEq)]
pub enum RegisterMatch {
    /// Every field, including eflags, is bit-for-bit identical.
    Exact,
    /// Every field other than eflags is identical, and the eflags
    /// difference is fully accounted for by `flags_mask`.
    MaskedFlagsOnly,
    /// At least one field outside the flags mask differs.
    Mismatch(&'static str),
}

impl RegisterMatch {
    /// spec.md §4.3.2: "a match is either exact or all bits equal except
    /// the flag-register difference". Both `Exact` and `MaskedFlagsOnly`
    /// count as a found spot; only `Mismatch` does not.
    pub fn is_match(&self) -> bool {
        !matches!(self, RegisterMatch::Mismatch(_))
    }
}

macro_rules! cmp_field {
    ($a:expr, $b:expr, $field:ident) => {
        if $a.$field != $b.$field {
            return RegisterMatch::Mismatch(stringify!($field));
        }
    };
}

/// Compares two register files. `flags_mask`, when non-zero, is the set of
/// eflags bits allowed to differ (the positioner passes
/// `X86_TF_FLAG | X86_VM_FLAG` while single-stepping is active, and `0`
/// when an exact match is required, e.g. the `rdtsc` post-write check and
/// the synchronous `SIGSEGV` re-fault check).
pub fn compare_register_files(
    now: &Registers,
    rec: &Registers,
    flags_mask: u64,
    behavior: MismatchBehavior,
) -> RegisterMatch {
    let (a, b) = (&now.0, &rec.0);
    cmp_field!(a, b, rax);
    cmp_field!(a, b, rbx);
    cmp_field!(a, b, rcx);
    cmp_field!(a, b, rdx);
    cmp_field!(a, b, rsi);
    cmp_field!(a, b, rdi);
    cmp_field!(a, b, rbp);
    cmp_field!(a, b, rsp);
    cmp_field!(a, b, rip);
    cmp_field!(a, b, orig_rax);
    cmp_field!(a, b, cs);
    cmp_field!(a, b, ss);
    cmp_field!(a, b, ds);
    cmp_field!(a, b, es);
    cmp_field!(a, b, fs);
    cmp_field!(a, b, gs);
    cmp_field!(a, b, fs_base);
    cmp_field!(a, b, gs_base);

    let diff = a.eflags ^ b.eflags;
    let result = if diff == 0 {
        RegisterMatch::Exact
    } else if diff & !flags_mask == 0 {
        RegisterMatch::MaskedFlagsOnly
    } else {
        RegisterMatch::Mismatch("eflags")
    };

    if let RegisterMatch::Mismatch(field) = result {
        match behavior {
            MismatchBehavior::ExpectMismatches => {}
            MismatchBehavior::LogMismatches => {
                crate::log!(
                    crate::log::LogLevel::LogWarn,
                    "register mismatch in {}: now=0x{:x} rec=0x{:x}",
                    field,
                    a.eflags,
                    b.eflags
                );
            }
            MismatchBehavior::BailOnMismatch => {
                crate::fatal!("register mismatch in field `{}`", field);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed() -> user_regs_struct {
        unsafe { std::mem::zeroed() }
    }

    #[test]
    fn exact_match_when_identical() {
        let r = Registers::from_ptrace(zeroed());
        let result = compare_register_files(&r, &r, 0, MismatchBehavior::ExpectMismatches);
        assert_eq!(result, RegisterMatch::Exact);
    }

    #[test]
    fn tf_flag_difference_is_masked() {
        let mut a = zeroed();
        let b = zeroed();
        a.eflags = X86_TF_FLAG;
        let ra = Registers::from_ptrace(a);
        let rb = Registers::from_ptrace(b);
        let result = compare_register_files(
            &ra,
            &rb,
            X86_TF_FLAG | X86_VM_FLAG,
            MismatchBehavior::ExpectMismatches,
        );
        assert_eq!(result, RegisterMatch::MaskedFlagsOnly);
    }

    #[test]
    fn tf_flag_difference_is_not_masked_without_mask_arg() {
        let mut a = zeroed();
        let b = zeroed();
        a.eflags = X86_TF_FLAG;
        let ra = Registers::from_ptrace(a);
        let rb = Registers::from_ptrace(b);
        let result = compare_register_files(&ra, &rb, 0, MismatchBehavior::ExpectMismatches);
        assert!(!result.is_match());
    }

    #[test]
    fn general_register_difference_is_never_masked() {
        let mut a = zeroed();
        let b = zeroed();
        a.rax = 1;
        let ra = Registers::from_ptrace(a);
        let rb = Registers::from_ptrace(b);
        let result = compare_register_files(
            &ra,
            &rb,
            X86_TF_FLAG | X86_VM_FLAG,
            MismatchBehavior::ExpectMismatches,
        );
        assert_eq!(result, RegisterMatch::Mismatch("rax"));
    }

    #[test]
    fn rdtsc_accessors_round_trip() {
        let mut r = Registers::from_ptrace(zeroed());
        r.set_eax(0xDEADBEEF);
        r.set_edx(0x12345678);
        assert_eq!(r.eax(), 0xDEADBEEF);
        assert_eq!(r.edx(), 0x12345678);
        assert_eq!(r.raw().rax, 0xDEADBEEF);
        assert_eq!(r.raw().rdx, 0x12345678);
    }
}
