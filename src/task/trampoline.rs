use core::arch::asm;
use x86_64::VirtAddr;

use super::TaskFn;

/// Runs `func(arg)` on the given stack and returns its result.
///
/// The kernel stack pointer is parked in a callee-saved register for the
/// duration of the call and restored afterwards, so the task body sees only
/// its own stack page.
///
/// # Safety
///
/// `stack_top` must be the top of a live, writable, 16-byte aligned stack
/// region that no other context uses, with enough room for `func`'s frames.
pub unsafe fn enter_task_stack(func: TaskFn, arg: usize, stack_top: VirtAddr) -> i64 {
    let result: i64;

    unsafe {
        asm!(
            // Park the kernel stack pointer; r12 survives the call (SysV
            // callee-saved) and is declared clobbered below.
            "mov r12, rsp",
            "mov rsp, {stack}",
            "call {entry}",
            "mov rsp, r12",
            stack = in(reg) stack_top.as_u64(),
            entry = in(reg) func as usize,
            in("rdi") arg,
            out("rax") result,
            out("r12") _,
            clobber_abi("sysv64"),
        );
    }

    result
}
