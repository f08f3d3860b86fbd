// src/memory/stack.rs

use alloc::boxed::Box;
use x86_64::VirtAddr;

pub const STACK_PAGE_SIZE: usize = 4096;

#[repr(C, align(4096))]
struct StackPage([u8; STACK_PAGE_SIZE]);

/// An owned, zeroed top-of-stack page for a user task.
///
/// The page is released when the `TaskStack` is dropped, which happens
/// exactly once, when the owning task is destroyed.
pub struct TaskStack {
    page: Box<StackPage>,
}

impl TaskStack {
    /// Allocates a zeroed stack page. Returns `None` when the heap is exhausted.
    pub fn alloc() -> Option<TaskStack> {
        let page = Box::<StackPage>::try_new_zeroed().ok()?;
        // Zeroed bytes are a valid StackPage.
        let page = unsafe { page.assume_init() };
        Some(TaskStack { page })
    }

    /// Highest address of the page; the stack grows down from here.
    /// Page alignment keeps the returned address 16-byte aligned for calls.
    pub fn top(&self) -> VirtAddr {
        VirtAddr::from_ptr(self.page.0.as_ptr()) + STACK_PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn stack_top_is_aligned() {
        let stack = TaskStack::alloc().unwrap();
        assert_eq!(stack.top().as_u64() % 16, 0);
    }

    #[test_case]
    fn stacks_do_not_overlap() {
        let a = TaskStack::alloc().unwrap();
        let b = TaskStack::alloc().unwrap();
        let a_top = a.top().as_u64();
        let b_top = b.top().as_u64();
        assert!(a_top <= b_top - STACK_PAGE_SIZE as u64 || b_top <= a_top - STACK_PAGE_SIZE as u64);
    }
}
