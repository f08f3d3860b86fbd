use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};
use lazy_static::lazy_static;
use spin::Mutex;

use super::Task;

/// Logical CPU slots known to the task framework.
pub const NR_CPUS: usize = 4;

/// Id of the bootstrap CPU. It drives the boot flow and never parks.
pub const BSP_ID: u32 = 0;

/// A logical processor: one task queue and one run loop.
pub struct Cpu {
    id: u32,
    bsp: bool,
    online: AtomicBool,
    // Insertion-ordered task queue. The lock guards membership only;
    // task states are read and written through their own atomics.
    queue: Mutex<VecDeque<Arc<Task>>>,
    // Run-loop coordination with bring-up code: secondary CPUs park while
    // `blocked` is set and report queue drains through `finished`.
    blocked: AtomicBool,
    finished: AtomicBool,
}

impl Cpu {
    fn new(id: u32, bsp: bool) -> Cpu {
        Cpu {
            id,
            bsp,
            online: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            blocked: AtomicBool::new(!bsp),
            finished: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_bsp(&self) -> bool {
        self.bsp
    }

    pub(crate) fn queue(&self) -> &Mutex<VecDeque<Arc<Task>>> {
        &self.queue
    }

    /// Number of tasks currently queued.
    pub fn queued_tasks(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn set_unblocked(&self) {
        self.blocked.store(false, Ordering::Release);
    }

    pub fn set_blocked(&self) {
        self.blocked.store(true, Ordering::Release);
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    /// Parks until bring-up code clears the blocked flag.
    pub fn wait_unblocked(&self) {
        while self.is_blocked() {
            spin_loop();
        }
    }

    pub fn set_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn set_unfinished(&self) {
        self.finished.store(false, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Spins until this CPU's run loop reports its drain finished.
    pub fn wait_finished(&self) {
        while !self.is_finished() {
            spin_loop();
        }
    }
}

lazy_static! {
    static ref CPUS: [Cpu; NR_CPUS] =
        core::array::from_fn(|id| Cpu::new(id as u32, id as u32 == BSP_ID));
}

/// Marks the first `count` logical CPUs online. CPU 0 is the bootstrap CPU.
pub fn init(count: usize) {
    assert!(
        count >= 1 && count <= NR_CPUS,
        "CPU count {} outside 1..={}",
        count,
        NR_CPUS
    );

    for cpu in CPUS.iter().take(count) {
        cpu.online.store(true, Ordering::Release);
    }
}

/// Looks up an online CPU by id.
pub fn get(id: u32) -> Option<&'static Cpu> {
    CPUS.get(id as usize)
        .filter(|cpu| cpu.online.load(Ordering::Acquire))
}

/// The bootstrap CPU.
pub fn bsp() -> &'static Cpu {
    get(BSP_ID).expect("bootstrap CPU is not online")
}
