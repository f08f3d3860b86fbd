use alloc::boxed::Box;
use alloc::sync::Arc;
use core::any::Any;
use core::fmt;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use spin::Mutex;
use x86_64::VirtAddr;

use crate::dprintln;
use crate::memory::stack::TaskStack;

// Deferred-work components
pub mod cpu;
pub mod scheduler;
pub mod trampoline;

use cpu::Cpu;

/// Task entry point: one opaque argument in, a result code out.
pub type TaskFn = extern "C" fn(arg: usize) -> i64;

// Global task ID counter; unique for the lifetime of the kernel even when
// several CPUs create tasks at the same time.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

// Task states
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TaskState {
    New = 0,
    Ready = 1,
    Scheduled = 2,
    Running = 3,
    Done = 4,
}

impl TaskState {
    fn from_raw(raw: u8) -> TaskState {
        match raw {
            0 => TaskState::New,
            1 => TaskState::Ready,
            2 => TaskState::Scheduled,
            3 => TaskState::Running,
            4 => TaskState::Done,
            _ => panic!("invalid raw task state {}", raw),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Kernel,
    User,
}

/// What the run loop does with a task after it finishes a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatPolicy {
    /// Run once, then destroy.
    Once,
    /// Re-arm after every run; the task stays queued until destroyed
    /// externally.
    Loop,
    /// Re-arm with a decrementing budget. The budget reaching zero does
    /// not destroy the task; it keeps re-arming like `Loop`.
    Count(u32),
}

impl fmt::Display for RepeatPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepeatPolicy::Once => write!(f, "ONCE"),
            RepeatPolicy::Loop => write!(f, "LOOP"),
            RepeatPolicy::Count(n) => write!(f, "{} times", n),
        }
    }
}

/// Group tag used for selective waiting. [`TaskGroup::ALL`] matches every
/// task regardless of its own tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskGroup(pub u32);

impl TaskGroup {
    pub const ALL: TaskGroup = TaskGroup(0);
}

// Bindings attached by prepare_task.
struct Binding {
    name: &'static str,
    func: Option<TaskFn>,
    arg: usize,
    kind: TaskKind,
}

impl Binding {
    const fn unbound() -> Binding {
        Binding {
            name: "",
            func: None,
            arg: 0,
            kind: TaskKind::Kernel,
        }
    }
}

/// One unit of deferred work.
///
/// A task is owned by at most one CPU queue at a time. Queue membership is
/// guarded by that CPU's queue lock; the state word is not, it is published
/// with release stores and read with acquire loads so that another CPU's
/// group wait sees transitions without taking the lock.
pub struct Task {
    id: u64,
    state: AtomicU8,
    exec_count: AtomicU64,
    result: AtomicI64,
    group: AtomicU32,
    repeat: Mutex<RepeatPolicy>,
    binding: Mutex<Binding>,
    owner: Mutex<Option<&'static Cpu>>,
    stack: Mutex<Option<TaskStack>>,
    private: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Task {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.binding.lock().name
    }

    pub fn kind(&self) -> TaskKind {
        self.binding.lock().kind
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, new: TaskState) {
        dprintln!(
            "cpu {:?}: task {}[{}] state {:?} -> {:?}",
            self.owner().map(|cpu| cpu.id()),
            self.name(),
            self.id,
            self.state(),
            new
        );
        self.state.store(new as u8, Ordering::Release);
    }

    // Spin until the task reaches `state`. Relaxes the CPU between polls.
    pub(crate) fn wait_for_state(&self, state: TaskState) {
        while self.state() != state {
            spin_loop();
        }
    }

    /// Number of completed or in-progress runs.
    pub fn execution_count(&self) -> u64 {
        self.exec_count.load(Ordering::SeqCst)
    }

    // Returns the pre-increment value; zero means this is the first run.
    pub(crate) fn bump_execution_count(&self) -> u64 {
        self.exec_count.fetch_add(1, Ordering::SeqCst)
    }

    /// The entry function's return value. Defined only after the task has
    /// reached [`TaskState::Done`].
    pub fn result(&self) -> i64 {
        self.result.load(Ordering::Acquire)
    }

    pub(crate) fn set_result(&self, result: i64) {
        self.result.store(result, Ordering::Release);
    }

    pub fn repeat(&self) -> RepeatPolicy {
        *self.repeat.lock()
    }

    pub fn set_repeat(&self, repeat: RepeatPolicy) {
        *self.repeat.lock() = repeat;
    }

    pub fn group(&self) -> TaskGroup {
        TaskGroup(self.group.load(Ordering::Relaxed))
    }

    pub fn set_group(&self, group: TaskGroup) {
        self.group.store(group.0, Ordering::Relaxed);
    }

    pub fn in_group(&self, group: TaskGroup) -> bool {
        group == TaskGroup::ALL || self.group() == group
    }

    /// The CPU whose queue currently holds this task, if any.
    pub fn owner(&self) -> Option<&'static Cpu> {
        *self.owner.lock()
    }

    pub(crate) fn set_owner(&self, cpu: &'static Cpu) {
        *self.owner.lock() = Some(cpu);
    }

    pub fn has_stack(&self) -> bool {
        self.stack.lock().is_some()
    }

    pub(crate) fn stack_top(&self) -> Option<VirtAddr> {
        self.stack.lock().as_ref().map(|stack| stack.top())
    }

    fn take_stack(&self) -> Option<TaskStack> {
        self.stack.lock().take()
    }

    pub(crate) fn entry(&self) -> (TaskFn, usize) {
        let binding = self.binding.lock();
        match binding.func {
            Some(func) => (func, binding.arg),
            None => panic!("task {}[{}] has no entry function", binding.name, self.id),
        }
    }

    /// Attaches one-time setup data to the task.
    pub fn set_private<T: Any + Send>(&self, data: T) {
        *self.private.lock() = Some(Box::new(data));
    }

    /// Detaches previously attached setup data.
    pub fn take_private(&self) -> Option<Box<dyn Any + Send>> {
        self.private.lock().take()
    }
}

/// Allocates a fresh task record in the `New` state with the next unique
/// id, the wildcard group and a `Once` repeat policy. Returns `None` when
/// the heap is exhausted.
pub fn create_task() -> Option<Arc<Task>> {
    let task = Arc::try_new(Task {
        id: NEXT_TASK_ID.fetch_add(1, Ordering::SeqCst),
        state: AtomicU8::new(TaskState::New as u8),
        exec_count: AtomicU64::new(0),
        result: AtomicI64::new(0),
        group: AtomicU32::new(TaskGroup::ALL.0),
        repeat: Mutex::new(RepeatPolicy::Once),
        binding: Mutex::new(Binding::unbound()),
        owner: Mutex::new(None),
        stack: Mutex::new(None),
        private: Mutex::new(None),
    })
    .ok()?;

    Some(task)
}

/// Binds name, entry function, argument and kind to a task and advances it
/// to `Ready`. User tasks receive their own stack page here.
///
/// Must only be called before the task has been scheduled; anything past
/// `Ready` is a lifecycle bug and asserts.
pub fn prepare_task(
    task: &Arc<Task>,
    name: &'static str,
    func: TaskFn,
    arg: usize,
    kind: TaskKind,
) -> Result<(), &'static str> {
    assert!(
        task.state() <= TaskState::Ready,
        "cannot prepare task {}[{}] in state {:?}",
        name,
        task.id,
        task.state()
    );

    {
        let mut binding = task.binding.lock();
        binding.name = name;
        binding.func = Some(func);
        binding.arg = arg;
        binding.kind = kind;
    }

    if kind == TaskKind::User {
        let stack = TaskStack::alloc().ok_or("out of task stack pages")?;
        *task.stack.lock() = Some(stack);
    }

    task.set_state(TaskState::Ready);
    Ok(())
}

/// Unlinks the task from its CPU queue and releases its stack page, both
/// under the owning queue's lock. The caller should not touch the task
/// again; remaining handles only keep the dead record readable.
pub fn destroy_task(task: Arc<Task>) {
    match task.owner() {
        Some(cpu) => {
            let mut queue = cpu.queue().lock();
            queue.retain(|queued| !Arc::ptr_eq(queued, &task));
            drop(task.take_stack());
        }
        None => drop(task.take_stack()),
    }
}

/// Creates and prepares a task in one step. On preparation failure the
/// half-built record is destroyed and `None` is returned, leaving nothing
/// allocated.
pub fn new_task(name: &'static str, func: TaskFn, arg: usize, kind: TaskKind) -> Option<Arc<Task>> {
    let task = create_task()?;

    if prepare_task(&task, name, func, arg, kind).is_err() {
        destroy_task(task);
        return None;
    }

    Some(task)
}
