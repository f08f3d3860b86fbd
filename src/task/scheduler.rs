use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::hint::spin_loop;

use super::cpu::{self, Cpu};
use super::{trampoline, RepeatPolicy, Task, TaskGroup, TaskKind, TaskState};
use crate::println;

/// Recoverable scheduling failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// The target id does not name an online CPU.
    CpuNotFound,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::CpuNotFound => write!(f, "target CPU does not exist"),
        }
    }
}

/// Appends a `Ready` task to the tail of CPU `cpu_id`'s queue and marks it
/// runnable. Queue membership, ownership and the state transition are
/// published together under the queue lock; nothing partial is observable.
pub fn schedule_task(task: &Arc<Task>, cpu_id: u32) -> Result<(), SchedError> {
    let cpu = match cpu::get(cpu_id) {
        Some(cpu) => cpu,
        None => {
            println!(
                "WARNING: unable to schedule task {}: CPU[{}] does not exist",
                task.name(),
                cpu_id
            );
            return Err(SchedError::CpuNotFound);
        }
    };

    assert!(
        task.state() == TaskState::Ready,
        "cannot schedule task {}[{}] in state {:?}",
        task.name(),
        task.id(),
        task.state()
    );

    println!(
        "CPU[{}]: scheduling task {}[{}] ({})",
        cpu.id(),
        task.name(),
        task.id(),
        task.repeat()
    );

    let mut queue = cpu.queue().lock();
    queue.push_back(task.clone());
    task.set_owner(cpu);
    task.set_state(TaskState::Scheduled);

    Ok(())
}

/// Looks up a queued task on `cpu` by its name.
pub fn get_task_by_name(cpu: &Cpu, name: &str) -> Option<Arc<Task>> {
    cpu.queue().lock().iter().find(|task| task.name() == name).cloned()
}

fn owner_id(task: &Task) -> u32 {
    match task.owner() {
        Some(cpu) => cpu.id(),
        None => panic!("task {}[{}] has no owning CPU", task.name(), task.id()),
    }
}

// Executes one run of the task on the current CPU, synchronously.
fn run_task(task: &Arc<Task>) {
    // The queue can briefly expose a task between insertion and its state
    // flip; wait that window out before dispatching.
    task.wait_for_state(TaskState::Scheduled);

    if task.bump_execution_count() == 0 {
        println!(
            "CPU[{}]: running task {}[{}]",
            owner_id(task),
            task.name(),
            task.id()
        );
    }

    task.set_state(TaskState::Running);

    let (func, arg) = task.entry();
    let result = match task.kind() {
        TaskKind::Kernel => func(arg),
        TaskKind::User => {
            let stack_top = match task.stack_top() {
                Some(top) => top,
                None => panic!("user task {}[{}] has no stack", task.name(), task.id()),
            };
            unsafe { trampoline::enter_task_stack(func, arg, stack_top) }
        }
    };

    task.set_result(result);
    task.set_state(TaskState::Done);
}

// Decides what happens to a finished task: reap it or arm another run.
fn process_task_repeat(task: &Arc<Task>) {
    match task.repeat() {
        RepeatPolicy::Once => {
            let kind = match task.kind() {
                TaskKind::Kernel => "Kernel",
                TaskKind::User => "User",
            };
            println!(
                "{} task '{}' finished on CPU[{}] with result {} (ran {} times)",
                kind,
                task.name(),
                owner_id(task),
                task.result(),
                task.execution_count()
            );
            super::destroy_task(task.clone());
        }
        RepeatPolicy::Loop => task.set_state(TaskState::Scheduled),
        RepeatPolicy::Count(n) => {
            // The budget bottoms out at zero and keeps re-arming; count
            // tasks never destroy themselves.
            task.set_repeat(RepeatPolicy::Count(n.saturating_sub(1)));
            task.set_state(TaskState::Scheduled);
        }
    }
}

/// Makes one pass over `cpu`'s queue: runnable tasks execute, finished
/// tasks are reaped or re-armed. Repeating tasks stay queued, so a single
/// pass never drains them.
///
/// The pass works on a snapshot of the queue; tasks scheduled while it
/// runs are picked up by the next pass.
pub fn run_tasks_once(cpu: &Cpu) {
    let snapshot: Vec<Arc<Task>> = cpu.queue().lock().iter().cloned().collect();

    for task in snapshot {
        match task.state() {
            TaskState::Done => process_task_repeat(&task),
            TaskState::Scheduled => run_task(&task),
            state => panic!(
                "task {}[{}] observed in state {:?} by the run loop",
                task.name(),
                task.id(),
                state
            ),
        }
        spin_loop();
    }
}

/// Drains `cpu`'s task queue.
///
/// Secondary CPUs park until bring-up code unblocks them, and park again
/// once their queue is empty; the loop is re-entrant across such waves.
/// Queues holding `Loop` or `Count` tasks never become empty, so this only
/// returns once every remaining task has been reaped.
pub fn run_tasks(cpu: &Cpu) {
    if !cpu.is_bsp() {
        cpu.wait_unblocked();
    }
    cpu.set_unfinished();

    loop {
        run_tasks_once(cpu);
        if cpu.queue().lock().is_empty() {
            break;
        }
    }

    if !cpu.is_bsp() {
        cpu.set_blocked();
    }
    cpu.set_finished();
}

/// One scan of the predicate behind [`wait_for_group`]: true when no task
/// on `cpu` matching `group` is short of `Done`.
pub fn task_group_done(cpu: &Cpu, group: TaskGroup) -> bool {
    cpu.queue()
        .lock()
        .iter()
        .all(|task| !task.in_group(group) || task.state() == TaskState::Done)
}

/// Blocks until a full scan of `cpu`'s queue finds every task matching
/// `group` in the `Done` state ([`TaskGroup::ALL`] matches all of them).
///
/// Tasks scheduled into the group while the wait runs extend it; this is a
/// completion barrier, not a quiescence barrier. Callers that need the
/// group to stay quiet must stop scheduling into it themselves.
pub fn wait_for_group(cpu: &Cpu, group: TaskGroup) {
    while !task_group_done(cpu, group) {
        spin_loop();
    }
}
