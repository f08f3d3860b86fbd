#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(ktest_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::sync::Arc;
use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;
use ktest_kernel::println;
use ktest_kernel::task::{self, cpu, scheduler, RepeatPolicy, TaskGroup, TaskKind, TaskState};

entry_point!(main);

fn main(boot_info: &'static BootInfo) -> ! {
    ktest_kernel::init(boot_info);

    println!("Running scheduler tests...");
    test_main();

    ktest_kernel::hlt_loop();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    ktest_kernel::test_panic_handler(info)
}

extern "C" fn noop(_arg: usize) -> i64 {
    0
}

#[test_case]
fn schedule_rejects_missing_cpu() {
    let task = task::new_task("nowhere", noop, 0, TaskKind::Kernel).unwrap();

    let result = scheduler::schedule_task(&task, 99);
    assert_eq!(result, Err(scheduler::SchedError::CpuNotFound));

    // The task is untouched and still schedulable elsewhere.
    assert_eq!(task.state(), TaskState::Ready);
    assert!(task.owner().is_none());
    task::destroy_task(task);
}

#[test_case]
fn schedule_records_owner_and_state() {
    let task = task::new_task("owned", noop, 0, TaskKind::Kernel).unwrap();
    task.set_repeat(RepeatPolicy::Loop);

    scheduler::schedule_task(&task, cpu::BSP_ID).unwrap();

    assert_eq!(task.state(), TaskState::Scheduled);
    assert_eq!(task.owner().unwrap().id(), cpu::BSP_ID);
    assert!(scheduler::get_task_by_name(cpu::bsp(), "owned").is_some());
    task::destroy_task(task);
}

#[test_case]
fn single_pass_runs_each_queued_task_once() {
    // One pass walks the queue front to back, so both queued tasks get
    // exactly one run out of it.
    let first = task::new_task("fifo-first", noop, 0, TaskKind::Kernel).unwrap();
    let second = task::new_task("fifo-second", noop, 0, TaskKind::Kernel).unwrap();
    first.set_repeat(RepeatPolicy::Loop);
    second.set_repeat(RepeatPolicy::Loop);

    scheduler::schedule_task(&first, cpu::BSP_ID).unwrap();
    scheduler::schedule_task(&second, cpu::BSP_ID).unwrap();

    scheduler::run_tasks_once(cpu::bsp());
    assert_eq!(first.state(), TaskState::Done);
    assert_eq!(second.state(), TaskState::Done);
    assert_eq!(first.execution_count(), 1);
    assert_eq!(second.execution_count(), 1);

    task::destroy_task(first);
    task::destroy_task(second);
}

#[test_case]
fn loop_task_survives_drain_passes() {
    let task = task::new_task("looper", noop, 0, TaskKind::Kernel).unwrap();
    task.set_repeat(RepeatPolicy::Loop);
    scheduler::schedule_task(&task, cpu::BSP_ID).unwrap();

    // Passes alternate between running and re-arming the task.
    for _ in 0..6 {
        scheduler::run_tasks_once(cpu::bsp());
    }

    assert!(scheduler::get_task_by_name(cpu::bsp(), "looper").is_some());
    assert_eq!(task.execution_count(), 3);
    assert_eq!(task.repeat(), RepeatPolicy::Loop);
    task::destroy_task(task);
}

#[test_case]
fn count_policy_never_self_terminates() {
    let task = task::new_task("counted", noop, 0, TaskKind::Kernel).unwrap();
    task.set_repeat(RepeatPolicy::Count(3));
    scheduler::schedule_task(&task, cpu::BSP_ID).unwrap();

    // Six passes: three runs, three re-arms. The budget is spent...
    for _ in 0..6 {
        scheduler::run_tasks_once(cpu::bsp());
    }
    assert_eq!(task.execution_count(), 3);
    assert_eq!(task.repeat(), RepeatPolicy::Count(0));
    assert!(scheduler::get_task_by_name(cpu::bsp(), "counted").is_some());

    // ...but the task keeps running anyway; a zero budget never destroys.
    for _ in 0..2 {
        scheduler::run_tasks_once(cpu::bsp());
    }
    assert_eq!(task.execution_count(), 4);
    assert_eq!(task.repeat(), RepeatPolicy::Count(0));
    assert!(scheduler::get_task_by_name(cpu::bsp(), "counted").is_some());

    task::destroy_task(task);
}

#[test_case]
fn group_wait_scan_tracks_completion() {
    let group = TaskGroup(7);
    let a = task::new_task("group-a", noop, 0, TaskKind::Kernel).unwrap();
    let b = task::new_task("group-b", noop, 0, TaskKind::Kernel).unwrap();
    a.set_group(group);
    b.set_group(group);
    a.set_repeat(RepeatPolicy::Loop);
    b.set_repeat(RepeatPolicy::Loop);

    scheduler::schedule_task(&a, cpu::BSP_ID).unwrap();
    scheduler::schedule_task(&b, cpu::BSP_ID).unwrap();

    // Neither has run: a scan must see the group busy.
    assert!(!scheduler::task_group_done(cpu::bsp(), group));

    scheduler::run_tasks_once(cpu::bsp());

    // Both ran to completion: the scan is clean and the wait returns.
    assert!(scheduler::task_group_done(cpu::bsp(), group));
    scheduler::wait_for_group(cpu::bsp(), group);
    assert_eq!(a.state(), TaskState::Done);
    assert_eq!(b.state(), TaskState::Done);

    task::destroy_task(a);
    task::destroy_task(b);
}

#[test_case]
fn group_wait_ignores_other_groups() {
    let outsider = task::new_task("outsider", noop, 0, TaskKind::Kernel).unwrap();
    outsider.set_group(TaskGroup(2));
    outsider.set_repeat(RepeatPolicy::Loop);
    scheduler::schedule_task(&outsider, cpu::BSP_ID).unwrap();

    // A scan for an unrelated group is clean, the wildcard scan is not.
    assert!(scheduler::task_group_done(cpu::bsp(), TaskGroup(1)));
    assert!(!scheduler::task_group_done(cpu::bsp(), TaskGroup::ALL));

    task::destroy_task(outsider);
}

#[test_case]
fn run_loop_waves_park_secondary_cpus() {
    let ap = cpu::get(1).unwrap();
    assert!(!ap.is_bsp());
    assert!(ap.is_blocked());

    // First wave.
    let task = task::new_task("wave-1", noop, 0, TaskKind::Kernel).unwrap();
    scheduler::schedule_task(&task, ap.id()).unwrap();
    let first = Arc::downgrade(&task);
    drop(task);
    ap.set_unblocked();
    scheduler::run_tasks(ap);
    ap.wait_finished();

    assert!(ap.is_blocked());
    assert!(first.upgrade().is_none());
    assert_eq!(ap.queued_tasks(), 0);

    // Second wave on the same CPU: the run loop is re-entrant.
    let task = task::new_task("wave-2", noop, 0, TaskKind::Kernel).unwrap();
    scheduler::schedule_task(&task, ap.id()).unwrap();
    let second = Arc::downgrade(&task);
    drop(task);
    ap.set_unblocked();
    scheduler::run_tasks(ap);

    assert!(ap.is_blocked());
    assert!(second.upgrade().is_none());
    assert_eq!(ap.queued_tasks(), 0);
}
