#![no_std]
#![no_main]

use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;
use ktest_kernel::task::{self, cpu, scheduler, TaskGroup, TaskKind};
use ktest_kernel::{hlt_loop, println};

entry_point!(kernel_main);

extern "C" fn boot_report(arg: usize) -> i64 {
    println!("boot report: {} logical CPUs online", arg);
    0
}

extern "C" fn sum_to(arg: usize) -> i64 {
    (1..=arg as i64).sum()
}

extern "C" fn user_hello(_arg: usize) -> i64 {
    println!("hello from a user task on its own stack");
    0
}

fn kernel_main(boot_info: &'static BootInfo) -> ! {
    ktest_kernel::vga_buffer::WRITER.lock().clear_screen();
    ktest_kernel::init(boot_info);

    let bsp = cpu::bsp();

    // A small boot workload: two kernel tasks and one user task running on
    // its own stack page, all in the default run-once policy.
    let report = task::new_task("boot-report", boot_report, ktest_kernel::BOOT_CPUS, TaskKind::Kernel)
        .expect("failed to allocate boot-report task");
    let sum = task::new_task("sum-to-ten", sum_to, 10, TaskKind::Kernel)
        .expect("failed to allocate sum-to-ten task");
    let hello = task::new_task("user-hello", user_hello, 0, TaskKind::User)
        .expect("failed to allocate user-hello task");

    scheduler::schedule_task(&report, bsp.id()).expect("scheduling boot-report failed");
    scheduler::schedule_task(&sum, bsp.id()).expect("scheduling sum-to-ten failed");
    scheduler::schedule_task(&hello, bsp.id()).expect("scheduling user-hello failed");

    scheduler::run_tasks(bsp);
    scheduler::wait_for_group(bsp, TaskGroup::ALL);

    println!("all boot tasks finished");
    hlt_loop();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("{}", info);
    hlt_loop();
}
