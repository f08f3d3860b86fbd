#![no_std]
#![no_main]

use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;
use ktest_kernel::task::{self, cpu, scheduler, TaskState};
use ktest_kernel::{exit_qemu, serial_print, serial_println, QemuExitCode};

entry_point!(main);

fn main(boot_info: &'static BootInfo) -> ! {
    ktest_kernel::init(boot_info);

    serial_print!("schedule_contract::non_ready_task_is_rejected...\t");

    let task = task::create_task().expect("task allocation failed");
    assert_eq!(task.state(), TaskState::New);

    // Scheduling before prepare must trip the readiness assertion.
    let _ = scheduler::schedule_task(&task, cpu::BSP_ID);

    serial_println!("[test did not panic]");
    exit_qemu(QemuExitCode::Failed);

    #[allow(clippy::empty_loop)]
    loop {}
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    serial_println!("[ok]");
    exit_qemu(QemuExitCode::Success);
    loop {}
}
