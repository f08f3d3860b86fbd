#![no_std]
#![no_main]

use core::panic::PanicInfo;
use ktest_kernel::{exit_qemu, serial_print, serial_println, QemuExitCode};

#[unsafe(no_mangle)]
pub extern "C" fn _start() -> ! {
    serial_print!("basic_boot::println_after_boot...\t");
    ktest_kernel::println!("println output after boot");
    serial_println!("[ok]");

    exit_qemu(QemuExitCode::Success);

    #[allow(clippy::empty_loop)]
    loop {}
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    ktest_kernel::test_panic_handler(info)
}
