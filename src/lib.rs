#![no_std]
#![cfg_attr(test, no_main)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![feature(alloc_error_handler)]
#![feature(allocator_api)]

// Enable the alloc crate
extern crate alloc;

pub mod memory;
pub mod serial;
pub mod slab_allocator;
pub mod task;
pub mod vga_buffer;

use bootloader::BootInfo;
use core::panic::PanicInfo;
use memory::frame_allocator::BootInfoFrameAllocator;
use x86_64::VirtAddr;

/// Logical CPUs registered with the task framework at boot. Slot 0 is the
/// bootstrap CPU; the others stay parked until bring-up code unblocks them.
pub const BOOT_CPUS: usize = task::cpu::NR_CPUS;

/// Initialize kernel subsystems
pub fn init(boot_info: &'static BootInfo) {
    // The bootloader identity-maps the low physical memory this kernel
    // touches, so offset zero reaches the active page tables.
    let phys_mem_offset = VirtAddr::new(0);

    let mut mapper = unsafe { memory::init(phys_mem_offset) };
    let mut frame_allocator = unsafe { BootInfoFrameAllocator::init(&boot_info.memory_map) };

    // Initialize heap allocator
    slab_allocator::init_heap(&mut mapper, &mut frame_allocator)
        .expect("Heap initialization failed");

    println!("Initializing tasks");
    task::cpu::init(BOOT_CPUS);

    println!("Kernel initialized, {} logical CPUs online", BOOT_CPUS);
}

// Called when allocation fails
#[alloc_error_handler]
fn alloc_error_handler(layout: alloc::alloc::Layout) -> ! {
    panic!("Allocation error: {:?}", layout);
}

pub trait Testable {
    fn run(&self) -> ();
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

pub fn test_runner(tests: &[&dyn Testable]) {
    serial_println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }

    exit_qemu(QemuExitCode::Success);
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failed);
    loop {}
}

#[cfg(test)]
bootloader::entry_point!(test_kernel_main);

#[cfg(test)]
fn test_kernel_main(boot_info: &'static BootInfo) -> ! {
    init(boot_info);
    test_main();
    hlt_loop();
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub fn exit_qemu(exit_code: QemuExitCode) {
    use x86_64::instructions::port::Port;

    unsafe {
        let mut port = Port::new(0xf4);
        port.write(exit_code as u32);
    }
}

pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

#[test_case]
fn trivial_assertion() {
    assert_eq!(1, 1);
}
