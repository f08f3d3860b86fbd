// src/slab_allocator.rs

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use spin::Mutex;
use x86_64::structures::paging::{FrameAllocator, Mapper, PageTableFlags, Size4KiB};

use crate::memory;

// Size classes, all powers of two. Task records and queue storage land in
// the small and middle classes, task stack pages in the 4096 class.
const BLOCK_SIZES: &[usize] = &[16, 32, 64, 128, 256, 512, 1024, 2048, 4096];

// Heap configuration
pub const HEAP_START: usize = 0x_4444_4444_0000;
pub const HEAP_SIZE: usize = 1024 * 1024; // 1 MiB

struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

// One fixed-size class carved out of the heap. Blocks are aligned to their
// own size, so any layout routed here has its alignment satisfied.
struct Slab {
    block_size: usize,
    region_start: usize,
    region_end: usize,
    free_list: Option<NonNull<FreeBlock>>,
}

unsafe impl Send for Slab {}

impl Slab {
    const fn empty() -> Self {
        Slab {
            block_size: 0,
            region_start: 0,
            region_end: 0,
            free_list: None,
        }
    }

    unsafe fn init(&mut self, block_size: usize, region_start: usize, region_size: usize) {
        let start = align_up(region_start, block_size);
        let size = region_size - (start - region_start);

        self.block_size = block_size;
        self.region_start = start;
        self.region_end = start + size;
        self.free_list = None;

        // Thread every block onto the free list, last block first.
        let blocks = size / block_size;
        for i in (0..blocks).rev() {
            let block = (start + i * block_size) as *mut FreeBlock;
            unsafe {
                (*block).next = self.free_list;
            }
            self.free_list = NonNull::new(block);
        }
    }

    fn allocate(&mut self) -> Option<NonNull<u8>> {
        let block = self.free_list?;
        self.free_list = unsafe { block.as_ref().next };
        Some(block.cast())
    }

    fn deallocate(&mut self, ptr: NonNull<u8>) {
        let block: NonNull<FreeBlock> = ptr.cast();
        unsafe {
            (*block.as_ptr()).next = self.free_list;
        }
        self.free_list = Some(block);
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.region_start && addr < self.region_end
    }
}

const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

pub struct SlabAllocator {
    slabs: [Mutex<Slab>; BLOCK_SIZES.len()],
    fallback: Mutex<linked_list_allocator::Heap>,
}

impl SlabAllocator {
    pub const fn new() -> Self {
        const EMPTY_SLAB: Mutex<Slab> = Mutex::new(Slab::empty());
        SlabAllocator {
            slabs: [EMPTY_SLAB; BLOCK_SIZES.len()],
            fallback: Mutex::new(linked_list_allocator::Heap::empty()),
        }
    }

    /// Carves the mapped heap into one region per size class, leaving the
    /// rest to the fallback allocator.
    ///
    /// # Safety
    ///
    /// `[heap_start, heap_start + heap_size)` must be mapped, writable and
    /// otherwise unused.
    pub unsafe fn init(&self, heap_start: usize, heap_size: usize) {
        let region_size = heap_size / (BLOCK_SIZES.len() + 1);
        let mut next_region = heap_start;

        for (i, &block_size) in BLOCK_SIZES.iter().enumerate() {
            unsafe {
                self.slabs[i].lock().init(block_size, next_region, region_size);
            }
            next_region += region_size;
        }

        let fallback_size = heap_start + heap_size - next_region;
        unsafe {
            self.fallback.lock().init(next_region, fallback_size);
        }
    }

    fn slab_index(layout: &Layout) -> Option<usize> {
        let needed = layout.size().max(layout.align());
        BLOCK_SIZES.iter().position(|&size| size >= needed)
    }
}

unsafe impl GlobalAlloc for SlabAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if let Some(index) = Self::slab_index(&layout) {
            if let Some(ptr) = self.slabs[index].lock().allocate() {
                return ptr.as_ptr();
            }
            // Class exhausted, fall through to the fallback heap.
        }

        self.fallback
            .lock()
            .allocate_first_fit(layout)
            .map_or(ptr::null_mut(), |allocation| allocation.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let addr = ptr as usize;

        for slab in &self.slabs {
            let mut slab = slab.lock();
            if slab.contains(addr) {
                unsafe {
                    slab.deallocate(NonNull::new_unchecked(ptr));
                }
                return;
            }
        }

        unsafe {
            self.fallback
                .lock()
                .deallocate(NonNull::new_unchecked(ptr), layout);
        }
    }
}

#[global_allocator]
static ALLOCATOR: SlabAllocator = SlabAllocator::new();

/// Maps the heap pages and hands them to the allocator.
pub fn init_heap(
    mapper: &mut impl Mapper<Size4KiB>,
    frame_allocator: &mut impl FrameAllocator<Size4KiB>,
) -> Result<(), &'static str> {
    let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
    memory::map_range(
        mapper,
        frame_allocator,
        memory::page_range(HEAP_START, HEAP_SIZE),
        flags,
    )?;

    unsafe {
        ALLOCATOR.init(HEAP_START, HEAP_SIZE);
    }

    Ok(())
}
