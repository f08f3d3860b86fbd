// src/memory/mod.rs
use x86_64::{
    registers::control::Cr3,
    structures::paging::{
        page::PageRangeInclusive, FrameAllocator, Mapper, OffsetPageTable, Page, PageTable,
        PageTableFlags, Size4KiB,
    },
    VirtAddr,
};

pub mod frame_allocator;
pub mod stack;

/// Initialize a new OffsetPageTable
///
/// # Safety
///
/// The complete physical memory must be mapped at `physical_memory_offset`,
/// and this must only be called once to avoid aliasing `&mut` references.
pub unsafe fn init(physical_memory_offset: VirtAddr) -> OffsetPageTable<'static> {
    let level_4_table = unsafe { active_level_4_table(physical_memory_offset) };
    unsafe { OffsetPageTable::new(level_4_table, physical_memory_offset) }
}

/// Returns a mutable reference to the active level 4 page table
unsafe fn active_level_4_table(physical_memory_offset: VirtAddr) -> &'static mut PageTable {
    let (level_4_table_frame, _) = Cr3::read();
    let phys = level_4_table_frame.start_address();
    let virt = physical_memory_offset + phys.as_u64();
    let page_table_ptr: *mut PageTable = virt.as_mut_ptr();
    unsafe { &mut *page_table_ptr }
}

/// Maps a range of pages to freshly allocated physical frames with the given flags
pub fn map_range(
    mapper: &mut impl Mapper<Size4KiB>,
    frame_allocator: &mut impl FrameAllocator<Size4KiB>,
    range: PageRangeInclusive<Size4KiB>,
    flags: PageTableFlags,
) -> Result<(), &'static str> {
    for page in range {
        let frame = frame_allocator
            .allocate_frame()
            .ok_or("Failed to allocate physical frame")?;

        unsafe {
            match mapper.map_to(page, frame, flags, frame_allocator) {
                Ok(tlb) => tlb.flush(),
                Err(_) => return Err("Failed to map page"),
            }
        }
    }

    Ok(())
}

/// Builds the inclusive page range covering `[start, start + size)`.
pub fn page_range(start: usize, size: usize) -> PageRangeInclusive<Size4KiB> {
    let range_start = VirtAddr::new(start as u64);
    let range_end = range_start + size - 1u64;
    let start_page = Page::containing_address(range_start);
    let end_page = Page::containing_address(range_end);
    Page::range_inclusive(start_page, end_page)
}
