// =============================================================================
// Skylark — Memory Subsystem
// =============================================================================
//
// Two layers, no virtual memory:
//
//   pmm.rs  — fixed-size page pool over a linker-reserved region
//   heap.rs — first-fit free-list allocator backing Box/Vec/String
//
// Both are protected by the kernel spinlock; callers that may race
// with interrupt handlers go through the lock like everyone else.
// =============================================================================

pub mod heap;
pub mod pmm;

/// Size of one physical page.
pub const PAGE_SIZE: usize = 4096;
