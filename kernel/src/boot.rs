// =============================================================================
// Skylark — Boot Sequence
// =============================================================================
//
// Brings the kernel up in dependency order: console + logging, memory,
// traps, syscalls, scheduler, clock, filesystem — then hands the rest
// to the `init` task, which probes devices and spawns the compositor
// and shells before exiting.
// =============================================================================

use kdisplay::Rect;

use crate::task::{pty, scheduler};
use crate::wm::window::TITLE_BAR_H;
use crate::{fs, memory, services, shell, syscall, task, traps, wm};

extern "C" {
    static __heap_start: u8;
    static __heap_end: u8;
    static __page_pool_start: u8;
    static __page_pool_end: u8;
    static __framebuffer_start: u8;
}

/// Everything after the assembly prologue.
pub fn kernel_main() -> ! {
    klog::init();
    log::info!("skylark {} booting", env!("CARGO_PKG_VERSION"));

    // Memory first; everything else allocates.
    unsafe {
        let heap_start = &__heap_start as *const u8 as usize;
        let heap_end = &__heap_end as *const u8 as usize;
        memory::heap::init(heap_start, heap_end - heap_start);

        let pool_start = &__page_pool_start as *const u8 as usize;
        let pool_end = &__page_pool_end as *const u8 as usize;
        memory::pmm::init(pool_start, (pool_end - pool_start) / memory::PAGE_SIZE);
    }

    traps::init();
    syscall::init();
    scheduler::init();
    task::clock::init();
    fs::ramfs::init();
    shell::init();

    let pages = memory::pmm::stats();
    let heap = memory::heap::stats();
    log::info!(
        "memory: {} pages, {} KiB heap",
        pages.total_pages,
        heap.total_bytes / 1024
    );

    if scheduler::create(init_task, 0, "init", 16).is_err() {
        panic!("could not create the init task");
    }

    khal::cpu::irq_enable();

    // The boot task is the idle loop from here on.
    loop {
        scheduler::schedule();
        khal::cpu::wait_for_interrupt();
    }
}

/// First scheduled task: probe devices, spawn the compositor and the
/// shells, start enabled services, then exit.
fn init_task(_arg: usize) {
    let fb_base = unsafe { &__framebuffer_start as *const u8 as usize };

    match crate::drivers::virtio::gpu::init(fb_base) {
        Ok((width, height)) => {
            wm::compositor::init(fb_base, width, height);
            let devices = crate::drivers::virtio::input::init();
            log::info!("input: {} device(s)", devices);
            spawn_terminal_window(width, height);
            if scheduler::create(wm::compositor::compositor_task, 0, "compositor", 32).is_err() {
                log::error!("compositor task failed to start");
            }
        }
        Err(e) => {
            log::warn!("no virtio-gpu ({:?}); UART console only", e);
        }
    }

    // The UART console works with or without a display.
    if let Some(slot) = pty::create() {
        let _ = scheduler::create(shell::console::shell_task, slot, "console", 32);
        let _ = scheduler::create(shell::console::uart_pump_task, slot, "uart-pump", 8);
    }

    let loaded = services::load_all();
    let started = services::start_enabled();
    if loaded > 0 {
        log::info!("services: {} loaded, {} started", loaded, started);
    }
    // init's children were re-parented where needed; nothing left to do.
}

/// A terminal window wired to its own pty and shell task.
fn spawn_terminal_window(screen_w: u32, _screen_h: u32) {
    let slot = match pty::create() {
        Some(slot) => slot,
        None => return,
    };
    let cols = 64usize;
    let rows = 24usize;
    let term = wm::terminal::alloc(cols, rows);
    let w = (cols * kdisplay::font::GLYPH_WIDTH) as u32 + 2;
    let h = (rows * kdisplay::font::GLYPH_HEIGHT) as u32 + TITLE_BAR_H + 1;
    let x = ((screen_w.saturating_sub(w)) / 2) as i32;
    wm::compositor::create_window(
        "terminal",
        Rect::new(x.max(8), 48, w, h),
        Some(wm::terminal::render),
        None,
        Some(slot),
        term,
    );
    let _ = scheduler::create(shell::console::shell_task, slot, "shell", 32);
}
