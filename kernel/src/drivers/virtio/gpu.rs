// =============================================================================
// Skylark — Virtio GPU Surface
// =============================================================================
//
// Exactly one 2-D resource backs the whole screen: CREATE_2D in BGRA
// 8888 at the display geometry, ATTACH_BACKING pointing at the fixed
// framebuffer region, SET_SCANOUT on the first enabled display mode.
// `flush()` pushes the surface to the host with TRANSFER_TO_HOST_2D +
// RESOURCE_FLUSH.
//
// All commands are synchronous two-descriptor exchanges (read-only
// request, write-only response) under the submission lock.
// =============================================================================

use core::mem;

use crate::drivers::virtio::queue::{ChainBuf, VirtQueue};
use crate::drivers::virtio::{self, VirtioDevice, VirtioError, DEVICE_ID_GPU};
use crate::sync::SpinLock;

const CMD_GET_DISPLAY_INFO: u32 = 0x0100;
const CMD_RESOURCE_CREATE_2D: u32 = 0x0101;
const CMD_SET_SCANOUT: u32 = 0x0103;
const CMD_RESOURCE_FLUSH: u32 = 0x0104;
const CMD_TRANSFER_TO_HOST_2D: u32 = 0x0105;
const CMD_RESOURCE_ATTACH_BACKING: u32 = 0x0106;

const RESP_OK_NODATA: u32 = 0x1100;
const RESP_OK_DISPLAY_INFO: u32 = 0x1101;

/// B8G8R8A8_UNORM.
const FORMAT_BGRA8888: u32 = 1;

const MAX_SCANOUTS: usize = 16;

/// Fallback geometry when no display mode is enabled.
const FALLBACK_WIDTH: u32 = 1024;
const FALLBACK_HEIGHT: u32 = 768;

/// Spins to wait for command completion before declaring a timeout.
const COMMAND_SPINS: u32 = 1_000_000;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct CtrlHdr {
    cmd_type: u32,
    flags: u32,
    fence_id: u64,
    ctx_id: u32,
    padding: u32,
}

impl CtrlHdr {
    fn new(cmd_type: u32) -> Self {
        Self {
            cmd_type,
            ..Default::default()
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct GpuRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct DisplayMode {
    r: GpuRect,
    enabled: u32,
    flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct RespDisplayInfo {
    hdr: CtrlHdr,
    pmodes: [DisplayMode; MAX_SCANOUTS],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ResourceCreate2d {
    hdr: CtrlHdr,
    resource_id: u32,
    format: u32,
    width: u32,
    height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct AttachBacking {
    hdr: CtrlHdr,
    resource_id: u32,
    nr_entries: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct MemEntry {
    addr: u64,
    length: u32,
    padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct SetScanout {
    hdr: CtrlHdr,
    r: GpuRect,
    scanout_id: u32,
    resource_id: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct TransferToHost2d {
    hdr: CtrlHdr,
    r: GpuRect,
    offset: u64,
    resource_id: u32,
    padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ResourceFlush {
    hdr: CtrlHdr,
    r: GpuRect,
    resource_id: u32,
    padding: u32,
}

fn bytes_of<T>(value: &T) -> &[u8] {
    // SAFETY: T is a plain repr(C) command struct.
    unsafe { core::slice::from_raw_parts(value as *const T as *const u8, mem::size_of::<T>()) }
}

/// Byte offset of the response area inside the command page.
const RESP_OFFSET: usize = 2048;

/// The single GPU instance.
pub struct Gpu {
    dev: VirtioDevice,
    vq: VirtQueue,
    /// DMA page: request at offset 0, response at `RESP_OFFSET`.
    cmd_page: *mut u8,
    width: u32,
    height: u32,
    fb_base: usize,
    resource_id: u32,
}

// SAFETY: the command page and queue are only touched under the GPU lock.
unsafe impl Send for Gpu {}

impl Gpu {
    /// Copy `req` into the command page, run the two-descriptor
    /// exchange, and return the response header type.
    fn command(&mut self, req: &[u8], resp_len: usize) -> Result<u32, VirtioError> {
        debug_assert!(req.len() <= RESP_OFFSET);
        debug_assert!(RESP_OFFSET + resp_len <= crate::memory::PAGE_SIZE);
        unsafe {
            core::ptr::copy_nonoverlapping(req.as_ptr(), self.cmd_page, req.len());
            core::ptr::write_bytes(self.cmd_page.add(RESP_OFFSET), 0, resp_len);
        }
        khal::cpu::cache_clean(self.cmd_page as usize, crate::memory::PAGE_SIZE);

        self.vq.submit(&[
            ChainBuf {
                addr: self.cmd_page as u64,
                len: req.len() as u32,
                device_writes: false,
            },
            ChainBuf {
                addr: self.cmd_page as u64 + RESP_OFFSET as u64,
                len: resp_len as u32,
                device_writes: true,
            },
        ])?;
        self.dev.notify(0);
        self.vq.wait_used(2, COMMAND_SPINS)?;

        let resp_type =
            unsafe { (self.cmd_page.add(RESP_OFFSET) as *const u32).read_volatile() };
        Ok(resp_type)
    }

    fn command_ok(&mut self, req: &[u8]) -> Result<(), VirtioError> {
        let resp = self.command(req, mem::size_of::<CtrlHdr>())?;
        if resp != RESP_OK_NODATA {
            return Err(VirtioError::BadResponse);
        }
        Ok(())
    }

    /// First enabled display mode, or the fallback geometry.
    fn query_display(&mut self) -> Result<(u32, u32), VirtioError> {
        let req = CtrlHdr::new(CMD_GET_DISPLAY_INFO);
        let resp_type =
            self.command(bytes_of(&req), mem::size_of::<RespDisplayInfo>())?;
        if resp_type != RESP_OK_DISPLAY_INFO {
            return Err(VirtioError::BadResponse);
        }
        let info = unsafe {
            (self.cmd_page.add(RESP_OFFSET) as *const RespDisplayInfo).read_volatile()
        };
        for mode in info.pmodes.iter() {
            if mode.enabled != 0 && mode.r.width > 0 && mode.r.height > 0 {
                return Ok((mode.r.width, mode.r.height));
            }
        }
        Ok((FALLBACK_WIDTH, FALLBACK_HEIGHT))
    }

    fn full_rect(&self) -> GpuRect {
        GpuRect {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }

    /// Push the framebuffer to the host and flush the resource.
    pub fn flush(&mut self) -> Result<(), VirtioError> {
        khal::cpu::cache_clean(self.fb_base, (self.width * self.height * 4) as usize);
        let transfer = TransferToHost2d {
            hdr: CtrlHdr::new(CMD_TRANSFER_TO_HOST_2D),
            r: self.full_rect(),
            offset: 0,
            resource_id: self.resource_id,
            padding: 0,
        };
        self.command_ok(bytes_of(&transfer))?;
        let flush = ResourceFlush {
            hdr: CtrlHdr::new(CMD_RESOURCE_FLUSH),
            r: self.full_rect(),
            resource_id: self.resource_id,
            padding: 0,
        };
        self.command_ok(bytes_of(&flush))
    }

    pub fn geometry(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn framebuffer(&self) -> usize {
        self.fb_base
    }
}

static GPU: SpinLock<Option<Gpu>> = SpinLock::new(None);

/// Probe, handshake and bring up the scanout over `fb_base`. Returns
/// the negotiated geometry.
pub fn init(fb_base: usize) -> Result<(u32, u32), VirtioError> {
    let dev = virtio::probe(DEVICE_ID_GPU)?;
    dev.begin_init()?;
    let vq = virtio::alloc_queue(64)?;
    dev.setup_queue(0, &vq)?;
    dev.driver_ok();

    let cmd_page = crate::memory::pmm::alloc_page().ok_or(VirtioError::OutOfMemory)?;

    let mut gpu = Gpu {
        dev,
        vq,
        cmd_page,
        width: 0,
        height: 0,
        fb_base,
        resource_id: 1,
    };

    let (width, height) = gpu.query_display()?;
    gpu.width = width;
    gpu.height = height;

    let create = ResourceCreate2d {
        hdr: CtrlHdr::new(CMD_RESOURCE_CREATE_2D),
        resource_id: gpu.resource_id,
        format: FORMAT_BGRA8888,
        width,
        height,
    };
    gpu.command_ok(bytes_of(&create))?;

    // ATTACH_BACKING carries one mem entry straight after the header.
    let attach = AttachBacking {
        hdr: CtrlHdr::new(CMD_RESOURCE_ATTACH_BACKING),
        resource_id: gpu.resource_id,
        nr_entries: 1,
    };
    let entry = MemEntry {
        addr: fb_base as u64,
        length: width * height * 4,
        padding: 0,
    };
    let mut req = [0u8; mem::size_of::<AttachBacking>() + mem::size_of::<MemEntry>()];
    req[..mem::size_of::<AttachBacking>()].copy_from_slice(bytes_of(&attach));
    req[mem::size_of::<AttachBacking>()..].copy_from_slice(bytes_of(&entry));
    gpu.command_ok(&req)?;

    let scanout = SetScanout {
        hdr: CtrlHdr::new(CMD_SET_SCANOUT),
        r: gpu.full_rect(),
        scanout_id: 0,
        resource_id: gpu.resource_id,
    };
    gpu.command_ok(bytes_of(&scanout))?;

    log::info!("virtio-gpu: {}x{} scanout at {:#x}", width, height, fb_base);
    *GPU.lock() = Some(gpu);
    Ok((width, height))
}

/// Flush the whole surface; a no-op without a GPU.
pub fn flush() {
    let mut gpu = GPU.lock();
    if let Some(gpu) = gpu.as_mut() {
        if let Err(e) = gpu.flush() {
            log::warn!("virtio-gpu flush failed: {:?}", e);
        }
    }
}

/// Negotiated geometry, if a GPU came up.
pub fn geometry() -> Option<(u32, u32)> {
    GPU.lock().as_ref().map(|g| g.geometry())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_structs_match_the_wire_layout() {
        assert_eq!(mem::size_of::<CtrlHdr>(), 24);
        assert_eq!(mem::size_of::<GpuRect>(), 16);
        assert_eq!(mem::size_of::<ResourceCreate2d>(), 40);
        assert_eq!(mem::size_of::<SetScanout>(), 48);
        assert_eq!(mem::size_of::<TransferToHost2d>(), 56);
        assert_eq!(mem::size_of::<ResourceFlush>(), 48);
        assert_eq!(mem::size_of::<AttachBacking>(), 32);
        assert_eq!(mem::size_of::<MemEntry>(), 16);
        assert_eq!(
            mem::size_of::<RespDisplayInfo>(),
            24 + MAX_SCANOUTS * mem::size_of::<DisplayMode>()
        );
    }
}
