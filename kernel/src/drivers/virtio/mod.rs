// =============================================================================
// Skylark — Virtio-MMIO Transport
// =============================================================================
//
// Probes a fixed window of mmio slots, drives the status handshake,
// and programs virtqueues for both register layouts: legacy (version
// 1: guest page size / queue align / PFN) and modern (version ≥ 2:
// 64-bit queue addresses + ready, with the FEATURES_OK verification
// step).
//
// Probe-not-found, descriptor timeouts and response mismatches are
// reported upward; callers fall back (no GPU → UART-only console).
// =============================================================================

pub mod gpu;
pub mod input;
pub mod queue;

use alloc::vec::Vec;

use bitflags::bitflags;

use khal::mmio::{read32, write32};

use crate::drivers::virtio::queue::VirtQueue;

/// "virt" little-endian.
const MMIO_MAGIC: u32 = 0x7472_6976;

/// Device ids this kernel understands.
pub const DEVICE_ID_GPU: u32 = 16;
pub const DEVICE_ID_INPUT: u32 = 18;

// Register offsets.
const REG_MAGIC: usize = 0x000;
const REG_VERSION: usize = 0x004;
const REG_DEVICE_ID: usize = 0x008;
const REG_DEVICE_FEATURES: usize = 0x010;
const REG_DEVICE_FEATURES_SEL: usize = 0x014;
const REG_DRIVER_FEATURES: usize = 0x020;
const REG_DRIVER_FEATURES_SEL: usize = 0x024;
const REG_GUEST_PAGE_SIZE: usize = 0x028; // legacy
const REG_QUEUE_SEL: usize = 0x030;
const REG_QUEUE_NUM_MAX: usize = 0x034;
const REG_QUEUE_NUM: usize = 0x038;
const REG_QUEUE_ALIGN: usize = 0x03C; // legacy
const REG_QUEUE_PFN: usize = 0x040; // legacy
const REG_QUEUE_READY: usize = 0x044;
const REG_QUEUE_NOTIFY: usize = 0x050;
const REG_IRQ_STATUS: usize = 0x060;
const REG_IRQ_ACK: usize = 0x064;
const REG_STATUS: usize = 0x070;
const REG_QUEUE_DESC_LO: usize = 0x080;
const REG_QUEUE_DESC_HI: usize = 0x084;
const REG_QUEUE_AVAIL_LO: usize = 0x090;
const REG_QUEUE_AVAIL_HI: usize = 0x094;
const REG_QUEUE_USED_LO: usize = 0x0A0;
const REG_QUEUE_USED_HI: usize = 0x0A4;

/// Device config space starts here.
pub const REG_CONFIG: usize = 0x100;

bitflags! {
    /// Device status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        const ACKNOWLEDGE = 1;
        const DRIVER = 2;
        const DRIVER_OK = 4;
        const FEATURES_OK = 8;
        const NEEDS_RESET = 64;
        const FAILED = 128;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtioError {
    /// No device of the requested kind in the probe window.
    NotFound,
    /// Device rejected the (empty) feature negotiation.
    FeaturesRejected,
    /// Queue geometry unusable (alignment, size, capacity).
    BadQueue,
    /// All descriptors outstanding.
    QueueFull,
    /// Descriptor not completed within the bounded spin.
    Timeout,
    /// Response type other than the one the command expects.
    BadResponse,
    /// Backing memory allocation failed.
    OutOfMemory,
}

/// A probed transport slot.
#[derive(Debug, Clone, Copy)]
pub struct VirtioDevice {
    base: usize,
    version: u32,
    device_id: u32,
    irq: u32,
}

impl VirtioDevice {
    fn read(&self, reg: usize) -> u32 {
        unsafe { read32(self.base + reg) }
    }

    fn write(&self, reg: usize, value: u32) {
        unsafe { write32(self.base + reg, value) }
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn irq(&self) -> u32 {
        self.irq
    }

    pub fn is_legacy(&self) -> bool {
        self.version < 2
    }

    /// Read a byte out of device config space.
    pub fn config_read8(&self, offset: usize) -> u8 {
        unsafe { ((self.base + REG_CONFIG + offset) as *const u8).read_volatile() }
    }

    /// Write a byte into device config space.
    pub fn config_write8(&self, offset: usize, value: u8) {
        unsafe { ((self.base + REG_CONFIG + offset) as *mut u8).write_volatile(value) }
    }

    /// Reset → ACKNOWLEDGE → DRIVER → negotiate an empty feature set.
    /// Modern devices additionally verify FEATURES_OK.
    pub fn begin_init(&self) -> Result<(), VirtioError> {
        self.write(REG_STATUS, 0);
        self.write(REG_STATUS, Status::ACKNOWLEDGE.bits());
        self.write(
            REG_STATUS,
            (Status::ACKNOWLEDGE | Status::DRIVER).bits(),
        );

        // Read (and discard) the offered features, offer none back.
        self.write(REG_DEVICE_FEATURES_SEL, 0);
        let _offered = self.read(REG_DEVICE_FEATURES);
        self.write(REG_DRIVER_FEATURES_SEL, 0);
        self.write(REG_DRIVER_FEATURES, 0);
        self.write(REG_DRIVER_FEATURES_SEL, 1);
        self.write(REG_DRIVER_FEATURES, 0);

        if !self.is_legacy() {
            let with_features =
                Status::ACKNOWLEDGE | Status::DRIVER | Status::FEATURES_OK;
            self.write(REG_STATUS, with_features.bits());
            let confirmed = Status::from_bits_truncate(self.read(REG_STATUS));
            if !confirmed.contains(Status::FEATURES_OK) {
                self.write(REG_STATUS, Status::FAILED.bits());
                return Err(VirtioError::FeaturesRejected);
            }
        } else {
            // Legacy transports take the guest page size up front.
            self.write(REG_GUEST_PAGE_SIZE, 4096);
        }
        Ok(())
    }

    /// Program queue `index` with an already-built [`VirtQueue`],
    /// using whichever register set this transport speaks.
    pub fn setup_queue(&self, index: u32, vq: &VirtQueue) -> Result<(), VirtioError> {
        self.write(REG_QUEUE_SEL, index);
        let max = self.read(REG_QUEUE_NUM_MAX);
        if max == 0 || max < vq.size() as u32 {
            return Err(VirtioError::BadQueue);
        }
        self.write(REG_QUEUE_NUM, vq.size() as u32);

        if self.is_legacy() {
            self.write(REG_QUEUE_ALIGN, 4096);
            self.write(REG_QUEUE_PFN, (vq.region_addr() / 4096) as u32);
        } else {
            let desc = vq.desc_addr() as u64;
            let avail = vq.avail_addr() as u64;
            let used = vq.used_addr() as u64;
            self.write(REG_QUEUE_DESC_LO, desc as u32);
            self.write(REG_QUEUE_DESC_HI, (desc >> 32) as u32);
            self.write(REG_QUEUE_AVAIL_LO, avail as u32);
            self.write(REG_QUEUE_AVAIL_HI, (avail >> 32) as u32);
            self.write(REG_QUEUE_USED_LO, used as u32);
            self.write(REG_QUEUE_USED_HI, (used >> 32) as u32);
            self.write(REG_QUEUE_READY, 1);
        }
        Ok(())
    }

    /// Complete initialization: the device is live after this.
    pub fn driver_ok(&self) {
        let status = if self.is_legacy() {
            Status::ACKNOWLEDGE | Status::DRIVER | Status::DRIVER_OK
        } else {
            Status::ACKNOWLEDGE | Status::DRIVER | Status::FEATURES_OK | Status::DRIVER_OK
        };
        self.write(REG_STATUS, status.bits());
    }

    /// Kick queue `index`.
    pub fn notify(&self, index: u32) {
        khal::cpu::dsb();
        self.write(REG_QUEUE_NOTIFY, index);
    }

    /// Read-and-acknowledge the interrupt status bits.
    pub fn ack_irq(&self) -> u32 {
        let status = self.read(REG_IRQ_STATUS);
        if status != 0 {
            self.write(REG_IRQ_ACK, status);
        }
        status
    }
}

/// Scan the board's transport window for a device with `wanted_id`.
pub fn probe(wanted_id: u32) -> Result<VirtioDevice, VirtioError> {
    for slot in 0..khal::board::VIRTIO_SLOTS {
        let base = khal::board::VIRTIO_BASE + slot * khal::board::VIRTIO_STRIDE;
        // SAFETY: the probe window is board-defined device memory.
        let magic = unsafe { read32(base + REG_MAGIC) };
        if magic != MMIO_MAGIC {
            continue;
        }
        let device_id = unsafe { read32(base + REG_DEVICE_ID) };
        if device_id != wanted_id {
            continue;
        }
        let version = unsafe { read32(base + REG_VERSION) };
        return Ok(VirtioDevice {
            base,
            version,
            device_id,
            irq: khal::board::VIRTIO_IRQ_BASE + slot as u32,
        });
    }
    Err(VirtioError::NotFound)
}

/// Every device with `wanted_id` in the probe window.
pub fn probe_all(wanted_id: u32) -> Vec<VirtioDevice> {
    let mut found = Vec::new();
    for slot in 0..khal::board::VIRTIO_SLOTS {
        let base = khal::board::VIRTIO_BASE + slot * khal::board::VIRTIO_STRIDE;
        let magic = unsafe { read32(base + REG_MAGIC) };
        if magic != MMIO_MAGIC {
            continue;
        }
        let device_id = unsafe { read32(base + REG_DEVICE_ID) };
        if device_id != wanted_id {
            continue;
        }
        let version = unsafe { read32(base + REG_VERSION) };
        found.push(VirtioDevice {
            base,
            version,
            device_id,
            irq: khal::board::VIRTIO_IRQ_BASE + slot as u32,
        });
    }
    found
}

/// Allocate one zeroed queue region from the page pool (two pages,
/// naturally 4 KiB aligned) and build a [`VirtQueue`] over it.
pub fn alloc_queue(size: u16) -> Result<VirtQueue, VirtioError> {
    // Two consecutive pages. The pool hands pages out in address order
    // before the first free, which covers driver bring-up; anything
    // else is treated as exhaustion.
    let first = crate::memory::pmm::alloc_page().ok_or(VirtioError::OutOfMemory)?;
    let second = crate::memory::pmm::alloc_page().ok_or(VirtioError::OutOfMemory)?;
    let (lo, hi) = if (first as usize) < (second as usize) {
        (first, second)
    } else {
        (second, first)
    };
    if hi as usize != lo as usize + crate::memory::PAGE_SIZE {
        return Err(VirtioError::OutOfMemory);
    }
    // SAFETY: both pages are zeroed, 4 KiB aligned and exclusively ours.
    unsafe { VirtQueue::new(lo, size) }
}
