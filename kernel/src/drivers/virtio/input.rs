// =============================================================================
// Skylark — Virtio Input Devices
// =============================================================================
//
// Each input device keeps its whole event queue populated with
// write-only descriptors, one per 8-byte event slot. On every used
// entry we translate the raw (type, code, value) into the normalized
// input taxonomy and hand the descriptor straight back to the device.
//
// Devices are serviced from the scheduler's poll round (the legacy
// path), so no interrupt wiring is needed for input to flow.
// =============================================================================

use alloc::vec::Vec;

use crate::drivers::virtio::queue::{ChainBuf, VirtQueue};
use crate::drivers::virtio::{self, VirtioDevice, VirtioError, DEVICE_ID_INPUT};
use crate::sync::SpinLock;
use crate::task::input::{DeviceKind, InputEvent, EV_ABS, EV_REL};
use crate::task::{events, input};

/// Wire format of one virtio input event.
const EVENT_SIZE: usize = 8;

/// Config-space select: bitmap of supported event codes per type.
const CFG_EV_BITS: u8 = 0x11;

const CFG_SELECT: usize = 0x00;
const CFG_SUBSEL: usize = 0x01;
const CFG_SIZE: usize = 0x02;

/// One live input device.
struct InputDev {
    dev: VirtioDevice,
    vq: VirtQueue,
    kind: DeviceKind,
    /// Page of event slots, one per descriptor.
    buf_page: *mut u8,
}

// SAFETY: only touched under the INPUTS lock.
unsafe impl Send for InputDev {}

impl InputDev {
    /// Ask the device which event types it supports; pointer-ish
    /// devices advertise REL or ABS bits, keyboards only KEY.
    fn detect_kind(dev: &VirtioDevice) -> DeviceKind {
        let supports = |ev_type: u8| {
            dev.config_write8(CFG_SELECT, CFG_EV_BITS);
            dev.config_write8(CFG_SUBSEL, ev_type);
            dev.config_read8(CFG_SIZE) != 0
        };
        if supports(EV_REL as u8) || supports(EV_ABS as u8) {
            DeviceKind::Pointer
        } else if supports(input::EV_KEY as u8) {
            DeviceKind::Keyboard
        } else {
            DeviceKind::Unknown
        }
    }

    /// Post every descriptor as a write-only event slot.
    fn populate(&mut self) -> Result<(), VirtioError> {
        for slot in 0..self.vq.size() as usize {
            self.vq.submit(&[ChainBuf {
                addr: self.buf_page as u64 + (slot * EVENT_SIZE) as u64,
                len: EVENT_SIZE as u32,
                device_writes: true,
            }])?;
        }
        self.dev.notify(0);
        Ok(())
    }

    /// Drain completed events into the input pipeline.
    fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Some(elem) = self.vq.pop_used(1) {
            let desc = self.vq.read_desc(elem.id as u16);
            let addr = desc.addr as usize;
            let (etype, code, value) = unsafe {
                (
                    (addr as *const u16).read_volatile(),
                    ((addr + 2) as *const u16).read_volatile(),
                    ((addr + 4) as *const u32).read_volatile(),
                )
            };
            input::push(self.kind, InputEvent::new(etype, code, value as i32));
            handled += 1;

            // Return the slot to the device.
            let _ = self.vq.submit(&[ChainBuf {
                addr: desc.addr,
                len: EVENT_SIZE as u32,
                device_writes: true,
            }]);
        }
        if handled > 0 {
            self.dev.notify(0);
            self.dev.ack_irq();
        }
        handled
    }
}

static INPUTS: SpinLock<Vec<InputDev>> = SpinLock::new(Vec::new());

/// Bring up every input transport in the probe window. Finding none
/// is not an error; the console still works over the UART.
pub fn init() -> usize {
    let mut brought_up = 0;
    for dev in virtio::probe_all(DEVICE_ID_INPUT) {
        match init_one(dev) {
            Ok(kind) => {
                log::info!("virtio-input: {:?} device ready", kind);
                brought_up += 1;
            }
            Err(e) => log::warn!("virtio-input: device skipped: {:?}", e),
        }
    }
    if brought_up > 0 {
        let _ = crate::traps::register_poller(poll_all);
    }
    brought_up
}

fn init_one(dev: VirtioDevice) -> Result<DeviceKind, VirtioError> {
    dev.begin_init()?;
    let vq = virtio::alloc_queue(64)?;
    dev.setup_queue(0, &vq)?;
    dev.driver_ok();

    let buf_page = crate::memory::pmm::alloc_page().ok_or(VirtioError::OutOfMemory)?;
    let kind = InputDev::detect_kind(&dev);
    let mut input_dev = InputDev {
        dev,
        vq,
        kind,
        buf_page,
    };
    input_dev.populate()?;
    INPUTS.lock().push(input_dev);
    Ok(kind)
}

/// Scheduler poll hook: drain every device, wake input waiters if
/// anything arrived.
pub fn poll_all() {
    let mut total = 0;
    {
        let mut devices = INPUTS.lock();
        for dev in devices.iter_mut() {
            total += dev.drain();
        }
    }
    if total > 0 {
        events::wake(events::INPUT_READY);
    }
}
