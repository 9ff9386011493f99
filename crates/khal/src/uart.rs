//! PL011 UART byte driver.
//!
//! Deliberately thin: the kernel only needs `write_byte`, a polled
//! `try_read_byte`, and RX interrupt enable. Formatting sits on top in
//! klog.

use core::fmt;
use spin::Mutex;

use crate::board::UART_BASE;
use crate::mmio::{read32, write32};

// PL011 register offsets.
const DR: usize = 0x00;
const FR: usize = 0x18;
const IBRD: usize = 0x24;
const FBRD: usize = 0x28;
const LCR_H: usize = 0x2C;
const CR: usize = 0x30;
const IMSC: usize = 0x38;
const ICR: usize = 0x44;

// Flag register bits.
const FR_TXFF: u32 = 1 << 5;
const FR_RXFE: u32 = 1 << 4;

/// PL011 driver state. The hardware is the state; this only remembers
/// whether init ran.
pub struct Uart {
    initialized: bool,
}

impl Uart {
    const fn new() -> Self {
        Self { initialized: false }
    }

    /// 115200 8N1, FIFOs on, RX+TX enabled.
    pub fn init(&mut self) {
        unsafe {
            // Disable while reprogramming.
            write32(UART_BASE + CR, 0);
            // Clear pending interrupts.
            write32(UART_BASE + ICR, 0x7FF);
            // 24 MHz reference / (16 * 115200) = 13.0208 -> IBRD 13, FBRD 1.
            write32(UART_BASE + IBRD, 13);
            write32(UART_BASE + FBRD, 1);
            // 8 bits, FIFOs enabled.
            write32(UART_BASE + LCR_H, (3 << 5) | (1 << 4));
            // Enable UART, TX, RX.
            write32(UART_BASE + CR, (1 << 0) | (1 << 8) | (1 << 9));
        }
        self.initialized = true;
    }

    /// Unmask the RX interrupt at the UART itself. The GIC line is the
    /// caller's business.
    pub fn enable_rx_irq(&mut self) {
        unsafe {
            write32(UART_BASE + IMSC, 1 << 4);
        }
    }

    pub fn write_byte(&self, byte: u8) {
        if !self.initialized {
            return;
        }
        unsafe {
            while read32(UART_BASE + FR) & FR_TXFF != 0 {
                core::hint::spin_loop();
            }
            write32(UART_BASE + DR, byte as u32);
        }
    }

    /// Non-blocking read of one byte from the RX FIFO.
    pub fn try_read_byte(&self) -> Option<u8> {
        if !self.initialized {
            return None;
        }
        unsafe {
            if read32(UART_BASE + FR) & FR_RXFE != 0 {
                None
            } else {
                Some(read32(UART_BASE + DR) as u8)
            }
        }
    }

    pub fn write_str(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }
}

impl fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Uart::write_str(self, s);
        Ok(())
    }
}

/// Global UART instance.
static UART: Mutex<Uart> = Mutex::new(Uart::new());

/// Initialize the global UART.
pub fn init() {
    UART.lock().init();
}

/// Unmask the RX interrupt in the UART's own mask register.
pub fn enable_rx_irq() {
    UART.lock().enable_rx_irq();
}

pub fn write_str(s: &str) {
    UART.lock().write_str(s);
}

pub fn write_byte(byte: u8) {
    UART.lock().write_byte(byte);
}

pub fn write_fmt(args: fmt::Arguments) {
    use fmt::Write;
    let _ = UART.lock().write_fmt(args);
}

/// Non-blocking RX; `None` when the FIFO is empty.
pub fn try_read_byte() -> Option<u8> {
    UART.lock().try_read_byte()
}

/// Lock-free emergency output for the panic path. Skips the mutex so a
/// panic while the lock is held still produces a trace.
pub fn panic_write_str(s: &str) {
    let uart = Uart { initialized: true };
    uart.write_str(s);
}
