//! Kernel logging subsystem.
//!
//! Implements the `log` crate facade over the UART, so kernel code logs
//! with the ordinary `log::info!` family. Console output that is part
//! of the user interface (shell prompts, command output) uses the
//! `kprint!`/`kprintln!` macros instead and carries no level prefix.
#![cfg_attr(not(test), no_std)]

use core::fmt;
use log::{Level, LevelFilter, Metadata, Record};

struct UartLogger;

static LOGGER: UartLogger = UartLogger;

fn level_style(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::Trace => ("TRACE", "\x1b[90m"),
        Level::Debug => ("DEBUG", "\x1b[36m"),
        Level::Info => (" INFO", "\x1b[32m"),
        Level::Warn => (" WARN", "\x1b[33m"),
        Level::Error => ("ERROR", "\x1b[31m"),
    }
}

impl log::Log for UartLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let (name, color) = level_style(record.level());
        khal::uart::write_str(color);
        khal::uart::write_str("[");
        khal::uart::write_str(name);
        khal::uart::write_str("]\x1b[0m ");
        khal::uart::write_fmt(*record.args());
        khal::uart::write_str("\n");
    }

    fn flush(&self) {}
}

/// Bring up the UART and install the logger. Called once, before
/// anything logs.
pub fn init() {
    khal::uart::init();
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Info);
}

/// Raise or lower the global level at runtime.
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Print to the console without any level decoration.
pub fn print(args: fmt::Arguments) {
    khal::uart::write_fmt(args);
}

/// Print without newline.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::print(format_args!($($arg)*))
    };
}

/// Print with newline.
#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => {{
        $crate::print(format_args!($($arg)*));
        $crate::print(format_args!("\n"));
    }};
}
