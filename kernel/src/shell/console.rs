// =============================================================================
// Skylark — Console Tasks
// =============================================================================
//
// Two task entries tie the shell to its terminals:
//
//   shell_task     — line editor + dispatcher over a pty. The same
//                    entry serves the UART console and terminal
//                    windows; only the pty slot differs.
//   uart_pump_task — bridges UART RX into the pty input ring and the
//                    pty output ring back to the UART, so the system
//                    is fully usable under -nographic.
// =============================================================================

use alloc::string::String;
use alloc::vec::Vec;

use crate::shell::{self, ShellCtx};
use crate::task::{clock, events, pty, scheduler};

/// Interactive shell over the pty slot passed as the task argument.
pub fn shell_task(arg: usize) {
    let slot = arg;
    scheduler::set_current_tty(Some(slot));

    let mut ctx = ShellCtx::new("/");
    ctx.tty = Some(slot);
    shell::set_foreground(ctx.interrupt_flag());

    pty::write_out(slot, b"skylark shell - 'help' lists commands\n");

    loop {
        pty::write_out(slot, b"skylark:");
        pty::write_out(slot, ctx.cwd.as_bytes());
        pty::write_out(slot, b"$ ");

        let line = read_line(slot);
        let output = shell::run_line(&mut ctx, &line);
        pty::write_out(slot, &output);

        if ctx.exited {
            break;
        }
    }
    pty::close(slot);
}

/// Read one line with echo, backspace and Ctrl-C handling. Blocks on
/// the pty's event key while the ring is empty.
fn read_line(slot: usize) -> String {
    let mut line: Vec<u8> = Vec::new();
    loop {
        let byte = pty::pop_in(slot);
        match byte {
            0 => {
                // Empty ring: sleep until the terminal pushes bytes.
                events::wait(events::pty_in(slot));
            }
            b'\r' | b'\n' => {
                pty::write_out(slot, b"\n");
                break;
            }
            0x08 | 0x7f => {
                if line.pop().is_some() {
                    pty::write_out(slot, b"\x08 \x08");
                }
            }
            0x03 => {
                shell::interrupt();
                pty::write_out(slot, b"^C\n");
                line.clear();
                break;
            }
            byte => {
                line.push(byte);
                pty::write_out(slot, &[byte]);
            }
        }
    }
    String::from_utf8_lossy(&line).into_owned()
}

/// Bridge the UART and the pty passed as the task argument.
pub fn uart_pump_task(arg: usize) {
    let slot = arg;
    loop {
        let mut pushed = false;
        while let Some(byte) = khal::uart::try_read_byte() {
            // CR from terminals becomes the newline the shell expects.
            let byte = if byte == b'\r' { b'\n' } else { byte };
            pty::push_in(slot, byte);
            pushed = true;
        }
        if pushed {
            events::wake(events::pty_in(slot));
        }
        while pty::has_out(slot) {
            let byte = pty::pop_out(slot);
            if byte == b'\n' {
                khal::uart::write_byte(b'\r');
            }
            khal::uart::write_byte(byte);
        }
        clock::sleep_ms(4);
    }
}
