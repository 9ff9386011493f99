// =============================================================================
// Skylark — Shell Programs
// =============================================================================
//
// The built-in program set. Each program is a plain function in the
// registry; beyond echo/cat/grep (which the pipeline semantics need)
// these are thin windows onto kernel bookkeeping and the snapshot
// machinery.
// =============================================================================

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::fs::{diskfs, ramfs};
use crate::shell::{register_program, ShellCtx};
use crate::sync::SpinLock;
use crate::task::{clock, scheduler};

/// Install every built-in program.
pub fn register_all() {
    register_program("echo", echo);
    register_program("cat", cat);
    register_program("ls", ls);
    register_program("grep", grep);
    register_program("rm", rm);
    register_program("mkdir", mkdir);
    register_program("touch", touch);
    register_program("clear", clear);
    register_program("ps", ps);
    register_program("free", free);
    register_program("uptime", uptime);
    register_program("kill", kill);
    register_program("snapshot", snapshot);
    register_program("service", service);
    register_program("help", help);
}

fn echo(_ctx: &mut ShellCtx, argv: &[String], _input: &[u8], out: &mut Vec<u8>) {
    for (i, arg) in argv.iter().skip(1).enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        out.extend_from_slice(arg.as_bytes());
    }
    out.push(b'\n');
}

fn cat(ctx: &mut ShellCtx, argv: &[String], input: &[u8], out: &mut Vec<u8>) {
    if argv.len() < 2 {
        out.extend_from_slice(input);
        return;
    }
    for name in argv.iter().skip(1) {
        match ramfs::read(&ctx.resolve(name)) {
            Ok(data) => out.extend_from_slice(&data),
            Err(_) => out.extend_from_slice(b"fail\n"),
        }
    }
}

fn ls(ctx: &mut ShellCtx, argv: &[String], _input: &[u8], out: &mut Vec<u8>) {
    let dir = match argv.get(1) {
        Some(d) => {
            let mut resolved = ctx.resolve(d);
            if !resolved.ends_with('/') {
                resolved.push('/');
            }
            resolved
        }
        None => ctx.cwd.clone(),
    };
    match ramfs::list(&dir) {
        Ok(children) => {
            for child in children {
                out.extend_from_slice(child.as_bytes());
                out.push(b'\n');
            }
        }
        Err(_) => out.extend_from_slice(b"fail\n"),
    }
}

/// Line filter; empty input stays empty output.
fn grep(_ctx: &mut ShellCtx, argv: &[String], input: &[u8], out: &mut Vec<u8>) {
    let pattern = match argv.get(1) {
        Some(p) => p.as_str(),
        None => return,
    };
    let text = match core::str::from_utf8(input) {
        Ok(t) => t,
        Err(_) => return,
    };
    for line in text.lines() {
        if line.contains(pattern) {
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
    }
}

fn rm(ctx: &mut ShellCtx, argv: &[String], _input: &[u8], out: &mut Vec<u8>) {
    let recursive = argv.get(1).map(|a| a == "-r").unwrap_or(false);
    let names = if recursive { &argv[2..] } else { &argv[1..] };
    if names.is_empty() {
        out.extend_from_slice(b"fail\n");
        return;
    }
    for name in names {
        let mut resolved = ctx.resolve(name);
        // A directory given without its marker still refers to the dir.
        if !ramfs::exists(&resolved) && ramfs::is_dir(&format!("{}/", resolved)) {
            resolved.push('/');
        }
        let result = if recursive {
            ramfs::remove_recursive(&resolved)
        } else {
            ramfs::remove(&resolved)
        };
        if result.is_err() {
            out.extend_from_slice(b"fail\n");
        }
    }
}

fn mkdir(ctx: &mut ShellCtx, argv: &[String], _input: &[u8], out: &mut Vec<u8>) {
    match argv.get(1) {
        Some(name) => {
            if ramfs::mkdir(&ctx.resolve(name)).is_err() {
                out.extend_from_slice(b"fail\n");
            }
        }
        None => out.extend_from_slice(b"fail\n"),
    }
}

fn touch(ctx: &mut ShellCtx, argv: &[String], _input: &[u8], out: &mut Vec<u8>) {
    match argv.get(1) {
        Some(name) => {
            if ramfs::create(&ctx.resolve(name)).is_err() {
                out.extend_from_slice(b"fail\n");
            }
        }
        None => out.extend_from_slice(b"fail\n"),
    }
}

fn clear(_ctx: &mut ShellCtx, _argv: &[String], _input: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b"\x1b[2J\x1b[H");
}

fn ps(_ctx: &mut ShellCtx, _argv: &[String], _input: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b"  id state      runs  name\n");
    for task in scheduler::snapshot() {
        let state = match task.state {
            scheduler::BlockState::Ready => "ready",
            scheduler::BlockState::Running => "running",
            scheduler::BlockState::TimedWait(_) => "sleeping",
            scheduler::BlockState::EventWait(_) => "waiting",
            scheduler::BlockState::Zombie => "zombie",
        };
        out.extend_from_slice(
            format!("{:>4} {:<9} {:>6} {}\n", task.id, state, task.run_count, task.name)
                .as_bytes(),
        );
    }
}

fn free(_ctx: &mut ShellCtx, _argv: &[String], _input: &[u8], out: &mut Vec<u8>) {
    let pages = crate::memory::pmm::stats();
    let heap = crate::memory::heap::stats();
    out.extend_from_slice(
        format!(
            "pages: {}/{} free\nheap:  {}/{} bytes used\n",
            pages.free_pages, pages.total_pages, heap.allocated_bytes, heap.total_bytes
        )
        .as_bytes(),
    );
}

fn uptime(_ctx: &mut ShellCtx, _argv: &[String], _input: &[u8], out: &mut Vec<u8>) {
    let ms = clock::now_ms();
    out.extend_from_slice(format!("up {}.{:03} s\n", ms / 1000, ms % 1000).as_bytes());
}

fn kill(_ctx: &mut ShellCtx, argv: &[String], _input: &[u8], out: &mut Vec<u8>) {
    let id = argv.get(1).and_then(|a| a.parse::<u64>().ok());
    match id {
        Some(id) if scheduler::kill(id).is_ok() => {}
        _ => out.extend_from_slice(b"fail\n"),
    }
}

/// The default snapshot device: a RAM disk standing in for the block
/// drive, which is out of scope beyond its sector contract.
static SNAP_DISK: SpinLock<Option<diskfs::MemDisk>> = SpinLock::new(None);

fn with_snap_disk<R>(f: impl FnOnce(&mut diskfs::MemDisk) -> R) -> R {
    let mut disk = SNAP_DISK.lock();
    let disk = disk.get_or_insert_with(|| diskfs::MemDisk::new(4096));
    f(disk)
}

/// `snapshot save <file>` / `load <file>` / `sync` / `hydrate`.
fn snapshot(ctx: &mut ShellCtx, argv: &[String], _input: &[u8], out: &mut Vec<u8>) {
    match (argv.get(1).map(|s| s.as_str()), argv.get(2)) {
        (Some("save"), Some(file)) => {
            let data = ramfs::export();
            if ramfs::write_or_create(&ctx.resolve(file), &data).is_err() {
                out.extend_from_slice(b"fail\n");
            }
        }
        (Some("load"), Some(file)) => match ramfs::read(&ctx.resolve(file)) {
            Ok(data) => match ramfs::import(&data) {
                Ok(n) => out.extend_from_slice(format!("{} nodes\n", n).as_bytes()),
                Err(_) => out.extend_from_slice(b"fail\n"),
            },
            Err(_) => out.extend_from_slice(b"fail\n"),
        },
        (Some("sync"), None) => {
            match with_snap_disk(diskfs::sync_from_ramfs) {
                Ok(n) => out.extend_from_slice(format!("{} entries\n", n).as_bytes()),
                Err(_) => out.extend_from_slice(b"fail\n"),
            }
        }
        (Some("hydrate"), None) => {
            match with_snap_disk(diskfs::load_into_ramfs) {
                Ok(n) => out.extend_from_slice(format!("{} nodes\n", n).as_bytes()),
                Err(_) => out.extend_from_slice(b"fail\n"),
            }
        }
        _ => out.extend_from_slice(b"fail\n"),
    }
}

fn service(_ctx: &mut ShellCtx, argv: &[String], _input: &[u8], out: &mut Vec<u8>) {
    use crate::services;
    let report = |r: Result<(), services::ServiceError>, out: &mut Vec<u8>| match r {
        Ok(()) => {}
        Err(services::ServiceError::NotFound) => out.extend_from_slice(b"no such service\n"),
        Err(_) => out.extend_from_slice(b"fail\n"),
    };
    match (argv.get(1).map(|s| s.as_str()), argv.get(2)) {
        (Some("status"), None) | (None, _) => {
            out.extend_from_slice(services::status_text().as_bytes())
        }
        (Some("load-all"), None) => {
            let n = services::load_all();
            out.extend_from_slice(format!("{} units\n", n).as_bytes());
        }
        (Some("load"), Some(name)) => report(services::load_unit(name), out),
        (Some("start"), Some(name)) => report(services::start(name), out),
        (Some("stop"), Some(name)) => report(services::stop(name), out),
        (Some("restart"), Some(name)) => report(services::restart(name), out),
        (Some("reload"), Some(name)) => report(services::reload(name), out),
        (Some("enable"), Some(name)) => report(services::enable(name), out),
        (Some("disable"), Some(name)) => report(services::disable(name), out),
        _ => out.extend_from_slice(b"fail\n"),
    }
}

fn help(_ctx: &mut ShellCtx, _argv: &[String], _input: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(
        b"builtins: cd pwd exit\n\
          programs: echo cat ls grep rm mkdir touch clear ps free uptime\n\
          \x20         kill snapshot service help\n",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::run_line;

    fn ctx() -> ShellCtx {
        crate::shell::init();
        ramfs::init();
        ShellCtx::new("/")
    }

    #[test]
    fn cat_passes_stdin_through_without_arguments() {
        let mut c = ctx();
        run_line(&mut c, "echo passthru > /tmp/prog-a");
        let out = run_line(&mut c, "cat /tmp/prog-a | cat");
        assert_eq!(out, b"passthru\n".to_vec());
    }

    #[test]
    fn cat_missing_file_fails_softly() {
        let mut c = ctx();
        assert_eq!(run_line(&mut c, "cat /tmp/prog-none"), b"fail\n".to_vec());
    }

    #[test]
    fn ls_lists_created_files() {
        let mut c = ctx();
        run_line(&mut c, "mkdir /tmp/prog-dir");
        run_line(&mut c, "touch /tmp/prog-dir/one");
        run_line(&mut c, "touch /tmp/prog-dir/two");
        let out = run_line(&mut c, "ls /tmp/prog-dir");
        assert_eq!(out, b"one\ntwo\n".to_vec());
    }

    #[test]
    fn grep_filters_lines() {
        let mut c = ctx();
        run_line(&mut c, "echo alpha > /tmp/prog-g");
        run_line(&mut c, "echo beta >> /tmp/prog-g");
        run_line(&mut c, "echo gamma >> /tmp/prog-g");
        let out = run_line(&mut c, "cat /tmp/prog-g | grep a | grep m");
        assert_eq!(out, b"gamma\n".to_vec());
    }

    #[test]
    fn rm_and_rm_recursive() {
        let mut c = ctx();
        run_line(&mut c, "mkdir /tmp/prog-rm");
        run_line(&mut c, "touch /tmp/prog-rm/f");
        // Non-empty directory refuses a plain rm.
        assert_eq!(run_line(&mut c, "rm /tmp/prog-rm"), b"fail\n".to_vec());
        assert_eq!(run_line(&mut c, "rm -r /tmp/prog-rm"), Vec::<u8>::new());
        assert!(!ramfs::exists("/tmp/prog-rm/"));
    }

    #[test]
    fn snapshot_save_and_load_roundtrip() {
        let mut c = ctx();
        run_line(&mut c, "echo precious > /tmp/prog-s");
        run_line(&mut c, "snapshot save /tmp/prog-snap");
        run_line(&mut c, "rm /tmp/prog-s");
        assert!(!ramfs::exists("/tmp/prog-s"));
        let out = run_line(&mut c, "snapshot load /tmp/prog-snap");
        assert!(out.ends_with(b" nodes\n"));
        assert_eq!(ramfs::read("/tmp/prog-s").unwrap(), b"precious\n".to_vec());
    }

    #[test]
    fn uptime_and_free_produce_reports() {
        let mut c = ctx();
        assert!(run_line(&mut c, "uptime").starts_with(b"up "));
        let free_out = run_line(&mut c, "free");
        assert!(free_out.starts_with(b"pages: "));
    }
}
