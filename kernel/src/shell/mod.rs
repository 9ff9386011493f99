// =============================================================================
// Skylark — Shell Runtime
// =============================================================================
//
// Executes parsed pipelines: commands resolve through a program
// registry keyed by name, each stage's output becomes the next
// stage's input, and the final output either returns to the caller,
// lands in a redirection target, or — for `&` jobs — is produced by a
// freshly spawned task re-parented away from the launcher.
//
// Builtins (`cd`, `pwd`, `exit`) act on the shell context itself and
// therefore never run inside a pipeline stage.
// =============================================================================

pub mod console;
pub mod programs;
pub mod tokenize;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::fs::{path, ramfs, FsError};
use crate::sync::SpinLock;
use crate::task::{pty, scheduler};
use self::tokenize::Pipeline;

/// Per-shell state threaded through programs.
pub struct ShellCtx {
    pub cwd: String,
    /// Pty slot of the attached terminal, if any.
    pub tty: Option<usize>,
    /// Set by the `exit` builtin; the console loop ends on it.
    pub exited: bool,
    /// Raised asynchronously (Ctrl-C); consumed between pipeline stages.
    interrupt: Arc<AtomicBool>,
}

impl ShellCtx {
    pub fn new(cwd: &str) -> Self {
        Self {
            cwd: String::from(cwd),
            tty: None,
            exited: false,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared handle for whoever delivers Ctrl-C to this shell.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Resolve a path argument against the working directory.
    pub fn resolve(&self, p: &str) -> String {
        path::resolve(&self.cwd, p)
    }
}

/// A program: argv in, stdin bytes in, output appended to `out`.
pub type ProgramFn = fn(&mut ShellCtx, &[String], &[u8], &mut Vec<u8>);

static PROGRAMS: SpinLock<Vec<(&'static str, ProgramFn)>> = SpinLock::new(Vec::new());

/// Interrupt flag of the foreground shell, for Ctrl-C delivery.
static FOREGROUND: SpinLock<Option<Arc<AtomicBool>>> = SpinLock::new(None);

/// Add a program to the registry (later registrations win).
pub fn register_program(name: &'static str, f: ProgramFn) {
    PROGRAMS.lock().insert(0, (name, f));
}

fn lookup_program(name: &str) -> Option<ProgramFn> {
    PROGRAMS
        .lock()
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, f)| *f)
}

/// Make a shell the Ctrl-C target.
pub fn set_foreground(flag: Arc<AtomicBool>) {
    *FOREGROUND.lock() = Some(flag);
}

/// Request pipeline abort in the foreground shell (Ctrl-C).
pub fn interrupt() {
    if let Some(flag) = FOREGROUND.lock().as_ref() {
        flag.store(true, Ordering::Relaxed);
    }
}

/// Install the built-in program set. Called once at boot.
pub fn init() {
    programs::register_all();
}

/// Run one command line to completion and return its output.
pub fn run_line(ctx: &mut ShellCtx, line: &str) -> Vec<u8> {
    let pipeline = match tokenize::parse(line) {
        Ok(p) => p,
        Err(_) => return b"fail\n".to_vec(),
    };
    if pipeline.is_empty() {
        return Vec::new();
    }

    // Builtins act on the context and never pipe.
    if pipeline.stages.len() == 1 && !pipeline.background {
        let argv = &pipeline.stages[0];
        match argv[0].as_str() {
            "cd" => return builtin_cd(ctx, argv),
            "pwd" => {
                let mut out = ctx.cwd.clone().into_bytes();
                out.push(b'\n');
                return out;
            }
            "exit" => {
                ctx.exited = true;
                return Vec::new();
            }
            _ => {}
        }
    }

    if pipeline.background {
        return spawn_job(ctx, pipeline);
    }

    execute(ctx, &pipeline)
}

fn builtin_cd(ctx: &mut ShellCtx, argv: &[String]) -> Vec<u8> {
    let target = match argv.get(1) {
        Some(t) => ctx.resolve(&ensure_dir_form(t)),
        None => String::from("/"),
    };
    if ramfs::is_dir(&target) {
        ctx.cwd = target;
        Vec::new()
    } else {
        b"fail\n".to_vec()
    }
}

fn ensure_dir_form(p: &str) -> String {
    let mut s = String::from(p);
    if !s.ends_with('/') {
        s.push('/');
    }
    s
}

/// Run the stages left to right, threading output into input.
fn execute(ctx: &mut ShellCtx, pipeline: &Pipeline) -> Vec<u8> {
    let mut data: Vec<u8> = Vec::new();

    for stage in &pipeline.stages {
        if ctx.interrupt.swap(false, Ordering::Relaxed) {
            return b"^C\n".to_vec();
        }
        let program = match lookup_program(&stage[0]) {
            Some(p) => p,
            None => return b"unknown command\n".to_vec(),
        };
        let input = core::mem::take(&mut data);
        program(ctx, stage, &input, &mut data);
        if ctx.exited {
            break;
        }
    }

    if let Some((target, append)) = &pipeline.redirect {
        let name = ctx.resolve(target);
        let result = if *append {
            append_or_create(&name, &data)
        } else {
            ramfs::write_or_create(&name, &data)
        };
        return match result {
            Ok(()) => Vec::new(),
            Err(_) => b"fail\n".to_vec(),
        };
    }
    data
}

/// Append to a file, creating it first if needed.
pub fn append_or_create(name: &str, data: &[u8]) -> Result<(), FsError> {
    match ramfs::append(name, data) {
        Err(FsError::NotFound) => {
            ramfs::create(name)?;
            ramfs::append(name, data)
        }
        other => other,
    }
}

/// Everything a background job needs, boxed across the task boundary.
struct JobSpec {
    cwd: String,
    tty: Option<usize>,
    pipeline: Pipeline,
}

fn job_task(arg: usize) {
    // SAFETY: the box was leaked by spawn_job for exactly this task.
    let spec = unsafe { Box::from_raw(arg as *mut JobSpec) };
    let mut ctx = ShellCtx::new(&spec.cwd);
    ctx.tty = spec.tty;
    if let Some(slot) = ctx.tty {
        scheduler::set_current_tty(Some(slot));
    }
    let output = execute(&mut ctx, &spec.pipeline);
    // Late output goes to the terminal the job was started from.
    if let Some(slot) = spec.tty {
        pty::write_out(slot, &output);
    }
}

/// Run a pipeline as its own task. The job is re-parented to the boot
/// task so it survives this shell exiting.
fn spawn_job(ctx: &ShellCtx, mut pipeline: Pipeline) -> Vec<u8> {
    pipeline.background = false;
    let name = pipeline
        .stages
        .first()
        .and_then(|s| s.first())
        .cloned()
        .unwrap_or_default();
    let spec = Box::new(JobSpec {
        cwd: ctx.cwd.clone(),
        tty: ctx.tty,
        pipeline,
    });
    let arg = Box::into_raw(spec) as usize;
    match scheduler::create(job_task, arg, &name, 16) {
        Ok(id) => {
            let _ = scheduler::set_parent(id, 0);
            let mut out = Vec::new();
            out.extend_from_slice(b"[job ");
            push_number(&mut out, id as usize);
            out.extend_from_slice(b"]\n");
            out
        }
        Err(_) => {
            // Reclaim the spec; the task never ran.
            unsafe { drop(Box::from_raw(arg as *mut JobSpec)) };
            b"fail\n".to_vec()
        }
    }
}

fn push_number(out: &mut Vec<u8>, n: usize) {
    let mut digits = [0u8; 20];
    let mut i = digits.len();
    let mut n = n;
    loop {
        i -= 1;
        digits[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    out.extend_from_slice(&digits[i..]);
}

/// Entry point for service tasks: run a command line with a fresh
/// root-directory context and hand back its output.
pub fn run_for_service(command: &str) -> Vec<u8> {
    let mut ctx = ShellCtx::new("/");
    run_line(&mut ctx, command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ShellCtx {
        init();
        ramfs::init();
        ShellCtx::new("/")
    }

    #[test]
    fn echo_writes_its_arguments() {
        let mut ctx = ctx();
        let out = run_line(&mut ctx, "echo hello world");
        assert_eq!(out, b"hello world\n".to_vec());
        // No file appears anywhere.
        assert!(!ramfs::exists("/hello"));
    }

    #[test]
    fn redirect_then_cat_roundtrips() {
        let mut ctx = ctx();
        let out = run_line(&mut ctx, "echo A > /tmp/shell-a");
        assert_eq!(out, Vec::<u8>::new());
        assert_eq!(ramfs::read("/tmp/shell-a").unwrap(), b"A\n".to_vec());

        let out = run_line(&mut ctx, "cat /tmp/shell-a");
        assert_eq!(out, b"A\n".to_vec());
    }

    #[test]
    fn append_accumulates() {
        let mut ctx = ctx();
        run_line(&mut ctx, "echo one > /tmp/shell-log");
        run_line(&mut ctx, "echo two >> /tmp/shell-log");
        assert_eq!(
            ramfs::read("/tmp/shell-log").unwrap(),
            b"one\ntwo\n".to_vec()
        );
    }

    #[test]
    fn pipelines_thread_output_into_input() {
        let mut ctx = ctx();
        run_line(&mut ctx, "echo apple > /tmp/shell-p");
        run_line(&mut ctx, "echo banana >> /tmp/shell-p");
        let out = run_line(&mut ctx, "cat /tmp/shell-p | grep ban");
        assert_eq!(out, b"banana\n".to_vec());
    }

    #[test]
    fn grep_on_empty_input_is_empty() {
        let mut ctx = ctx();
        let out = run_line(&mut ctx, "grep anything");
        assert_eq!(out, Vec::<u8>::new());
    }

    #[test]
    fn unknown_commands_say_so() {
        let mut ctx = ctx();
        assert_eq!(run_line(&mut ctx, "frobnicate"), b"unknown command\n".to_vec());
    }

    #[test]
    fn cd_and_pwd_track_the_working_directory() {
        let mut ctx = ctx();
        assert_eq!(run_line(&mut ctx, "pwd"), b"/\n".to_vec());
        assert_eq!(run_line(&mut ctx, "cd /tmp"), Vec::<u8>::new());
        assert_eq!(run_line(&mut ctx, "pwd"), b"/tmp/\n".to_vec());
        // Relative redirect lands under the cwd.
        run_line(&mut ctx, "echo rel > here");
        assert_eq!(ramfs::read("/tmp/here").unwrap(), b"rel\n".to_vec());
        assert_eq!(run_line(&mut ctx, "cd /nonexistent"), b"fail\n".to_vec());
    }

    #[test]
    fn exit_sets_the_flag() {
        let mut ctx = ctx();
        run_line(&mut ctx, "exit");
        assert!(ctx.exited);
    }

    #[test]
    fn interrupt_aborts_between_stages() {
        let mut ctx = ctx();
        ctx.interrupt_flag().store(true, Ordering::Relaxed);
        let out = run_line(&mut ctx, "echo a | grep a");
        assert_eq!(out, b"^C\n".to_vec());
        // Flag is consumed; the next line runs normally.
        let out = run_line(&mut ctx, "echo a");
        assert_eq!(out, b"a\n".to_vec());
    }

    #[test]
    fn parse_errors_report_fail() {
        let mut ctx = ctx();
        assert_eq!(run_line(&mut ctx, "echo 'oops"), b"fail\n".to_vec());
    }

    #[test]
    fn background_jobs_spawn_a_task() {
        let mut ctx = ctx();
        let out = run_line(&mut ctx, "echo bg &");
        assert!(out.starts_with(b"[job "));
    }
}
