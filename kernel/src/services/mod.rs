// =============================================================================
// Skylark — Service Manager
// =============================================================================
//
// Minimal unit files under /etc/units/, one service each:
//
//   [Unit]
//   Description=What it does
//   [Service]
//   ExecStart=command args [> file | >> file]
//
// Starting a service spawns a task that runs the command through the
// shell runtime; `status` reports the lifecycle of every loaded unit.
// =============================================================================

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::fs::ramfs;
use crate::sync::SpinLock;
use crate::task::scheduler::{self, BlockState, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceError {
    /// No such unit (file or loaded service).
    NotFound,
    /// The unit file is malformed.
    Parse,
    /// The task could not be created.
    Spawn,
}

/// Parsed ExecStart: the command line plus optional redirection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub command: String,
    /// Redirect target and whether it appends.
    pub redirect: Option<(String, bool)>,
}

/// One loaded unit.
struct Service {
    name: String,
    description: String,
    exec: ExecSpec,
    enabled: bool,
    task: Option<TaskId>,
}

static SERVICES: SpinLock<Vec<Service>> = SpinLock::new(Vec::new());

/// Parse a unit file. Whitespace and quotes around the redirection
/// target are trimmed.
pub fn parse_unit(text: &str) -> Result<(String, ExecSpec), ServiceError> {
    let mut section = "";
    let mut description = String::new();
    let mut exec: Option<ExecSpec> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = &line[1..line.len() - 1];
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some(kv) => kv,
            None => return Err(ServiceError::Parse),
        };
        let key = key.trim();
        let value = value.trim();
        match (section, key) {
            ("Unit", "Description") => description = String::from(value),
            ("Service", "ExecStart") => exec = Some(parse_exec(value)),
            _ => {}
        }
    }

    match exec {
        Some(exec) if !exec.command.is_empty() => Ok((description, exec)),
        _ => Err(ServiceError::Parse),
    }
}

fn parse_exec(value: &str) -> ExecSpec {
    // Split off a trailing "> file" or ">> file".
    let (command, redirect) = if let Some(pos) = value.find(">>") {
        let target = trim_target(&value[pos + 2..]);
        (value[..pos].trim(), Some((target, true)))
    } else if let Some(pos) = value.find('>') {
        let target = trim_target(&value[pos + 1..]);
        (value[..pos].trim(), Some((target, false)))
    } else {
        (value.trim(), None)
    };
    ExecSpec {
        command: String::from(command),
        redirect: redirect.filter(|(t, _)| !t.is_empty()),
    }
}

fn trim_target(raw: &str) -> String {
    String::from(raw.trim().trim_matches('"').trim_matches('\''))
}

fn unit_path(name: &str) -> String {
    if name.ends_with(".unit") {
        format!("/etc/units/{}", name)
    } else {
        format!("/etc/units/{}.unit", name)
    }
}

fn service_name(file: &str) -> &str {
    file.strip_suffix(".unit").unwrap_or(file)
}

/// Load (or reload) one unit file into the service table.
pub fn load_unit(name: &str) -> Result<(), ServiceError> {
    let text = ramfs::read(&unit_path(name)).map_err(|_| ServiceError::NotFound)?;
    let text = core::str::from_utf8(&text).map_err(|_| ServiceError::Parse)?;
    let (description, exec) = parse_unit(text)?;

    let name = String::from(service_name(name));
    let mut services = SERVICES.lock();
    match services.iter_mut().find(|s| s.name == name) {
        Some(service) => {
            service.description = description;
            service.exec = exec;
        }
        None => services.push(Service {
            name,
            description,
            exec,
            enabled: false,
            task: None,
        }),
    }
    Ok(())
}

/// Load every `*.unit` under /etc/units/. Returns how many loaded.
pub fn load_all() -> usize {
    let files = match ramfs::list("/etc/units/") {
        Ok(files) => files,
        Err(_) => return 0,
    };
    let mut loaded = 0;
    for file in files {
        if file.ends_with(".unit") && load_unit(&file).is_ok() {
            loaded += 1;
        }
    }
    loaded
}

/// Entry of a spawned service task: run the command line, then exit.
fn service_task(arg: usize) {
    // SAFETY: the box was leaked by start() specifically for this task.
    let exec = unsafe { Box::from_raw(arg as *mut ExecSpec) };
    let output = crate::shell::run_for_service(&exec.command);
    if let Some((target, append)) = &exec.redirect {
        let _ = if *append {
            crate::shell::append_or_create(target, &output)
        } else {
            ramfs::write_or_create(target, &output)
        };
    }
}

pub fn start(name: &str) -> Result<(), ServiceError> {
    let exec = {
        let mut services = SERVICES.lock();
        let service = services
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or(ServiceError::NotFound)?;
        // Already running?
        if let Some(task) = service.task {
            if matches!(
                scheduler::task_state(task),
                Some(BlockState::Ready)
                    | Some(BlockState::Running)
                    | Some(BlockState::TimedWait(_))
                    | Some(BlockState::EventWait(_))
            ) {
                return Ok(());
            }
        }
        service.exec.clone()
    };

    let arg = Box::into_raw(Box::new(exec)) as usize;
    let task = scheduler::create(service_task, arg, name, 16).map_err(|_| {
        // Reclaim the argument on failure.
        unsafe { drop(Box::from_raw(arg as *mut ExecSpec)) };
        ServiceError::Spawn
    })?;
    // Services outlive whoever started them.
    let _ = scheduler::set_parent(task, 0);

    let mut services = SERVICES.lock();
    if let Some(service) = services.iter_mut().find(|s| s.name == name) {
        service.task = Some(task);
    }
    Ok(())
}

pub fn stop(name: &str) -> Result<(), ServiceError> {
    let task = {
        let mut services = SERVICES.lock();
        let service = services
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or(ServiceError::NotFound)?;
        service.task.take()
    };
    if let Some(task) = task {
        let _ = scheduler::kill(task);
    }
    Ok(())
}

pub fn restart(name: &str) -> Result<(), ServiceError> {
    stop(name)?;
    start(name)
}

/// Re-read the unit file, keeping runtime state.
pub fn reload(name: &str) -> Result<(), ServiceError> {
    load_unit(name)
}

pub fn enable(name: &str) -> Result<(), ServiceError> {
    set_enabled(name, true)
}

pub fn disable(name: &str) -> Result<(), ServiceError> {
    set_enabled(name, false)
}

fn set_enabled(name: &str, enabled: bool) -> Result<(), ServiceError> {
    let mut services = SERVICES.lock();
    let service = services
        .iter_mut()
        .find(|s| s.name == name)
        .ok_or(ServiceError::NotFound)?;
    service.enabled = enabled;
    Ok(())
}

/// Start every enabled unit; used once at boot.
pub fn start_enabled() -> usize {
    let names: Vec<String> = SERVICES
        .lock()
        .iter()
        .filter(|s| s.enabled)
        .map(|s| s.name.clone())
        .collect();
    let mut started = 0;
    for name in names {
        if start(&name).is_ok() {
            started += 1;
        }
    }
    started
}

/// Human-readable status of every loaded service.
pub fn status_text() -> String {
    let services = SERVICES.lock();
    if services.is_empty() {
        return String::from("no services loaded\n");
    }
    let mut out = String::new();
    for service in services.iter() {
        let state = match service.task {
            Some(task) => match scheduler::task_state(task) {
                Some(BlockState::Zombie) | None => "exited",
                Some(_) => "running",
            },
            None => "stopped",
        };
        out.push_str(&format!(
            "{:<16} {:<8} {:<9} {}\n",
            service.name,
            if service.enabled { "enabled" } else { "disabled" },
            state,
            service.description
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_unit() {
        let text = "[Unit]\nDescription=Hello logger\n[Service]\nExecStart=echo hi\n";
        let (desc, exec) = parse_unit(text).unwrap();
        assert_eq!(desc, "Hello logger");
        assert_eq!(exec.command, "echo hi");
        assert_eq!(exec.redirect, None);
    }

    #[test]
    fn parses_redirections_with_quotes_and_spaces() {
        let (_, exec) =
            parse_unit("[Service]\nExecStart=echo hi >  \"/tmp/out\" \n").unwrap();
        assert_eq!(exec.command, "echo hi");
        assert_eq!(
            exec.redirect,
            Some((String::from("/tmp/out"), false))
        );

        let (_, exec) = parse_unit("[Service]\nExecStart=uptime >> /var-log\n").unwrap();
        assert_eq!(exec.command, "uptime");
        assert_eq!(exec.redirect, Some((String::from("/var-log"), true)));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "# boot service\n\n[Unit]\nDescription=x\n\n[Service]\n# not yet\nExecStart=ps\n";
        let (_, exec) = parse_unit(text).unwrap();
        assert_eq!(exec.command, "ps");
    }

    #[test]
    fn missing_execstart_is_a_parse_error() {
        assert_eq!(
            parse_unit("[Unit]\nDescription=empty\n"),
            Err(ServiceError::Parse)
        );
        assert_eq!(
            parse_unit("[Service]\nExecStart=\n"),
            Err(ServiceError::Parse)
        );
    }

    #[test]
    fn malformed_lines_are_a_parse_error() {
        assert_eq!(
            parse_unit("[Service]\nExecStart echo\n"),
            Err(ServiceError::Parse)
        );
    }

    #[test]
    fn unit_paths_accept_both_spellings() {
        assert_eq!(unit_path("logger"), "/etc/units/logger.unit");
        assert_eq!(unit_path("logger.unit"), "/etc/units/logger.unit");
        assert_eq!(service_name("logger.unit"), "logger");
    }

    #[test]
    fn unknown_services_report_not_found() {
        assert_eq!(start("no-such"), Err(ServiceError::NotFound));
        assert_eq!(stop("no-such"), Err(ServiceError::NotFound));
        assert_eq!(enable("no-such"), Err(ServiceError::NotFound));
    }
}
