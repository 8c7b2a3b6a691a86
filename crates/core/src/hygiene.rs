//! Process hygiene
//!
//! Diagnostic listing of build-related processes plus the few places where
//! processes are deliberately terminated: leftover test workers after a test
//! run, and build-engine/compiler-server hosts before a bootstrap build or
//! when preparing a CI machine.

use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, info};

/// Name prefix of test-runner worker processes
pub const TEST_WORKER_PREFIX: &str = "xunit";

const BUILD_ENGINE_HOST: &str = "msbuild";
const COMPILER_SERVER_HOST: &str = "vbcscompiler";
const DOTNET_HOST: &str = "dotnet";
const COMPILER_SERVER_MODULE: &str = "VBCSCompiler.dll";

/// A running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub command_line: String,
}

impl ProcessInfo {
    /// Name without a trailing `.exe`, lowercased
    fn base_name(&self) -> String {
        let lower = self.name.to_ascii_lowercase();
        lower
            .strip_suffix(".exe")
            .map(str::to_string)
            .unwrap_or(lower)
    }

    fn is_compiler_server(&self) -> bool {
        let base = self.base_name();
        base == COMPILER_SERVER_HOST
            || (base == DOTNET_HOST && self.command_line.contains(COMPILER_SERVER_MODULE))
    }

    /// Build-engine host, compiler-server host, or dotnet hosting the server
    pub fn is_build_related(&self) -> bool {
        self.base_name() == BUILD_ENGINE_HOST || self.is_compiler_server()
    }
}

/// Process enumeration and termination
pub trait ProcessControl {
    fn list(&self) -> Vec<ProcessInfo>;

    /// Returns whether the kill signal was delivered
    fn kill(&self, pid: u32) -> bool;
}

impl<T: ProcessControl> ProcessControl for &T {
    fn list(&self) -> Vec<ProcessInfo> {
        (*self).list()
    }

    fn kill(&self, pid: u32) -> bool {
        (*self).kill(pid)
    }
}

/// Live processes via sysinfo
#[derive(Debug)]
pub struct SystemProcesses {
    system: Mutex<System>,
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn refresh(system: &mut System) {
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
        );
    }
}

impl ProcessControl for SystemProcesses {
    fn list(&self) -> Vec<ProcessInfo> {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        Self::refresh(&mut system);
        system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                command_line: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" "),
            })
            .collect()
    }

    fn kill(&self, pid: u32) -> bool {
        let system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system
            .process(Pid::from_u32(pid))
            .map(|process| process.kill())
            .unwrap_or(false)
    }
}

/// Build-related processes currently running
pub fn related_processes<P: ProcessControl>(processes: &P) -> Vec<ProcessInfo> {
    let mut related: Vec<ProcessInfo> = processes
        .list()
        .into_iter()
        .filter(ProcessInfo::is_build_related)
        .collect();
    related.sort_by_key(|p| p.pid);
    related
}

/// Print build-related processes to stdout; never fails
pub fn report_related_processes<P: ProcessControl>(processes: &P) {
    let related = related_processes(processes);
    println!("Related running processes: {}", related.len());
    for process in &related {
        println!("  {:>7}  {}  {}", process.pid, process.name, process.command_line);
    }
}

/// Kill every process whose name starts with `prefix` (case-insensitive)
pub fn terminate_by_prefix<P: ProcessControl>(processes: &P, prefix: &str) -> usize {
    let prefix = prefix.to_ascii_lowercase();
    let mut killed = 0;
    for process in processes.list() {
        if process.name.to_ascii_lowercase().starts_with(&prefix) {
            debug!("Terminating {} ({})", process.name, process.pid);
            if processes.kill(process.pid) {
                killed += 1;
            }
        }
    }
    if killed > 0 {
        info!("Terminated {} '{}*' process(es)", killed, prefix);
    }
    killed
}

/// Stop compiler-server hosts so a freshly built compiler is picked up
pub fn stop_compiler_server<P: ProcessControl>(processes: &P) -> usize {
    stop_matching(processes, ProcessInfo::is_compiler_server)
}

/// Stop build-engine and compiler-server hosts
pub fn stop_build_processes<P: ProcessControl>(processes: &P) -> usize {
    stop_matching(processes, ProcessInfo::is_build_related)
}

fn stop_matching<P: ProcessControl>(processes: &P, matches: fn(&ProcessInfo) -> bool) -> usize {
    processes
        .list()
        .iter()
        .filter(|p| matches(p))
        .filter(|p| {
            debug!("Stopping {} ({})", p.name, p.pid);
            processes.kill(p.pid)
        })
        .count()
}

pub mod mock {
    //! In-memory process table for tests

    use super::{ProcessControl, ProcessInfo};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Default)]
    pub struct MockProcesses {
        running: Arc<Mutex<Vec<ProcessInfo>>>,
        killed: Arc<Mutex<Vec<ProcessInfo>>>,
    }

    impl MockProcesses {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn spawn(&self, pid: u32, name: &str, command_line: &str) {
            self.running.lock().unwrap().push(ProcessInfo {
                pid,
                name: name.to_string(),
                command_line: command_line.to_string(),
            });
        }

        pub fn running(&self) -> Vec<ProcessInfo> {
            self.running.lock().unwrap().clone()
        }

        pub fn killed(&self) -> Vec<ProcessInfo> {
            self.killed.lock().unwrap().clone()
        }

        pub fn is_running(&self, name: &str) -> bool {
            self.running
                .lock()
                .unwrap()
                .iter()
                .any(|p| p.name.eq_ignore_ascii_case(name))
        }
    }

    impl ProcessControl for MockProcesses {
        fn list(&self) -> Vec<ProcessInfo> {
            self.running()
        }

        fn kill(&self, pid: u32) -> bool {
            let mut running = self.running.lock().unwrap();
            match running.iter().position(|p| p.pid == pid) {
                Some(index) => {
                    let process = running.remove(index);
                    self.killed.lock().unwrap().push(process);
                    true
                }
                None => false,
            }
        }
    }
}
