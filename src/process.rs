//! Process enumeration, termination and spawning.
//!
//! The supervisor never keeps handles to what it launches: detached children
//! outlive the `pkgv` invocation that started them, and every question about
//! whether something runs is answered by enumerating the process table again.
use std::{
    ffi::OsString,
    fmt,
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use sysinfo::{ProcessStatus, ProcessesToUpdate, System};
use tracing::debug;

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Working directory; the instance directory for every built-in family.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends `--{name}={path}`.
    pub fn path_flag(self, name: &str, path: &Path) -> Self {
        let mut flag = OsString::from(format!("--{name}="));
        flag.push(path.as_os_str());
        self.arg(flag)
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Runs commands on behalf of the supervisor.
pub trait Launcher {
    /// Runs `command` to completion; a non-zero exit is an error carrying the
    /// captured stderr.
    fn run(&self, command: &CommandSpec) -> io::Result<()>;

    /// Starts `command` detached from the caller, appending its output to
    /// `log_path`. Returns the child's pid.
    fn spawn_detached(&self, command: &CommandSpec, log_path: &Path) -> io::Result<u32>;
}

/// [`Launcher`] backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn run(&self, command: &CommandSpec) -> io::Result<()> {
        debug!("Running `{command}`");
        let output = command
            .to_command()
            .stdin(Stdio::null())
            .output()?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim();
        Err(io::Error::other(if detail.is_empty() {
            format!("`{command}` exited with {}", output.status)
        } else {
            format!("`{command}` exited with {}: {detail}", output.status)
        }))
    }

    fn spawn_detached(&self, command: &CommandSpec, log_path: &Path) -> io::Result<u32> {
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let stdout = OpenOptions::new().create(true).append(true).open(log_path)?;
        let stderr = stdout.try_clone()?;

        let mut cmd = command.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;

            unsafe {
                cmd.pre_exec(|| {
                    // New session: the child must survive the invoking terminal.
                    if libc::setsid() < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;

            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
        }

        let child = cmd.spawn()?;
        let pid = child.id();
        debug!("Spawned `{command}` with PID {pid}, output in {}", log_path.display());
        Ok(pid)
    }
}

/// One entry of the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
}

impl ProcessInfo {
    /// Process name without a trailing `.exe`, lowercased on Windows.
    pub fn base_name(&self) -> String {
        normalize_process_name(&self.name)
    }
}

fn normalize_process_name(name: &str) -> String {
    let trimmed = name
        .strip_suffix(".exe")
        .or_else(|| name.strip_suffix(".EXE"))
        .unwrap_or(name);
    if cfg!(windows) {
        trimmed.to_ascii_lowercase()
    } else {
        trimmed.to_string()
    }
}

/// Live view of running processes.
pub trait ProcessTable {
    /// Snapshot of all processes.
    fn processes(&self) -> Vec<ProcessInfo>;

    /// Forcefully terminates `pid`. A process that is already gone is not an
    /// error.
    fn kill(&self, pid: u32) -> io::Result<()>;
}

/// Processes named like any of `names`, those whose executable lives under
/// `install_dir` first, each group ordered by pid.
///
/// When at least one process runs from `install_dir`, only those are
/// returned; otherwise every name match is.
pub fn find_matching(
    table: &dyn ProcessTable,
    names: &[String],
    install_dir: &Path,
) -> Vec<ProcessInfo> {
    let wanted: Vec<String> = names.iter().map(|n| normalize_process_name(n)).collect();
    let mut matches: Vec<ProcessInfo> = table
        .processes()
        .into_iter()
        .filter(|p| wanted.contains(&p.base_name()))
        .collect();
    matches.sort_by_key(|p| p.pid);

    let local: Vec<ProcessInfo> = matches
        .iter()
        .filter(|p| p.exe.as_deref().is_some_and(|exe| exe.starts_with(install_dir)))
        .cloned()
        .collect();

    if local.is_empty() { matches } else { local }
}

/// [`ProcessTable`] backed by `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessTable;

impl ProcessTable for SysinfoProcessTable {
    fn processes(&self) -> Vec<ProcessInfo> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
            .processes()
            .iter()
            // Exited children nobody reaped yet still occupy a slot.
            .filter(|(_, process)| {
                !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
            })
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                exe: process.exe().map(Path::to_path_buf),
            })
            .collect()
    }

    #[cfg(unix)]
    fn kill(&self, pid: u32) -> io::Result<()> {
        let target = nix::unistd::Pid::from_raw(pid as i32);
        match nix::sys::signal::kill(target, Some(nix::sys::signal::SIGKILL)) {
            Ok(()) => {
                debug!("Sent SIGKILL to PID {pid}");
                Ok(())
            }
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(err) => Err(io::Error::from_raw_os_error(err as i32)),
        }
    }

    #[cfg(not(unix))]
    fn kill(&self, pid: u32) -> io::Result<()> {
        let mut system = System::new();
        let target = sysinfo::Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        match system.process(target) {
            Some(process) => {
                if process.kill() {
                    Ok(())
                } else {
                    tracing::warn!("Failed to terminate PID {pid}");
                    Err(io::Error::other(format!("failed to terminate PID {pid}")))
                }
            }
            None => Ok(()),
        }
    }
}
