use std::convert::TryFrom;
use std::process::{Child, Command, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::common::*;
use crate::runtime::errors::*;
use crate::runtime::pipes::{open_read, open_write};
use crate::runtime::ProcessStatus;

/// What a process will be once started.
#[derive(Debug, Clone)]
pub enum Launch {
    Executable { argv: Vec<String>, dir: PathBuf },
    /// Nothing to run: the candidate did not build.
    CompilationFailed(CompilationFailed),
}

#[derive(Debug)]
enum Running {
    Child(Child),
    Stub(CompilationFailed),
}

#[derive(Debug)]
enum ProcessState {
    Created(Launch),
    Started(Running),
    Done { status: ProcessStatus, reported: bool },
}

/// One sandboxed execution of a candidate: created, then started, then
/// waited for, exactly once each.
///
/// Its stdin and stdout are the downward and upward pipes of a session.
#[derive(Debug)]
pub struct SandboxProcess {
    state: ProcessState,
    downward: PathBuf,
    upward: PathBuf,
    logger: String,
}

fn seconds(time: libc::timeval) -> f64 {
    time.tv_sec as f64 + time.tv_usec as f64 / 1e6
}

fn decode(status: libc::c_int, usage: &libc::rusage) -> ProcessStatus {
    let error = if libc::WIFEXITED(status) {
        match libc::WEXITSTATUS(status) {
            0 => None,
            code => Some(format!("exited with status {}", code)),
        }
    } else if libc::WIFSIGNALED(status) {
        let number = libc::WTERMSIG(status);
        Some(match Signal::try_from(number) {
            Ok(signal) => format!("killed by signal {}", signal.as_str()),
            Err(_) => format!("killed by signal {}", number),
        })
    } else {
        Some(format!("unexpected wait status {}", status))
    };
    ProcessStatus {
        error,
        time_usage: seconds(usage.ru_utime) + seconds(usage.ru_stime),
        memory_usage: usage.ru_maxrss.max(0) as u64 * 1024,
    }
}

/// Reaps `pid`, collecting its resource usage. `Ok(None)` means the
/// process is still running (only with `WNOHANG`).
fn wait4(pid: libc::pid_t, options: libc::c_int) -> Result<Option<ProcessStatus>, SandboxError> {
    loop {
        let mut status: libc::c_int = 0;
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let result = unsafe { libc::wait4(pid, &mut status, options, &mut usage) };
        match result {
            0 => return Ok(None),
            r if r > 0 => return Ok(Some(decode(status, &usage))),
            _ => match Errno::last() {
                Errno::EINTR => continue,
                e => return Err(e.into()),
            },
        }
    }
}

impl Launch {
    fn spawn(self, downward: &Path, upward: &Path) -> Result<Running, SandboxError> {
        // same order as the driver side: downward, then upward
        let stdin = open_read(downward)?;
        let stdout = open_write(upward)?;
        match self {
            Launch::CompilationFailed(failure) => Ok(Running::Stub(failure)),
            Launch::Executable { argv, dir } => {
                let (program, args) =
                    argv.split_first().ok_or_else(|| SandboxError::Os("empty command line".into()))?;
                let child = Command::new(program)
                    .args(args)
                    .current_dir(dir)
                    .stdin(Stdio::from(stdin))
                    .stdout(Stdio::from(stdout))
                    .stderr(Stdio::inherit())
                    .spawn()?;
                Ok(Running::Child(child))
            }
        }
    }
}

impl Running {
    fn pid(&self) -> Option<libc::pid_t> {
        match self {
            Running::Child(child) => Some(child.id() as libc::pid_t),
            Running::Stub(_) => None,
        }
    }
    fn poll(&self, options: libc::c_int) -> Option<ProcessStatus> {
        match self {
            Running::Stub(failure) => Some(ProcessStatus::failed(failure)),
            Running::Child(child) => match wait4(child.id() as libc::pid_t, options) {
                Ok(status) => status,
                Err(e) => Some(ProcessStatus::failed(e)),
            },
        }
    }
}

impl SandboxProcess {
    pub fn new(launch: Launch, downward: PathBuf, upward: PathBuf) -> Self {
        SandboxProcess { state: ProcessState::Created(launch), downward, upward, logger: String::new() }
    }
    pub fn log(&self) -> &str {
        &self.logger
    }
    pub fn check_start(&self) -> Result<(), SandboxException> {
        match &self.state {
            ProcessState::Created(_) => Ok(()),
            ProcessState::Started(_) => Err(SandboxException::AlreadyStarted),
            ProcessState::Done { .. } => Err(SandboxException::AlreadyDone),
        }
    }

    /// Opens the data pipes, blocking until the driver opens its ends, and
    /// spawns the process. A spawn failure is not an exception: it shows
    /// up as the error of the final status.
    pub fn start(&mut self) -> Result<(), SandboxException> {
        self.check_start()?;
        let SandboxProcess { state, downward, upward, logger } = self;
        take_mut::take(state, |state| {
            assert_let![ProcessState::Created(launch) = state => {
                match launch.spawn(downward.as_path(), upward.as_path()) {
                    Ok(running) => {
                        log!(logger, "started {:?}", running.pid());
                        ProcessState::Started(running)
                    }
                    Err(e) => {
                        log!(logger, "failed to start: {}", e);
                        ProcessState::Done { status: ProcessStatus::failed(e), reported: false }
                    }
                }
            }]
        });
        Ok(())
    }

    /// Blocks until the process terminates and reports how it went.
    pub fn wait(&mut self) -> Result<ProcessStatus, SandboxException> {
        let status = match &mut self.state {
            ProcessState::Created(_) => return Err(SandboxException::NotStarted),
            ProcessState::Done { reported: true, .. } => return Err(SandboxException::AlreadyDone),
            ProcessState::Done { status, reported } => {
                *reported = true;
                return Ok(status.clone());
            }
            ProcessState::Started(running) => match running.poll(0) {
                Some(status) => status,
                None => ProcessStatus::failed("wait returned early"),
            },
        };
        log!(&mut self.logger, "done: {:?}", status);
        self.state = ProcessState::Done { status: status.clone(), reported: true };
        Ok(status)
    }

    /// Like `wait`, but never blocks. While the process runs the reported
    /// usage is zero.
    pub fn status(&mut self) -> Result<ProcessStatus, SandboxException> {
        let status = match &self.state {
            ProcessState::Created(_) => return Err(SandboxException::NotStarted),
            ProcessState::Done { status, .. } => return Ok(status.clone()),
            ProcessState::Started(running) => match running.poll(libc::WNOHANG) {
                Some(status) => status,
                None => return Ok(ProcessStatus::default()),
            },
        };
        log!(&mut self.logger, "done: {:?}", status);
        self.state = ProcessState::Done { status: status.clone(), reported: false };
        Ok(status)
    }

    /// Sends SIGKILL; a later `wait` reaps the process. Once killed, the
    /// driver reads end-of-file upward and fails to write downward.
    pub fn kill(&mut self) -> Result<(), SandboxException> {
        match &self.state {
            ProcessState::Created(_) => Err(SandboxException::NotStarted),
            ProcessState::Done { .. } => Ok(()),
            ProcessState::Started(running) => {
                if let Some(pid) = running.pid() {
                    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGKILL) {
                        log::warn!("kill {}: {}", pid, e);
                    }
                    log!(&mut self.logger, "killed {}", pid);
                }
                Ok(())
            }
        }
    }
}

impl Drop for SandboxProcess {
    fn drop(&mut self) {
        if let ProcessState::Started(Running::Child(_)) = &self.state {
            let _ = self.kill();
            let _ = self.wait();
        }
    }
}
