//! The control protocol of one sandbox session, both ends.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use crate::common::*;
use crate::protocol::eval::RunOutcome;
use crate::protocol::messages::{write_line, Connection};
use crate::protocol::InterfaceDefinition;
use crate::runtime::errors::*;
use crate::runtime::pipes::*;
use crate::runtime::process::SandboxProcess;
use crate::runtime::{ControlCommand, ControlResponse, ProcessStatus};

/// The driver's ends of the data pipes of a started process.
#[derive(Debug)]
pub struct DriverChannels {
    pub downward: File,
    pub upward: BufReader<File>,
}

/// Issues control commands to a session served by `serve`.
#[derive(Debug)]
pub struct SandboxProcessClient {
    dir: PathBuf,
    requests: File,
    responses: BufReader<File>,
}

fn respond(responses: &mut File, response: ControlResponse) -> Result<(), SandboxError> {
    responses.write_all(response.encode()?.as_bytes())?;
    responses.flush()?;
    Ok(())
}

/// Answers control requests for `process` until it has been waited for
/// or the client hangs up. Returns the final status, if any.
pub fn serve(process: &mut SandboxProcess, dir: &Path) -> Result<Option<ProcessStatus>, SandboxError> {
    let requests = BufReader::new(open_read(&dir.join(CONTROL_REQUEST))?);
    let mut responses = open_write(&dir.join(CONTROL_RESPONSE))?;
    for line in requests.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        log::debug!("{}: control request '{}'", dir.display(), line);
        let command = match ControlCommand::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                respond(&mut responses, ControlResponse::Exception(e.to_string()))?;
                continue;
            }
        };
        let outcome = match command {
            ControlCommand::Start => process.check_start().map(|()| None),
            ControlCommand::Wait => process.wait().map(Some),
            ControlCommand::Status => process.status().map(Some),
        };
        match outcome {
            Err(e) => respond(&mut responses, ControlResponse::Exception(e.to_string()))?,
            Ok(status) => {
                respond(&mut responses, ControlResponse::Ok(status.clone()))?;
                match command {
                    // acknowledged first: the client opens the data pipes only after this
                    ControlCommand::Start => process.start()?,
                    ControlCommand::Wait => return Ok(status),
                    ControlCommand::Status => {}
                }
            }
        }
    }
    log::debug!("{}: client hung up", dir.display());
    Ok(None)
}

impl DriverChannels {
    pub fn open(dir: &Path) -> Result<Self, SandboxError> {
        let downward = open_write(&dir.join(DOWNWARD))?;
        let upward = BufReader::new(open_read(&dir.join(UPWARD))?);
        Ok(DriverChannels { downward, upward })
    }
    pub fn connection(self, requests: Box<dyn BufRead + Send>, responses: Box<dyn Write + Send>) -> Connection {
        Connection::new(requests, responses, Box::new(self.downward), Box::new(self.upward))
    }
}

impl SandboxProcessClient {
    pub fn connect(dir: &Path) -> Result<Self, SandboxError> {
        let requests = open_write(&dir.join(CONTROL_REQUEST))?;
        let responses = BufReader::new(open_read(&dir.join(CONTROL_RESPONSE))?);
        Ok(SandboxProcessClient { dir: dir.to_owned(), requests, responses })
    }

    fn read_line(&mut self) -> Result<String, SandboxError> {
        let mut line = String::new();
        if self.responses.read_line(&mut line)? == 0 {
            return Err(SandboxError::Protocol("control response pipe closed".into()));
        }
        Ok(line.trim_end().to_owned())
    }

    fn exchange(&mut self, command: &str, payload: bool) -> Result<Option<String>, SandboxError> {
        write_line(&mut self.requests, command)?;
        match self.read_line()?.as_str() {
            "0" if payload => Ok(Some(self.read_line()?)),
            "0" => Ok(None),
            "1" => {
                let message = self.read_line()?;
                Err(match SandboxException::from_message(&message) {
                    Some(e) => SandboxError::Exception(e),
                    None => SandboxError::Protocol(message),
                })
            }
            other => Err(SandboxError::Protocol(format!("bad status line '{}'", other))),
        }
    }

    fn status_exchange(&mut self, command: ControlCommand) -> Result<ProcessStatus, SandboxError> {
        let line = self.exchange(&command.to_string(), true)?.unwrap_or_default();
        Ok(serde_json::from_str(&line)?)
    }

    /// Starts the process and opens the driver's ends of its data pipes.
    pub fn start(&mut self) -> Result<DriverChannels, SandboxError> {
        self.exchange(&ControlCommand::Start.to_string(), false)?;
        DriverChannels::open(&self.dir)
    }
    pub fn wait(&mut self) -> Result<ProcessStatus, SandboxError> {
        self.status_exchange(ControlCommand::Wait)
    }
    pub fn status(&mut self) -> Result<ProcessStatus, SandboxError> {
        self.status_exchange(ControlCommand::Status)
    }

    /// Runs the engine against the process of this session: starts it,
    /// enacts `interface` over the driver's `requests` and `responses`, then
    /// waits for it. The data pipes are closed before waiting, so a process
    /// abandoned by a failed run sees end-of-file.
    pub fn evaluate(
        mut self,
        interface: &InterfaceDefinition,
        requests: Box<dyn BufRead + Send>,
        responses: Box<dyn Write + Send>,
    ) -> Result<(Result<RunOutcome, InterfaceError>, ProcessStatus), SandboxError> {
        let channels = self.start()?;
        let outcome = interface.run(channels.connection(requests, responses));
        if let Err(e) = &outcome {
            log::info!("{}: run failed: {}", self.dir.display(), e);
        }
        let status = self.wait()?;
        Ok((outcome, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::process::Launch;

    fn session_with(argv: &[&str]) -> (tempfile::TempDir, SessionDir, SandboxProcess) {
        let root = tempfile::tempdir().unwrap();
        let session = SessionDir::create(root.path()).unwrap();
        let launch = Launch::Executable {
            argv: argv.iter().map(|w| w.to_string()).collect(),
            dir: session.path().to_owned(),
        };
        let process = SandboxProcess::new(launch, session.pipe(DOWNWARD), session.pipe(UPWARD));
        (root, session, process)
    }

    #[test]
    fn start_and_wait() {
        let (_root, session, mut process) = session_with(&["cat"]);
        crossbeam_utils::thread::scope(|s| {
            let server = s.spawn(|_| serve(&mut process, session.path()));
            let mut client = SandboxProcessClient::connect(session.path()).unwrap();
            let mut channels = client.start().unwrap();
            write_line(&mut channels.downward, "1 2 3").unwrap();
            let mut line = String::new();
            channels.upward.read_line(&mut line).unwrap();
            assert_eq!(line, "1 2 3\n");
            drop(channels);
            let status = client.wait().unwrap();
            assert!(status.is_success());
            assert_eq!(server.join().unwrap().unwrap(), Some(status));
        })
        .unwrap();
    }

    #[test]
    fn misuse_is_reported_not_fatal() {
        let (_root, session, mut process) = session_with(&["true"]);
        crossbeam_utils::thread::scope(|s| {
            s.spawn(|_| serve(&mut process, session.path()).unwrap());
            let mut client = SandboxProcessClient::connect(session.path()).unwrap();
            assert_eq!(client.wait(), Err(SandboxError::Exception(SandboxException::NotStarted)));
            assert_eq!(
                client.exchange("kill", false),
                Err(SandboxError::Exception(SandboxException::UnknownCommand("kill".into())))
            );
            let channels = client.start().unwrap();
            assert_eq!(
                client.start().map(|_| ()),
                Err(SandboxError::Exception(SandboxException::AlreadyStarted))
            );
            drop(channels);
            assert!(client.wait().unwrap().is_success());
        })
        .unwrap();
    }

    #[test]
    fn hang_up_ends_the_session() {
        let (_root, session, mut process) = session_with(&["true"]);
        crossbeam_utils::thread::scope(|s| {
            let server = s.spawn(|_| serve(&mut process, session.path()));
            let mut client = SandboxProcessClient::connect(session.path()).unwrap();
            assert_eq!(client.status(), Err(SandboxError::Exception(SandboxException::NotStarted)));
            drop(client);
            assert_eq!(server.join().unwrap().unwrap(), None);
        })
        .unwrap();
    }
}
