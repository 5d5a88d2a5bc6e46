pub mod cache;
pub mod config;
pub mod errors;

#[cfg(feature = "sandbox")]
pub mod coordinator;
#[cfg(feature = "sandbox")]
pub mod pipes;
#[cfg(feature = "sandbox")]
pub mod process;
#[cfg(feature = "sandbox")]
pub mod server;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::runtime::errors::*;

/// What `wait` (or `status`) reports about a sandboxed process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub error: Option<String>,
    pub time_usage: f64,   // user + system seconds
    pub memory_usage: u64, // peak resident bytes
}

/// A line on the control-request channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Wait,
    Status,
}

/// A reply on the control-response channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlResponse {
    Ok(Option<ProcessStatus>),
    Exception(String),
}

impl ProcessStatus {
    pub fn failed<S: ToString>(error: S) -> Self {
        ProcessStatus { error: Some(error.to_string()), ..ProcessStatus::default() }
    }
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl ControlCommand {
    pub fn parse(line: &str) -> Result<ControlCommand, SandboxException> {
        match line.trim() {
            "start" => Ok(ControlCommand::Start),
            "wait" => Ok(ControlCommand::Wait),
            "status" => Ok(ControlCommand::Status),
            other => Err(SandboxException::UnknownCommand(other.to_owned())),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ControlCommand::Start => f.pad("start"),
            ControlCommand::Wait => f.pad("wait"),
            ControlCommand::Status => f.pad("status"),
        }
    }
}

impl ControlResponse {
    /// The response as it travels: a status code line, then the payload.
    pub fn encode(&self) -> Result<String, SandboxError> {
        Ok(match self {
            ControlResponse::Ok(None) => "0\n".to_owned(),
            ControlResponse::Ok(Some(status)) => format!("0\n{}\n", serde_json::to_string(status)?),
            ControlResponse::Exception(message) => format!("1\n{}\n", message.replace('\n', " ")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands() {
        assert_eq!(ControlCommand::parse("start\n"), Ok(ControlCommand::Start));
        assert_eq!(ControlCommand::parse(" wait "), Ok(ControlCommand::Wait));
        assert_eq!(
            ControlCommand::parse("kill"),
            Err(SandboxException::UnknownCommand("kill".into()))
        );
        assert_eq!(ControlCommand::Status.to_string(), "status");
    }

    #[test]
    fn responses() {
        assert_eq!(ControlResponse::Ok(None).encode().unwrap(), "0\n");
        let status = ProcessStatus { error: None, time_usage: 0.5, memory_usage: 1024 };
        assert_eq!(
            ControlResponse::Ok(Some(status)).encode().unwrap(),
            "0\n{\"error\":null,\"time_usage\":0.5,\"memory_usage\":1024}\n"
        );
        let exception = ControlResponse::Exception(SandboxException::NotStarted.to_string());
        assert_eq!(exception.encode().unwrap(), "1\nprocess not started\n");
        assert!(!ProcessStatus::failed("boom").is_success());
    }
}
