use derive_more::Display;
use serde::{Deserialize, Serialize};

/// The live exchange diverged from what the interface allows.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum InterfaceError {
    #[display(fmt = "expected {}, got '{}'", expected, actual)]
    UnexpectedRequest { expected: String, actual: String },
    #[display(fmt = "expected call to '{}', got call to '{}'", expected, actual)]
    WrongFunction { expected: String, actual: String },
    #[display(fmt = "value of '{}' is {}, request says {}", variable, expected, actual)]
    ValueMismatch { variable: String, expected: String, actual: String },
    #[display(fmt = "variable '{}' is not bound", variable)]
    Unbound { variable: String },
    #[display(fmt = "nothing in the interface accepts {}", token)]
    NoMatchingBranch { token: String },
    #[display(fmt = "callback '{}' was invoked but not accepted", callback)]
    CallbackNotAccepted { callback: String },
    #[display(fmt = "unknown callback '{}'", name)]
    UnknownCallback { name: String },
    #[display(fmt = "malformed {}: '{}'", what, line)]
    Malformed { what: String, line: String },
    #[display(fmt = "expected a scalar value")]
    NotScalar,
    #[display(fmt = "'{}' is not allocated", variable)]
    NotAllocated { variable: String },
    #[display(fmt = "the exchange cannot proceed: {}", _0)]
    Stalled(String),
    #[display(fmt = "channel closed while waiting for {}", _0)]
    Disconnected(String),
    #[display(fmt = "I/O error: {}", _0)]
    Io(String),
    #[display(fmt = "run aborted")]
    Aborted,
}

/// Misuse of a sandbox process manager.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum SandboxException {
    #[display(fmt = "process already started")]
    AlreadyStarted,
    #[display(fmt = "process not started")]
    NotStarted,
    #[display(fmt = "process already waited for")]
    AlreadyDone,
    #[display(fmt = "unknown command '{}'", _0)]
    UnknownCommand(String),
}

/// The candidate source did not build.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
#[display(fmt = "compilation of {} source failed:\n{}", language, output)]
pub struct CompilationFailed {
    pub language: String,
    pub output: String,
}

/// Infrastructure failure around a sandbox session.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum SandboxError {
    #[display(fmt = "I/O error: {}", _0)]
    Io(String),
    #[display(fmt = "OS error: {}", _0)]
    Os(String),
    #[display(fmt = "{}", _0)]
    Exception(SandboxException),
    #[display(fmt = "{}", _0)]
    Compilation(CompilationFailed),
    #[display(fmt = "{}", _0)]
    Interface(InterfaceError),
    #[display(fmt = "malformed message: {}", _0)]
    Protocol(String),
    #[display(fmt = "unknown language '{}'", _0)]
    UnknownLanguage(String),
}

impl InterfaceError {
    pub fn unbound(variable: &str) -> Self {
        InterfaceError::Unbound { variable: variable.to_owned() }
    }
    pub fn malformed<W: ToString, L: ToString>(what: W, line: L) -> Self {
        InterfaceError::Malformed { what: what.to_string(), line: line.to_string() }
    }
    pub fn unexpected<E: ToString, A: ToString>(expected: E, actual: A) -> Self {
        InterfaceError::UnexpectedRequest { expected: expected.to_string(), actual: actual.to_string() }
    }
}

impl SandboxException {
    /// Recovers an exception from its message, as sent over a control pipe.
    pub fn from_message(message: &str) -> Option<Self> {
        match message.trim() {
            "process already started" => Some(SandboxException::AlreadyStarted),
            "process not started" => Some(SandboxException::NotStarted),
            "process already waited for" => Some(SandboxException::AlreadyDone),
            other => {
                let command = other.strip_prefix("unknown command '")?.strip_suffix('\'')?;
                Some(SandboxException::UnknownCommand(command.to_owned()))
            }
        }
    }
}

impl From<std::io::Error> for InterfaceError {
    fn from(e: std::io::Error) -> Self {
        InterfaceError::Io(e.to_string())
    }
}
impl From<std::io::Error> for SandboxError {
    fn from(e: std::io::Error) -> Self {
        SandboxError::Io(e.to_string())
    }
}
impl From<serde_json::Error> for SandboxError {
    fn from(e: serde_json::Error) -> Self {
        SandboxError::Protocol(e.to_string())
    }
}
#[cfg(feature = "sandbox")]
impl From<nix::Error> for SandboxError {
    fn from(e: nix::Error) -> Self {
        SandboxError::Os(e.to_string())
    }
}
impl From<SandboxException> for SandboxError {
    fn from(e: SandboxException) -> Self {
        SandboxError::Exception(e)
    }
}
impl From<CompilationFailed> for SandboxError {
    fn from(e: CompilationFailed) -> Self {
        SandboxError::Compilation(e)
    }
}
impl From<InterfaceError> for SandboxError {
    fn from(e: InterfaceError) -> Self {
        SandboxError::Interface(e)
    }
}

impl std::error::Error for InterfaceError {}
impl std::error::Error for SandboxException {}
impl std::error::Error for CompilationFailed {}
impl std::error::Error for SandboxError {}
