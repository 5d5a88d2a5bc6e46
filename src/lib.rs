#[macro_use]
mod macros;

mod common; // common to every layer
pub mod codegen; // skeletons and templates
pub mod protocol; // interface language and the engine
pub mod runtime; // sandboxed processes

#[cfg(test)]
mod test;

pub use common::{CallToken, FirstCalls, Phase};
pub use runtime::errors;

pub use codegen::{generate, Artifact, Language};
pub use protocol::eval::RunOutcome;
pub use protocol::messages::Connection;
pub use protocol::{DefinitionError, InterfaceDefinition};
pub use runtime::ProcessStatus;

#[cfg(feature = "sandbox")]
pub use runtime::{
    coordinator::Coordinator,
    process::SandboxProcess,
    server::{DriverChannels, SandboxProcessClient},
};
