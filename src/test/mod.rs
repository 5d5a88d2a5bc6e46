use crate::protocol::eval::RunOutcome;
use crate::protocol::messages::{Connection, Transcript};
use crate::protocol::InterfaceDefinition;
use crate::runtime::errors::InterfaceError;

mod engine;
#[cfg(feature = "sandbox")]
mod sandbox;

fn interface(text: &str) -> InterfaceDefinition {
    match InterfaceDefinition::parse(text.as_bytes()) {
        Ok(interface) => interface,
        Err(rendered) => panic!("interface does not compile:\n{}", rendered),
    }
}

// Runs `text` over fixed request and upward streams.
// prints the session log (or the failure) and everything the engine wrote,
// then returns the result along with the transcript
fn run(text: &str, requests: &str, upward: &str) -> (Result<RunOutcome, InterfaceError>, Transcript) {
    let interface = interface(text);
    let (connection, transcript) = Connection::in_memory(requests, upward);
    let result = interface.run(connection);
    println!("\n====================");
    match &result {
        Ok(outcome) => println!("{}OK!", outcome.log),
        Err(e) => println!("FAILED! {}", e),
    }
    println!("-- responses --\n{}-- downward --\n{}", transcript.responses.text(), transcript.downward.text());
    (result, transcript)
}
