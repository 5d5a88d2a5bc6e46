use std::io::Cursor;

use super::*;
use crate::protocol::messages::SharedBuffer;
use crate::runtime::pipes::*;
use crate::runtime::process::{Launch, SandboxProcess};
use crate::runtime::server::{self, SandboxProcessClient};

const TWICE: &str = "
var int n;
function twice(int n) -> int;
main {
    var int r;
    input n;
    call r = twice(n);
    output r;
    exit;
}";

// Serves a session for `script` and evaluates `requests` against it.
fn evaluate(script: &str, requests: &str) -> (Result<RunOutcome, InterfaceError>, String, bool) {
    let root = tempfile::tempdir().unwrap();
    let session = SessionDir::create(root.path()).unwrap();
    let launch = Launch::Executable {
        argv: vec!["sh".into(), "-c".into(), script.into()],
        dir: session.path().to_owned(),
    };
    let mut process = SandboxProcess::new(launch, session.pipe(DOWNWARD), session.pipe(UPWARD));
    let interface = interface(TWICE);
    let responses = SharedBuffer::default();
    let (outcome, status) = crossbeam_utils::thread::scope(|s| {
        s.spawn(|_| server::serve(&mut process, session.path()).unwrap());
        let client = SandboxProcessClient::connect(session.path()).unwrap();
        client
            .evaluate(&interface, Box::new(Cursor::new(requests.as_bytes().to_vec())), Box::new(responses.clone()))
            .unwrap()
    })
    .unwrap();
    println!("{}\n{:?}", process.log(), status);
    (outcome, responses.text(), status.is_success())
}

#[test]
fn engine_against_a_process() {
    let (outcome, responses, success) =
        evaluate("read n; echo $((n * 2))", "main_begin 21\nfunction_call twice 21\nexit\n");
    let outcome = outcome.unwrap();
    assert!(outcome.log.contains("RUN: -> 21"));
    assert_eq!(responses, "0 1 42\n");
    assert!(success);
}

#[test]
fn process_dying_early_fails_the_run() {
    let (outcome, _, success) = evaluate("exit 1", "main_begin 21\nfunction_call twice 21\nexit\n");
    assert!(outcome.is_err());
    assert!(!success);
}
