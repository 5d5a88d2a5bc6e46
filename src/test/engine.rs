use super::*;
use crate::common::*;

const SOLVE: &str = "
var int n;
function solve(int n) -> int;
main {
    var int r;
    input n;
    call r = solve(n);
    output r;
    exit;
}";

#[test]
fn single_call() {
    let (result, transcript) = run(SOLVE, "main_begin 5\nfunction_call solve 5\nexit\n", "42\n");
    let outcome = result.unwrap();
    assert_eq!(transcript.responses.text(), "0 1 42\n");
    assert_eq!(transcript.downward.text(), "5\n");
    assert!(outcome.log.contains("PREFLIGHT: main_begin"));
    assert!(outcome.log.contains("RUN: <- 42"));
}

#[test]
fn arrays_travel_with_their_length() {
    let text = "
        var int n;
        var int[] a;
        function sum(int n, int[] a) -> int;
        main {
            var int s;
            input n;
            alloc a : n;
            for i : n { input a[i]; }
            call s = sum(n, a);
            output s;
            exit;
        }";
    let (result, transcript) = run(text, "main_begin 3 3 1 2 3\nfunction_call sum 3 3 1 2 3\nexit\n", "6\n");
    result.unwrap();
    assert_eq!(transcript.responses.text(), "0 1 6\n");
    assert_eq!(transcript.downward.text(), "3\n1\n2\n3\n");
}

const SWITCH: &str = "
function f();
main {
    var int c;
    input c;
    switch c {
        case 1 { call f(); }
        case 2 { checkpoint; }
    }
}";

#[test]
fn switch_follows_the_pending_call() {
    let (result, transcript) = run(SWITCH, "main_begin\nfunction_call f\nmain_end\n", "");
    result.unwrap();
    assert_eq!(transcript.responses.text(), "0 0\n");
    assert_eq!(transcript.downward.text(), "1\n");
}

#[test]
fn switch_falls_back_to_a_branch_without_calls() {
    let (result, transcript) = run(SWITCH, "main_begin\nmain_end\n", "0\n");
    result.unwrap();
    assert_eq!(transcript.responses.text(), "");
    assert_eq!(transcript.downward.text(), "2\n");
}

#[test]
fn if_on_an_upward_value() {
    let text = "
        function f() -> int;
        function g();
        main {
            var int r;
            call r = f();
            output r;
            if r { call g(); }
            exit;
        }";
    let (result, transcript) = run(text, "main_begin\nfunction_call f\nfunction_call g\nexit\n", "1\n");
    result.unwrap();
    assert_eq!(transcript.responses.text(), "0 1 1\n0 0\n");

    let (result, transcript) = run(text, "main_begin\nfunction_call f\nexit\n", "0\n");
    result.unwrap();
    assert_eq!(transcript.responses.text(), "0 1 0\n");
}

#[test]
fn loop_iterations_do_not_mix() {
    let text = "
        function query(int x) -> int;
        main {
            loop {
                var int q;
                input q;
                switch q {
                    case 0 { break; }
                    case 1 {
                        var int x, r;
                        input x;
                        call r = query(x);
                        output r;
                    }
                }
            }
            exit;
        }";
    let requests = "main_begin\nfunction_call query 10\nfunction_call query 20\nexit\n";
    let (result, transcript) = run(text, requests, "100\n200\n");
    result.unwrap();
    assert_eq!(transcript.responses.text(), "0 1 100\n0 1 200\n");
    assert_eq!(transcript.downward.text(), "1\n10\n1\n20\n0\n");
}

const CALLBACKS: &str = "
function solve(int n) -> int callbacks ask, tell;
callback ask(int x) -> int {
    var int answer;
    input answer;
    return answer;
}
callback tell(int y) {
}
main {
    var int n, r;
    input n;
    call r = solve(n);
    output r;
    exit;
}";

#[test]
fn callbacks_are_answered_in_order() {
    let requests = "main_begin\nfunction_call solve 3 1 1\ncallback_return 9\nexit\n";
    let (result, transcript) = run(CALLBACKS, requests, "ask 4\ntell 5\nreturn\n7\n");
    result.unwrap();
    assert_eq!(transcript.responses.text(), "1 0 4\n1 1 5\n0 1 7\n");
    assert_eq!(transcript.downward.text(), "3\n9\n");
}

#[test]
fn callbacks_must_be_accepted() {
    let requests = "main_begin\nfunction_call solve 3 0 1\n";
    let (result, _) = run(CALLBACKS, requests, "ask 4\nreturn\n7\n");
    assert_eq!(result, Err(InterfaceError::CallbackNotAccepted { callback: "ask".into() }));
}

#[test]
fn callbacks_must_belong_to_the_call() {
    let requests = "main_begin\nfunction_call solve 3 1 1\n";
    let (result, _) = run(CALLBACKS, requests, "guess 4\n");
    assert_eq!(result, Err(InterfaceError::UnknownCallback { name: "guess".into() }));
}

#[test]
fn requests_must_match_the_interface() {
    let (result, _) = run(SOLVE, "exit\n", "");
    assert_eq!(result, Err(InterfaceError::unexpected("main_begin", "exit")));

    let text = "function f(); function g(); main { call f(); }";
    let (result, _) = run(text, "main_begin\nfunction_call g\n", "");
    assert_eq!(result, Err(InterfaceError::WrongFunction { expected: "f".into(), actual: "g".into() }));

    let (result, _) = run("main { }", "main_begin\nexit\n", "");
    assert_eq!(result, Err(InterfaceError::unexpected("main_end", "exit")));
}

#[test]
fn downward_values_are_checked() {
    let text = "var int n; function solve(int n); main { call solve(n); exit; }";
    let (result, _) = run(text, "main_begin 5\nfunction_call solve 6\nexit\n", "");
    assert_eq!(
        result,
        Err(InterfaceError::ValueMismatch { variable: "n".into(), expected: "5".into(), actual: "6".into() })
    );
}

#[test]
fn array_lengths_are_bounded_by_the_request() {
    let text = "var int[] a; function f(int[] a); main { call f(a); exit; }";
    let (result, _) = run(text, "main_begin 9223372036854775807\nexit\n", "");
    assert_eq!(result, Err(InterfaceError::malformed("array length", i64::MAX)));
}

#[test]
fn upward_sizes_are_bounded() {
    let text = "var int n; var int[] a; main { output n; alloc a : n; for i : n { output a[i]; } exit; }";
    let (result, _) = run(text, "main_begin\nexit\n", "9223372036854775807\n");
    assert_eq!(result, Err(InterfaceError::malformed("array size", i64::MAX)));
}

#[test]
fn silent_process_disconnects() {
    let text = "function f() -> int; main { var int r; call r = f(); output r; exit; }";
    let (result, _) = run(text, "main_begin\nfunction_call f\nexit\n", "");
    assert_eq!(result, Err(InterfaceError::Disconnected("output".into())));
}

#[test]
fn first_calls_of_main() {
    assert_eq!(interface(SOLVE).first_calls(), &btreeset! { Some(CallToken::function("solve")) });
    assert_eq!(
        interface(SWITCH).first_calls(),
        &btreeset! { None, Some(CallToken::function("f")) }
    );
}
