// Appends one line to a session transcript and mirrors it to the `log` facade.
macro_rules! log {
    ($logger:expr, $($arg:tt)*) => ({
        use std::fmt::Write;
        let line = format!($($arg)*);
        ::log::debug!("{}", line);
        let _ = writeln!($logger, "{}", line);
    })
}
macro_rules! assert_let {
    ($pat:pat = $expr:expr => $work:expr) => {
        if let $pat = $expr {
            $work
        } else {
            panic!("assert_let failed");
        }
    };
}

#[test]
fn assert_let() {
    let x = Some(5);
    let z = assert_let![Some(y) = x => {
        println!("{:?}", y);
        3
    }];
    assert_eq!(z, 3);
}

#[test]
#[should_panic]
fn must_let_panic() {
    let x: Option<u32> = None;
    assert_let![Some(y) = x => {
        println!("{:?}", y);
    }];
}

#[test]
fn log_appends_lines() {
    let mut logger = String::new();
    log!(&mut logger, "phase {}", "PREFLIGHT");
    log!(&mut logger, "n = {}", 5);
    assert_eq!(logger, "phase PREFLIGHT\nn = 5\n");
}
