use crate::codegen::*;
use crate::protocol::ast::*;
use crate::protocol::InterfaceDefinition;

pub struct Rust;

const READ_MACRO: &str = "\
macro_rules! read_line {
    ($($target:expr),*) => {{
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).unwrap();
        let mut words = line.split_whitespace();
        $($target = words.next().unwrap().parse().unwrap();)*
    }};
}";

fn owned_type(dimensions: usize) -> String {
    match dimensions {
        0 => "i64".into(),
        _ => format!("Vec<{}>", owned_type(dimensions - 1)),
    }
}

fn parameter_type(dimensions: usize) -> String {
    match dimensions {
        0 => "i64".into(),
        _ => format!("&[{}]", owned_type(dimensions - 1)),
    }
}

fn returns(has_return_value: bool) -> &'static str {
    if has_return_value {
        " -> i64"
    } else {
        ""
    }
}

fn prototype(function: &FunctionPrototype, interface: &InterfaceDefinition) -> String {
    let mut parameters: Vec<String> = function
        .parameters
        .iter()
        .map(|p| format!("{}: {}", p.variable.name, parameter_type(p.dimensions)))
        .collect();
    for name in &function.callbacks {
        if let Some(callback) = interface.signature.callback(name) {
            let types = vec!["i64"; callback.parameters.len()];
            parameters.push(format!(
                "{}: fn({}){}",
                callback.name,
                types.join(", "),
                returns(callback.has_return_value)
            ));
        }
    }
    format!("{}({}){}", function.name, parameters.join(", "), returns(function.has_return_value))
}

fn constants(out: &mut Output, interface: &InterfaceDefinition) {
    for (name, value) in &interface.signature.constants {
        out.line(format!("const {}: i64 = {};", name, value));
    }
}

impl Backend for Rust {
    fn skeleton_header(&self, out: &mut Output, interface: &InterfaceDefinition) {
        out.line("mod solution;");
        out.line("");
        out.line("use std::io::Write;");
        out.line("");
        for line in READ_MACRO.lines() {
            out.line(line);
        }
        out.line("");
        if !interface.signature.constants.is_empty() {
            constants(out, interface);
            out.line("");
        }
    }
    // Globals live in `main`; callbacks are plain function pointers and
    // cannot see them.
    fn main_open(&self, out: &mut Output, interface: &InterfaceDefinition) {
        out.line("fn main() {");
        out.indent();
        for declaration in interface.signature.variables.values() {
            out.line(self.declare(&declaration.variable.name, declaration.dimensions));
        }
        out.dedent();
    }
    fn main_close(&self, out: &mut Output) {
        out.line("}");
    }
    fn template(&self, out: &mut Output, interface: &InterfaceDefinition) {
        constants(out, interface);
        for function in interface.signature.functions.values() {
            out.line("");
            out.line(format!("pub fn {} {{", prototype(function, interface)));
            out.indent();
            if function.has_return_value {
                out.line("0");
            }
            out.dedent();
            out.line("}");
        }
    }
    fn block_close(&self) -> Option<&'static str> {
        Some("}")
    }
    fn declare(&self, name: &str, dimensions: usize) -> String {
        match dimensions {
            0 => format!("let mut {}: i64 = 0;", name),
            _ => format!("let mut {}: {} = Vec::new();", name, owned_type(dimensions)),
        }
    }
    fn alloc(&self, target: &str, dimensions: usize, size: &str) -> String {
        let fill = if dimensions > 1 { "Vec::new()" } else { "0" };
        format!("{}.resize({} as usize, {});", target, size, fill)
    }
    fn read(&self, targets: &[String]) -> String {
        format!("read_line!({});", targets.join(", "))
    }
    fn print(&self, tag: Option<&str>, values: &[String]) -> String {
        let mut format: Vec<&str> = tag.into_iter().collect();
        format.extend(values.iter().map(|_| "{}"));
        let mut line = format!("println!(\"{}\"", format.join(" "));
        for value in values {
            line.push_str(", ");
            line.push_str(value);
        }
        line.push_str(");");
        line
    }
    fn flush(&self) -> String {
        "std::io::stdout().flush().unwrap();".into()
    }
    fn exit(&self) -> String {
        "std::process::exit(0);".into()
    }
    fn break_statement(&self) -> String {
        "break;".into()
    }
    fn return_statement(&self, value: &str) -> String {
        format!("return {};", value)
    }
    fn if_open(&self, condition: &str) -> String {
        format!("if {} != 0 {{", condition)
    }
    fn else_open(&self) -> String {
        "} else {".into()
    }
    fn for_open(&self, index: &str, range: &str) -> String {
        format!("for {} in 0..{} {{", index, range)
    }
    fn loop_open(&self) -> String {
        "loop {".into()
    }
    fn case_open(&self, first: bool, value: &str, labels: &[String]) -> String {
        let condition: Vec<String> = labels.iter().map(|l| format!("{} == {}", value, l)).collect();
        if first {
            format!("if {} {{", condition.join(" || "))
        } else {
            format!("}} else if {} {{", condition.join(" || "))
        }
    }
    fn subscript(&self, array: &str, index: &str) -> String {
        format!("{}[{} as usize]", array, index)
    }
    fn call(&self, out: &mut Output, call: &RenderedCall) {
        let mut head = match &call.return_target {
            Some(target) => format!("{} = ", target),
            None => String::new(),
        };
        let arguments: Vec<String> = call
            .arguments
            .iter()
            .map(|(text, dimensions)| if *dimensions > 0 { format!("&{}", text) } else { text.clone() })
            .collect();
        head.push_str(&format!("solution::{}({}", call.function.name, arguments.join(", ")));
        if call.callbacks.is_empty() {
            out.line(format!("{});", head));
            return;
        }
        for (i, callback) in call.callbacks.iter().enumerate() {
            let parameters: Vec<String> =
                callback.prototype.parameters.iter().map(|p| format!("{}: i64", p.variable.name)).collect();
            let closure = format!("|{}|{}", parameters.join(", "), returns(callback.prototype.has_return_value));
            if i == 0 {
                let separator = if arguments.is_empty() { "" } else { ", " };
                out.line(format!("{}{}{} {{", head, separator, closure));
            } else {
                out.line(format!("}}, {} {{", closure));
            }
            out.indent();
            out.splice(&callback.body);
            out.dedent();
        }
        out.line("});");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::tests::sample;

    #[test]
    fn skeleton_main() {
        let text = generate(&sample(), Language::Rust, Artifact::Skeleton);
        assert!(text.starts_with("mod solution;\n\nuse std::io::Write;\n\nmacro_rules! read_line {\n"));
        let main = &text[text.find("fn main() {").unwrap()..];
        let expected = "\
fn main() {
    let mut n: i64 = 0;
    let mut a: Vec<i64> = Vec::new();
    read_line!(n);
    a.resize(n as usize, 0);
    for i in 0..n {
        read_line!(a[i as usize]);
    }
    let mut r: i64 = 0;
    r = solution::solve(n, &a, |x: i64| -> i64 {
        println!(\"ask {}\", x);
        std::io::stdout().flush().unwrap();
        let mut answer: i64 = 0;
        read_line!(answer);
        return answer;
    });
    println!(\"return\");
    std::io::stdout().flush().unwrap();
    println!(\"{}\", r);
    std::io::stdout().flush().unwrap();
    let mut c: i64 = 0;
    read_line!(c);
    if c == 1 {
        println!(\"0\");
        std::io::stdout().flush().unwrap();
    } else if c == 2 || c == MAX {
        std::process::exit(0);
    }
}
";
        assert_eq!(main, expected);
        assert!(text.contains("const MAX: i64 = 100;\n"));
    }

    #[test]
    fn template() {
        assert_eq!(
            generate(&sample(), Language::Rust, Artifact::Template),
            "const MAX: i64 = 100;\n\npub fn solve(n: i64, a: &[i64], ask: fn(i64) -> i64) -> i64 {\n    0\n}\n"
        );
    }

    #[test]
    fn nested_types() {
        assert_eq!(parameter_type(2), "&[Vec<i64>]");
        assert_eq!(Rust.declare("m", 2), "let mut m: Vec<Vec<i64>> = Vec::new();");
        assert_eq!(Rust.alloc("m", 2, "n"), "m.resize(n as usize, Vec::new());");
    }
}
