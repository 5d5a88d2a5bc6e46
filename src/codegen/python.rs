use crate::codegen::*;
use crate::protocol::ast::*;
use crate::protocol::InterfaceDefinition;

pub struct Python;

fn prototype(function: &FunctionPrototype) -> String {
    let mut parameters: Vec<&str> = function.parameters.iter().map(|p| p.variable.name.as_str()).collect();
    parameters.extend(function.callbacks.iter().map(String::as_str));
    format!("def {}({}):", function.name, parameters.join(", "))
}

fn constants(out: &mut Output, interface: &InterfaceDefinition) {
    for (name, value) in &interface.signature.constants {
        out.line(format!("{} = {}", name, value));
    }
}

impl Backend for Python {
    fn skeleton_header(&self, out: &mut Output, interface: &InterfaceDefinition) {
        out.line("import sys");
        out.line("");
        out.line("import solution");
        out.line("");
        constants(out, interface);
        for declaration in interface.signature.variables.values() {
            out.line(format!("{} = None", declaration.variable.name));
        }
        out.line("");
        out.line("");
    }
    fn main_open(&self, out: &mut Output, interface: &InterfaceDefinition) {
        out.line("def main():");
        let globals: Vec<&str> = interface.signature.variables.keys().map(String::as_str).collect();
        if !globals.is_empty() {
            out.indent();
            out.line(format!("global {}", globals.join(", ")));
            out.dedent();
        }
    }
    fn main_close(&self, out: &mut Output) {
        out.line("");
        out.line("");
        out.line("if __name__ == \"__main__\":");
        out.indent();
        out.line("main()");
        out.dedent();
    }
    fn template(&self, out: &mut Output, interface: &InterfaceDefinition) {
        constants(out, interface);
        for function in interface.signature.functions.values() {
            out.line("");
            out.line("");
            out.line(prototype(function));
            out.indent();
            out.line(if function.has_return_value { "return 0" } else { "pass" });
            out.dedent();
        }
    }
    fn block_close(&self) -> Option<&'static str> {
        None
    }
    fn empty_body(&self) -> Option<&'static str> {
        Some("pass")
    }
    fn declare(&self, name: &str, dimensions: usize) -> String {
        match dimensions {
            0 => format!("{} = 0", name),
            _ => format!("{} = []", name),
        }
    }
    fn alloc(&self, target: &str, dimensions: usize, size: &str) -> String {
        let fill = if dimensions > 1 { "None" } else { "0" };
        format!("{} = [{}] * {}", target, fill, size)
    }
    fn read(&self, targets: &[String]) -> String {
        format!("[{}] = map(int, sys.stdin.readline().split())", targets.join(", "))
    }
    fn print(&self, tag: Option<&str>, values: &[String]) -> String {
        let mut arguments: Vec<String> = tag.map(|t| format!("\"{}\"", t)).into_iter().collect();
        arguments.extend(values.iter().cloned());
        format!("print({})", arguments.join(", "))
    }
    fn flush(&self) -> String {
        "sys.stdout.flush()".into()
    }
    fn exit(&self) -> String {
        "sys.exit(0)".into()
    }
    fn break_statement(&self) -> String {
        "break".into()
    }
    fn return_statement(&self, value: &str) -> String {
        format!("return {}", value)
    }
    fn if_open(&self, condition: &str) -> String {
        format!("if {}:", condition)
    }
    fn else_open(&self) -> String {
        "else:".into()
    }
    fn for_open(&self, index: &str, range: &str) -> String {
        format!("for {} in range({}):", index, range)
    }
    fn loop_open(&self) -> String {
        "while True:".into()
    }
    fn case_open(&self, first: bool, value: &str, labels: &[String]) -> String {
        let condition: Vec<String> = labels.iter().map(|l| format!("{} == {}", value, l)).collect();
        format!("{} {}:", if first { "if" } else { "elif" }, condition.join(" or "))
    }
    fn subscript(&self, array: &str, index: &str) -> String {
        format!("{}[{}]", array, index)
    }
    // Callbacks become local functions defined right before the call.
    fn call(&self, out: &mut Output, call: &RenderedCall) {
        let mut arguments: Vec<String> = call.arguments.iter().map(|(text, _)| text.clone()).collect();
        for callback in &call.callbacks {
            let parameters: Vec<&str> =
                callback.prototype.parameters.iter().map(|p| p.variable.name.as_str()).collect();
            out.line(format!("def {}({}):", callback.prototype.name, parameters.join(", ")));
            out.indent();
            out.splice(&callback.body);
            out.dedent();
            arguments.push(callback.prototype.name.clone());
        }
        let target = match &call.return_target {
            Some(target) => format!("{} = ", target),
            None => String::new(),
        };
        out.line(format!("{}solution.{}({})", target, call.function.name, arguments.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::tests::sample;

    #[test]
    fn skeleton() {
        let text = generate(&sample(), Language::Python, Artifact::Skeleton);
        let expected = "\
import sys

import solution

MAX = 100
n = None
a = None


def main():
    global n, a
    [n] = map(int, sys.stdin.readline().split())
    a = [0] * n
    for i in range(n):
        [a[i]] = map(int, sys.stdin.readline().split())
    r = 0
    def ask(x):
        print(\"ask\", x)
        sys.stdout.flush()
        answer = 0
        [answer] = map(int, sys.stdin.readline().split())
        return answer
    r = solution.solve(n, a, ask)
    print(\"return\")
    sys.stdout.flush()
    print(r)
    sys.stdout.flush()
    c = 0
    [c] = map(int, sys.stdin.readline().split())
    if c == 1:
        print(\"0\")
        sys.stdout.flush()
    elif c == 2 or c == MAX:
        sys.exit(0)


if __name__ == \"__main__\":
    main()
";
        assert_eq!(text, expected);
    }

    #[test]
    fn empty_bodies_get_pass() {
        let interface = InterfaceDefinition::parse(b"main { loop { } }").unwrap();
        let text = generate(&interface, Language::Python, Artifact::Skeleton);
        assert!(text.contains("def main():\n    while True:\n        pass\n"));
    }

    #[test]
    fn template() {
        assert_eq!(
            generate(&sample(), Language::Python, Artifact::Template),
            "MAX = 100\n\n\ndef solve(n, a, ask):\n    return 0\n"
        );
    }
}
