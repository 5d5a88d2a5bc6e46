use crate::codegen::*;
use crate::protocol::ast::*;
use crate::protocol::InterfaceDefinition;

pub struct Cpp;

fn pointers(dimensions: usize) -> String {
    "*".repeat(dimensions)
}

fn callback_parameter(callback: &CallbackPrototype) -> String {
    let parameters = vec!["int"; callback.parameters.len()];
    format!("{} (*{})({})", return_type(callback.has_return_value), callback.name, parameters.join(", "))
}

fn return_type(has_return_value: bool) -> &'static str {
    if has_return_value {
        "int"
    } else {
        "void"
    }
}

fn prototype(function: &FunctionPrototype, interface: &InterfaceDefinition) -> String {
    let mut parameters: Vec<String> = function
        .parameters
        .iter()
        .map(|p| format!("int {}{}", pointers(p.dimensions), p.variable.name))
        .collect();
    for name in &function.callbacks {
        if let Some(callback) = interface.signature.callback(name) {
            parameters.push(callback_parameter(callback));
        }
    }
    format!("{} {}({})", return_type(function.has_return_value), function.name, parameters.join(", "))
}

fn constants(out: &mut Output, interface: &InterfaceDefinition) {
    for (name, value) in &interface.signature.constants {
        out.line(format!("static const int {} = {};", name, value));
    }
}

fn lambda(callback: &CallbackPrototype) -> String {
    let parameters: Vec<String> = callback.parameters.iter().map(|p| format!("int {}", p.variable.name)).collect();
    let returns = if callback.has_return_value { " -> int" } else { "" };
    format!("[]({}){}", parameters.join(", "), returns)
}

impl Backend for Cpp {
    fn skeleton_header(&self, out: &mut Output, interface: &InterfaceDefinition) {
        out.line("#include <cstdio>");
        out.line("#include <cstdlib>");
        out.line("");
        constants(out, interface);
        for declaration in interface.signature.variables.values() {
            out.line(format!("static int {}{};", pointers(declaration.dimensions), declaration.variable.name));
        }
        out.line("");
        for function in interface.signature.functions.values() {
            out.line(format!("{};", prototype(function, interface)));
        }
        out.line("");
    }
    fn main_open(&self, out: &mut Output, _interface: &InterfaceDefinition) {
        out.line("int main() {");
    }
    fn main_close(&self, out: &mut Output) {
        out.line("}");
    }
    fn template(&self, out: &mut Output, interface: &InterfaceDefinition) {
        constants(out, interface);
        for function in interface.signature.functions.values() {
            out.line("");
            out.line(format!("{} {{", prototype(function, interface)));
            out.indent();
            if function.has_return_value {
                out.line("return 0;");
            }
            out.dedent();
            out.line("}");
        }
    }
    fn block_close(&self) -> Option<&'static str> {
        Some("}")
    }
    fn declare(&self, name: &str, dimensions: usize) -> String {
        format!("int {}{};", pointers(dimensions), name)
    }
    fn alloc(&self, target: &str, dimensions: usize, size: &str) -> String {
        format!("{} = new int{}[{}]();", target, pointers(dimensions.saturating_sub(1)), size)
    }
    fn read(&self, targets: &[String]) -> String {
        let format = "%d".repeat(targets.len());
        let targets: Vec<String> = targets.iter().map(|t| format!("&{}", t)).collect();
        format!("scanf(\"{}\", {});", format, targets.join(", "))
    }
    fn print(&self, tag: Option<&str>, values: &[String]) -> String {
        let mut format: Vec<&str> = tag.into_iter().collect();
        format.extend(values.iter().map(|_| "%d"));
        let mut line = format!("printf(\"{}\\n\"", format.join(" "));
        for value in values {
            line.push_str(", ");
            line.push_str(value);
        }
        line.push_str(");");
        line
    }
    fn flush(&self) -> String {
        "fflush(stdout);".into()
    }
    fn exit(&self) -> String {
        "exit(0);".into()
    }
    fn break_statement(&self) -> String {
        "break;".into()
    }
    fn return_statement(&self, value: &str) -> String {
        format!("return {};", value)
    }
    fn if_open(&self, condition: &str) -> String {
        format!("if ({}) {{", condition)
    }
    fn else_open(&self) -> String {
        "} else {".into()
    }
    fn for_open(&self, index: &str, range: &str) -> String {
        format!("for (int {i} = 0; {i} < {r}; {i}++) {{", i = index, r = range)
    }
    fn loop_open(&self) -> String {
        "while (true) {".into()
    }
    fn case_open(&self, first: bool, value: &str, labels: &[String]) -> String {
        let condition: Vec<String> = labels.iter().map(|l| format!("{} == {}", value, l)).collect();
        if first {
            format!("if ({}) {{", condition.join(" || "))
        } else {
            format!("}} else if ({}) {{", condition.join(" || "))
        }
    }
    fn subscript(&self, array: &str, index: &str) -> String {
        format!("{}[{}]", array, index)
    }
    fn call(&self, out: &mut Output, call: &RenderedCall) {
        let mut head = match &call.return_target {
            Some(target) => format!("{} = ", target),
            None => String::new(),
        };
        let arguments: Vec<&str> = call.arguments.iter().map(|(text, _)| text.as_str()).collect();
        head.push_str(&format!("{}({}", call.function.name, arguments.join(", ")));
        if call.callbacks.is_empty() {
            out.line(format!("{});", head));
            return;
        }
        for (i, callback) in call.callbacks.iter().enumerate() {
            if i == 0 {
                let separator = if arguments.is_empty() { "" } else { ", " };
                out.line(format!("{}{}{} {{", head, separator, lambda(callback.prototype)));
            } else {
                out.line(format!("}}, {} {{", lambda(callback.prototype)));
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
    fn skeleton() {
        let text = generate(&sample(), Language::Cpp, Artifact::Skeleton);
        let expected = "\
#include <cstdio>
#include <cstdlib>

static const int MAX = 100;
static int n;
static int *a;

int solve(int n, int *a, int (*ask)(int));

int main() {
    scanf(\"%d\", &n);
    a = new int[n]();
    for (int i = 0; i < n; i++) {
        scanf(\"%d\", &a[i]);
    }
    int r;
    r = solve(n, a, [](int x) -> int {
        printf(\"ask %d\\n\", x);
        fflush(stdout);
        int answer;
        scanf(\"%d\", &answer);
        return answer;
    });
    printf(\"return\\n\");
    fflush(stdout);
    printf(\"%d\\n\", r);
    fflush(stdout);
    int c;
    scanf(\"%d\", &c);
    if (c == 1) {
        printf(\"0\\n\");
        fflush(stdout);
    } else if (c == 2 || c == MAX) {
        exit(0);
    }
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn template() {
        let text = generate(&sample(), Language::Cpp, Artifact::Template);
        assert_eq!(
            text,
            "static const int MAX = 100;\n\nint solve(int n, int *a, int (*ask)(int)) {\n    return 0;\n}\n"
        );
    }

    #[test]
    fn allocations_are_zeroed() {
        assert_eq!(Cpp.alloc("a", 1, "n"), "a = new int[n]();");
        assert_eq!(Cpp.alloc("m", 2, "n"), "m = new int*[n]();");
        assert_eq!(Cpp.alloc("m[i]", 1, "k"), "m[i] = new int[k]();");
    }
}
