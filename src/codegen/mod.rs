//! Source generators for the process side of an interface.
//!
//! A `Generator` walks the compiled tree once and asks a `Backend` for the
//! target syntax of every construct. The skeleton it produces is the glue
//! program that talks to the engine over stdin/stdout and calls into the
//! candidate's solution; the template is an empty solution to start from.

pub mod cpp;
pub mod python;
pub mod rust;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::protocol::ast::*;
use crate::protocol::InterfaceDefinition;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[display(fmt = "cpp")]
    Cpp,
    #[display(fmt = "rust")]
    Rust,
    #[display(fmt = "python")]
    Python,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Artifact {
    Skeleton,
    Template,
}

/// Indented line buffer.
#[derive(Debug, Clone)]
pub struct Output {
    lines: Vec<String>,
    level: usize,
    unit: &'static str,
}

/// A callback argument, already rendered at indentation level zero.
pub struct RenderedCallback<'a> {
    pub prototype: &'a CallbackPrototype,
    pub body: Vec<String>,
}

pub struct RenderedCall<'a> {
    pub function: &'a FunctionPrototype,
    pub return_target: Option<String>,
    pub arguments: Vec<(String, usize)>, // text, dimensions
    pub callbacks: Vec<RenderedCallback<'a>>,
}

/// Target syntax. Statement-level methods return one line of code.
pub trait Backend {
    fn skeleton_header(&self, out: &mut Output, interface: &InterfaceDefinition);
    fn main_open(&self, out: &mut Output, interface: &InterfaceDefinition);
    fn main_close(&self, out: &mut Output);
    fn template(&self, out: &mut Output, interface: &InterfaceDefinition);
    /// Line closing a compound statement, if the language has one.
    fn block_close(&self) -> Option<&'static str>;
    /// Statement standing in for an empty body, where one is required.
    fn empty_body(&self) -> Option<&'static str> {
        None
    }

    fn declare(&self, name: &str, dimensions: usize) -> String;
    fn alloc(&self, target: &str, dimensions: usize, size: &str) -> String;
    fn read(&self, targets: &[String]) -> String;
    fn print(&self, tag: Option<&str>, values: &[String]) -> String;
    fn flush(&self) -> String;
    fn exit(&self) -> String;
    fn break_statement(&self) -> String;
    fn return_statement(&self, value: &str) -> String;
    fn if_open(&self, condition: &str) -> String;
    fn else_open(&self) -> String;
    fn for_open(&self, index: &str, range: &str) -> String;
    fn loop_open(&self) -> String;
    fn case_open(&self, first: bool, value: &str, labels: &[String]) -> String;
    fn subscript(&self, array: &str, index: &str) -> String;
    fn call(&self, out: &mut Output, call: &RenderedCall);
}

impl Language {
    pub fn from_name(name: &str) -> Option<Language> {
        match name {
            "cpp" | "c++" => Some(Language::Cpp),
            "rust" => Some(Language::Rust),
            "python" | "python3" => Some(Language::Python),
            _ => None,
        }
    }
    /// File name the candidate's source is stored under.
    pub fn solution_file(self) -> &'static str {
        match self {
            Language::Cpp => "solution.cpp",
            Language::Rust => "solution.rs",
            Language::Python => "solution.py",
        }
    }
    pub fn skeleton_file(self) -> &'static str {
        match self {
            Language::Cpp => "skeleton.cpp",
            Language::Rust => "main.rs",
            Language::Python => "skeleton.py",
        }
    }
    fn backend(self) -> Box<dyn Backend> {
        match self {
            Language::Cpp => Box::new(cpp::Cpp),
            Language::Rust => Box::new(rust::Rust),
            Language::Python => Box::new(python::Python),
        }
    }
}

pub fn generate(interface: &InterfaceDefinition, language: Language, artifact: Artifact) -> String {
    let backend = language.backend();
    let mut out = Output::new("    ");
    match artifact {
        Artifact::Skeleton => {
            backend.skeleton_header(&mut out, interface);
            backend.main_open(&mut out, interface);
            out.indent();
            let mut generator = Generator { h: &interface.heap, interface, backend: &*backend, out };
            generator.block(interface.main);
            out = generator.out;
            out.dedent();
            backend.main_close(&mut out);
        }
        Artifact::Template => backend.template(&mut out, interface),
    }
    out.finish()
}

pub fn skeleton(interface: &InterfaceDefinition, language: Language) -> String {
    generate(interface, language, Artifact::Skeleton)
}

pub fn template(interface: &InterfaceDefinition, language: Language) -> String {
    generate(interface, language, Artifact::Template)
}

impl Output {
    pub fn new(unit: &'static str) -> Self {
        Output { lines: Vec::new(), level: 0, unit }
    }
    pub fn line<S: AsRef<str>>(&mut self, text: S) {
        let text = text.as_ref();
        if text.is_empty() {
            self.lines.push(String::new());
        } else {
            self.lines.push(format!("{}{}", self.unit.repeat(self.level), text));
        }
    }
    /// Appends lines rendered elsewhere, shifted to the current level.
    pub fn splice(&mut self, lines: &[String]) {
        for line in lines {
            self.line(line);
        }
    }
    pub fn indent(&mut self) {
        self.level += 1;
    }
    pub fn dedent(&mut self) {
        self.level = self.level.saturating_sub(1);
    }
    fn nested(&self) -> Output {
        Output::new(self.unit)
    }
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
    pub fn finish(self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

struct Generator<'a> {
    h: &'a Heap,
    interface: &'a InterfaceDefinition,
    backend: &'a dyn Backend,
    out: Output,
}

impl<'a> Generator<'a> {
    fn expression(&self, e: ExpressionId) -> String {
        match &self.h[e] {
            Expression::IntLiteral(literal) => match &literal.constant {
                Some(name) => name.clone(),
                None => literal.value.to_string(),
            },
            Expression::Reference(reference) => reference.variable.name.clone(),
            Expression::Subscript(subscript) => {
                self.backend.subscript(&self.expression(subscript.array), &self.expression(subscript.index))
            }
        }
    }
    fn expressions(&self, es: &[ExpressionId]) -> Vec<String> {
        es.iter().map(|&e| self.expression(e)).collect()
    }
    fn close(&mut self) {
        if let Some(close) = self.backend.block_close() {
            self.out.line(close);
        }
    }
    fn nested_block(&mut self, open: String, body: BlockId) {
        self.out.line(open);
        self.body(body);
        self.close();
    }

    fn body(&mut self, b: BlockId) {
        let before = self.out.lines.len();
        self.out.indent();
        self.block(b);
        if self.out.lines.len() == before {
            if let Some(filler) = self.backend.empty_body() {
                self.out.line(filler);
            }
        }
        self.out.dedent();
    }

    fn block(&mut self, b: BlockId) {
        let h = self.h;
        for &s in &h[b].statements {
            self.statement(s);
        }
    }

    fn statement(&mut self, s: StatementId) {
        let h = self.h;
        let backend = self.backend;
        match &h[s] {
            Statement::Const(_) | Statement::Function(_) | Statement::Callback(_) | Statement::Main(_) => {}
            Statement::Var(v) => {
                for declaration in &v.declarations {
                    self.out.line(backend.declare(&declaration.variable.name, declaration.dimensions));
                }
            }
            Statement::Alloc(a) => {
                let size = self.expression(a.size);
                for (&argument, allocation) in a.arguments.iter().zip(&a.allocations) {
                    let target = self.expression(argument);
                    self.out.line(backend.alloc(&target, allocation.dimensions, &size));
                }
            }
            Statement::Checkpoint(_) => {
                self.out.line(backend.print(Some("0"), &[]));
                self.out.line(backend.flush());
            }
            Statement::Input(i) => {
                let targets = self.expressions(&i.arguments);
                self.out.line(backend.read(&targets));
            }
            Statement::Output(o) => {
                let values = self.expressions(&o.arguments);
                self.out.line(backend.print(None, &values));
            }
            Statement::Flush(_) => self.out.line(backend.flush()),
            Statement::Call(c) => self.call(c),
            Statement::Return(r) => {
                let value = self.expression(r.value);
                self.out.line(backend.return_statement(&value));
            }
            Statement::Exit(_) => self.out.line(backend.exit()),
            Statement::Break(_) => self.out.line(backend.break_statement()),
            Statement::For(f) => {
                let open = backend.for_open(&f.index.name, &self.expression(f.range));
                self.nested_block(open, f.body);
            }
            Statement::Loop(l) => self.nested_block(backend.loop_open(), l.body),
            Statement::If(i) => {
                let open = backend.if_open(&self.expression(i.condition));
                self.out.line(open);
                self.body(i.then_body);
                if let Some(else_body) = i.else_body {
                    self.out.line(backend.else_open());
                    self.body(else_body);
                }
                self.close();
            }
            Statement::Switch(sw) => {
                if sw.cases.is_empty() {
                    return;
                }
                let value = self.expression(sw.value);
                for (i, case) in sw.cases.iter().enumerate() {
                    let labels = self.expressions(&case.labels);
                    self.out.line(backend.case_open(i == 0, &value, &labels));
                    self.body(case.body);
                }
                self.close();
            }
        }
    }

    fn call(&mut self, c: &CallStatement) {
        let h = self.h;
        let interface = self.interface;
        let signature = &interface.signature;
        let function = match signature.function(&c.function) {
            Some(function) => function,
            None => return,
        };
        let mut callbacks = Vec::with_capacity(function.callbacks.len());
        for name in &function.callbacks {
            if let Some(prototype) = signature.callback(name) {
                callbacks.push(RenderedCallback { prototype, body: self.callback_body(prototype) });
            }
        }
        let call = RenderedCall {
            function,
            return_target: c.return_value.map(|e| self.expression(e)),
            arguments: c.arguments.iter().map(|&e| (self.expression(e), h[e].dimensions(h))).collect(),
            callbacks,
        };
        self.backend.call(&mut self.out, &call);
        if function.has_callbacks() {
            self.out.line(self.backend.print(Some("return"), &[]));
            self.out.line(self.backend.flush());
        }
    }

    // Announces the invocation upward, then runs the declared body.
    fn callback_body(&mut self, prototype: &CallbackPrototype) -> Vec<String> {
        let nested = self.out.nested();
        let outer = std::mem::replace(&mut self.out, nested);
        let parameters: Vec<String> = prototype.parameters.iter().map(|p| p.variable.name.clone()).collect();
        self.out.line(self.backend.print(Some(&prototype.name), &parameters));
        self.out.line(self.backend.flush());
        self.block(prototype.body);
        std::mem::replace(&mut self.out, outer).into_lines()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = "
        const MAX = 100;
        var int n;
        var int[] a;
        function solve(int n, int[] a) -> int callbacks ask;
        callback ask(int x) -> int { var int answer; input answer; return answer; }
        main {
            input n;
            alloc a : n;
            for i : n { input a[i]; }
            var int r;
            call r = solve(n, a);
            output r;
            flush;
            var int c;
            input c;
            switch c { case 1 { checkpoint; } case 2, MAX { exit; } }
        }
    ";

    pub(crate) fn sample() -> InterfaceDefinition {
        InterfaceDefinition::parse(SAMPLE.as_bytes()).unwrap()
    }

    #[test]
    fn languages() {
        assert_eq!(Language::from_name("c++"), Some(Language::Cpp));
        assert_eq!(Language::from_name("cobol"), None);
        assert_eq!(Language::Rust.to_string(), "rust");
        assert_eq!(serde_json::from_str::<Language>("\"python\"").unwrap(), Language::Python);
    }

    #[test]
    fn output_indents() {
        let mut out = Output::new("  ");
        out.line("a {");
        out.indent();
        out.splice(&["b;".to_string(), "c;".to_string()]);
        out.dedent();
        out.line("");
        out.line("}");
        assert_eq!(out.finish(), "a {\n  b;\n  c;\n\n}\n");
    }
}
