pub mod ast;
pub mod compiler;
pub mod diagnostics;
pub mod eval;
pub mod expressions;
pub mod inputsource;
mod lexer;
pub mod messages;
pub mod syntax;
pub mod variables;

use std::fmt;
use std::io;

use crate::common::*;
use crate::protocol::ast::*;
use crate::protocol::compiler::*;
use crate::protocol::diagnostics::CompileError;
use crate::protocol::eval::RunOutcome;
use crate::protocol::inputsource::*;
use crate::protocol::messages::Connection;
use crate::runtime::errors::InterfaceError;

/// A parsed and compiled interface, ready to be run or rendered.
pub struct InterfaceDefinition {
    pub heap: Heap,
    pub root: BlockId,
    pub main: BlockId,
    pub signature: InterfaceSignature,
    source: InputSource,
}

/// Why an interface could not be loaded.
#[derive(Debug, Clone)]
pub enum DefinitionError {
    Io(String),
    Parse(ParseError),
    Compile(CompileError),
}

impl fmt::Debug for InterfaceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Interface({})", self.source.filename())
    }
}

impl InterfaceDefinition {
    pub fn compile(mut source: InputSource, options: CompileOptions) -> Result<Self, DefinitionError> {
        let pristine = source.clone();
        let unit = lexer::parse(&mut source).map_err(DefinitionError::Parse)?;
        let Compiled { heap, root, main, signature } =
            compile(&unit, options).map_err(DefinitionError::Compile)?;
        log::debug!(
            "compiled interface with {} functions and {} callbacks",
            signature.functions.len(),
            signature.callbacks.len()
        );
        Ok(InterfaceDefinition { heap, root, main, signature, source: pristine })
    }
    /// Compiles `buffer`, rendering any failure with the offending lines.
    pub fn parse(buffer: &[u8]) -> Result<Self, String> {
        let source = InputSource::from_buffer(buffer).map_err(|e| e.to_string())?;
        let pristine = source.clone();
        InterfaceDefinition::compile(source, CompileOptions::default()).map_err(|err| err.render(&pristine))
    }
    /// Load-time entry point: stops at the first problem.
    pub fn load(path: &Path) -> Result<Self, DefinitionError> {
        let source = InputSource::from_file(path).map_err(|e| DefinitionError::Io(e.to_string()))?;
        InterfaceDefinition::compile(source, CompileOptions { fail_fast: true })
    }
    pub fn source(&self) -> &InputSource {
        &self.source
    }
    /// The calls `main` may issue first.
    pub fn first_calls(&self) -> &FirstCalls {
        &self.heap[self.main].first_calls
    }
    pub fn run(&self, connection: Connection) -> Result<RunOutcome, InterfaceError> {
        eval::run(self, connection)
    }
}

impl DefinitionError {
    pub fn render(&self, source: &InputSource) -> String {
        let mut out: Vec<u8> = Vec::new();
        let written = match self {
            DefinitionError::Io(message) => {
                out.extend_from_slice(message.as_bytes());
                Ok(())
            }
            DefinitionError::Parse(err) => err.write(source, &mut out),
            DefinitionError::Compile(err) => err.write(source, &mut out),
        };
        match written {
            Ok(()) => String::from_utf8_lossy(&out).into_owned(),
            Err(_) => self.to_string(),
        }
    }
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DefinitionError::Io(message) => write!(f, "cannot read interface: {}", message),
            DefinitionError::Parse(err) => write!(f, "{}", err),
            DefinitionError::Compile(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for DefinitionError {}

impl From<DefinitionError> for io::Error {
    fn from(e: DefinitionError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    extern crate test_generator;

    use std::fs;

    use test_generator::test_resources;

    use super::*;

    #[test_resources("testdata/compile/positive/*.ifc")]
    fn positive(resource: &str) {
        let path = Path::new(resource);
        let source = InputSource::from_file(path).unwrap();
        let pristine = source.clone();
        match InterfaceDefinition::compile(source, CompileOptions::default()) {
            Ok(interface) => assert!(!interface.first_calls().is_empty()),
            Err(err) => {
                println!("{}", err.render(&pristine));
                assert!(false);
            }
        }
    }

    #[test_resources("testdata/compile/negative/*.ifc")]
    fn negative(resource: &str) {
        let path = Path::new(resource);
        let expect = fs::read_to_string(path.with_extension("txt")).unwrap();
        let source = InputSource::from_file(path).unwrap();
        let pristine = source.clone();
        match InterfaceDefinition::compile(source, CompileOptions::default()) {
            Ok(interface) => {
                println!("{:?}", interface);
                println!("Expected compile error:\n{}", expect);
                assert!(false);
            }
            Err(err) => {
                let rendered = err.render(&pristine);
                println!("{}", rendered);
                assert_eq!(rendered, expect);
            }
        }
    }

    #[test]
    fn load_stops_at_the_first_problem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ifc");
        fs::write(&path, "main { input x; input y; }\n").unwrap();
        assert_let![Err(DefinitionError::Compile(err)) = InterfaceDefinition::load(&path) => {
            assert_eq!(err.diagnostics.len(), 1);
        }];
        assert_let![Err(DefinitionError::Io(_)) = InterfaceDefinition::load(&dir.path().join("missing.ifc")) => {}];
    }

    #[test]
    fn parse_renders_errors() {
        let message = InterfaceDefinition::parse(b"main { input; }").unwrap_err();
        assert!(message.starts_with("Parse error at 1:"), "{}", message);
        assert!(message.ends_with("^\n"));
    }
}
