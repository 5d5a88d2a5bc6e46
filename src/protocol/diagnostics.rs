use std::fmt;
use std::io;

use derive_more::Display;

use crate::protocol::inputsource::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display)]
pub enum DiagnosticKind {
    #[display(fmt = "VARIABLE_NOT_DECLARED")]
    VariableNotDeclared,
    #[display(fmt = "VARIABLE_ALREADY_DECLARED")]
    VariableAlreadyDeclared,
    #[display(fmt = "UNEXPECTED_ARRAY_INDEX")]
    UnexpectedArrayIndex,
    #[display(fmt = "WRONG_ARRAY_INDEX")]
    WrongArrayIndex,
    #[display(fmt = "NOT_AN_ARRAY")]
    NotAnArray,
    #[display(fmt = "EXPECTED_SCALAR")]
    ExpectedScalar,
    #[display(fmt = "EXPECTED_REFERENCE")]
    ExpectedReference,
    #[display(fmt = "FUNCTION_NOT_DECLARED")]
    FunctionNotDeclared,
    #[display(fmt = "FUNCTION_ALREADY_DECLARED")]
    FunctionAlreadyDeclared,
    #[display(fmt = "CALLBACK_NOT_DECLARED")]
    CallbackNotDeclared,
    #[display(fmt = "CALLBACK_ALREADY_DECLARED")]
    CallbackAlreadyDeclared,
    #[display(fmt = "CALLBACK_PARAMETER_NOT_SCALAR")]
    CallbackParameterNotScalar,
    #[display(fmt = "WRONG_NUMBER_OF_ARGUMENTS")]
    WrongNumberOfArguments,
    #[display(fmt = "WRONG_ARGUMENT_DIMENSIONS")]
    WrongArgumentDimensions,
    #[display(fmt = "CALL_RETURN_VALUE_MISSING")]
    CallReturnValueMissing,
    #[display(fmt = "CALL_UNEXPECTED_RETURN_VALUE")]
    CallUnexpectedReturnValue,
    #[display(fmt = "MAIN_NOT_DEFINED")]
    MainNotDefined,
    #[display(fmt = "MAIN_ALREADY_DEFINED")]
    MainAlreadyDefined,
    #[display(fmt = "UNEXPECTED_BREAK")]
    UnexpectedBreak,
    #[display(fmt = "UNEXPECTED_RETURN")]
    UnexpectedReturn,
    #[display(fmt = "UNEXPECTED_CALL_IN_CALLBACK")]
    UnexpectedCallInCallback,
    #[display(fmt = "MISSING_RETURN")]
    MissingReturn,
    #[display(fmt = "UNEXPECTED_STATEMENT")]
    UnexpectedStatement,
}

/// One problem found while compiling an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub name: String,
    pub position: InputPosition,
    pub message: String,
}

impl Diagnostic {
    pub fn new<N: ToString, M: ToString>(
        kind: DiagnosticKind,
        name: N,
        position: InputPosition,
        message: M,
    ) -> Diagnostic {
        Diagnostic { kind, name: name.to_string(), position, message: message.to_string() }
    }
    pub fn write<A: io::Write>(&self, source: &InputSource, writer: &mut A) -> io::Result<()> {
        writeln!(writer, "{}", self)?;
        write_caret(writer, source.line_text(self.position.line), self.position.column)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}: {}", self.position, self.kind, self.message)
    }
}

/// All diagnostics of a failed compilation, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    pub fn new(mut diagnostics: Vec<Diagnostic>) -> CompileError {
        diagnostics.sort_by_key(|d| (d.position.line, d.position.column));
        CompileError { diagnostics }
    }
    pub fn kinds(&self) -> Vec<DiagnosticKind> {
        self.diagnostics.iter().map(|d| d.kind).collect()
    }
    /// Renders every diagnostic with the offending source line underneath.
    pub fn write<A: io::Write>(&self, source: &InputSource, writer: &mut A) -> io::Result<()> {
        for diagnostic in &self.diagnostics {
            diagnostic.write(source, writer)?;
        }
        Ok(())
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for diagnostic in &self.diagnostics {
            writeln!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering() {
        let source = InputSource::from_string("main {\n    input x;\n}\n").unwrap();
        let error = CompileError::new(vec![
            Diagnostic::new(
                DiagnosticKind::MissingReturn,
                "f",
                InputPosition::new(3, 1),
                "callback 'f' must return a value",
            ),
            Diagnostic::new(
                DiagnosticKind::VariableNotDeclared,
                "x",
                InputPosition::new(2, 11),
                "variable 'x' not declared",
            ),
        ]);
        assert_eq!(
            error.to_string(),
            "2:11: VARIABLE_NOT_DECLARED: variable 'x' not declared\n\
             3:1: MISSING_RETURN: callback 'f' must return a value\n"
        );
        let mut out = Vec::new();
        error.diagnostics[0].write(&source, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "2:11: VARIABLE_NOT_DECLARED: variable 'x' not declared\n    input x;\n          ^\n"
        );
    }
}
