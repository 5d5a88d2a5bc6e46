use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use backtrace::Backtrace;
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct InputSource {
    filename: String,
    input: Vec<u8>,
    line: usize,
    column: usize,
    offset: usize,
}

impl InputSource {
    // Constructors
    pub fn new<R: io::Read, S: ToString>(filename: S, reader: &mut R) -> io::Result<InputSource> {
        let mut vec = Vec::new();
        reader.read_to_end(&mut vec)?;
        Ok(InputSource { filename: filename.to_string(), input: vec, line: 1, column: 1, offset: 0 })
    }
    // Constructor helpers
    pub fn from_file(path: &Path) -> io::Result<InputSource> {
        let filename = path.file_name();
        match filename {
            Some(filename) => {
                let mut f = File::open(path)?;
                InputSource::new(filename.to_string_lossy(), &mut f)
            }
            None => Err(io::Error::new(io::ErrorKind::NotFound, "Invalid path")),
        }
    }
    pub fn from_string(string: &str) -> io::Result<InputSource> {
        let mut bytes = string.as_bytes();
        InputSource::new(String::new(), &mut bytes)
    }
    pub fn from_buffer(buffer: &[u8]) -> io::Result<InputSource> {
        InputSource::new(String::new(), &mut Box::new(buffer))
    }
    pub fn filename(&self) -> &str {
        &self.filename
    }
    // Internal methods
    pub fn pos(&self) -> InputPosition {
        InputPosition { line: self.line, column: self.column, offset: self.offset }
    }
    pub fn error<S: ToString>(&self, message: S) -> ParseError {
        self.pos().parse_error(message)
    }
    pub fn is_eof(&self) -> bool {
        self.next() == None
    }
    pub fn next(&self) -> Option<u8> {
        if self.offset < self.input.len() {
            Some(self.input[self.offset])
        } else {
            None
        }
    }
    pub fn lookahead(&self, pos: usize) -> Option<u8> {
        if let Some(x) = usize::checked_add(self.offset, pos) {
            if x < self.input.len() {
                return Some(self.input[x]);
            }
        }
        None
    }
    pub fn consume(&mut self) {
        match self.next() {
            Some(x) if x == b'\r' && self.lookahead(1) != Some(b'\n') || x == b'\n' => {
                self.line += 1;
                self.offset += 1;
                self.column = 1;
            }
            Some(_) => {
                self.offset += 1;
                self.column += 1;
            }
            None => {}
        }
    }
    /// The full text of the given (1-based) line, without its terminator.
    pub fn line_text(&self, line: usize) -> &[u8] {
        self.input
            .split(|&c| c == b'\n')
            .nth(line.saturating_sub(1))
            .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
            .unwrap_or(&[])
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.pos().fmt(f)
    }
}

/// A location in interface source text. External parsers only need to
/// supply `line` and `column`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputPosition {
    pub line: usize,
    pub column: usize,
    #[serde(default, skip_serializing)]
    pub offset: usize,
}

impl InputPosition {
    pub fn new(line: usize, column: usize) -> InputPosition {
        InputPosition { line, column, offset: 0 }
    }
    fn context<'a>(&self, source: &'a InputSource) -> &'a [u8] {
        source.line_text(self.line)
    }
    fn parse_error<S: ToString>(&self, message: S) -> ParseError {
        ParseError { position: *self, message: message.to_string(), backtrace: Backtrace::new() }
    }
}

impl fmt::Display for InputPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Anything in a (raw or compiled) tree that remembers where it came from.
pub trait SyntaxElement {
    fn position(&self) -> InputPosition;
}

// Writes the offending line and a caret under the given column.
pub(crate) fn write_caret<A: io::Write>(
    writer: &mut A,
    line: &[u8],
    column: usize,
) -> io::Result<()> {
    writeln!(writer, "{}", String::from_utf8_lossy(line))?;
    let mut arrow: Vec<u8> = Vec::new();
    for pos in 1..column {
        match line.get(pos - 1) {
            Some(b'\t') => arrow.push(b'\t'),
            _ => arrow.push(b' '),
        }
    }
    arrow.push(b'^');
    writeln!(writer, "{}", String::from_utf8_lossy(&arrow))
}

#[derive(Debug, Clone)]
pub struct ParseError {
    position: InputPosition,
    message: String,
    backtrace: Backtrace,
}

impl ParseError {
    pub fn new<S: ToString>(position: InputPosition, message: S) -> ParseError {
        ParseError { position, message: message.to_string(), backtrace: Backtrace::new() }
    }
    pub fn position(&self) -> InputPosition {
        self.position
    }
    pub fn message(&self) -> &str {
        &self.message
    }
    /// Where in the front end the error was raised.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
    // Diagnostic methods
    pub fn write<A: io::Write>(&self, source: &InputSource, writer: &mut A) -> io::Result<()> {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("parse error raised at:\n{:?}", self.backtrace);
        }
        if !source.filename.is_empty() {
            writeln!(
                writer,
                "Parse error at {}:{}: {}",
                source.filename, self.position, self.message
            )?;
        } else {
            writeln!(writer, "Parse error at {}: {}", self.position, self.message)?;
        }
        write_caret(writer, self.position.context(source), self.position.column)
    }
    pub fn display<'a>(&'a self, source: &'a InputSource) -> DisplayParseError<'a> {
        DisplayParseError::new(self, source)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse error at {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for io::Error {
    fn from(e: ParseError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    }
}

#[derive(Clone, Copy)]
pub struct DisplayParseError<'a> {
    error: &'a ParseError,
    source: &'a InputSource,
}

impl DisplayParseError<'_> {
    fn new<'a>(error: &'a ParseError, source: &'a InputSource) -> DisplayParseError<'a> {
        DisplayParseError { error, source }
    }
}

impl fmt::Display for DisplayParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut vec: Vec<u8> = Vec::new();
        if self.error.write(self.source, &mut vec).is_err() {
            return Err(fmt::Error);
        }
        write!(f, "{}", String::from_utf8_lossy(&vec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_string() {
        let mut is = InputSource::from_string("var int n;\n").unwrap();
        assert_eq!(is.input.len(), 11);
        assert_eq!(is.pos(), InputPosition { line: 1, column: 1, offset: 0 });
        assert_eq!(is.next(), Some(b'v'));
        is.consume();
        assert_eq!(is.next(), Some(b'a'));
        assert_eq!(is.lookahead(1), Some(b'r'));
        for _ in 0..3 {
            is.consume();
        }
        {
            let er = is.error("hello world!");
            let mut vec: Vec<u8> = Vec::new();
            er.write(&is, &mut vec).unwrap();
            assert_eq!(
                "Parse error at 1:5: hello world!\nvar int n;\n    ^\n",
                String::from_utf8_lossy(&vec)
            );
        }
        while is.next() != Some(b'\n') {
            is.consume();
        }
        assert_eq!(is.column, 11);
        is.consume();
        assert_eq!(is.line, 2);
        assert_eq!(is.column, 1);
        assert_eq!(b"", is.pos().context(&is));
        assert!(is.is_eof());
        is.consume();
        assert_eq!(is.next(), None);
    }

    #[test]
    fn test_split() {
        let mut is = InputSource::from_string("main {}\n").unwrap();
        let backup = is.clone();
        is.consume();
        is.consume();
        assert_eq!(is.next(), Some(b'i'));
        is = backup;
        assert_eq!(is.next(), Some(b'm'));
    }

    #[test]
    fn test_line_text() {
        let is = InputSource::from_string("a\r\nbc\nd").unwrap();
        assert_eq!(is.line_text(1), b"a");
        assert_eq!(is.line_text(2), b"bc");
        assert_eq!(is.line_text(3), b"d");
        assert_eq!(is.line_text(9), b"");
    }

    #[test]
    fn test_error_rendering() {
        let mut is = InputSource::from_string("main {\n    input x\n}\n").unwrap();
        for _ in 0..11 {
            is.consume();
        }
        let error = is.error("expected ';'");
        assert_eq!(
            error.display(&is).to_string(),
            format!("Parse error at {}: expected ';'\n    input x\n    ^\n", is.pos())
        );
        assert!(!error.backtrace().frames().is_empty());
    }
}
