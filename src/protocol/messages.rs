//! Line-oriented messages between the driver, the engine and the process.
//!
//! Requests and responses travel between the driver and the PREFLIGHT
//! phase; the downward and upward streams connect the RUN phase with the
//! sandboxed process. Every message is one line of whitespace-separated
//! tokens.

use std::fmt;
use std::io::{self, BufRead, BufReader, Cursor, Write};

use crate::common::*;
use crate::protocol::expressions::Value;
use crate::runtime::errors::InterfaceError;

/// Integer payload of a request, consumed front to back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    values: VecDeque<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    MainBegin(Tokens),
    FunctionCall { name: String, arguments: Tokens },
    CallbackReturn(i64),
    Exit,
    MainEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Callback { index: usize, arguments: Vec<i64> },
    Return(Option<i64>),
}

pub struct RequestReader {
    input: Box<dyn BufRead + Send>,
    peeked: Option<Request>,
}

/// The four streams an engine run talks over.
pub struct Connection {
    pub requests: Box<dyn BufRead + Send>,
    pub responses: Box<dyn Write + Send>,
    pub downward: Box<dyn Write + Send>,
    pub upward: Box<dyn BufRead + Send>,
}

/// A `Write` sink that can be inspected after being moved into a run.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

/// What an in-memory run wrote.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub responses: SharedBuffer,
    pub downward: SharedBuffer,
}

impl Tokens {
    pub fn new<I: IntoIterator<Item = i64>>(values: I) -> Self {
        Tokens { values: values.into_iter().collect() }
    }
    fn parse<'a, I: Iterator<Item = &'a str>>(words: I, line: &str) -> Result<Self, InterfaceError> {
        let mut values = VecDeque::new();
        for word in words {
            values.push_back(word.parse().map_err(|_| InterfaceError::malformed("request", line))?);
        }
        Ok(Tokens { values })
    }
    pub fn next_int(&mut self) -> Result<i64, InterfaceError> {
        self.values.pop_front().ok_or_else(|| InterfaceError::malformed("request", "missing value"))
    }
    /// A value of the given rank: a scalar, or a length followed by elements.
    pub fn next_value(&mut self, dimensions: usize) -> Result<Value, InterfaceError> {
        if dimensions == 0 {
            return Ok(Value::Int(self.next_int()?));
        }
        let length = self.next_int()?;
        // every element takes at least one token
        if length < 0 || length > self.values.len() as i64 {
            return Err(InterfaceError::malformed("array length", length));
        }
        let mut items = Vec::with_capacity(length as usize);
        for _ in 0..length {
            items.push(self.next_value(dimensions - 1)?);
        }
        Ok(Value::Array(items))
    }
    pub fn finish(self) -> Result<(), InterfaceError> {
        if self.values.is_empty() {
            Ok(())
        } else {
            Err(InterfaceError::malformed("request", format!("{} extra values", self.values.len())))
        }
    }
}

impl Request {
    pub fn parse(line: &str) -> Result<Request, InterfaceError> {
        let mut words = line.split_whitespace();
        let request = match words.next() {
            Some("main_begin") => Request::MainBegin(Tokens::parse(words, line)?),
            Some("function_call") => {
                let name = words.next().ok_or_else(|| InterfaceError::malformed("request", line))?;
                Request::FunctionCall { name: name.to_owned(), arguments: Tokens::parse(words, line)? }
            }
            Some("callback_return") => {
                let mut tokens = Tokens::parse(words, line)?;
                let value = tokens.next_int()?;
                tokens.finish()?;
                Request::CallbackReturn(value)
            }
            Some("exit") => Request::Exit,
            Some("main_end") => Request::MainEnd,
            _ => return Err(InterfaceError::malformed("request", line)),
        };
        Ok(request)
    }
    /// What this request is about to do, for branch resolution.
    pub fn call_token(&self) -> Option<CallToken> {
        match self {
            Request::FunctionCall { name, .. } => Some(CallToken::function(name.clone())),
            Request::Exit => Some(CallToken::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Request::MainBegin(_) => write!(f, "main_begin"),
            Request::FunctionCall { name, .. } => write!(f, "function_call {}", name),
            Request::CallbackReturn(value) => write!(f, "callback_return {}", value),
            Request::Exit => write!(f, "exit"),
            Request::MainEnd => write!(f, "main_end"),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Response::Callback { index, arguments } => {
                write!(f, "1 {}", index)?;
                for argument in arguments {
                    write!(f, " {}", argument)?;
                }
                Ok(())
            }
            Response::Return(Some(value)) => write!(f, "0 1 {}", value),
            Response::Return(None) => write!(f, "0 0"),
        }
    }
}

impl RequestReader {
    pub fn new(input: Box<dyn BufRead + Send>) -> Self {
        RequestReader { input, peeked: None }
    }
    fn read(&mut self) -> Result<Request, InterfaceError> {
        loop {
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(InterfaceError::Disconnected("a request".into()));
            }
            if !line.trim().is_empty() {
                return Request::parse(line.trim());
            }
        }
    }
    pub fn peek(&mut self) -> Result<&Request, InterfaceError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.read()?);
        }
        match &self.peeked {
            Some(request) => Ok(request),
            None => Err(InterfaceError::Disconnected("a request".into())),
        }
    }
    pub fn peek_token(&mut self) -> Result<Option<CallToken>, InterfaceError> {
        Ok(self.peek()?.call_token())
    }
    pub fn next(&mut self) -> Result<Request, InterfaceError> {
        match self.peeked.take() {
            Some(request) => Ok(request),
            None => self.read(),
        }
    }
}

/// Parses one line of whitespace-separated integers.
pub fn parse_ints(line: &str, what: &str) -> Result<Vec<i64>, InterfaceError> {
    line.split_whitespace()
        .map(|word| word.parse().map_err(|_| InterfaceError::malformed(what, line.trim())))
        .collect()
}

pub fn write_line<W: Write + ?Sized, T: fmt::Display>(writer: &mut W, line: T) -> io::Result<()> {
    writeln!(writer, "{}", line)?;
    writer.flush()
}

impl Connection {
    pub fn new(
        requests: Box<dyn BufRead + Send>,
        responses: Box<dyn Write + Send>,
        downward: Box<dyn Write + Send>,
        upward: Box<dyn BufRead + Send>,
    ) -> Self {
        Connection { requests, responses, downward, upward }
    }
    /// A connection over fixed request and upward text, capturing what the
    /// engine writes.
    pub fn in_memory(requests: &str, upward: &str) -> (Connection, Transcript) {
        let transcript = Transcript::default();
        let connection = Connection::new(
            Box::new(Cursor::new(requests.as_bytes().to_vec())),
            Box::new(transcript.responses.clone()),
            Box::new(transcript.downward.clone()),
            Box::new(BufReader::new(Cursor::new(upward.as_bytes().to_vec()))),
        );
        (connection, transcript)
    }
}

impl SharedBuffer {
    pub fn text(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests() {
        let mut reader = RequestReader::new(Box::new(Cursor::new(
            "main_begin 2 3 1 2 3\n\nfunction_call solve 5 1 0\ncallback_return -4\nexit\n".as_bytes(),
        )));
        assert_let![Request::MainBegin(mut tokens) = reader.next().unwrap() => {
            assert_eq!(tokens.next_int().unwrap(), 2);
            assert_eq!(
                tokens.next_value(1).unwrap(),
                Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
            );
            tokens.finish().unwrap();
        }];
        assert_eq!(reader.peek_token().unwrap(), Some(CallToken::function("solve")));
        assert_eq!(reader.peek_token().unwrap(), Some(CallToken::function("solve")));
        assert_let![Request::FunctionCall { name, mut arguments } = reader.next().unwrap() => {
            assert_eq!(name, "solve");
            assert_eq!(arguments.next_int().unwrap(), 5);
            assert!(arguments.clone().finish().is_err());
        }];
        assert_eq!(reader.next().unwrap(), Request::CallbackReturn(-4));
        assert_eq!(reader.peek_token().unwrap(), Some(CallToken::Exit));
        assert_eq!(reader.next().unwrap(), Request::Exit);
        assert_eq!(reader.next(), Err(InterfaceError::Disconnected("a request".into())));
    }

    #[test]
    fn malformed_requests() {
        assert!(Request::parse("function_call").is_err());
        assert!(Request::parse("main_begin x").is_err());
        assert!(Request::parse("callback_return 1 2").is_err());
        assert!(Request::parse("hello").is_err());

        let mut tokens = Tokens::new(vec![i64::MAX]);
        assert_eq!(tokens.next_value(1), Err(InterfaceError::malformed("array length", i64::MAX)));
        let mut tokens = Tokens::new(vec![3, 1, 2]);
        assert_eq!(tokens.next_value(1), Err(InterfaceError::malformed("array length", 3)));
        let mut tokens = Tokens::new(vec![2, 1, 5, 3, 6]);
        assert!(tokens.next_value(2).is_err());
    }

    #[test]
    fn responses() {
        let rendered: Vec<String> = vec![
            Response::Callback { index: 1, arguments: vec![7, 8] },
            Response::Return(Some(42)),
            Response::Return(None),
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        assert_eq!(rendered, vec!["1 1 7 8", "0 1 42", "0 0"]);
    }

    #[test]
    fn in_memory_connection() {
        let (mut connection, transcript) = Connection::in_memory("exit\n", "3 4\n");
        write_line(&mut connection.downward, "1 2").unwrap();
        let mut line = String::new();
        connection.upward.read_line(&mut line).unwrap();
        assert_eq!(parse_ints(&line, "output").unwrap(), vec![3, 4]);
        assert_eq!(transcript.downward.text(), "1 2\n");
        assert!(parse_ints("3 x", "output").is_err());
    }
}
