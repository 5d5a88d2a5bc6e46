use lazy_static::lazy_static;

use crate::common::*;
use crate::protocol::inputsource::*;
use crate::protocol::syntax::*;

const MAX_LEVEL: usize = 64;

lazy_static! {
    static ref RESERVED: HashSet<&'static [u8]> = hashset! {
        &b"const"[..], b"var", b"int", b"function", b"callback", b"callbacks", b"main",
        b"alloc", b"checkpoint", b"input", b"output", b"flush", b"call", b"return",
        b"exit", b"break", b"for", b"if", b"else", b"loop", b"switch", b"case",
    };
}

fn is_vchar(x: Option<u8>) -> bool {
    if let Some(c) = x {
        c >= 0x21 && c <= 0x7E
    } else {
        false
    }
}

fn is_wsp(x: Option<u8>) -> bool {
    if let Some(c) = x {
        c == b' ' || c == b'\t'
    } else {
        false
    }
}

fn is_ident_start(x: Option<u8>) -> bool {
    if let Some(c) = x {
        c >= b'A' && c <= b'Z' || c >= b'a' && c <= b'z' || c == b'_'
    } else {
        false
    }
}

fn is_ident_rest(x: Option<u8>) -> bool {
    if let Some(c) = x {
        c >= b'A' && c <= b'Z' || c >= b'a' && c <= b'z' || c >= b'0' && c <= b'9' || c == b'_'
    } else {
        false
    }
}

fn is_integer_start(x: Option<u8>) -> bool {
    if let Some(c) = x {
        c >= b'0' && c <= b'9' || c == b'-'
    } else {
        false
    }
}

pub struct Lexer<'a> {
    source: &'a mut InputSource,
    level: usize,
}

impl Lexer<'_> {
    pub fn new(source: &mut InputSource) -> Lexer {
        Lexer { source, level: 0 }
    }
    fn consume_line(&mut self) -> Result<(), ParseError> {
        let mut next = self.source.next();
        while next.is_some() && next != Some(b'\n') && next != Some(b'\r') {
            if !(is_vchar(next) || is_wsp(next) || next.map_or(false, |c| c >= 0x80)) {
                return Err(self.source.error("Expected visible character or whitespace"));
            }
            self.source.consume();
            next = self.source.next();
        }
        if next.is_some() {
            self.source.consume();
        }
        if next == Some(b'\r') && self.source.next() == Some(b'\n') {
            self.source.consume();
        }
        Ok(())
    }
    fn consume_whitespace(&mut self) -> Result<(), ParseError> {
        let mut next = self.source.next();
        while next.is_some() {
            if next == Some(b' ')
                || next == Some(b'\t')
                || next == Some(b'\r')
                || next == Some(b'\n')
            {
                self.source.consume();
                next = self.source.next();
                continue;
            }
            if next == Some(b'/') {
                next = self.source.lookahead(1);
                if next == Some(b'/') {
                    self.source.consume(); // slash
                    self.source.consume(); // slash
                    self.consume_line()?;
                    next = self.source.next();
                    continue;
                }
                if next == Some(b'*') {
                    self.source.consume(); // slash
                    self.source.consume(); // star
                    loop {
                        match self.source.next() {
                            None => return Err(self.source.error("Unterminated comment")),
                            Some(b'*') if self.source.lookahead(1) == Some(b'/') => {
                                self.source.consume(); // star
                                self.source.consume(); // slash
                                break;
                            }
                            Some(_) => self.source.consume(),
                        }
                    }
                    next = self.source.next();
                    continue;
                }
            }
            break;
        }
        Ok(())
    }
    fn has_keyword(&self, keyword: &[u8]) -> bool {
        let len = keyword.len();
        for i in 0..len {
            if self.source.lookahead(i) != Some(keyword[i]) {
                return false;
            }
        }
        // Word boundary
        !is_ident_rest(self.source.lookahead(len))
    }
    fn consume_keyword(&mut self, keyword: &[u8]) -> Result<(), ParseError> {
        if !self.has_keyword(keyword) {
            return Err(self
                .source
                .error(format!("Expected keyword: {}", String::from_utf8_lossy(keyword))));
        }
        for _ in 0..keyword.len() {
            self.source.consume();
        }
        Ok(())
    }
    fn has_string(&self, string: &[u8]) -> bool {
        string.iter().enumerate().all(|(i, &c)| self.source.lookahead(i) == Some(c))
    }
    fn consume_string(&mut self, string: &[u8]) -> Result<(), ParseError> {
        if !self.has_string(string) {
            return Err(self.source.error(format!("Expected {}", String::from_utf8_lossy(string))));
        }
        for _ in 0..string.len() {
            self.source.consume();
        }
        Ok(())
    }
    // Consumes `string` and the whitespace after it.
    fn consume_token(&mut self, string: &[u8]) -> Result<(), ParseError> {
        self.consume_string(string)?;
        self.consume_whitespace()
    }

    // Identifiers

    fn has_identifier(&self) -> bool {
        if !is_ident_start(self.source.next()) {
            return false;
        }
        let mut len = 1;
        while is_ident_rest(self.source.lookahead(len)) {
            len += 1;
        }
        let word: Vec<u8> = (0..len).filter_map(|i| self.source.lookahead(i)).collect();
        !RESERVED.contains(&word[..])
    }
    fn consume_name(&mut self) -> Result<Name, ParseError> {
        if !self.has_identifier() {
            return Err(self.source.error("Expected identifier"));
        }
        let position = self.source.pos();
        let mut result = Vec::new();
        while is_ident_rest(self.source.next()) {
            result.extend(self.source.next());
            self.source.consume();
        }
        self.consume_whitespace()?;
        Ok(Name { position, name: String::from_utf8_lossy(&result).into_owned() })
    }
    fn consume_names(&mut self) -> Result<Vec<Name>, ParseError> {
        let mut names = vec![self.consume_name()?];
        while self.has_string(b",") {
            self.consume_token(b",")?;
            names.push(self.consume_name()?);
        }
        Ok(names)
    }

    // Types and parameters

    fn consume_type(&mut self) -> Result<usize, ParseError> {
        self.consume_keyword(b"int")?;
        self.consume_whitespace()?;
        let mut dimensions = 0;
        while self.has_string(b"[") {
            self.consume_token(b"[")?;
            self.consume_token(b"]")?;
            dimensions += 1;
        }
        Ok(dimensions)
    }
    fn consume_parameters(&mut self) -> Result<Vec<RawParameter>, ParseError> {
        let mut params = Vec::new();
        self.consume_token(b"(")?;
        if !self.has_string(b")") {
            loop {
                let position = self.source.pos();
                let dimensions = self.consume_type()?;
                let name = self.consume_name()?.name;
                params.push(RawParameter { position, name, dimensions });
                if self.has_string(b")") {
                    break;
                }
                self.consume_token(b",")?;
            }
        }
        self.consume_token(b")")?;
        Ok(params)
    }
    fn consume_return_type(&mut self) -> Result<bool, ParseError> {
        if self.has_string(b"->") {
            self.consume_token(b"->")?;
            self.consume_keyword(b"int")?;
            self.consume_whitespace()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ====================
    // Expressions
    // ====================

    fn consume_integer(&mut self) -> Result<i64, ParseError> {
        let position = self.source.pos();
        let mut digits = Vec::new();
        if self.has_string(b"-") {
            digits.push(b'-');
            self.source.consume();
        }
        while let Some(c @ b'0'..=b'9') = self.source.next() {
            digits.push(c);
            self.source.consume();
        }
        let value = String::from_utf8_lossy(&digits)
            .parse::<i64>()
            .map_err(|_| ParseError::new(position, "Expected integer literal"))?;
        self.consume_whitespace()?;
        Ok(value)
    }
    pub fn consume_expression(&mut self) -> Result<RawExpression, ParseError> {
        let position = self.source.pos();
        if is_integer_start(self.source.next()) {
            let value = self.consume_integer()?;
            return Ok(RawExpression::IntLiteral { position, value });
        }
        let variable = self.consume_name()?.name;
        let mut result = RawExpression::Reference { position, variable };
        while self.has_string(b"[") {
            if self.level >= MAX_LEVEL {
                return Err(self.source.error("Too deeply nested expression"));
            }
            let subscript_position = self.source.pos();
            self.consume_token(b"[")?;
            self.level += 1;
            let index = self.consume_expression();
            self.level -= 1;
            let index = index?;
            self.consume_token(b"]")?;
            result = RawExpression::Subscript {
                position: subscript_position,
                array: Box::new(result),
                index: Box::new(index),
            };
        }
        Ok(result)
    }
    fn consume_expressions(&mut self) -> Result<Vec<RawExpression>, ParseError> {
        let mut arguments = vec![self.consume_expression()?];
        while self.has_string(b",") {
            self.consume_token(b",")?;
            arguments.push(self.consume_expression()?);
        }
        Ok(arguments)
    }

    // ====================
    // Statements
    // ====================

    fn consume_block(&mut self) -> Result<RawBlock, ParseError> {
        let position = self.source.pos();
        let mut statements = Vec::new();
        self.consume_token(b"{")?;
        while !self.has_string(b"}") {
            if self.source.is_eof() {
                return Err(self.source.error("Expected }"));
            }
            statements.push(self.consume_statement()?);
        }
        self.consume_token(b"}")?;
        Ok(RawBlock { position, statements })
    }
    pub fn consume_statement(&mut self) -> Result<RawStatement, ParseError> {
        if self.level >= MAX_LEVEL {
            return Err(self.source.error("Too deeply nested statement"));
        }
        self.level += 1;
        let result = self.consume_statement_impl();
        self.level -= 1;
        result
    }
    // Consumes a statement keyword, returning the statement's position.
    fn consume_head(&mut self, keyword: &[u8]) -> Result<InputPosition, ParseError> {
        let position = self.source.pos();
        self.consume_keyword(keyword)?;
        self.consume_whitespace()?;
        Ok(position)
    }
    fn consume_end(&mut self) -> Result<(), ParseError> {
        self.consume_token(b";")
    }
    fn consume_statement_impl(&mut self) -> Result<RawStatement, ParseError> {
        use RawStatement::*;
        if self.has_keyword(b"const") {
            let position = self.consume_head(b"const")?;
            let name = self.consume_name()?;
            self.consume_token(b"=")?;
            let value = self.consume_expression()?;
            self.consume_end()?;
            Ok(Const { position, name, value })
        } else if self.has_keyword(b"var") {
            let position = self.consume_head(b"var")?;
            let dimensions = self.consume_type()?;
            let names = self.consume_names()?;
            self.consume_end()?;
            Ok(Var { position, dimensions, names })
        } else if self.has_keyword(b"function") {
            let position = self.consume_head(b"function")?;
            let name = self.consume_name()?;
            let parameters = self.consume_parameters()?;
            let return_value = self.consume_return_type()?;
            let mut callbacks = Vec::new();
            if self.has_keyword(b"callbacks") {
                self.consume_head(b"callbacks")?;
                callbacks = self.consume_names()?;
            }
            self.consume_end()?;
            Ok(Function { position, name, parameters, return_value, callbacks })
        } else if self.has_keyword(b"callback") {
            let position = self.consume_head(b"callback")?;
            let name = self.consume_name()?;
            let parameters = self.consume_parameters()?;
            let return_value = self.consume_return_type()?;
            let body = self.consume_block()?;
            Ok(Callback { position, name, parameters, return_value, body })
        } else if self.has_keyword(b"main") {
            let position = self.consume_head(b"main")?;
            let body = self.consume_block()?;
            Ok(Main { position, body })
        } else if self.has_keyword(b"alloc") {
            let position = self.consume_head(b"alloc")?;
            let arguments = self.consume_expressions()?;
            self.consume_token(b":")?;
            let size = self.consume_expression()?;
            self.consume_end()?;
            Ok(Alloc { position, arguments, size })
        } else if self.has_keyword(b"checkpoint") {
            let position = self.consume_head(b"checkpoint")?;
            self.consume_end()?;
            Ok(Checkpoint { position })
        } else if self.has_keyword(b"input") {
            let position = self.consume_head(b"input")?;
            let arguments = self.consume_expressions()?;
            self.consume_end()?;
            Ok(Input { position, arguments })
        } else if self.has_keyword(b"output") {
            let position = self.consume_head(b"output")?;
            let arguments = self.consume_expressions()?;
            self.consume_end()?;
            Ok(Output { position, arguments })
        } else if self.has_keyword(b"flush") {
            let position = self.consume_head(b"flush")?;
            self.consume_end()?;
            Ok(Flush { position })
        } else if self.has_keyword(b"call") {
            let position = self.consume_head(b"call")?;
            let mut return_value = None;
            let mut function = self.consume_name()?;
            if self.has_string(b"=") || self.has_string(b"[") {
                // `call r = f(..)` or `call r[i] = f(..)`
                let target = self.consume_subscripts(function)?;
                self.consume_token(b"=")?;
                return_value = Some(target);
                function = self.consume_name()?;
            }
            self.consume_token(b"(")?;
            let mut arguments = Vec::new();
            if !self.has_string(b")") {
                arguments = self.consume_expressions()?;
            }
            self.consume_token(b")")?;
            self.consume_end()?;
            Ok(Call { position, function, arguments, return_value })
        } else if self.has_keyword(b"return") {
            let position = self.consume_head(b"return")?;
            let value = self.consume_expression()?;
            self.consume_end()?;
            Ok(Return { position, value })
        } else if self.has_keyword(b"exit") {
            let position = self.consume_head(b"exit")?;
            self.consume_end()?;
            Ok(Exit { position })
        } else if self.has_keyword(b"break") {
            let position = self.consume_head(b"break")?;
            self.consume_end()?;
            Ok(Break { position })
        } else if self.has_keyword(b"for") {
            let position = self.consume_head(b"for")?;
            let index = self.consume_name()?;
            self.consume_token(b":")?;
            let range = self.consume_expression()?;
            let body = self.consume_block()?;
            Ok(For { position, index, range, body })
        } else if self.has_keyword(b"if") {
            let position = self.consume_head(b"if")?;
            let condition = self.consume_expression()?;
            let then_body = self.consume_block()?;
            let mut else_body = None;
            if self.has_keyword(b"else") {
                self.consume_head(b"else")?;
                else_body = Some(self.consume_block()?);
            }
            Ok(If { position, condition, then_body, else_body })
        } else if self.has_keyword(b"loop") {
            let position = self.consume_head(b"loop")?;
            let body = self.consume_block()?;
            Ok(Loop { position, body })
        } else if self.has_keyword(b"switch") {
            let position = self.consume_head(b"switch")?;
            let value = self.consume_expression()?;
            self.consume_token(b"{")?;
            let mut cases = Vec::new();
            while self.has_keyword(b"case") {
                let position = self.consume_head(b"case")?;
                let labels = self.consume_expressions()?;
                let body = self.consume_block()?;
                cases.push(RawCase { position, labels, body });
            }
            self.consume_token(b"}")?;
            Ok(Switch { position, value, cases })
        } else {
            Err(self.source.error("Expected statement"))
        }
    }
    // Continues an expression whose leading identifier was already consumed.
    fn consume_subscripts(&mut self, name: Name) -> Result<RawExpression, ParseError> {
        let mut result = RawExpression::Reference { position: name.position, variable: name.name };
        while self.has_string(b"[") {
            let position = self.source.pos();
            self.consume_token(b"[")?;
            let index = self.consume_expression()?;
            self.consume_token(b"]")?;
            result = RawExpression::Subscript {
                position,
                array: Box::new(result),
                index: Box::new(index),
            };
        }
        Ok(result)
    }
    pub fn consume_unit(&mut self) -> Result<Unit, ParseError> {
        let mut statements = Vec::new();
        self.consume_whitespace()?;
        while !self.source.is_eof() {
            statements.push(self.consume_statement()?);
        }
        Ok(Unit { statements })
    }
}

/// Parses interface source text into a raw syntax tree.
pub fn parse(source: &mut InputSource) -> Result<Unit, ParseError> {
    Lexer::new(source).consume_unit()
}

#[cfg(test)]
mod tests {
    use crate::protocol::lexer::*;

    #[test]
    fn test_expression() {
        let mut is = InputSource::from_string("a[i][j];").unwrap();
        let mut lex = Lexer::new(&mut is);
        let expr = lex.consume_expression().unwrap();
        assert_let![RawExpression::Subscript { array, index, .. } = expr => {
            assert_let![RawExpression::Reference { variable, .. } = *index => {
                assert_eq!(variable, "j");
            }];
            assert_let![RawExpression::Subscript { array, .. } = *array => {
                assert_let![RawExpression::Reference { variable, .. } = *array => {
                    assert_eq!(variable, "a");
                }];
            }];
        }];
        assert_eq!(Some(b';'), is.next());
    }

    #[test]
    fn test_negative_literal() {
        let mut is = InputSource::from_string("-12").unwrap();
        let expr = Lexer::new(&mut is).consume_expression().unwrap();
        assert_let![RawExpression::IntLiteral { value, .. } = expr => {
            assert_eq!(value, -12);
        }];
    }

    #[test]
    fn test_call_statement() {
        let mut is = InputSource::from_string("call r[i] = solve(n, a);").unwrap();
        let stmt = Lexer::new(&mut is).consume_statement().unwrap();
        assert_let![RawStatement::Call { function, arguments, return_value, .. } = stmt => {
            assert_eq!(function.name, "solve");
            assert_eq!(arguments.len(), 2);
            assert_let![Some(RawExpression::Subscript { .. }) = return_value => {}];
        }];
    }

    #[test]
    fn test_unit() {
        let mut is = InputSource::from_string(
            "// header\nconst MAX = 10;\nvar int[] a, b;\n\
             function f(int n, int[] a) -> int callbacks cb;\n\
             callback cb(int x) { output x; }\n\
             main { /* body */ for i : MAX { input a[i]; } switch b[0] { case 1, 2 { exit; } } }\n",
        )
        .unwrap();
        let unit = parse(&mut is).unwrap();
        assert_eq!(unit.statements.len(), 5);
        assert_let![RawStatement::Var { dimensions, names, .. } = &unit.statements[1] => {
            assert_eq!(*dimensions, 1);
            assert_eq!(names.len(), 2);
            assert_eq!(names[1].position.line, 3);
            assert_eq!(names[1].position.column, 14);
        }];
        assert_let![RawStatement::Function { callbacks, return_value, .. } = &unit.statements[2] => {
            assert!(*return_value);
            assert_eq!(callbacks[0].name, "cb");
        }];
    }

    #[test]
    fn test_reserved_word_is_not_identifier() {
        let mut is = InputSource::from_string("var int loop;").unwrap();
        let err = parse(&mut is).unwrap_err();
        assert_eq!(err.message(), "Expected identifier");
        assert_eq!(err.position().column, 9);
    }
}
