//! Raw syntax tree, as produced by a parser for the interface language.
//!
//! This is the boundary with the outside world: any parser (the bundled
//! one in `lexer.rs`, or an external grammar library emitting JSON) hands
//! the compiler a [`Unit`]. Nodes are tagged by `statement_type` /
//! `expression_type` and carry their source position.

use serde::{Deserialize, Serialize};

use crate::protocol::inputsource::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub statements: Vec<RawStatement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Name {
    pub position: InputPosition,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBlock {
    pub position: InputPosition,
    pub statements: Vec<RawStatement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawParameter {
    pub position: InputPosition,
    pub name: String,
    pub dimensions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCase {
    pub position: InputPosition,
    pub labels: Vec<RawExpression>,
    pub body: RawBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "statement_type", rename_all = "snake_case")]
pub enum RawStatement {
    Const {
        position: InputPosition,
        name: Name,
        value: RawExpression,
    },
    Var {
        position: InputPosition,
        dimensions: usize,
        names: Vec<Name>,
    },
    Function {
        position: InputPosition,
        name: Name,
        parameters: Vec<RawParameter>,
        return_value: bool,
        #[serde(default)]
        callbacks: Vec<Name>,
    },
    Callback {
        position: InputPosition,
        name: Name,
        parameters: Vec<RawParameter>,
        return_value: bool,
        body: RawBlock,
    },
    Main {
        position: InputPosition,
        body: RawBlock,
    },
    Alloc {
        position: InputPosition,
        arguments: Vec<RawExpression>,
        size: RawExpression,
    },
    Checkpoint {
        position: InputPosition,
    },
    Input {
        position: InputPosition,
        arguments: Vec<RawExpression>,
    },
    Output {
        position: InputPosition,
        arguments: Vec<RawExpression>,
    },
    Flush {
        position: InputPosition,
    },
    Call {
        position: InputPosition,
        function: Name,
        arguments: Vec<RawExpression>,
        #[serde(default)]
        return_value: Option<RawExpression>,
    },
    Return {
        position: InputPosition,
        value: RawExpression,
    },
    Exit {
        position: InputPosition,
    },
    Break {
        position: InputPosition,
    },
    For {
        position: InputPosition,
        index: Name,
        range: RawExpression,
        body: RawBlock,
    },
    If {
        position: InputPosition,
        condition: RawExpression,
        then_body: RawBlock,
        #[serde(default)]
        else_body: Option<RawBlock>,
    },
    Loop {
        position: InputPosition,
        body: RawBlock,
    },
    Switch {
        position: InputPosition,
        value: RawExpression,
        cases: Vec<RawCase>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expression_type", rename_all = "snake_case")]
pub enum RawExpression {
    IntLiteral { position: InputPosition, value: i64 },
    Reference { position: InputPosition, variable: String },
    Subscript { position: InputPosition, array: Box<RawExpression>, index: Box<RawExpression> },
}

impl Unit {
    pub fn from_json(text: &str) -> serde_json::Result<Unit> {
        serde_json::from_str(text)
    }
}

impl SyntaxElement for RawStatement {
    fn position(&self) -> InputPosition {
        use RawStatement::*;
        match self {
            Const { position, .. }
            | Var { position, .. }
            | Function { position, .. }
            | Callback { position, .. }
            | Main { position, .. }
            | Alloc { position, .. }
            | Checkpoint { position }
            | Input { position, .. }
            | Output { position, .. }
            | Flush { position }
            | Call { position, .. }
            | Return { position, .. }
            | Exit { position }
            | Break { position }
            | For { position, .. }
            | If { position, .. }
            | Loop { position, .. }
            | Switch { position, .. } => *position,
        }
    }
}

impl SyntaxElement for RawExpression {
    fn position(&self) -> InputPosition {
        match self {
            RawExpression::IntLiteral { position, .. }
            | RawExpression::Reference { position, .. }
            | RawExpression::Subscript { position, .. } => *position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_parser_json() {
        let unit = Unit::from_json(
            r#"{"statements": [
                {"statement_type": "var", "position": {"line": 1, "column": 1},
                 "dimensions": 0, "names": [{"position": {"line": 1, "column": 9}, "name": "n"}]},
                {"statement_type": "main", "position": {"line": 2, "column": 1},
                 "body": {"position": {"line": 2, "column": 6}, "statements": [
                    {"statement_type": "input", "position": {"line": 3, "column": 5},
                     "arguments": [{"expression_type": "reference",
                                    "position": {"line": 3, "column": 11}, "variable": "n"}]},
                    {"statement_type": "exit", "position": {"line": 4, "column": 5}}
                 ]}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(unit.statements.len(), 2);
        assert_let![RawStatement::Main { body, .. } = &unit.statements[1] => {
            assert_eq!(body.statements.len(), 2);
            assert_eq!(body.statements[1].position(), InputPosition::new(4, 5));
        }];
    }
}
