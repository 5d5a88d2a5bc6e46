use std::ops::{Index, IndexMut};

use id_arena::{Arena, Id};

use crate::common::*;
use crate::protocol::inputsource::*;
use crate::protocol::variables::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(Id<Block>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(Id<Statement>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExpressionId(Id<Expression>);

/// Owns every node of a compiled interface. Nodes refer to each other by id.
#[derive(Debug, Default)]
pub struct Heap {
    blocks: Arena<Block>,
    statements: Arena<Statement>,
    expressions: Arena<Expression>,
}

impl Heap {
    pub fn new() -> Heap {
        Heap::default()
    }
    pub fn alloc_block(&mut self, f: impl FnOnce(BlockId) -> Block) -> BlockId {
        BlockId(self.blocks.alloc_with_id(|id| f(BlockId(id))))
    }
    pub fn alloc_statement(&mut self, f: impl FnOnce(StatementId) -> Statement) -> StatementId {
        StatementId(self.statements.alloc_with_id(|id| f(StatementId(id))))
    }
    pub fn alloc_expression(&mut self, f: impl FnOnce(ExpressionId) -> Expression) -> ExpressionId {
        ExpressionId(self.expressions.alloc_with_id(|id| f(ExpressionId(id))))
    }
}

impl Index<BlockId> for Heap {
    type Output = Block;
    fn index(&self, index: BlockId) -> &Self::Output {
        &self.blocks[index.0]
    }
}

impl IndexMut<BlockId> for Heap {
    fn index_mut(&mut self, index: BlockId) -> &mut Self::Output {
        &mut self.blocks[index.0]
    }
}

impl Index<StatementId> for Heap {
    type Output = Statement;
    fn index(&self, index: StatementId) -> &Self::Output {
        &self.statements[index.0]
    }
}

impl Index<ExpressionId> for Heap {
    type Output = Expression;
    fn index(&self, index: ExpressionId) -> &Self::Output {
        &self.expressions[index.0]
    }
}

// ====================
// Scopes
// ====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Variable, // variables, constants and index variables share one namespace
    Function,
    Callback,
    Main,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    Variable(VariableDeclaration),
    Index(Variable),
    Constant(i64),
    Function,
    Callback,
    Main,
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    entries: IndexMap<(SymbolKind, String), (InputPosition, Symbol)>,
}

impl Scope {
    pub fn get(&self, kind: SymbolKind, name: &str) -> Option<&Symbol> {
        self.entries.get(&(kind, name.to_owned())).map(|(_, symbol)| symbol)
    }
    /// Declares `name`; on a clash returns the position of the earlier declaration.
    pub fn declare(
        &mut self,
        kind: SymbolKind,
        name: &str,
        position: InputPosition,
        symbol: Symbol,
    ) -> Result<(), InputPosition> {
        let key = (kind, name.to_owned());
        if let Some((earlier, _)) = self.entries.get(&key) {
            return Err(*earlier);
        }
        self.entries.insert(key, (position, symbol));
        Ok(())
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Symbol)> {
        self.entries.iter().map(|((_, name), (_, symbol))| (name.as_str(), symbol))
    }
}

// ====================
// Blocks and statements
// ====================

#[derive(Debug, Clone)]
pub struct Block {
    pub this: BlockId,
    pub position: InputPosition,
    pub parent: Option<BlockId>,
    pub scope: Scope,
    pub statements: Vec<StatementId>,
    pub first_calls: FirstCalls,
    pub finishes: bool, // may complete without a call
    pub breaks: bool,   // may leave the enclosing loop before any call
}

impl Block {
    /// Resolves `name` in this block's scope, falling back to enclosing blocks.
    pub fn lookup<'h>(&self, h: &'h Heap, kind: SymbolKind, name: &str) -> Option<&'h Symbol> {
        let mut cursor = Some(self.this);
        while let Some(id) = cursor {
            let block = &h[id];
            if let Some(symbol) = block.scope.get(kind, name) {
                return Some(symbol);
            }
            cursor = block.parent;
        }
        None
    }
}

#[derive(Debug, Clone)]
pub enum Statement {
    Const(ConstStatement),
    Var(VarStatement),
    Function(FunctionStatement),
    Callback(CallbackStatement),
    Main(MainStatement),
    Alloc(AllocStatement),
    Checkpoint(CheckpointStatement),
    Input(InputStatement),
    Output(OutputStatement),
    Flush(FlushStatement),
    Call(CallStatement),
    Return(ReturnStatement),
    Exit(ExitStatement),
    Break(BreakStatement),
    For(ForStatement),
    If(IfStatement),
    Loop(LoopStatement),
    Switch(SwitchStatement),
}

#[derive(Debug, Clone)]
pub struct ConstStatement {
    pub position: InputPosition,
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone)]
pub struct VarStatement {
    pub position: InputPosition,
    pub declarations: Vec<VariableDeclaration>,
}

#[derive(Debug, Clone)]
pub struct FunctionStatement {
    pub position: InputPosition,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CallbackStatement {
    pub position: InputPosition,
    pub name: String,
    pub body: BlockId,
}

#[derive(Debug, Clone)]
pub struct MainStatement {
    pub position: InputPosition,
    pub body: BlockId,
}

#[derive(Debug, Clone)]
pub struct AllocStatement {
    pub position: InputPosition,
    pub arguments: Vec<ExpressionId>,
    pub allocations: Vec<VariableAllocation>,
    pub size: ExpressionId,
}

#[derive(Debug, Clone)]
pub struct CheckpointStatement {
    pub position: InputPosition,
}

#[derive(Debug, Clone)]
pub struct InputStatement {
    pub position: InputPosition,
    pub arguments: Vec<ExpressionId>,
}

#[derive(Debug, Clone)]
pub struct OutputStatement {
    pub position: InputPosition,
    pub arguments: Vec<ExpressionId>,
}

#[derive(Debug, Clone)]
pub struct FlushStatement {
    pub position: InputPosition,
}

#[derive(Debug, Clone)]
pub struct CallStatement {
    pub position: InputPosition,
    pub function: String,
    pub arguments: Vec<ExpressionId>,
    pub return_value: Option<ExpressionId>,
}

#[derive(Debug, Clone)]
pub struct ReturnStatement {
    pub position: InputPosition,
    pub value: ExpressionId,
}

#[derive(Debug, Clone)]
pub struct ExitStatement {
    pub position: InputPosition,
}

#[derive(Debug, Clone)]
pub struct BreakStatement {
    pub position: InputPosition,
}

#[derive(Debug, Clone)]
pub struct ForStatement {
    pub position: InputPosition,
    pub index: Variable,
    pub range: ExpressionId,
    pub body: BlockId,
}

#[derive(Debug, Clone)]
pub struct IfStatement {
    pub position: InputPosition,
    pub condition: ExpressionId,
    pub then_body: BlockId,
    pub else_body: Option<BlockId>,
}

#[derive(Debug, Clone)]
pub struct LoopStatement {
    pub position: InputPosition,
    pub body: BlockId,
}

#[derive(Debug, Clone)]
pub struct SwitchStatement {
    pub position: InputPosition,
    pub value: ExpressionId,
    pub cases: Vec<Case>,
}

#[derive(Debug, Clone)]
pub struct Case {
    pub position: InputPosition,
    pub labels: Vec<ExpressionId>,
    pub body: BlockId,
}

impl SyntaxElement for Statement {
    fn position(&self) -> InputPosition {
        match self {
            Statement::Const(s) => s.position,
            Statement::Var(s) => s.position,
            Statement::Function(s) => s.position,
            Statement::Callback(s) => s.position,
            Statement::Main(s) => s.position,
            Statement::Alloc(s) => s.position,
            Statement::Checkpoint(s) => s.position,
            Statement::Input(s) => s.position,
            Statement::Output(s) => s.position,
            Statement::Flush(s) => s.position,
            Statement::Call(s) => s.position,
            Statement::Return(s) => s.position,
            Statement::Exit(s) => s.position,
            Statement::Break(s) => s.position,
            Statement::For(s) => s.position,
            Statement::If(s) => s.position,
            Statement::Loop(s) => s.position,
            Statement::Switch(s) => s.position,
        }
    }
}

impl Statement {
    /// The first-call contribution of this statement, from its children's
    /// already computed block sets. `None` means control may reach the next
    /// statement without a call.
    pub fn first_calls(&self, h: &Heap) -> FirstCalls {
        match self {
            Statement::Call(call) => btreeset! { Some(CallToken::function(call.function.clone())) },
            Statement::Exit(_) => btreeset! { Some(CallToken::Exit) },
            Statement::Break(_) => FirstCalls::new(),
            Statement::If(s) => {
                let mut calls = h[s.then_body].falls_through();
                match s.else_body {
                    Some(else_body) => calls.extend(h[else_body].falls_through()),
                    None => {
                        calls.insert(None);
                    }
                }
                calls
            }
            Statement::For(s) => {
                if h[s.range].literal_value() == Some(0) {
                    btreeset! { None }
                } else {
                    h[s.body].first_calls.clone()
                }
            }
            Statement::Loop(s) => {
                // an iteration without calls just starts the next one
                let body = &h[s.body];
                let mut calls = body.first_calls.clone();
                calls.remove(&None);
                if body.breaks || calls.is_empty() {
                    calls.insert(None);
                }
                calls
            }
            Statement::Switch(s) => {
                let mut calls = FirstCalls::new();
                for case in &s.cases {
                    calls.extend(h[case.body].falls_through());
                }
                if s.cases.is_empty() {
                    calls.insert(None);
                }
                calls
            }
            _ => btreeset! { None },
        }
    }

    /// Whether this statement may leave the enclosing loop before any call.
    pub fn breaks(&self, h: &Heap) -> bool {
        match self {
            Statement::Break(_) => true,
            Statement::If(s) => h[s.then_body].breaks || s.else_body.map_or(false, |b| h[b].breaks),
            Statement::Switch(s) => s.cases.iter().any(|case| h[case.body].breaks),
            _ => false,
        }
    }
}

impl Block {
    /// The first calls of this block, with `None` only if its last
    /// statement may complete without one.
    pub fn falls_through(&self) -> FirstCalls {
        let mut calls = self.first_calls.clone();
        if !self.finishes {
            calls.remove(&None);
        }
        calls
    }
}

/// First calls of a statement sequence, as stored in its `Block`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceCalls {
    pub first_calls: FirstCalls,
    pub finishes: bool,
    pub breaks: bool,
}

/// Folds the first-call sets of a statement sequence. The block's set gets
/// `None` if it may be left without a call, by completing or by `break`.
pub fn sequence_first_calls(h: &Heap, statements: &[StatementId]) -> SequenceCalls {
    let mut calls = btreeset! { None };
    let mut breaks = false;
    for &s in statements {
        if !calls.contains(&None) {
            break;
        }
        calls.remove(&None);
        calls.extend(h[s].first_calls(h));
        breaks |= h[s].breaks(h);
        if let Statement::Return(_) = h[s] {
            break;
        }
    }
    let finishes = calls.contains(&None);
    if breaks {
        calls.insert(None);
    }
    SequenceCalls { first_calls: calls, finishes, breaks }
}

// ====================
// Expressions
// ====================

#[derive(Debug, Clone)]
pub enum Expression {
    IntLiteral(IntLiteralExpression),
    Reference(ReferenceExpression),
    Subscript(SubscriptExpression),
}

#[derive(Debug, Clone)]
pub struct IntLiteralExpression {
    pub position: InputPosition,
    pub value: i64,
    pub constant: Option<String>, // set when written as a named constant
}

#[derive(Debug, Clone)]
pub struct ReferenceExpression {
    pub position: InputPosition,
    pub variable: Variable,
    pub dimensions: usize,
    pub direction: Option<Direction>, // `None` for index variables
}

#[derive(Debug, Clone)]
pub struct SubscriptExpression {
    pub position: InputPosition,
    pub array: ExpressionId,
    pub index: ExpressionId,
    pub expected_index: Option<Variable>,
}

impl SyntaxElement for Expression {
    fn position(&self) -> InputPosition {
        match self {
            Expression::IntLiteral(e) => e.position,
            Expression::Reference(e) => e.position,
            Expression::Subscript(e) => e.position,
        }
    }
}

// ====================
// Signature
// ====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub position: InputPosition,
    pub variable: Variable,
    pub dimensions: usize,
}

#[derive(Debug, Clone)]
pub struct FunctionPrototype {
    pub position: InputPosition,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub has_return_value: bool,
    pub callbacks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CallbackPrototype {
    pub position: InputPosition,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub has_return_value: bool,
    pub body: BlockId,
}

#[derive(Debug, Clone, Default)]
pub struct InterfaceSignature {
    pub constants: IndexMap<String, i64>,
    pub variables: IndexMap<String, VariableDeclaration>,
    pub functions: IndexMap<String, FunctionPrototype>,
    pub callbacks: IndexMap<String, CallbackPrototype>,
}

impl InterfaceSignature {
    pub fn function(&self, name: &str) -> Option<&FunctionPrototype> {
        self.functions.get(name)
    }
    pub fn callback(&self, name: &str) -> Option<&CallbackPrototype> {
        self.callbacks.get(name)
    }
}

impl FunctionPrototype {
    pub fn has_callbacks(&self) -> bool {
        !self.callbacks.is_empty()
    }
}
