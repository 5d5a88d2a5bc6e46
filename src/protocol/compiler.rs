//! Turns a raw syntax tree into the compiled model.
//!
//! Top-level declarations are collected first, so functions and callbacks
//! may be used before they are declared. Bodies are then compiled block by
//! block, resolving names through the parent-linked scopes, checking
//! subscripts against the enclosing `for` indexes, and computing each
//! block's first-call set once its statements are known.

use crate::common::*;
use crate::protocol::ast::*;
use crate::protocol::diagnostics::{Diagnostic, DiagnosticKind as Kind, *};
use crate::protocol::inputsource::*;
use crate::protocol::syntax::*;
use crate::protocol::variables::*;

/// Exhaustive validation suits tooling; load-time callers may stop at the
/// first problem.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub fail_fast: bool,
}

#[derive(Debug)]
pub struct Compiled {
    pub heap: Heap,
    pub root: BlockId,
    pub main: BlockId,
    pub signature: InterfaceSignature,
}

// Raised by `report` in fail-fast mode.
struct Abort;

type CompileResult<T> = Result<T, Abort>;

#[derive(Debug, Clone)]
struct Context {
    block: BlockId,
    indexes: Vec<Variable>, // enclosing `for` indexes, outermost first
    callback: Option<(String, bool)>, // name, has return value
}

struct Compiler {
    h: Heap,
    signature: InterfaceSignature,
    diagnostics: Vec<Diagnostic>,
    options: CompileOptions,
    upward: HashSet<String>,
    loops: usize, // enclosing loops
    saw_return: bool,
}

pub fn compile(unit: &Unit, options: CompileOptions) -> Result<Compiled, CompileError> {
    let mut upward = HashSet::new();
    collect_upward(&unit.statements, &mut upward);
    let mut compiler = Compiler {
        h: Heap::new(),
        signature: InterfaceSignature::default(),
        diagnostics: Vec::new(),
        options,
        upward,
        loops: 0,
        saw_return: false,
    };
    let outcome = compiler.compile_unit(unit);
    let Compiler { h, signature, diagnostics, .. } = compiler;
    match outcome {
        Ok((root, Some(main))) if diagnostics.is_empty() => {
            log::debug!("compiled interface with {} functions", signature.functions.len());
            Ok(Compiled { heap: h, root, main, signature })
        }
        _ => Err(CompileError::new(diagnostics)),
    }
}

// Output targets and callback parameters flow from the process to the driver.
fn collect_upward(statements: &[RawStatement], names: &mut HashSet<String>) {
    fn root_name(e: &RawExpression) -> Option<&str> {
        match e {
            RawExpression::IntLiteral { .. } => None,
            RawExpression::Reference { variable, .. } => Some(variable),
            RawExpression::Subscript { array, .. } => root_name(array),
        }
    }
    for statement in statements {
        match statement {
            RawStatement::Output { arguments, .. } => {
                names.extend(arguments.iter().filter_map(root_name).map(str::to_owned));
            }
            RawStatement::Callback { parameters, body, .. } => {
                names.extend(parameters.iter().map(|p| p.name.clone()));
                collect_upward(&body.statements, names);
            }
            RawStatement::Main { body, .. }
            | RawStatement::For { body, .. }
            | RawStatement::Loop { body, .. } => collect_upward(&body.statements, names),
            RawStatement::If { then_body, else_body, .. } => {
                collect_upward(&then_body.statements, names);
                if let Some(else_body) = else_body {
                    collect_upward(&else_body.statements, names);
                }
            }
            RawStatement::Switch { cases, .. } => {
                for case in cases {
                    collect_upward(&case.body.statements, names);
                }
            }
            _ => {}
        }
    }
}

impl Compiler {
    fn report<N: ToString, M: ToString>(
        &mut self,
        kind: Kind,
        name: N,
        position: InputPosition,
        message: M,
    ) -> CompileResult<()> {
        let diagnostic = Diagnostic::new(kind, name, position, message);
        log::trace!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
        if self.options.fail_fast {
            Err(Abort)
        } else {
            Ok(())
        }
    }
    fn direction_of(&self, name: &str) -> Direction {
        if self.upward.contains(name) {
            Direction::Upward
        } else {
            Direction::Downward
        }
    }

    // ====================
    // Top level
    // ====================

    fn compile_unit(&mut self, unit: &Unit) -> CompileResult<(BlockId, Option<BlockId>)> {
        let root = self.open_block(None, InputPosition::new(1, 1));
        let context = Context { block: root, indexes: Vec::new(), callback: None };
        let mut main_position = None;
        for raw in &unit.statements {
            match raw {
                RawStatement::Const { position, name, value } => {
                    self.declare_constant(&context, *position, name, value)?
                }
                RawStatement::Var { .. } => {}
                RawStatement::Function { position, name, parameters, return_value, callbacks } => {
                    let parameters = self.compile_parameters(parameters);
                    let declared = self.h[root].scope.declare(
                        SymbolKind::Function,
                        &name.name,
                        name.position,
                        Symbol::Function,
                    );
                    if let Err(earlier) = declared {
                        self.report(
                            Kind::FunctionAlreadyDeclared,
                            &name.name,
                            name.position,
                            format!("function '{}' already declared at {}", name.name, earlier),
                        )?;
                        continue;
                    }
                    self.signature.functions.insert(
                        name.name.clone(),
                        FunctionPrototype {
                            position: *position,
                            name: name.name.clone(),
                            parameters,
                            has_return_value: *return_value,
                            callbacks: callbacks.iter().map(|c| c.name.clone()).collect(),
                        },
                    );
                }
                RawStatement::Callback { name, .. } => {
                    let declared = self.h[root].scope.declare(
                        SymbolKind::Callback,
                        &name.name,
                        name.position,
                        Symbol::Callback,
                    );
                    if let Err(earlier) = declared {
                        self.report(
                            Kind::CallbackAlreadyDeclared,
                            &name.name,
                            name.position,
                            format!("callback '{}' already declared at {}", name.name, earlier),
                        )?;
                    }
                }
                RawStatement::Main { position, .. } => match main_position {
                    Some(earlier) => self.report(
                        Kind::MainAlreadyDefined,
                        "main",
                        *position,
                        format!("main already defined at {}", earlier),
                    )?,
                    None => main_position = Some(*position),
                },
                other => self.report(
                    Kind::UnexpectedStatement,
                    "",
                    other.position(),
                    "only declarations are allowed at top level",
                )?,
            }
        }
        self.check_function_callbacks(unit)?;

        let mut main = None;
        let mut statements = Vec::new();
        for raw in &unit.statements {
            let statement = match raw {
                RawStatement::Const { position, name, .. } => match self.h[root]
                    .scope
                    .get(SymbolKind::Variable, &name.name)
                {
                    Some(Symbol::Constant(value)) => Statement::Const(ConstStatement {
                        position: *position,
                        name: name.name.clone(),
                        value: *value,
                    }),
                    _ => continue,
                },
                RawStatement::Var { position, dimensions, names } => {
                    let declarations = self.declare_variables(&context, *dimensions, names)?;
                    for declaration in &declarations {
                        self.signature
                            .variables
                            .insert(declaration.variable.name.clone(), declaration.clone());
                    }
                    Statement::Var(VarStatement { position: *position, declarations })
                }
                RawStatement::Function { position, name, .. } => {
                    Statement::Function(FunctionStatement { position: *position, name: name.name.clone() })
                }
                RawStatement::Callback { position, name, parameters, return_value, body } => {
                    if self.signature.callbacks.contains_key(&name.name) {
                        continue;
                    }
                    let body =
                        self.compile_callback(&context, *position, name, parameters, *return_value, body)?;
                    Statement::Callback(CallbackStatement {
                        position: *position,
                        name: name.name.clone(),
                        body,
                    })
                }
                RawStatement::Main { position, body } => {
                    if main.is_some() {
                        continue;
                    }
                    let block = self.open_block(Some(root), body.position);
                    self.fill_block(&Context { block, ..context.clone() }, body)?;
                    main = Some(block);
                    Statement::Main(MainStatement { position: *position, body: block })
                }
                _ => continue,
            };
            statements.push(self.h.alloc_statement(|_| statement));
        }
        self.h[root].statements = statements;
        if main.is_none() {
            self.report(Kind::MainNotDefined, "main", InputPosition::new(1, 1), "main is not defined")?;
        }
        Ok((root, main))
    }
    fn declare_constant(
        &mut self,
        context: &Context,
        position: InputPosition,
        name: &Name,
        value: &RawExpression,
    ) -> CompileResult<()> {
        let value = self.compile_expression(context, value, 0)?;
        let value = match self.h[value].literal_value() {
            Some(value) => value,
            None => {
                return self.report(
                    Kind::ExpectedScalar,
                    &name.name,
                    position,
                    format!("value of constant '{}' must be an integer literal", name.name),
                )
            }
        };
        let root = context.block;
        self.signature.constants.entry(name.name.clone()).or_insert(value);
        let declared =
            self.h[root].scope.declare(SymbolKind::Variable, &name.name, name.position, Symbol::Constant(value));
        if let Err(earlier) = declared {
            self.report(
                Kind::VariableAlreadyDeclared,
                &name.name,
                name.position,
                format!("'{}' already declared at {}", name.name, earlier),
            )?;
        }
        Ok(())
    }
    fn compile_parameters(&mut self, parameters: &[RawParameter]) -> Vec<Parameter> {
        parameters
            .iter()
            .map(|p| Parameter {
                position: p.position,
                variable: Variable::new(p.name.clone()),
                dimensions: p.dimensions,
            })
            .collect()
    }
    fn check_function_callbacks(&mut self, unit: &Unit) -> CompileResult<()> {
        let root_scope = {
            let mut declared = HashSet::new();
            for raw in &unit.statements {
                if let RawStatement::Callback { name, .. } = raw {
                    declared.insert(name.name.clone());
                }
            }
            declared
        };
        for raw in &unit.statements {
            if let RawStatement::Function { callbacks, .. } = raw {
                for callback in callbacks {
                    if !root_scope.contains(&callback.name) {
                        self.report(
                            Kind::CallbackNotDeclared,
                            &callback.name,
                            callback.position,
                            format!("callback '{}' not declared", callback.name),
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
    fn compile_callback(
        &mut self,
        context: &Context,
        position: InputPosition,
        name: &Name,
        parameters: &[RawParameter],
        has_return_value: bool,
        body: &RawBlock,
    ) -> CompileResult<BlockId> {
        let block = self.open_block(Some(context.block), body.position);
        let parameters = self.compile_parameters(parameters);
        for parameter in &parameters {
            if parameter.dimensions > 0 {
                self.report(
                    Kind::CallbackParameterNotScalar,
                    &parameter.variable,
                    parameter.position,
                    format!("parameter '{}' of callback '{}' must be a scalar", parameter.variable, name.name),
                )?;
            }
            let declaration = VariableDeclaration {
                position: parameter.position,
                variable: parameter.variable.clone(),
                dimensions: 0,
                direction: Direction::Upward,
            };
            self.declare_variable(block, declaration)?;
        }
        let inner = Context { block, indexes: Vec::new(), callback: Some((name.name.clone(), has_return_value)) };
        self.saw_return = false;
        self.fill_block(&inner, body)?;
        if has_return_value && !self.saw_return {
            self.report(
                Kind::MissingReturn,
                &name.name,
                position,
                format!("callback '{}' must return a value", name.name),
            )?;
        }
        self.signature.callbacks.insert(
            name.name.clone(),
            CallbackPrototype {
                position,
                name: name.name.clone(),
                parameters,
                has_return_value,
                body: block,
            },
        );
        Ok(block)
    }

    // ====================
    // Blocks
    // ====================

    fn open_block(&mut self, parent: Option<BlockId>, position: InputPosition) -> BlockId {
        self.h.alloc_block(|this| Block {
            this,
            position,
            parent,
            scope: Scope::default(),
            statements: Vec::new(),
            first_calls: btreeset! { None },
            finishes: true,
            breaks: false,
        })
    }
    fn fill_block(&mut self, context: &Context, raw: &RawBlock) -> CompileResult<()> {
        let mut statements = Vec::with_capacity(raw.statements.len());
        for statement in &raw.statements {
            if let Some(id) = self.compile_statement(context, statement)? {
                statements.push(id);
            }
        }
        let calls = sequence_first_calls(&self.h, &statements);
        let block = &mut self.h[context.block];
        block.statements = statements;
        block.first_calls = calls.first_calls;
        block.finishes = calls.finishes;
        block.breaks = calls.breaks;
        Ok(())
    }
    fn declare_variable(&mut self, block: BlockId, declaration: VariableDeclaration) -> CompileResult<()> {
        let name = declaration.variable.name.clone();
        let position = declaration.position;
        if self.h[block].lookup(&self.h, SymbolKind::Variable, &name).is_some() {
            return self.report(
                Kind::VariableAlreadyDeclared,
                &name,
                position,
                format!("'{}' already declared", name),
            );
        }
        let _ = self.h[block].scope.declare(SymbolKind::Variable, &name, position, Symbol::Variable(declaration));
        Ok(())
    }
    fn declare_variables(
        &mut self,
        context: &Context,
        dimensions: usize,
        names: &[Name],
    ) -> CompileResult<Vec<VariableDeclaration>> {
        let mut declarations = Vec::new();
        for name in names {
            let declaration = VariableDeclaration {
                position: name.position,
                variable: Variable::new(name.name.clone()),
                dimensions,
                direction: self.direction_of(&name.name),
            };
            self.declare_variable(context.block, declaration.clone())?;
            declarations.push(declaration);
        }
        Ok(declarations)
    }

    // ====================
    // Statements
    // ====================

    fn compile_statement(&mut self, context: &Context, raw: &RawStatement) -> CompileResult<Option<StatementId>> {
        let statement = match raw {
            RawStatement::Var { position, dimensions, names } => {
                let declarations = self.declare_variables(context, *dimensions, names)?;
                Statement::Var(VarStatement { position: *position, declarations })
            }
            RawStatement::Alloc { position, arguments, size } => {
                let mut compiled = Vec::new();
                let mut allocations = Vec::new();
                for argument in arguments {
                    let before = self.diagnostics.len();
                    let id = self.compile_expression(context, argument, 0)?;
                    if self.diagnostics.len() == before && self.expect_reference(id)? {
                        if self.h[id].dimensions(&self.h) == 0 {
                            self.report(
                                Kind::NotAnArray,
                                self.name_of(id),
                                argument.position(),
                                format!("'{}' is not an array", self.name_of(id)),
                            )?;
                        } else {
                            allocations.push(self.allocation_of(id));
                        }
                    }
                    compiled.push(id);
                }
                let size = self.compile_scalar(context, size)?;
                Statement::Alloc(AllocStatement {
                    position: *position,
                    arguments: compiled,
                    allocations,
                    size,
                })
            }
            RawStatement::Checkpoint { position } => {
                Statement::Checkpoint(CheckpointStatement { position: *position })
            }
            RawStatement::Input { position, arguments } => {
                let arguments = self.compile_transfer(context, arguments)?;
                Statement::Input(InputStatement { position: *position, arguments })
            }
            RawStatement::Output { position, arguments } => {
                let arguments = self.compile_transfer(context, arguments)?;
                Statement::Output(OutputStatement { position: *position, arguments })
            }
            RawStatement::Flush { position } => Statement::Flush(FlushStatement { position: *position }),
            RawStatement::Call { position, function, arguments, return_value } => {
                self.compile_call(context, *position, function, arguments, return_value.as_ref())?
            }
            RawStatement::Return { position, value } => {
                match &context.callback {
                    Some((_, true)) => self.saw_return = true,
                    Some((name, false)) => self.report(
                        Kind::UnexpectedReturn,
                        name,
                        *position,
                        format!("callback '{}' has no return value", name),
                    )?,
                    None => {
                        self.report(Kind::UnexpectedReturn, "", *position, "return outside of a callback")?
                    }
                }
                let value = self.compile_scalar(context, value)?;
                Statement::Return(ReturnStatement { position: *position, value })
            }
            RawStatement::Exit { position } => Statement::Exit(ExitStatement { position: *position }),
            RawStatement::Break { position } => {
                if self.loops == 0 {
                    self.report(Kind::UnexpectedBreak, "", *position, "break outside of a loop")?;
                }
                Statement::Break(BreakStatement { position: *position })
            }
            RawStatement::For { position, index, range, body } => {
                let range = self.compile_scalar(context, range)?;
                let block = self.open_block(Some(context.block), body.position);
                let variable = Variable::new(index.name.clone());
                if self.h[block].lookup(&self.h, SymbolKind::Variable, &index.name).is_some() {
                    self.report(
                        Kind::VariableAlreadyDeclared,
                        &index.name,
                        index.position,
                        format!("'{}' already declared", index.name),
                    )?;
                } else {
                    let _ = self.h[block].scope.declare(
                        SymbolKind::Variable,
                        &index.name,
                        index.position,
                        Symbol::Index(variable.clone()),
                    );
                }
                let mut indexes = context.indexes.clone();
                indexes.push(variable.clone());
                let inner = Context { block, indexes, callback: context.callback.clone() };
                self.compile_loop_body(&inner, body)?;
                Statement::For(ForStatement { position: *position, index: variable, range, body: block })
            }
            RawStatement::If { position, condition, then_body, else_body } => {
                let condition = self.compile_scalar(context, condition)?;
                let then_body = self.compile_block(context, then_body)?;
                let else_body = match else_body {
                    Some(body) => Some(self.compile_block(context, body)?),
                    None => None,
                };
                Statement::If(IfStatement { position: *position, condition, then_body, else_body })
            }
            RawStatement::Loop { position, body } => {
                let block = self.open_block(Some(context.block), body.position);
                let inner = Context { block, ..context.clone() };
                self.compile_loop_body(&inner, body)?;
                Statement::Loop(LoopStatement { position: *position, body: block })
            }
            RawStatement::Switch { position, value, cases } => {
                let value = self.compile_scalar(context, value)?;
                let mut compiled = Vec::new();
                for case in cases {
                    let mut labels = Vec::new();
                    for label in &case.labels {
                        labels.push(self.compile_scalar(context, label)?);
                    }
                    let body = self.compile_block(context, &case.body)?;
                    compiled.push(Case { position: case.position, labels, body });
                }
                Statement::Switch(SwitchStatement { position: *position, value, cases: compiled })
            }
            RawStatement::Const { position, .. }
            | RawStatement::Function { position, .. }
            | RawStatement::Callback { position, .. }
            | RawStatement::Main { position, .. } => {
                self.report(
                    Kind::UnexpectedStatement,
                    "",
                    *position,
                    "declarations are only allowed at top level",
                )?;
                return Ok(None);
            }
        };
        Ok(Some(self.h.alloc_statement(|_| statement)))
    }
    fn compile_block(&mut self, context: &Context, raw: &RawBlock) -> CompileResult<BlockId> {
        let block = self.open_block(Some(context.block), raw.position);
        self.fill_block(&Context { block, ..context.clone() }, raw)?;
        Ok(block)
    }
    fn compile_loop_body(&mut self, context: &Context, raw: &RawBlock) -> CompileResult<()> {
        self.loops += 1;
        let filled = self.fill_block(context, raw);
        self.loops -= 1;
        filled
    }
    // Arguments of `input` / `output`: scalar locations.
    fn compile_transfer(&mut self, context: &Context, arguments: &[RawExpression]) -> CompileResult<Vec<ExpressionId>> {
        let mut compiled = Vec::new();
        for argument in arguments {
            let before = self.diagnostics.len();
            let id = self.compile_scalar(context, argument)?;
            if self.diagnostics.len() == before {
                self.expect_reference(id)?;
            }
            compiled.push(id);
        }
        Ok(compiled)
    }
    fn compile_call(
        &mut self,
        context: &Context,
        position: InputPosition,
        function: &Name,
        arguments: &[RawExpression],
        return_value: Option<&RawExpression>,
    ) -> CompileResult<Statement> {
        if let Some((callback, _)) = &context.callback {
            self.report(
                Kind::UnexpectedCallInCallback,
                &function.name,
                position,
                format!("cannot call '{}' from callback '{}'", function.name, callback),
            )?;
        }
        let mut compiled = Vec::new();
        for argument in arguments {
            compiled.push(self.compile_expression(context, argument, 0)?);
        }
        let return_value = match return_value {
            Some(target) => {
                let before = self.diagnostics.len();
                let id = self.compile_scalar(context, target)?;
                if self.diagnostics.len() == before {
                    self.expect_reference(id)?;
                }
                Some(id)
            }
            None => None,
        };
        match self.signature.function(&function.name).cloned() {
            None => self.report(
                Kind::FunctionNotDeclared,
                &function.name,
                function.position,
                format!("function '{}' not declared", function.name),
            )?,
            Some(prototype) => {
                if prototype.parameters.len() != compiled.len() {
                    self.report(
                        Kind::WrongNumberOfArguments,
                        &function.name,
                        position,
                        format!(
                            "'{}' expects {} arguments, got {}",
                            function.name,
                            prototype.parameters.len(),
                            compiled.len()
                        ),
                    )?;
                } else {
                    for ((parameter, &id), raw) in prototype.parameters.iter().zip(&compiled).zip(arguments) {
                        let dimensions = self.h[id].dimensions(&self.h);
                        if dimensions != parameter.dimensions {
                            self.report(
                                Kind::WrongArgumentDimensions,
                                &parameter.variable,
                                raw.position(),
                                format!(
                                    "argument '{}' of '{}' needs {} dimensions, got {}",
                                    parameter.variable, function.name, parameter.dimensions, dimensions
                                ),
                            )?;
                        }
                    }
                }
                match (prototype.has_return_value, return_value.is_some()) {
                    (true, false) => self.report(
                        Kind::CallReturnValueMissing,
                        &function.name,
                        position,
                        format!("'{}' returns a value that is not stored", function.name),
                    )?,
                    (false, true) => self.report(
                        Kind::CallUnexpectedReturnValue,
                        &function.name,
                        position,
                        format!("'{}' does not return a value", function.name),
                    )?,
                    _ => {}
                }
            }
        }
        Ok(Statement::Call(CallStatement {
            position,
            function: function.name.clone(),
            arguments: compiled,
            return_value,
        }))
    }

    // ====================
    // Expressions
    // ====================

    // `outer` counts the subscripts applied around this expression.
    fn compile_expression(
        &mut self,
        context: &Context,
        raw: &RawExpression,
        outer: usize,
    ) -> CompileResult<ExpressionId> {
        let expression = match raw {
            RawExpression::IntLiteral { position, value } => {
                Expression::IntLiteral(IntLiteralExpression { position: *position, value: *value, constant: None })
            }
            RawExpression::Reference { position, variable } => {
                match self.h[context.block].lookup(&self.h, SymbolKind::Variable, variable).cloned() {
                    Some(Symbol::Variable(declaration)) => Expression::Reference(ReferenceExpression {
                        position: *position,
                        variable: declaration.variable,
                        dimensions: declaration.dimensions,
                        direction: Some(declaration.direction),
                    }),
                    Some(Symbol::Index(index)) => Expression::Reference(ReferenceExpression {
                        position: *position,
                        variable: index,
                        dimensions: 0,
                        direction: None,
                    }),
                    Some(Symbol::Constant(value)) => Expression::IntLiteral(IntLiteralExpression {
                        position: *position,
                        value,
                        constant: Some(variable.clone()),
                    }),
                    _ => {
                        self.report(
                            Kind::VariableNotDeclared,
                            variable,
                            *position,
                            format!("variable '{}' not declared", variable),
                        )?;
                        Expression::IntLiteral(IntLiteralExpression { position: *position, value: 0, constant: None })
                    }
                }
            }
            RawExpression::Subscript { position, array, index } => {
                let before = self.diagnostics.len();
                let array_id = self.compile_expression(context, array, outer + 1)?;
                let resolved = self.diagnostics.len() == before;
                let index_id = self.compile_expression(context, index, 0)?;
                if resolved && self.h[array_id].dimensions(&self.h) == 0 {
                    self.report(
                        Kind::NotAnArray,
                        self.name_of(array_id),
                        *position,
                        format!("'{}' is not an array", self.name_of(array_id)),
                    )?;
                }
                if self.h[index_id].dimensions(&self.h) > 0 {
                    self.report(
                        Kind::ExpectedScalar,
                        self.name_of(index_id),
                        index.position(),
                        "array index must be a scalar",
                    )?;
                }
                Expression::Subscript(SubscriptExpression {
                    position: *position,
                    array: array_id,
                    index: index_id,
                    expected_index: context.indexes.iter().rev().nth(outer).cloned(),
                })
            }
        };
        Ok(self.h.alloc_expression(|_| expression))
    }
    fn compile_scalar(&mut self, context: &Context, raw: &RawExpression) -> CompileResult<ExpressionId> {
        let id = self.compile_expression(context, raw, 0)?;
        if self.h[id].dimensions(&self.h) > 0 {
            self.report(
                Kind::ExpectedScalar,
                self.name_of(id),
                raw.position(),
                format!("'{}' is an array, expected a scalar", self.name_of(id)),
            )?;
        }
        Ok(id)
    }
    // Checks that `id` denotes a location; returns whether it does.
    fn expect_reference(&mut self, id: ExpressionId) -> CompileResult<bool> {
        let mut cursor = id;
        loop {
            match &self.h[cursor] {
                Expression::IntLiteral(e) => {
                    let position = e.position;
                    self.report(Kind::ExpectedReference, "", position, "expected a variable reference")?;
                    return Ok(false);
                }
                Expression::Reference(_) => return Ok(true),
                Expression::Subscript(e) => {
                    let (position, array, index) = (e.position, e.array, e.index);
                    match e.expected_index.clone() {
                        None => {
                            let name = self.name_of(array);
                            self.report(
                                Kind::UnexpectedArrayIndex,
                                &name,
                                position,
                                format!("'{}' is subscripted outside of a matching for loop", name),
                            )?;
                            return Ok(false);
                        }
                        Some(expected) if !self.h[index].is_reference_to(&self.h, &expected) => {
                            self.report(
                                Kind::WrongArrayIndex,
                                &expected,
                                self.h[index].position(),
                                format!("expected index '{}'", expected),
                            )?;
                            return Ok(false);
                        }
                        Some(_) => cursor = array,
                    }
                }
            }
        }
    }
    fn allocation_of(&self, id: ExpressionId) -> VariableAllocation {
        let mut indexes = Vec::new();
        let mut cursor = id;
        while let Expression::Subscript(e) = &self.h[cursor] {
            indexes.extend(e.expected_index.clone());
            cursor = e.array;
        }
        indexes.reverse();
        let variable = match &self.h[cursor] {
            Expression::Reference(e) => e.variable.clone(),
            _ => Variable::new(""),
        };
        VariableAllocation { variable, indexes, dimensions: self.h[id].dimensions(&self.h) }
    }
    fn name_of(&self, id: ExpressionId) -> String {
        match self.h[id].root_variable(&self.h) {
            Some(e) => e.variable.name.clone(),
            None => String::new(),
        }
    }
}
