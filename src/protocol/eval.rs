//! The two-phase interpreter of a compiled interface.
//!
//! PREFLIGHT runs on the caller's thread. It consumes driver requests,
//! binds the downward variables they carry and answers with responses.
//! RUN runs on a scoped thread. It replays the same tree against the
//! process, writing downward lines and binding upward ones. The phases hand
//! a baton back and forth: PREFLIGHT resumes RUN whenever it needs a value
//! or a callback that only the process can provide, and RUN yields back
//! as soon as it needs something PREFLIGHT has not decided yet.
//!
//! Values live in a store shared by both phases and keyed by the epoch of
//! a variable: every execution of a `var` statement (and every callback
//! invocation, for its parameters) opens a new epoch, so a phase that lags
//! behind never observes bindings of a later iteration.

use std::collections::hash_map::Entry;
use std::io::{BufRead, BufWriter, Write};
use std::sync::MutexGuard;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::*;
use crate::protocol::ast::*;
use crate::protocol::expressions::*;
use crate::protocol::messages::*;
use crate::protocol::variables::*;
use crate::protocol::InterfaceDefinition;
use crate::runtime::errors::InterfaceError;

/// Largest array an `alloc` may create. Sizes come from the other side of the channel.
pub const MAX_ARRAY_SIZE: i64 = 1 << 22;

/// What a successful run leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub log: String,
}

/// A callback invocation reported by the process, waiting to be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackContext {
    pub index: usize,
    pub name: String,
    pub arguments: Vec<i64>,
}

/// How a statement left its enclosing construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalContinuation {
    Break,
    Return,
    Exit,
    Failed(InterfaceError),
}

type EvalResult = Result<(), EvalContinuation>;

impl From<InterfaceError> for EvalContinuation {
    fn from(e: InterfaceError) -> Self {
        EvalContinuation::Failed(e)
    }
}
impl From<std::io::Error> for EvalContinuation {
    fn from(e: std::io::Error) -> Self {
        EvalContinuation::Failed(e.into())
    }
}

// A storage location: unbound, an integer, or an array of locations.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Empty,
    Int(i64),
    Array(Vec<Slot>),
}

impl Slot {
    fn from_value(value: &Value) -> Slot {
        match value {
            Value::Int(x) => Slot::Int(*x),
            Value::Array(items) => Slot::Array(items.iter().map(Slot::from_value).collect()),
        }
    }
    // `None` unless every element underneath is bound.
    fn to_value(&self) -> Option<Value> {
        match self {
            Slot::Empty => None,
            Slot::Int(x) => Some(Value::Int(*x)),
            Slot::Array(items) => {
                items.iter().map(Slot::to_value).collect::<Option<Vec<_>>>().map(Value::Array)
            }
        }
    }
    fn at(&self, path: &[i64]) -> Option<&Slot> {
        let mut slot = self;
        for &index in path {
            match slot {
                Slot::Array(items) if index >= 0 => slot = items.get(index as usize)?,
                _ => return None,
            }
        }
        Some(slot)
    }
    fn at_mut(&mut self, path: &[i64]) -> Option<&mut Slot> {
        let mut slot = self;
        for &index in path {
            match slot {
                Slot::Array(items) if index >= 0 => slot = items.get_mut(index as usize)?,
                _ => return None,
            }
        }
        Some(slot)
    }
    /// Fills unbound locations; bound ones must agree with `value`.
    fn merge(&mut self, value: &Value) -> bool {
        match self {
            Slot::Empty => {
                *self = Slot::from_value(value);
                true
            }
            Slot::Int(x) => value.as_int() == Some(*x),
            Slot::Array(items) => match value {
                Value::Array(values) if values.len() == items.len() => {
                    items.iter_mut().zip(values).all(|(slot, value)| slot.merge(value))
                }
                _ => false,
            },
        }
    }
    fn describe(&self) -> String {
        match self.to_value() {
            Some(value) => value.to_string(),
            None => "partially bound".into(),
        }
    }
}

// Callback bodies get their own namespace: they run in the middle of a
// call, while locals of `main` with the same names are still live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    local: bool,
    variable: Variable,
    epoch: usize,
}

#[derive(Debug, Default)]
struct Store {
    map: HashMap<Key, Slot>,
    declared: HashMap<(bool, Variable), [Option<usize>; 2]>,
}

impl Store {
    // Drops the epoch that neither phase can reach any more.
    fn declared(&mut self, phase: Phase, local: bool, variable: &Variable, epoch: usize) {
        let seen = self.declared.entry((local, variable.clone())).or_insert([None, None]);
        seen[phase_slot(phase)] = Some(epoch);
        if let [Some(a), Some(b)] = *seen {
            let low = a.min(b);
            if low > 0 {
                self.map.remove(&Key { local, variable: variable.clone(), epoch: low - 1 });
            }
        }
    }
}

fn phase_slot(phase: Phase) -> usize {
    match phase {
        Phase::Preflight => 0,
        Phase::Run => 1,
    }
}

#[derive(Debug, Default)]
struct State {
    store: Store,
    callbacks: VecDeque<Option<CallbackContext>>,
    decisions: VecDeque<usize>,
    log: String,
}

fn lock(state: &Mutex<State>) -> MutexGuard<State> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// The view one phase has on the store.
struct Frame<'a> {
    phase: Phase,
    signature: &'a InterfaceSignature,
    in_callback: bool,
    epochs: HashMap<(bool, Variable), usize>,
    indexes: HashMap<Variable, i64>,
}

impl<'a> Frame<'a> {
    fn new(phase: Phase, signature: &'a InterfaceSignature) -> Self {
        Frame { phase, signature, in_callback: false, epochs: HashMap::new(), indexes: HashMap::new() }
    }
    fn is_local(&self, variable: &Variable) -> bool {
        self.in_callback && !self.signature.variables.contains_key(&variable.name)
    }
    fn key(&self, variable: &Variable) -> Key {
        let local = self.is_local(variable);
        let epoch = self.epochs.get(&(local, variable.clone())).copied().unwrap_or(0);
        Key { local, variable: variable.clone(), epoch }
    }
    fn declare(&mut self, store: &mut Store, variable: &Variable) {
        let local = self.is_local(variable);
        let epoch = match self.epochs.entry((local, variable.clone())) {
            Entry::Occupied(mut e) => {
                *e.get_mut() += 1;
                *e.get()
            }
            Entry::Vacant(e) => *e.insert(0),
        };
        store.declared(self.phase, local, variable, epoch);
    }
    fn allocate(
        &self,
        store: &mut Store,
        allocation: &VariableAllocation,
        size: i64,
    ) -> Result<(), InterfaceError> {
        if size < 0 || size > MAX_ARRAY_SIZE {
            return Err(InterfaceError::malformed("array size", size));
        }
        let mut path = Vec::with_capacity(allocation.indexes.len());
        for index in &allocation.indexes {
            path.push(*self.indexes.get(index).ok_or_else(|| InterfaceError::unbound(&index.name))?);
        }
        let key = self.key(&allocation.variable);
        let not_allocated = || InterfaceError::NotAllocated { variable: allocation.reference().to_string() };
        let slot = if path.is_empty() {
            store.map.entry(key).or_insert(Slot::Empty)
        } else {
            store.map.get_mut(&key).and_then(|slot| slot.at_mut(&path)).ok_or_else(not_allocated)?
        };
        match slot {
            Slot::Array(items) if items.len() == size as usize => {}
            _ => *slot = Slot::Array(vec![Slot::Empty; size as usize]),
        }
        Ok(())
    }
    fn bind(
        &self,
        store: &mut Store,
        variable: &Variable,
        path: &[i64],
        value: &Value,
    ) -> Result<(), InterfaceError> {
        let key = self.key(variable);
        let slot = if path.is_empty() {
            store.map.entry(key).or_insert(Slot::Empty)
        } else {
            store
                .map
                .get_mut(&key)
                .and_then(|slot| slot.at_mut(path))
                .ok_or_else(|| InterfaceError::NotAllocated { variable: variable.name.clone() })?
        };
        let before = match &*slot {
            Slot::Empty => None,
            bound => Some(bound.describe()),
        };
        if slot.merge(value) {
            return Ok(());
        }
        let mut name = variable.name.clone();
        for index in path {
            name.push_str(&format!("[{}]", index));
        }
        Err(InterfaceError::ValueMismatch {
            variable: name,
            expected: before.unwrap_or_default(),
            actual: value.to_string(),
        })
    }
}

struct View<'f, 'a> {
    frame: &'f Frame<'a>,
    store: &'f Store,
}

impl Environment for View<'_, '_> {
    fn lookup(&self, variable: &Variable, path: &[i64]) -> Option<Value> {
        if let Some(&index) = self.frame.indexes.get(variable) {
            return if path.is_empty() { Some(Value::Int(index)) } else { None };
        }
        self.store.map.get(&self.frame.key(variable))?.at(path)?.to_value()
    }
}

fn direction_of(h: &Heap, e: ExpressionId) -> Option<Direction> {
    h[e].root_variable(h).and_then(|r| r.direction)
}

///////////////////// BATON /////////////////////

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Resume {
    Step,   // pause again when blocked
    Finish, // run to completion; blocking is an error
}

#[derive(Debug)]
enum Yielded {
    Paused { progress: bool, waiting: String },
    Done,
    Failed(InterfaceError),
}

// PREFLIGHT's end of the channel pair.
struct Baton {
    resume: Sender<Resume>,
    yielded: Receiver<Yielded>,
    finished: Option<Result<(), InterfaceError>>,
    waiting: String,
}

impl Baton {
    /// Lets RUN proceed until it blocks. Returns whether it got anywhere.
    fn step(&mut self) -> Result<bool, InterfaceError> {
        match &self.finished {
            Some(Ok(())) => return Ok(false),
            Some(Err(e)) => return Err(e.clone()),
            None => {}
        }
        self.resume.send(Resume::Step).map_err(|_| InterfaceError::Aborted)?;
        self.receive()
    }
    fn finish(&mut self) -> Result<(), InterfaceError> {
        loop {
            if let Some(result) = &self.finished {
                return result.clone();
            }
            self.resume.send(Resume::Finish).map_err(|_| InterfaceError::Aborted)?;
            self.receive()?;
        }
    }
    fn receive(&mut self) -> Result<bool, InterfaceError> {
        match self.yielded.recv() {
            Ok(Yielded::Paused { progress, waiting }) => {
                self.waiting = waiting;
                Ok(progress)
            }
            Ok(Yielded::Done) => {
                self.finished = Some(Ok(()));
                Ok(true)
            }
            Ok(Yielded::Failed(e)) => {
                self.finished = Some(Err(e.clone()));
                Err(e)
            }
            Err(_) => Err(InterfaceError::Aborted),
        }
    }
    fn stalled(&self, needed: &str) -> InterfaceError {
        match &self.finished {
            Some(_) => InterfaceError::Stalled(format!("{} needed after the process finished", needed)),
            None => InterfaceError::Stalled(format!("{} needed while RUN waits for {}", needed, self.waiting)),
        }
    }
}

///////////////////// ENTRY /////////////////////

/// Enacts `interface` over `connection` until `main` completes or exits.
pub fn run(interface: &InterfaceDefinition, connection: Connection) -> Result<RunOutcome, InterfaceError> {
    let Connection { requests, responses, downward, upward } = connection;
    let h = &interface.heap;
    let signature = &interface.signature;
    let state = Mutex::new(State::default());
    let (resume_tx, resume_rx) = bounded(0);
    let (yielded_tx, yielded_rx) = bounded(0);
    let joined = crossbeam_utils::thread::scope(|s| {
        let state = &state;
        s.spawn(move |_| {
            Runner {
                h,
                main: interface.main,
                state,
                frame: Frame::new(Phase::Run, signature),
                downward: BufWriter::new(downward),
                upward,
                resume: resume_rx,
                yielded: yielded_tx,
                mode: Resume::Step,
                progress: false,
            }
            .start()
        });
        let mut preflight = Preflight {
            h,
            main: interface.main,
            signature,
            state,
            frame: Frame::new(Phase::Preflight, signature),
            requests: RequestReader::new(requests),
            responses,
            baton: Baton {
                resume: resume_tx,
                yielded: yielded_rx,
                finished: None,
                waiting: "its first resume".into(),
            },
        };
        let result = preflight.main();
        if let Err(e) = &result {
            log!(&mut lock(state).log, "{}: failed: {}", Phase::Preflight, e);
        }
        // dropping the baton unblocks a RUN still waiting to be resumed
        drop(preflight);
        result
    });
    let result = joined.map_err(|_| InterfaceError::Aborted)?;
    let log = state.into_inner().unwrap_or_else(|e| e.into_inner()).log;
    result.map(|()| RunOutcome { log })
}

///////////////////// PREFLIGHT /////////////////////

struct Preflight<'a> {
    h: &'a Heap,
    main: BlockId,
    signature: &'a InterfaceSignature,
    state: &'a Mutex<State>,
    frame: Frame<'a>,
    requests: RequestReader,
    responses: Box<dyn Write + Send>,
    baton: Baton,
}

impl<'a> Preflight<'a> {
    fn main(&mut self) -> Result<(), InterfaceError> {
        self.main_begin()?;
        match self.block(self.main) {
            Ok(()) => match self.requests.next()? {
                Request::MainEnd => log!(&mut lock(self.state).log, "{}: main_end", Phase::Preflight),
                other => return Err(InterfaceError::unexpected("main_end", other)),
            },
            Err(EvalContinuation::Exit) => {}
            Err(EvalContinuation::Failed(e)) => return Err(e),
            Err(other) => {
                return Err(InterfaceError::Stalled(format!("{:?} escaped main", other)));
            }
        }
        self.baton.finish()?;
        log!(&mut lock(self.state).log, "{}: done", Phase::Preflight);
        Ok(())
    }

    fn main_begin(&mut self) -> Result<(), InterfaceError> {
        let mut tokens = match self.requests.next()? {
            Request::MainBegin(tokens) => tokens,
            other => return Err(InterfaceError::unexpected("main_begin", other)),
        };
        let mut state = lock(self.state);
        log!(&mut state.log, "{}: main_begin", Phase::Preflight);
        for declaration in self.signature.variables.values() {
            if declaration.direction == Direction::Downward {
                let value = tokens.next_value(declaration.dimensions)?;
                self.frame.bind(&mut state.store, &declaration.variable, &[], &value)?;
                log!(&mut state.log, "{}: {} = {}", Phase::Preflight, declaration.variable, value);
            }
        }
        tokens.finish()
    }

    fn evaluate(&self, e: ExpressionId) -> Result<Value, InterfaceError> {
        let state = lock(self.state);
        self.h[e].evaluate(self.h, &View { frame: &self.frame, store: &state.store })
    }

    /// Evaluates `e`, letting RUN catch up while the value is upstream.
    fn demand(&mut self, e: ExpressionId) -> Result<Value, InterfaceError> {
        loop {
            match self.evaluate(e) {
                Err(InterfaceError::Unbound { variable }) => {
                    if !self.baton.step()? {
                        return Err(self.baton.stalled(&format!("'{}'", variable)));
                    }
                }
                other => return other,
            }
        }
    }
    fn demand_int(&mut self, e: ExpressionId) -> Result<i64, InterfaceError> {
        self.demand(e)?.as_int().ok_or(InterfaceError::NotScalar)
    }

    fn declare(&mut self, variable: &Variable) {
        let mut state = lock(self.state);
        self.frame.declare(&mut state.store, variable);
    }

    fn respond(&mut self, response: Response) -> Result<(), InterfaceError> {
        log!(&mut lock(self.state).log, "{}: response {}", Phase::Preflight, response);
        write_line(&mut self.responses, response)?;
        Ok(())
    }

    fn block(&mut self, b: BlockId) -> EvalResult {
        let h = self.h;
        for &s in &h[b].statements {
            self.statement(s)?;
        }
        Ok(())
    }

    fn statement(&mut self, s: StatementId) -> EvalResult {
        let h = self.h;
        match &h[s] {
            Statement::Var(v) => {
                for declaration in &v.declarations {
                    self.declare(&declaration.variable);
                }
            }
            Statement::Alloc(a) => {
                let mut evaluated = None;
                for (&argument, allocation) in a.arguments.iter().zip(&a.allocations) {
                    if direction_of(h, argument) != Some(Direction::Downward) {
                        continue;
                    }
                    let size = match evaluated {
                        Some(size) => size,
                        None => *evaluated.get_or_insert(self.demand_int(a.size)?),
                    };
                    let mut state = lock(self.state);
                    self.frame.allocate(&mut state.store, allocation, size)?;
                }
            }
            Statement::Const(_)
            | Statement::Function(_)
            | Statement::Callback(_)
            | Statement::Main(_)
            | Statement::Checkpoint(_)
            | Statement::Input(_)
            | Statement::Output(_)
            | Statement::Flush(_) => {}
            Statement::Call(c) => self.call(c)?,
            Statement::Return(r) => {
                let value = match self.requests.next()? {
                    Request::CallbackReturn(value) => value,
                    other => return Err(InterfaceError::unexpected("callback_return", other).into()),
                };
                log!(&mut lock(self.state).log, "{}: callback_return {}", Phase::Preflight, value);
                self.bind_argument(r.value, &Value::Int(value))?;
                return Err(EvalContinuation::Return);
            }
            Statement::Exit(_) => {
                match self.requests.next()? {
                    Request::Exit => {}
                    other => return Err(InterfaceError::unexpected("exit", other).into()),
                }
                log!(&mut lock(self.state).log, "{}: exit", Phase::Preflight);
                return Err(EvalContinuation::Exit);
            }
            Statement::Break(_) => return Err(EvalContinuation::Break),
            Statement::For(f) => {
                let range = self.demand_int(f.range)?;
                for i in 0..range {
                    self.frame.indexes.insert(f.index.clone(), i);
                    match self.block(f.body) {
                        Ok(()) => {}
                        Err(EvalContinuation::Break) => break,
                        Err(e) => return Err(e),
                    }
                }
                self.frame.indexes.remove(&f.index);
            }
            Statement::Loop(l) => loop {
                match self.block(l.body) {
                    Ok(()) => {}
                    Err(EvalContinuation::Break) => break,
                    Err(e) => return Err(e),
                }
            },
            Statement::If(i) => {
                let decision = self.decide_if(i)?;
                lock(self.state).decisions.push_back(decision);
                match (decision, i.else_body) {
                    (0, _) => self.block(i.then_body)?,
                    (_, Some(else_body)) => self.block(else_body)?,
                    _ => {}
                }
            }
            Statement::Switch(sw) => {
                if sw.cases.is_empty() {
                    return Ok(());
                }
                let decision = self.decide_switch(sw)?;
                lock(self.state).decisions.push_back(decision);
                self.block(sw.cases[decision].body)?;
            }
        }
        Ok(())
    }

    fn call(&mut self, c: &CallStatement) -> EvalResult {
        let prototype = self
            .signature
            .function(&c.function)
            .ok_or_else(|| InterfaceError::unexpected("a declared function", &c.function))?;
        let mut arguments = match self.requests.next()? {
            Request::FunctionCall { name, arguments } if name == c.function => arguments,
            Request::FunctionCall { name, .. } => {
                return Err(InterfaceError::WrongFunction { expected: c.function.clone(), actual: name }.into())
            }
            other => {
                return Err(InterfaceError::unexpected(format!("call to '{}'", c.function), other).into())
            }
        };
        log!(&mut lock(self.state).log, "{}: function_call {}", Phase::Preflight, c.function);
        for (&argument, parameter) in c.arguments.iter().zip(&prototype.parameters) {
            let value = arguments.next_value(parameter.dimensions)?;
            self.bind_argument(argument, &value)?;
        }
        let mut accepted = Vec::with_capacity(prototype.callbacks.len());
        for _ in &prototype.callbacks {
            accepted.push(arguments.next_int()? != 0);
        }
        arguments.finish()?;
        while let Some(context) = self.next_callback()? {
            if !accepted.get(context.index).copied().unwrap_or(false) {
                return Err(InterfaceError::CallbackNotAccepted { callback: context.name }.into());
            }
            self.respond(Response::Callback { index: context.index, arguments: context.arguments.clone() })?;
            self.callback(&context)?;
        }
        let value = match c.return_value {
            Some(target) => Some(self.demand_int(target)?),
            None => None,
        };
        self.respond(Response::Return(value))?;
        Ok(())
    }

    // `None` once the process returned from the current call.
    fn next_callback(&mut self) -> Result<Option<CallbackContext>, InterfaceError> {
        loop {
            let next = lock(self.state).callbacks.pop_front();
            match next {
                Some(context) => return Ok(context),
                None => {
                    if !self.baton.step()? {
                        return Err(self.baton.stalled("the outcome of a call"));
                    }
                }
            }
        }
    }

    fn callback(&mut self, context: &CallbackContext) -> EvalResult {
        let callback = self
            .signature
            .callback(&context.name)
            .ok_or_else(|| InterfaceError::UnknownCallback { name: context.name.clone() })?;
        self.frame.in_callback = true;
        for parameter in &callback.parameters {
            self.declare(&parameter.variable);
        }
        let result = match self.block(callback.body) {
            Ok(()) | Err(EvalContinuation::Return) => Ok(()),
            Err(e) => Err(e),
        };
        self.frame.in_callback = false;
        result
    }

    /// Checks or binds the expression a request value lands in.
    fn bind_argument(&mut self, e: ExpressionId, value: &Value) -> Result<(), InterfaceError> {
        let h = self.h;
        match h[e].root_variable(h).map(|r| r.direction) {
            // the process reports these itself
            Some(Some(Direction::Upward)) => Ok(()),
            Some(Some(Direction::Downward)) => {
                let mut state = lock(self.state);
                let access = h[e].access_path(h, &View { frame: &self.frame, store: &state.store })?;
                match access {
                    Some((variable, path)) => self.frame.bind(&mut state.store, &variable, &path, value),
                    None => Ok(()),
                }
            }
            _ => {
                let actual = self.evaluate(e)?;
                if actual == *value {
                    Ok(())
                } else {
                    Err(InterfaceError::ValueMismatch {
                        variable: expression_name(h, e),
                        expected: actual.to_string(),
                        actual: value.to_string(),
                    })
                }
            }
        }
    }

    fn decide_if(&mut self, s: &IfStatement) -> Result<usize, InterfaceError> {
        match self.evaluate(s.condition) {
            Ok(value) => return Ok(if value.as_int() == Some(0) { 1 } else { 0 }),
            Err(InterfaceError::Unbound { .. }) => {}
            Err(e) => return Err(e),
        }
        let h = self.h;
        let otherwise = btreeset! { None };
        let else_calls = match s.else_body {
            Some(b) => &h[b].first_calls,
            None => &otherwise,
        };
        let decision = self.resolve(&[&h[s.then_body].first_calls, else_calls])?;
        self.bind_condition(s.condition, &Value::Int(if decision == 0 { 1 } else { 0 }))?;
        Ok(decision)
    }

    fn decide_switch(&mut self, s: &SwitchStatement) -> Result<usize, InterfaceError> {
        match self.evaluate(s.value) {
            Ok(value) => {
                for (i, case) in s.cases.iter().enumerate() {
                    for &label in &case.labels {
                        if self.evaluate(label)? == value {
                            return Ok(i);
                        }
                    }
                }
                return Err(InterfaceError::NoMatchingBranch { token: format!("value {}", value) });
            }
            Err(InterfaceError::Unbound { .. }) => {}
            Err(e) => return Err(e),
        }
        let h = self.h;
        let branches: Vec<&FirstCalls> = s.cases.iter().map(|case| &h[case.body].first_calls).collect();
        let decision = self.resolve(&branches)?;
        if let Some(&label) = s.cases[decision].labels.first() {
            let value = self.evaluate(label)?;
            self.bind_condition(s.value, &value)?;
        }
        Ok(decision)
    }

    // First branch that expects the pending call, else the first one that
    // may proceed without one.
    fn resolve(&mut self, branches: &[&FirstCalls]) -> Result<usize, InterfaceError> {
        let token = self.requests.peek_token()?;
        branches
            .iter()
            .position(|calls| calls.contains(&token))
            .or_else(|| branches.iter().position(|calls| calls.contains(&None)))
            .ok_or_else(|| InterfaceError::NoMatchingBranch {
                token: match token {
                    Some(token) => token.to_string(),
                    None => "a request without a call".into(),
                },
            })
    }

    fn bind_condition(&mut self, e: ExpressionId, value: &Value) -> Result<(), InterfaceError> {
        if direction_of(self.h, e) == Some(Direction::Downward) {
            self.bind_argument(e, value)?;
        }
        Ok(())
    }
}

fn expression_name(h: &Heap, e: ExpressionId) -> String {
    match &h[e] {
        Expression::IntLiteral(literal) => match &literal.constant {
            Some(name) => name.clone(),
            None => literal.value.to_string(),
        },
        Expression::Reference(reference) => reference.variable.name.clone(),
        Expression::Subscript(subscript) => {
            format!("{}[{}]", expression_name(h, subscript.array), expression_name(h, subscript.index))
        }
    }
}

///////////////////// RUN /////////////////////

struct Runner<'a> {
    h: &'a Heap,
    main: BlockId,
    state: &'a Mutex<State>,
    frame: Frame<'a>,
    downward: BufWriter<Box<dyn Write + Send>>,
    upward: Box<dyn BufRead + Send>,
    resume: Receiver<Resume>,
    yielded: Sender<Yielded>,
    mode: Resume,
    progress: bool,
}

impl<'a> Runner<'a> {
    fn start(mut self) {
        self.mode = match self.resume.recv() {
            Ok(mode) => mode,
            Err(_) => return,
        };
        let result = match self.block(self.main) {
            Ok(()) | Err(EvalContinuation::Exit) => self.downward.flush().map_err(EvalContinuation::from),
            Err(e) => Err(e),
        };
        let message = match result {
            Ok(()) => {
                log!(&mut lock(self.state).log, "{}: done", Phase::Run);
                Yielded::Done
            }
            Err(EvalContinuation::Failed(InterfaceError::Aborted)) => return,
            Err(EvalContinuation::Failed(e)) => {
                log!(&mut lock(self.state).log, "{}: failed: {}", Phase::Run, e);
                Yielded::Failed(e)
            }
            Err(other) => Yielded::Failed(InterfaceError::Stalled(format!("{:?} escaped main", other))),
        };
        let _ = self.yielded.send(message);
    }

    // Hands the baton back until PREFLIGHT has produced more.
    fn pause(&mut self, waiting: String) -> EvalResult {
        if self.mode == Resume::Finish {
            return Err(InterfaceError::Stalled(format!("{} blocked on {}", Phase::Run, waiting)).into());
        }
        self.downward.flush()?;
        let paused = Yielded::Paused { progress: self.progress, waiting };
        self.yielded.send(paused).map_err(|_| InterfaceError::Aborted)?;
        self.progress = false;
        self.mode = self.resume.recv().map_err(|_| InterfaceError::Aborted)?;
        Ok(())
    }

    fn value(&mut self, e: ExpressionId) -> Result<Value, EvalContinuation> {
        loop {
            let attempt = {
                let state = lock(self.state);
                self.h[e].evaluate(self.h, &View { frame: &self.frame, store: &state.store })
            };
            match attempt {
                Ok(value) => return Ok(value),
                Err(InterfaceError::Unbound { variable }) => self.pause(format!("'{}'", variable))?,
                Err(e) => return Err(e.into()),
            }
        }
    }
    fn int(&mut self, e: ExpressionId) -> Result<i64, EvalContinuation> {
        Ok(self.value(e)?.as_int().ok_or(InterfaceError::NotScalar)?)
    }

    fn decision(&mut self) -> Result<usize, EvalContinuation> {
        loop {
            let next = lock(self.state).decisions.pop_front();
            match next {
                Some(decision) => return Ok(decision),
                None => self.pause("a branch decision".into())?,
            }
        }
    }

    fn read_upward(&mut self, what: &str) -> Result<String, EvalContinuation> {
        self.downward.flush()?;
        let mut line = String::new();
        loop {
            line.clear();
            if self.upward.read_line(&mut line)? == 0 {
                return Err(InterfaceError::Disconnected(what.to_owned()).into());
            }
            if !line.trim().is_empty() {
                break;
            }
        }
        let line = line.trim().to_owned();
        log!(&mut lock(self.state).log, "{}: <- {}", Phase::Run, line);
        Ok(line)
    }

    fn write_downward(&mut self, values: &[i64]) -> EvalResult {
        let line = values.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");
        log!(&mut lock(self.state).log, "{}: -> {}", Phase::Run, line);
        writeln!(self.downward, "{}", line)?;
        Ok(())
    }

    fn declare(&mut self, variable: &Variable) {
        let mut state = lock(self.state);
        self.frame.declare(&mut state.store, variable);
    }

    fn block(&mut self, b: BlockId) -> EvalResult {
        let h = self.h;
        for &s in &h[b].statements {
            self.statement(s)?;
        }
        Ok(())
    }

    fn statement(&mut self, s: StatementId) -> EvalResult {
        let h = self.h;
        self.progress = true;
        match &h[s] {
            Statement::Var(v) => {
                for declaration in &v.declarations {
                    self.declare(&declaration.variable);
                }
            }
            Statement::Alloc(a) => {
                let mut evaluated = None;
                for (&argument, allocation) in a.arguments.iter().zip(&a.allocations) {
                    if direction_of(h, argument) != Some(Direction::Upward) {
                        continue;
                    }
                    let size = match evaluated {
                        Some(size) => size,
                        None => *evaluated.get_or_insert(self.int(a.size)?),
                    };
                    let mut state = lock(self.state);
                    self.frame.allocate(&mut state.store, allocation, size)?;
                }
            }
            Statement::Const(_)
            | Statement::Function(_)
            | Statement::Callback(_)
            | Statement::Main(_)
            | Statement::Flush(_) => {}
            Statement::Checkpoint(_) => {
                let line = self.read_upward("a checkpoint")?;
                if line != "0" {
                    return Err(InterfaceError::malformed("checkpoint", line).into());
                }
            }
            Statement::Input(i) => {
                let mut values = Vec::with_capacity(i.arguments.len());
                for &argument in &i.arguments {
                    values.push(self.int(argument)?);
                }
                self.write_downward(&values)?;
            }
            Statement::Output(o) => {
                let line = self.read_upward("output")?;
                let values = parse_ints(&line, "output")?;
                if values.len() != o.arguments.len() {
                    return Err(InterfaceError::malformed("output", line).into());
                }
                for (&argument, &value) in o.arguments.iter().zip(&values) {
                    let mut state = lock(self.state);
                    let access = h[argument].access_path(h, &View { frame: &self.frame, store: &state.store })?;
                    if let Some((variable, path)) = access {
                        self.frame.bind(&mut state.store, &variable, &path, &Value::Int(value))?;
                    }
                }
            }
            Statement::Call(c) => self.call(c)?,
            Statement::Return(_) => return Err(EvalContinuation::Return),
            Statement::Exit(_) => return Err(EvalContinuation::Exit),
            Statement::Break(_) => return Err(EvalContinuation::Break),
            Statement::For(f) => {
                let range = self.int(f.range)?;
                for i in 0..range {
                    self.frame.indexes.insert(f.index.clone(), i);
                    match self.block(f.body) {
                        Ok(()) => {}
                        Err(EvalContinuation::Break) => break,
                        Err(e) => return Err(e),
                    }
                }
                self.frame.indexes.remove(&f.index);
            }
            Statement::Loop(l) => loop {
                match self.block(l.body) {
                    Ok(()) => {}
                    Err(EvalContinuation::Break) => break,
                    Err(e) => return Err(e),
                }
            },
            Statement::If(i) => match (self.decision()?, i.else_body) {
                (0, _) => self.block(i.then_body)?,
                (_, Some(else_body)) => self.block(else_body)?,
                _ => {}
            },
            Statement::Switch(sw) => {
                if !sw.cases.is_empty() {
                    let decision = self.decision()?;
                    self.block(sw.cases[decision].body)?;
                }
            }
        }
        Ok(())
    }

    fn call(&mut self, c: &CallStatement) -> EvalResult {
        let signature = self.frame.signature;
        let prototype = signature
            .function(&c.function)
            .ok_or_else(|| InterfaceError::unexpected("a declared function", &c.function))?;
        if prototype.has_callbacks() {
            loop {
                let line = self.read_upward("a callback or 'return'")?;
                let mut words = line.split_whitespace();
                let name = match words.next() {
                    Some("return") => break,
                    Some(name) => name.to_owned(),
                    None => return Err(InterfaceError::malformed("callback", &line).into()),
                };
                let index = prototype
                    .callbacks
                    .iter()
                    .position(|callback| *callback == name)
                    .ok_or_else(|| InterfaceError::UnknownCallback { name: name.clone() })?;
                let callback = signature
                    .callback(&name)
                    .ok_or_else(|| InterfaceError::UnknownCallback { name: name.clone() })?;
                let arguments = words
                    .map(|word| word.parse::<i64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| InterfaceError::malformed("callback", &line))?;
                if arguments.len() != callback.parameters.len() {
                    return Err(InterfaceError::malformed("callback", &line).into());
                }
                self.frame.in_callback = true;
                {
                    let mut state = lock(self.state);
                    for (parameter, &argument) in callback.parameters.iter().zip(&arguments) {
                        self.frame.declare(&mut state.store, &parameter.variable);
                        self.frame.bind(&mut state.store, &parameter.variable, &[], &Value::Int(argument))?;
                    }
                    state.callbacks.push_back(Some(CallbackContext { index, name, arguments }));
                }
                match self.block(callback.body) {
                    Ok(()) | Err(EvalContinuation::Return) => {}
                    Err(e) => return Err(e),
                }
                self.frame.in_callback = false;
            }
        }
        lock(self.state).callbacks.push_back(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_merge_partially() {
        let mut slot = Slot::Array(vec![Slot::Empty, Slot::Int(2)]);
        assert_eq!(slot.to_value(), None);
        assert!(slot.merge(&Value::Array(vec![Value::Int(1), Value::Int(2)])));
        assert_eq!(slot.to_value(), Some(Value::Array(vec![Value::Int(1), Value::Int(2)])));
        assert!(!slot.merge(&Value::Array(vec![Value::Int(1), Value::Int(3)])));
        assert!(!slot.merge(&Value::Int(1)));
        assert_eq!(slot.at(&[1]), Some(&Slot::Int(2)));
        assert_eq!(slot.at(&[2]), None);
        assert_eq!(slot.at(&[-1]), None);
    }

    #[test]
    fn epochs_isolate_redeclarations() {
        let signature = InterfaceSignature::default();
        let mut store = Store::default();
        let mut early = Frame::new(Phase::Preflight, &signature);
        let mut late = Frame::new(Phase::Run, &signature);
        let x = Variable::new("x");
        early.declare(&mut store, &x);
        late.declare(&mut store, &x);
        late.bind(&mut store, &x, &[], &Value::Int(1)).unwrap();
        late.declare(&mut store, &x);
        late.bind(&mut store, &x, &[], &Value::Int(2)).unwrap();
        let view = View { frame: &early, store: &store };
        assert_eq!(view.lookup(&x, &[]), Some(Value::Int(1)));
        early.declare(&mut store, &x);
        assert_eq!(View { frame: &early, store: &store }.lookup(&x, &[]), Some(Value::Int(2)));
        // both phases left epoch 0 behind
        assert_eq!(store.map.len(), 1);
    }

    #[test]
    fn allocation_keeps_equal_sizes() {
        let signature = InterfaceSignature::default();
        let mut store = Store::default();
        let mut frame = Frame::new(Phase::Run, &signature);
        let a = Variable::new("a");
        let allocation = VariableAllocation { variable: a.clone(), indexes: vec![], dimensions: 1 };
        frame.allocate(&mut store, &allocation, 2).unwrap();
        frame.bind(&mut store, &a, &[0], &Value::Int(7)).unwrap();
        frame.allocate(&mut store, &allocation, 2).unwrap();
        assert_eq!(View { frame: &frame, store: &store }.lookup(&a, &[0]), Some(Value::Int(7)));
        frame.allocate(&mut store, &allocation, 3).unwrap();
        assert_eq!(View { frame: &frame, store: &store }.lookup(&a, &[0]), None);
        assert_let![Err(InterfaceError::ValueMismatch { variable, .. }) = {
            frame.bind(&mut store, &a, &[1], &Value::Int(1)).unwrap();
            frame.bind(&mut store, &a, &[1], &Value::Int(2))
        } => {
            assert_eq!(variable, "a[1]");
        }];
        let nested = VariableAllocation { variable: Variable::new("m"), indexes: vec![Variable::new("i")], dimensions: 1 };
        frame.indexes.insert(Variable::new("i"), 0);
        assert_eq!(
            frame.allocate(&mut store, &nested, 1),
            Err(InterfaceError::NotAllocated { variable: "m[]".into() })
        );
    }

    #[test]
    fn callback_queue_ends_with_a_marker() {
        let interface = InterfaceDefinition::parse(
            b"function solve() callbacks tell, ping;\n\
              callback tell(int y) { }\n\
              callback ping(int z) { }\n\
              main { call solve(); exit; }\n",
        )
        .unwrap();
        let h = &interface.heap;
        let call = h[interface.main]
            .statements
            .iter()
            .find_map(|&s| match &h[s] {
                Statement::Call(c) => Some(c),
                _ => None,
            })
            .unwrap();
        let state = Mutex::new(State::default());
        let (_resume_tx, resume_rx) = bounded(0);
        let (yielded_tx, _yielded_rx) = bounded(0);
        let mut runner = Runner {
            h,
            main: interface.main,
            state: &state,
            frame: Frame::new(Phase::Run, &interface.signature),
            downward: BufWriter::new(Box::new(std::io::sink())),
            upward: Box::new(std::io::Cursor::new(b"tell 4\nping 1\ntell 5\nreturn\n".to_vec())),
            resume: resume_rx,
            yielded: yielded_tx,
            mode: Resume::Finish,
            progress: false,
        };
        runner.call(call).unwrap();
        let callbacks: Vec<_> = lock(&state).callbacks.iter().cloned().collect();
        // one entry per accepted callback, then the terminal marker
        assert_eq!(callbacks.len(), 3 + 1);
        assert_eq!(callbacks[1], Some(CallbackContext { index: 1, name: "ping".into(), arguments: vec![1] }));
        assert_eq!(callbacks[2].as_ref().map(|c| c.arguments.clone()), Some(vec![5]));
        assert_eq!(callbacks[3], None);
    }

    #[test]
    fn allocation_sizes_are_bounded() {
        let signature = InterfaceSignature::default();
        let mut store = Store::default();
        let frame = Frame::new(Phase::Run, &signature);
        let allocation = VariableAllocation { variable: Variable::new("a"), indexes: vec![], dimensions: 1 };
        assert_eq!(
            frame.allocate(&mut store, &allocation, i64::MAX),
            Err(InterfaceError::malformed("array size", i64::MAX))
        );
        assert!(frame.allocate(&mut store, &allocation, MAX_ARRAY_SIZE + 1).is_err());
        assert!(frame.allocate(&mut store, &allocation, -1).is_err());
    }
}
