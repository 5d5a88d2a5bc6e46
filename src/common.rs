///////////////////// PRELUDE /////////////////////

pub use core::fmt::Debug;
pub use indexmap::{IndexMap, IndexSet};
pub use maplit::{btreeset, hashmap, hashset};
pub use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

///////////////////// DEFS /////////////////////

/// Which side of the channel the engine is currently enacting.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Phase {
    Preflight, // consumes requests, produces responses
    Run,       // writes downward, reads upward
}

/// What a pending request is about to do, as far as branching is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallToken {
    Function(String),
    Exit,
}

/// `None` stands for "may proceed without issuing a call".
pub type FirstCalls = BTreeSet<Option<CallToken>>;

///////////////////// IMPL /////////////////////

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Phase::Preflight => f.pad("PREFLIGHT"),
            Phase::Run => f.pad("RUN"),
        }
    }
}

impl std::fmt::Display for CallToken {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CallToken::Function(name) => write!(f, "call to '{}'", name),
            CallToken::Exit => f.pad("exit"),
        }
    }
}

impl CallToken {
    pub fn function<S: Into<String>>(name: S) -> Self {
        CallToken::Function(name.into())
    }
}
