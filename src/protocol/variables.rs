use std::fmt;

use crate::protocol::inputsource::InputPosition;

/// A named scalar or array. Two variables are the same iff their names are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable {
    pub name: String,
}

/// A variable after `index_count` subscript applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    pub variable: Variable,
    pub index_count: usize,
}

/// Which phase of the engine owns (binds and resets) a variable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Downward, // driver -> process, bound from requests
    Upward,   // process -> driver, bound from the upward channel
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDeclaration {
    pub position: InputPosition,
    pub variable: Variable,
    pub dimensions: usize,
    pub direction: Direction,
}

/// An `alloc` target: the indexes already applied to the variable, the
/// requested size, and the dimensions left after this allocation level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableAllocation {
    pub variable: Variable,
    pub indexes: Vec<Variable>,
    pub dimensions: usize,
}

impl Variable {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Variable { name: name.into() }
    }
    pub fn as_reference(&self) -> Reference {
        Reference { variable: self.clone(), index_count: 0 }
    }
}

impl Reference {
    pub fn new(variable: Variable, index_count: usize) -> Self {
        Reference { variable, index_count }
    }
    /// The reference one subscript deeper.
    pub fn subscripted(&self) -> Reference {
        Reference { variable: self.variable.clone(), index_count: self.index_count + 1 }
    }
}

impl VariableAllocation {
    pub fn declared_dimensions(&self) -> usize {
        self.indexes.len() + self.dimensions
    }
    pub fn reference(&self) -> Reference {
        Reference::new(self.variable.clone(), self.indexes.len())
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(&self.name)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.variable)?;
        for _ in 0..self.index_count {
            write!(f, "[]")?;
        }
        Ok(())
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Downward => f.pad("downward"),
            Direction::Upward => f.pad("upward"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::*;

    #[test]
    fn reference_equality() {
        let v = Variable::new("v");
        assert_eq!(Reference::new(v.clone(), 2), Reference::new(v.clone(), 2));
        assert_ne!(Reference::new(v.clone(), 1), Reference::new(v.clone(), 2));
        assert_ne!(Reference::new(v.clone(), 2), Reference::new(Variable::new("w"), 2));
        assert_eq!(v.as_reference().subscripted().subscripted(), Reference::new(v, 2));
    }

    #[test]
    fn references_as_keys() {
        let v = Variable::new("a");
        let set = hashset! { Reference::new(v.clone(), 1), Reference::new(v.clone(), 1) };
        assert_eq!(set.len(), 1);
        assert_eq!(format!("{}", Reference::new(v, 2)), "a[][]");
    }

    #[test]
    fn allocation_dimensions() {
        let alloc = VariableAllocation {
            variable: Variable::new("m"),
            indexes: vec![Variable::new("i")],
            dimensions: 1,
        };
        assert_eq!(alloc.declared_dimensions(), 2);
        assert_eq!(alloc.reference(), Reference::new(Variable::new("m"), 1));
    }
}
