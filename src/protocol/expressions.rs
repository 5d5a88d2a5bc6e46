use std::fmt;

use crate::protocol::ast::*;
use crate::protocol::variables::*;
use crate::runtime::errors::InterfaceError;

/// A runtime value: an integer or a (possibly nested) array of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Array(Vec<Value>),
}

/// Read access to the values visible to an expression. `path` holds the
/// subscripts applied to `variable`; `None` means "not bound (yet)".
pub trait Environment {
    fn lookup(&self, variable: &Variable, path: &[i64]) -> Option<Value>;
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(x) => Some(*x),
            Value::Array(_) => None,
        }
    }
    pub fn element(&self, index: i64) -> Option<&Value> {
        match self {
            Value::Array(items) if index >= 0 => items.get(index as usize),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(x) => write!(f, "{}", x),
            Value::Array(items) => {
                write!(f, "{}", items.len())?;
                for item in items {
                    write!(f, " {}", item)?;
                }
                Ok(())
            }
        }
    }
}

impl Expression {
    /// Array rank left after the subscripts written in this expression.
    pub fn dimensions(&self, h: &Heap) -> usize {
        match self {
            Expression::IntLiteral(_) => 0,
            Expression::Reference(e) => e.dimensions,
            Expression::Subscript(e) => h[e.array].dimensions(h).saturating_sub(1),
        }
    }
    /// The location this expression denotes, if it is reference-shaped.
    pub fn reference(&self, h: &Heap) -> Option<Reference> {
        match self {
            Expression::IntLiteral(_) => None,
            Expression::Reference(e) => Some(e.variable.as_reference()),
            Expression::Subscript(e) => {
                let array = h[e.array].reference(h)?;
                match &e.expected_index {
                    Some(expected) if h[e.index].is_reference_to(h, expected) => {
                        Some(array.subscripted())
                    }
                    _ => None,
                }
            }
        }
    }
    pub fn is_reference_to(&self, h: &Heap, variable: &Variable) -> bool {
        self.reference(h) == Some(variable.as_reference())
    }
    /// The variable at the root of a reference or subscript chain.
    pub fn root_variable<'h>(&'h self, h: &'h Heap) -> Option<&'h ReferenceExpression> {
        match self {
            Expression::IntLiteral(_) => None,
            Expression::Reference(e) => Some(e),
            Expression::Subscript(e) => h[e.array].root_variable(h),
        }
    }
    pub fn literal_value(&self) -> Option<i64> {
        match self {
            Expression::IntLiteral(e) => Some(e.value),
            _ => None,
        }
    }
    /// Root variable plus the evaluated subscript path.
    pub fn access_path(
        &self,
        h: &Heap,
        env: &dyn Environment,
    ) -> Result<Option<(Variable, Vec<i64>)>, InterfaceError> {
        match self {
            Expression::IntLiteral(_) => Ok(None),
            Expression::Reference(e) => Ok(Some((e.variable.clone(), Vec::new()))),
            Expression::Subscript(e) => {
                let index = h[e.index].evaluate_int(h, env)?;
                Ok(h[e.array].access_path(h, env)?.map(|(variable, mut path)| {
                    path.push(index);
                    (variable, path)
                }))
            }
        }
    }
    pub fn evaluate(&self, h: &Heap, env: &dyn Environment) -> Result<Value, InterfaceError> {
        match self.access_path(h, env)? {
            None => Ok(Value::Int(self.literal_value().unwrap_or_default())),
            Some((variable, path)) => {
                env.lookup(&variable, &path).ok_or_else(|| InterfaceError::unbound(&variable.name))
            }
        }
    }
    pub fn evaluate_int(&self, h: &Heap, env: &dyn Environment) -> Result<i64, InterfaceError> {
        match self.evaluate(h, env)? {
            Value::Int(x) => Ok(x),
            Value::Array(_) => Err(InterfaceError::NotScalar),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::*;
    use crate::protocol::inputsource::InputPosition;

    struct Env(HashMap<Variable, Value>);

    impl Environment for Env {
        fn lookup(&self, variable: &Variable, path: &[i64]) -> Option<Value> {
            let mut value = self.0.get(variable)?;
            for &index in path {
                value = value.element(index)?;
            }
            Some(value.clone())
        }
    }

    fn reference(h: &mut Heap, name: &str, dimensions: usize) -> ExpressionId {
        h.alloc_expression(|_| {
            Expression::Reference(ReferenceExpression {
                position: InputPosition::default(),
                variable: Variable::new(name),
                dimensions,
                direction: Some(Direction::Downward),
            })
        })
    }

    fn subscript(h: &mut Heap, array: ExpressionId, index: ExpressionId, expected: &str) -> ExpressionId {
        h.alloc_expression(|_| {
            Expression::Subscript(SubscriptExpression {
                position: InputPosition::default(),
                array,
                index,
                expected_index: Some(Variable::new(expected)),
            })
        })
    }

    #[test]
    fn subscript_reference_needs_expected_index() {
        let mut h = Heap::new();
        let a = reference(&mut h, "a", 1);
        let i = reference(&mut h, "i", 0);
        let matching = subscript(&mut h, a, i, "i");
        let j = reference(&mut h, "j", 0);
        let mismatched = subscript(&mut h, a, j, "i");
        assert_eq!(h[matching].reference(&h), Some(Reference::new(Variable::new("a"), 1)));
        assert_eq!(h[mismatched].reference(&h), None);
        assert_eq!(h[mismatched].dimensions(&h), 0);
    }

    #[test]
    fn evaluate_nested() {
        let mut h = Heap::new();
        let m = reference(&mut h, "m", 2);
        let i = reference(&mut h, "i", 0);
        let j = reference(&mut h, "j", 0);
        let row = subscript(&mut h, m, i, "i");
        let cell = subscript(&mut h, row, j, "j");
        let env = Env(hashmap! {
            Variable::new("m") => Value::Array(vec![
                Value::Array(vec![Value::Int(1), Value::Int(2)]),
                Value::Array(vec![Value::Int(3), Value::Int(4)]),
            ]),
            Variable::new("i") => Value::Int(1),
            Variable::new("j") => Value::Int(0),
        });
        assert_eq!(h[cell].evaluate(&h, &env), Ok(Value::Int(3)));
        assert_eq!(h[row].evaluate(&h, &env).unwrap().to_string(), "2 3 4");
        let env = Env(hashmap! { Variable::new("i") => Value::Int(7) });
        assert_eq!(h[cell].evaluate(&h, &env), Err(InterfaceError::unbound("m")));
    }
}
