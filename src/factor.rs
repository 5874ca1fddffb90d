use ndarray::{ArrayD, Axis, IxDyn};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FactorError {
    #[error("Variable {0} is not in the factor scope.")]
    UnknownVariable(String),
    #[error("State {value} is out of range for variable {var} of cardinality {cardinality}.")]
    StateOutOfRange {
        var: String,
        value: usize,
        cardinality: usize,
    },
    #[error("Variable {0} appears more than once in the scope.")]
    DuplicateScopeVariable(String),
    #[error("Variable {0} must have at least one state.")]
    EmptyDomain(String),
    #[error("Value table has {got} entries, the scope cardinalities require {expected}.")]
    TableSize { got: usize, expected: usize },
    #[error("Factor values must be finite and non-negative, got {0}.")]
    InvalidValue(f64),
    #[error("Variable {name} has conflicting cardinalities {left} and {right}.")]
    CardinalityMismatch {
        name: String,
        left: usize,
        right: usize,
    },
    #[error("Factor table sums to zero, cannot normalize.")]
    Degenerate,
}

type Result<T> = std::result::Result<T, FactorError>;

/// A named discrete random variable with states `0..cardinality`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Variable {
    name: String,
    cardinality: usize,
}

impl Variable {
    pub fn new(name: impl Into<String>, cardinality: usize) -> Result<Self> {
        let name = name.into();
        if cardinality == 0 {
            return Err(FactorError::EmptyDomain(name));
        }
        Ok(Self { name, cardinality })
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }
}

/// An unnormalized potential over an ordered scope of distinct variables.
///
/// The value table is dense, shaped by the scope cardinalities in order.
/// ndarray's row-major layout makes the last scope variable vary fastest,
/// so flat `values` in constructors follow that convention. All operations
/// return new factors and never mutate their operands.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DiscreteFactor {
    scope: Vec<Variable>,
    table: ArrayD<f64>,
}

impl DiscreteFactor {
    /// Builds a factor from a flat row-major value table.
    pub fn new(scope: Vec<Variable>, values: Vec<f64>) -> Result<Self> {
        for (i, v) in scope.iter().enumerate() {
            if scope[..i].iter().any(|u| u.name == v.name) {
                return Err(FactorError::DuplicateScopeVariable(v.name.clone()));
            }
        }
        let shape: Vec<usize> = scope.iter().map(|v| v.cardinality).collect();
        let expected: usize = shape.iter().product();
        if values.len() != expected {
            return Err(FactorError::TableSize {
                got: values.len(),
                expected,
            });
        }
        if let Some(bad) = values.iter().find(|x| !x.is_finite() || **x < 0.0) {
            return Err(FactorError::InvalidValue(*bad));
        }
        let table = ArrayD::from_shape_vec(IxDyn(&shape), values).expect("shape checked above");
        Ok(Self { scope, table })
    }

    pub fn scope(&self) -> &[Variable] {
        &self.scope
    }
    pub fn table(&self) -> &ArrayD<f64> {
        &self.table
    }
    /// Total mass of the value table.
    pub fn sum(&self) -> f64 {
        self.table.sum()
    }
    pub fn contains(&self, name: &str) -> bool {
        self.scope.iter().any(|v| v.name == name)
    }
    fn axis_of(&self, name: &str) -> Result<usize> {
        self.scope
            .iter()
            .position(|v| v.name == name)
            .ok_or_else(|| FactorError::UnknownVariable(name.to_owned()))
    }

    /// Pointwise product over the ordered union of both scopes: this
    /// factor's variables first, then the other's new ones. Variables
    /// absent from one operand broadcast over it.
    pub fn product(&self, other: &DiscreteFactor) -> Result<DiscreteFactor> {
        let mut scope = self.scope.clone();
        for v in &other.scope {
            match scope.iter().find(|u| u.name == v.name) {
                Some(u) if u.cardinality != v.cardinality => {
                    return Err(FactorError::CardinalityMismatch {
                        name: v.name.clone(),
                        left: u.cardinality,
                        right: v.cardinality,
                    });
                }
                Some(_) => {}
                None => scope.push(v.clone()),
            }
        }
        let lhs = self.aligned(&scope);
        let rhs = other.aligned(&scope);
        let table = &lhs * &rhs;
        Ok(DiscreteFactor { scope, table })
    }

    /// Permutes and expands the table so its axes line up with `target`,
    /// which must contain every scope variable. Missing variables become
    /// broadcastable length-1 axes.
    fn aligned(&self, target: &[Variable]) -> ArrayD<f64> {
        let pos: Vec<usize> = self
            .scope
            .iter()
            .map(|v| {
                target
                    .iter()
                    .position(|u| u.name == v.name)
                    .expect("target covers the scope")
            })
            .collect();
        let mut order: Vec<usize> = (0..pos.len()).collect();
        order.sort_unstable_by_key(|&ax| pos[ax]);
        let mut t = self.table.clone().permuted_axes(IxDyn(&order));
        for (i, u) in target.iter().enumerate() {
            if !self.contains(&u.name) {
                t = t.insert_axis(Axis(i));
            }
        }
        t
    }

    /// Sums out the named variables; the remaining scope keeps its
    /// relative order. Summing out the whole scope leaves a scalar
    /// (0-dimensional) factor holding the total mass.
    pub fn marginalize(&self, names: &[&str]) -> Result<DiscreteFactor> {
        let mut axes: Vec<usize> = names
            .iter()
            .map(|n| self.axis_of(n))
            .collect::<Result<_>>()?;
        axes.sort_unstable();
        axes.dedup();
        let mut table = self.table.clone();
        for &ax in axes.iter().rev() {
            table = table.sum_axis(Axis(ax));
        }
        let scope = self
            .scope
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, v)| v.clone())
            .collect();
        Ok(DiscreteFactor { scope, table })
    }

    /// Evidence clamping: restricts the table to the slice where
    /// `name == value` and drops the variable from the scope.
    pub fn reduce(&self, name: &str, value: usize) -> Result<DiscreteFactor> {
        let ax = self.axis_of(name)?;
        let cardinality = self.scope[ax].cardinality;
        if value >= cardinality {
            return Err(FactorError::StateOutOfRange {
                var: name.to_owned(),
                value,
                cardinality,
            });
        }
        let table = self.table.index_axis(Axis(ax), value).to_owned();
        let mut scope = self.scope.clone();
        scope.remove(ax);
        Ok(DiscreteFactor { scope, table })
    }

    /// Divides every entry by the total mass.
    pub fn normalize(&self) -> Result<DiscreteFactor> {
        let z = self.sum();
        if z <= 0.0 {
            return Err(FactorError::Degenerate);
        }
        Ok(DiscreteFactor {
            scope: self.scope.clone(),
            table: &self.table / z,
        })
    }

    /// Reorders the scope (and table axes) to the given variable order,
    /// which must be a permutation of the scope names.
    pub fn reordered(&self, order: &[&str]) -> Result<DiscreteFactor> {
        if order.len() != self.scope.len() {
            return Err(FactorError::TableSize {
                got: order.len(),
                expected: self.scope.len(),
            });
        }
        for (i, n) in order.iter().enumerate() {
            if order[..i].contains(n) {
                return Err(FactorError::DuplicateScopeVariable((*n).to_owned()));
            }
        }
        let scope: Vec<Variable> = order
            .iter()
            .map(|n| self.axis_of(n).map(|ax| self.scope[ax].clone()))
            .collect::<Result<_>>()?;
        let table = self.aligned(&scope);
        Ok(DiscreteFactor { scope, table })
    }
}
