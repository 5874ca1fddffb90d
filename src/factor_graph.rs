use indexmap::IndexMap;
use thiserror::Error;

use crate::factor::{DiscreteFactor, FactorError, Variable};
use crate::NamedList;

pub type VarId = usize;
pub type FactorId = usize;
pub type EdgeId = usize;

/// Tagged node identity. Variable and factor identifier spaces are
/// disjoint, so a variable can never collide with a factor name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Var(VarId),
    Factor(FactorId),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphError {
    #[error("No variable named {0} in the graph.")]
    NoVar(String),
    #[error("Variable {name} is already registered with cardinality {existing}, got {new}.")]
    DuplicateVariable {
        name: String,
        existing: usize,
        new: usize,
    },
    #[error("Malformed graph: edges of factor {factor} do not match its scope.")]
    EdgeScopeMismatch { factor: FactorId },
    #[error("Malformed graph: variable {name} has cardinality {node} as a node but {scope} in a factor scope.")]
    CardinalityMismatch {
        name: String,
        node: usize,
        scope: usize,
    },
    #[error(transparent)]
    Factor(#[from] FactorError),
}

type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct VarNode {
    pub(crate) cardinality: usize,
    // factor -> edge, in edge insertion order
    pub(crate) edges: IndexMap<FactorId, EdgeId>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct FactorNode {
    pub(crate) factor: DiscreteFactor,
    // var -> edge, ordered exactly like the factor scope
    pub(crate) edges: IndexMap<VarId, EdgeId>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct Edge {
    pub(crate) var: VarId,
    pub(crate) factor: FactorId,
}

/// Bipartite graph of variable nodes and factor nodes. Edges connect each
/// factor node to exactly the variables of its scope. Immutable once
/// validated; the inference engine only ever reads it.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FactorGraph {
    pub(crate) vars: NamedList<VarNode>,
    pub(crate) factors: Vec<FactorNode>,
    pub(crate) edges: Vec<Edge>,
}

impl FactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a variable node. Re-registering with the same cardinality
    /// is a no-op; a different cardinality is rejected.
    pub fn add_variable(&mut self, name: impl Into<String>, cardinality: usize) -> Result<VarId> {
        let v = Variable::new(name, cardinality)?;
        if let Some((id, _, node)) = self.vars.get_full(v.name()) {
            if node.cardinality != cardinality {
                return Err(GraphError::DuplicateVariable {
                    name: v.name().to_owned(),
                    existing: node.cardinality,
                    new: cardinality,
                });
            }
            return Ok(id);
        }
        let (id, _) = self.vars.insert_full(
            v.name().to_owned(),
            VarNode {
                cardinality,
                edges: IndexMap::new(),
            },
        );
        Ok(id)
    }

    /// Registers a factor node and wires one edge per scope variable.
    /// Scope variables not yet present are auto-registered with the
    /// cardinality the factor declares for them.
    pub fn add_factor(&mut self, factor: DiscreteFactor) -> Result<FactorId> {
        let factor_id = self.factors.len();
        let mut edges = IndexMap::new();
        for v in factor.scope() {
            let var_id = self.add_variable(v.name(), v.cardinality())?;
            let edge_id = self.edges.len();
            edges.insert(var_id, edge_id);
            self.vars[var_id].edges.insert(factor_id, edge_id);
            self.edges.push(Edge {
                var: var_id,
                factor: factor_id,
            });
        }
        self.factors.push(FactorNode { factor, edges });
        Ok(factor_id)
    }

    /// Re-checks every structural invariant and returns the first
    /// violation found. The engine runs this before inference no matter
    /// where the graph came from.
    pub fn validate(&self) -> Result<()> {
        for (factor_id, fnode) in self.factors.iter().enumerate() {
            let scope = fnode.factor.scope();
            if fnode.edges.len() != scope.len() {
                return Err(GraphError::EdgeScopeMismatch { factor: factor_id });
            }
            for (pos, v) in scope.iter().enumerate() {
                let Some((var_id, _, vnode)) = self.vars.get_full(v.name()) else {
                    return Err(GraphError::NoVar(v.name().to_owned()));
                };
                if vnode.cardinality != v.cardinality() {
                    return Err(GraphError::CardinalityMismatch {
                        name: v.name().to_owned(),
                        node: vnode.cardinality,
                        scope: v.cardinality(),
                    });
                }
                // edge maps must mirror the scope on both endpoints
                let edge_ok = fnode
                    .edges
                    .get_index(pos)
                    .is_some_and(|(id, e)| *id == var_id && self.edge_matches(*e, var_id, factor_id))
                    && vnode.edges.contains_key(&factor_id);
                if !edge_ok {
                    return Err(GraphError::EdgeScopeMismatch { factor: factor_id });
                }
            }
            let expected: Vec<usize> = scope.iter().map(|v| v.cardinality()).collect();
            if fnode.factor.table().shape() != expected.as_slice() {
                return Err(GraphError::EdgeScopeMismatch { factor: factor_id });
            }
        }
        Ok(())
    }

    fn edge_matches(&self, edge: EdgeId, var: VarId, factor: FactorId) -> bool {
        self.edges
            .get(edge)
            .is_some_and(|e| e.var == var && e.factor == factor)
    }

    pub fn var_id(&self, name: &str) -> Result<VarId> {
        self.vars
            .get_index_of(name)
            .ok_or_else(|| GraphError::NoVar(name.to_owned()))
    }

    pub fn var_name(&self, var: VarId) -> &str {
        self.vars.get_index(var).expect("valid VarId").0
    }

    pub fn cardinality(&self, var: VarId) -> usize {
        self.vars[var].cardinality
    }

    /// Nodes adjacent to `node`, in edge insertion order.
    pub fn neighbors(&self, node: Node) -> Vec<Node> {
        match node {
            Node::Var(v) => self.vars[v].edges.keys().map(|f| Node::Factor(*f)).collect(),
            Node::Factor(f) => self.factors[f].edges.keys().map(|v| Node::Var(*v)).collect(),
        }
    }

    /// `(name, cardinality)` pairs in insertion order.
    pub fn variables(&self) -> impl Iterator<Item = (&str, usize)> {
        self.vars.iter().map(|(n, v)| (n.as_str(), v.cardinality))
    }

    /// Factors in insertion order; each exposes its own scope.
    pub fn factors(&self) -> impl Iterator<Item = &DiscreteFactor> {
        self.factors.iter().map(|f| &f.factor)
    }

    pub fn num_variables(&self) -> usize {
        self.vars.len()
    }

    pub fn num_factors(&self) -> usize {
        self.factors.len()
    }

    pub(crate) fn num_edges(&self) -> usize {
        self.edges.len()
    }
}
