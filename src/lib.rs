pub mod belief_propagation;
pub mod factor;
pub mod factor_graph;
pub mod graphviz;

/// Insertion-ordered map from names to nodes. Iteration order is the
/// registration order, which keeps all outputs deterministic.
pub(crate) type NamedList<T> = indexmap::IndexMap<String, T>;

pub use belief_propagation::{
    BeliefPropagation, BpError, BpSettings, CalibrationState, Posterior,
};
pub use factor::{DiscreteFactor, FactorError, Variable};
pub use factor_graph::{FactorGraph, GraphError, Node};
