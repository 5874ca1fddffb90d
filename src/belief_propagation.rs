use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::{Array1, ArrayD, Axis, Ix1};
use rayon::prelude::*;
use thiserror::Error;

use crate::factor::{DiscreteFactor, FactorError, Variable};
use crate::factor_graph::{FactorGraph, FactorId, GraphError, VarId};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BpError {
    #[error("No variable named {0} in the graph.")]
    NoVar(String),
    #[error("Evidence value {value} is out of range for {var} of cardinality {cardinality}.")]
    EvidenceOutOfRange {
        var: String,
        value: usize,
        cardinality: usize,
    },
    #[error("Conflicting evidence values for variable {0}.")]
    ConflictingEvidence(String),
    #[error("Variable {0} is both queried and observed.")]
    QueriedEvidence(String),
    #[error("No query variables given.")]
    EmptyQuery,
    #[error("Inconsistent evidence: a factor reduced to an all-zero potential.")]
    InconsistentEvidence,
    #[error("Degenerate model: the requested belief has zero total mass.")]
    DegenerateFactor,
    #[error("The engine is not calibrated, call calibrate() first.")]
    NotCalibrated,
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Factor(#[from] FactorError),
}

type Result<T> = std::result::Result<T, BpError>;

/// Calibration loop parameters.
#[derive(Debug, Clone, Copy)]
pub struct BpSettings {
    /// Maximum absolute message change below which the graph counts as
    /// calibrated.
    pub tolerance: f64,
    /// Iteration cap; hitting it yields `Diverged` instead of an error.
    pub max_iterations: usize,
}

impl Default for BpSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Uninitialized,
    Calibrating,
    Calibrated,
    Diverged,
}

/// A normalized distribution over the Cartesian product of the requested
/// variables' states, in the requested variable order.
#[derive(Debug, Clone)]
pub struct Posterior {
    pub scope: Vec<Variable>,
    pub probabilities: ArrayD<f64>,
    /// False when the calibration behind this result hit the iteration
    /// cap; the probabilities are then a best-effort approximation.
    pub converged: bool,
    pub iterations: usize,
}

/// Sum-product message passing over a factor graph.
///
/// The engine owns all message and belief state; the graph itself is
/// shared read-only. Messages live on directed edges (one vector per
/// direction, indexed by `EdgeId`) and are recomputed with a synchronous
/// flooding schedule: every iteration derives the complete new message
/// set from the previous snapshot, in parallel across edges, and only
/// then publishes it.
pub struct BeliefPropagation {
    graph: Arc<FactorGraph>,
    settings: BpSettings,
    // var -> factor messages, indexed by EdgeId
    from_var: Vec<Array1<f64>>,
    // factor -> var messages, indexed by EdgeId
    to_var: Vec<Array1<f64>>,
    // unnormalized per-variable beliefs, indexed by VarId
    beliefs: Vec<Array1<f64>>,
    state: CalibrationState,
    iterations: usize,
    residual: f64,
}

impl BeliefPropagation {
    /// Validates the graph and sets every message to the uniform all-ones
    /// vector of the owning variable's cardinality.
    pub fn new(graph: Arc<FactorGraph>, settings: BpSettings) -> Result<Self> {
        graph.validate()?;
        let from_var: Vec<Array1<f64>> = graph
            .edges
            .iter()
            .map(|e| Array1::ones(graph.cardinality(e.var)))
            .collect();
        let to_var = from_var.clone();
        let beliefs = graph
            .vars
            .values()
            .map(|v| Array1::ones(v.cardinality))
            .collect();
        Ok(Self {
            graph,
            settings,
            from_var,
            to_var,
            beliefs,
            state: CalibrationState::Uninitialized,
            iterations: 0,
            residual: f64::INFINITY,
        })
    }

    pub fn with_defaults(graph: Arc<FactorGraph>) -> Result<Self> {
        Self::new(graph, BpSettings::default())
    }

    pub fn graph(&self) -> &Arc<FactorGraph> {
        &self.graph
    }
    pub fn state(&self) -> CalibrationState {
        self.state
    }
    pub fn iterations(&self) -> usize {
        self.iterations
    }
    /// Maximum absolute message change of the last iteration.
    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// Runs the flooding schedule until the residual drops below the
    /// tolerance (`Calibrated`) or the iteration cap is hit (`Diverged`).
    /// On trees this converges exactly within the tree diameter.
    pub fn calibrate(&mut self) -> CalibrationState {
        self.state = CalibrationState::Calibrating;
        self.iterations = 0;
        while self.iterations < self.settings.max_iterations {
            self.iterations += 1;
            let new_from_var: Vec<Array1<f64>> = (0..self.graph.num_edges())
                .into_par_iter()
                .map(|e| {
                    let edge = &self.graph.edges[e];
                    self.var_to_factor(edge.var, edge.factor)
                })
                .collect();
            let new_to_var: Vec<Array1<f64>> = (0..self.graph.num_edges())
                .into_par_iter()
                .map(|e| {
                    let edge = &self.graph.edges[e];
                    self.factor_to_var(edge.factor, edge.var)
                })
                .collect();
            self.residual = max_delta(&self.from_var, &new_from_var)
                .max(max_delta(&self.to_var, &new_to_var));
            self.from_var = new_from_var;
            self.to_var = new_to_var;
            if self.residual < self.settings.tolerance {
                break;
            }
        }
        self.state = if self.residual < self.settings.tolerance {
            CalibrationState::Calibrated
        } else {
            CalibrationState::Diverged
        };
        self.recompute_beliefs();
        self.state
    }

    /// Product of the messages arriving at `var` from factors other than
    /// `dst`; uniform when there are none.
    fn var_to_factor(&self, var: VarId, dst: FactorId) -> Array1<f64> {
        let mut msg = Array1::ones(self.graph.cardinality(var));
        for (factor, edge) in self.graph.vars[var].edges.iter() {
            if *factor != dst {
                msg *= &self.to_var[*edge];
            }
        }
        normalized(msg)
    }

    /// Combines the factor table with the incoming messages of every
    /// neighbor except `dst`, then sums out everything but `dst`.
    fn factor_to_var(&self, factor: FactorId, dst: VarId) -> Array1<f64> {
        let fnode = &self.graph.factors[factor];
        let dst_ax = fnode.edges.get_index_of(&dst).expect("edge endpoints agree");
        let mut table = fnode.factor.table().clone();
        for (ax, (_, edge)) in fnode.edges.iter().enumerate() {
            if ax == dst_ax {
                continue;
            }
            let msg = &self.from_var[*edge];
            for (k, mut lane) in table.axis_iter_mut(Axis(ax)).enumerate() {
                lane *= msg[k];
            }
        }
        for ax in (0..table.ndim()).rev() {
            if ax != dst_ax {
                table = table.sum_axis(Axis(ax));
            }
        }
        normalized(table.into_dimensionality::<Ix1>().expect("one axis left"))
    }

    fn recompute_beliefs(&mut self) {
        let beliefs = self
            .graph
            .vars
            .values()
            .map(|vnode| {
                let mut belief = Array1::ones(vnode.cardinality);
                for edge in vnode.edges.values() {
                    belief *= &self.to_var[*edge];
                }
                belief
            })
            .collect();
        self.beliefs = beliefs;
    }

    /// Normalized marginal of a single variable on the unconditioned
    /// graph. `Diverged` calibrations still answer, flagged through
    /// `converged`.
    pub fn query_marginal(&self, name: &str) -> Result<Posterior> {
        self.check_calibrated()?;
        let var = self.resolve_var(name)?;
        let belief = self.normalized_belief(var, false)?;
        Ok(Posterior {
            scope: vec![Variable::new(name, self.graph.cardinality(var))?],
            probabilities: belief.into_dyn(),
            converged: self.state == CalibrationState::Calibrated,
            iterations: self.iterations,
        })
    }

    /// Posterior over `vars` given `evidence`. Builds a reduced private
    /// copy of the graph with every observed variable clamped out and
    /// runs a fresh calibration on it; each distinct evidence set pays
    /// for its own full recompute.
    pub fn query_conditional(
        &self,
        vars: &[&str],
        evidence: &[(&str, usize)],
    ) -> Result<Posterior> {
        if vars.is_empty() {
            return Err(BpError::EmptyQuery);
        }
        let evidence = self.resolve_evidence(evidence)?;
        for (i, name) in vars.iter().enumerate() {
            let var = self.resolve_var(name)?;
            if evidence.contains_key(&var) {
                return Err(BpError::QueriedEvidence((*name).to_owned()));
            }
            if vars[..i].contains(name) {
                return Err(BpError::Factor(FactorError::DuplicateScopeVariable(
                    (*name).to_owned(),
                )));
            }
        }
        let reduced = reduce_graph(&self.graph, &evidence)?;
        let mut engine = BeliefPropagation::new(Arc::new(reduced), self.settings)?;
        engine.calibrate();
        if let [name] = vars {
            let var = engine.resolve_var(name)?;
            let belief = engine.normalized_belief(var, !evidence.is_empty())?;
            return Ok(Posterior {
                scope: vec![Variable::new(*name, engine.graph.cardinality(var))?],
                probabilities: belief.into_dyn(),
                converged: engine.state == CalibrationState::Calibrated,
                iterations: engine.iterations,
            });
        }
        // Joint over several variables: flooding messages only summarize
        // single nodes, so the joint is extracted exactly by sum-product
        // elimination over the reduced graph's factors.
        let joint = eliminate_to_joint(&engine.graph, vars)?;
        let joint = joint.reordered(vars)?;
        let joint = joint.normalize().map_err(|e| match e {
            FactorError::Degenerate if !evidence.is_empty() => BpError::InconsistentEvidence,
            FactorError::Degenerate => BpError::DegenerateFactor,
            e => BpError::Factor(e),
        })?;
        Ok(Posterior {
            scope: joint.scope().to_vec(),
            probabilities: joint.table().clone(),
            converged: engine.state == CalibrationState::Calibrated,
            iterations: engine.iterations,
        })
    }

    fn check_calibrated(&self) -> Result<()> {
        match self.state {
            CalibrationState::Calibrated | CalibrationState::Diverged => Ok(()),
            _ => Err(BpError::NotCalibrated),
        }
    }

    fn resolve_var(&self, name: &str) -> Result<VarId> {
        self.graph
            .var_id(name)
            .map_err(|_| BpError::NoVar(name.to_owned()))
    }

    fn resolve_evidence(&self, evidence: &[(&str, usize)]) -> Result<IndexMap<VarId, usize>> {
        let mut resolved = IndexMap::new();
        for (name, value) in evidence {
            let var = self.resolve_var(name)?;
            let cardinality = self.graph.cardinality(var);
            if *value >= cardinality {
                return Err(BpError::EvidenceOutOfRange {
                    var: (*name).to_owned(),
                    value: *value,
                    cardinality,
                });
            }
            if let Some(prev) = resolved.insert(var, *value) {
                if prev != *value {
                    return Err(BpError::ConflictingEvidence((*name).to_owned()));
                }
            }
        }
        Ok(resolved)
    }

    fn normalized_belief(&self, var: VarId, under_evidence: bool) -> Result<Array1<f64>> {
        let belief = &self.beliefs[var];
        let z = belief.sum();
        if z <= 0.0 {
            return Err(if under_evidence {
                BpError::InconsistentEvidence
            } else {
                BpError::DegenerateFactor
            });
        }
        Ok(belief / z)
    }
}

/// Sum-normalizes a message; all-zero messages are kept as zeros so the
/// inconsistency surfaces at belief extraction.
fn normalized(msg: Array1<f64>) -> Array1<f64> {
    let z = msg.sum();
    if z > 0.0 {
        msg / z
    } else {
        msg
    }
}

fn max_delta(old: &[Array1<f64>], new: &[Array1<f64>]) -> f64 {
    old.iter()
        .zip(new)
        .map(|(a, b)| {
            (a - b)
                .iter()
                .fold(0.0f64, |acc, d| acc.max(d.abs()))
        })
        .fold(0.0, f64::max)
}

/// Clamps every observed variable out of the graph: each incident factor
/// is reduced per observed value and the observed variables are dropped.
/// The caller's graph is never touched. A factor reduced to an all-zero
/// table means the evidence contradicts the model.
fn reduce_graph(graph: &FactorGraph, evidence: &IndexMap<VarId, usize>) -> Result<FactorGraph> {
    let mut reduced = FactorGraph::new();
    for (var, (name, vnode)) in graph.vars.iter().enumerate() {
        if !evidence.contains_key(&var) {
            reduced.add_variable(name.as_str(), vnode.cardinality)?;
        }
    }
    for fnode in &graph.factors {
        let mut factor = fnode.factor.clone();
        let mut touched = false;
        for (var, value) in evidence {
            let name = graph.var_name(*var);
            if factor.contains(name) {
                factor = factor.reduce(name, *value)?;
                touched = true;
            }
        }
        if touched && factor.sum() <= 0.0 {
            return Err(BpError::InconsistentEvidence);
        }
        if factor.scope().is_empty() {
            // fully observed factor with positive mass: a constant scale,
            // irrelevant after normalization
            continue;
        }
        reduced.add_factor(factor)?;
    }
    Ok(reduced)
}

/// Exact joint over `keep` by variable elimination in insertion order:
/// for each other variable, multiply the factors touching it and sum it
/// out. Variables with no incident factor contribute a uniform term.
fn eliminate_to_joint(graph: &FactorGraph, keep: &[&str]) -> Result<DiscreteFactor> {
    let mut factors: Vec<DiscreteFactor> = graph.factors().cloned().collect();
    for (name, _) in graph.variables() {
        if keep.contains(&name) {
            continue;
        }
        let (touching, rest): (Vec<_>, Vec<_>) =
            factors.into_iter().partition(|f| f.contains(name));
        factors = rest;
        let mut touching = touching.into_iter();
        if let Some(first) = touching.next() {
            let prod = touching.try_fold(first, |acc, f| acc.product(&f))?;
            factors.push(prod.marginalize(&[name])?);
        }
    }
    let mut joint = factors
        .into_iter()
        .try_fold(DiscreteFactor::new(Vec::new(), vec![1.0])?, |acc, f| {
            acc.product(&f)
        })?;
    for name in keep {
        if !joint.contains(name) {
            let var = graph.var_id(name)?;
            let cardinality = graph.cardinality(var);
            let uniform = DiscreteFactor::new(
                vec![Variable::new(*name, cardinality)?],
                vec![1.0; cardinality],
            )?;
            joint = joint.product(&uniform)?;
        }
    }
    Ok(joint)
}
