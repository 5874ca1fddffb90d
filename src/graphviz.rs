//! DOT export of the bipartite graph layout. Consumes the graph
//! read-only; rendering the text to an image is someone else's job.

use std::fmt::Write;

use itertools::Itertools;

use crate::factor_graph::FactorGraph;

/// Renders the graph as DOT text: variables as circles, factors as boxes
/// labelled with their scope, one edge per scope entry.
pub fn dot(graph: &FactorGraph) -> String {
    let mut out = String::from("graph factor_graph {\n");
    for (name, cardinality) in graph.variables() {
        writeln!(
            out,
            "    \"{name}\" [shape=circle, label=\"{name} ({cardinality})\"];"
        )
        .expect("writing to String");
    }
    for (i, factor) in graph.factors().enumerate() {
        let label = factor.scope().iter().map(|v| v.name()).join(",");
        writeln!(out, "    f{i} [shape=box, label=\"phi({label})\"];").expect("writing to String");
        for v in factor.scope() {
            writeln!(out, "    \"{}\" -- f{i};", v.name()).expect("writing to String");
        }
    }
    out.push_str("}\n");
    out
}
