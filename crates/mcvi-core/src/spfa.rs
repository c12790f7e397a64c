use crate::sim::State;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// Outgoing edge produced on demand: `(successor, cost, label)`.
pub type SpfaEdge = (State, f64, i64);

// ---------------------------------------------------------------------------
// ShortestPathFaster trait
// ---------------------------------------------------------------------------

/// Single-source shortest paths over an implicit graph, using the SPFA
/// (queue-based Bellman-Ford) discipline.
///
/// Implementors only supply the neighbour callback; `calculate` is the
/// shared engine. Neighbour generation may be stateful (e.g. driven by a
/// stochastic simulator treated as deterministic), hence `&mut self`.
pub trait ShortestPathFaster {
    /// Generate the outgoing edges of `state`.
    fn edges(&mut self, state: State) -> Vec<SpfaEdge>;

    /// Run SPFA from `source`.
    ///
    /// Returns `(costs, predecessors)`: the cheapest discovered cost per
    /// state, and for every non-source discovered state the `(predecessor,
    /// edge label)` pair on its cheapest path. Terminates when all
    /// discovered nodes are settled, or after `max_expansions` queue pops —
    /// the caller's guard against degenerate inputs.
    fn calculate(
        &mut self,
        source: State,
        max_expansions: usize,
    ) -> (FxHashMap<State, f64>, FxHashMap<State, (State, i64)>) {
        let mut costs = FxHashMap::default();
        let mut preds = FxHashMap::default();
        let mut queue = VecDeque::new();
        let mut queued = FxHashSet::default();

        costs.insert(source, 0.0);
        queue.push_back(source);
        queued.insert(source);

        let mut expansions = 0usize;
        while let Some(u) = queue.pop_front() {
            queued.remove(&u);
            expansions += 1;
            if expansions > max_expansions {
                break;
            }
            let du = costs[&u];
            for (v, w, label) in self.edges(u) {
                let nd = du + w;
                if nd + 1e-12 < costs.get(&v).copied().unwrap_or(f64::INFINITY) {
                    costs.insert(v, nd);
                    preds.insert(v, (u, label));
                    if queued.insert(v) {
                        queue.push_back(v);
                    }
                }
            }
        }

        (costs, preds)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
