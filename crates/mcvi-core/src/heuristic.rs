use crate::belief::Belief;
use crate::sim::{Action, PomdpSim, State};
use crate::spfa::{ShortestPathFaster, SpfaEdge};
use rand::rngs::SmallRng;
use rustc_hash::FxHashMap;

// ---------------------------------------------------------------------------
// DeterminisedStepper — the simulator viewed as a weighted graph
// ---------------------------------------------------------------------------

/// Implicit graph over simulator states: each `(state, action)` pair is
/// stepped once and the sampled transition is treated as a deterministic
/// edge with cost `-reward`.
struct DeterminisedStepper<'a, S: PomdpSim + ?Sized> {
    sim: &'a S,
    rng: &'a mut SmallRng,
}

impl<S: PomdpSim + ?Sized> ShortestPathFaster for DeterminisedStepper<'_, S> {
    fn edges(&mut self, state: State) -> Vec<SpfaEdge> {
        if self.sim.is_terminal(state) {
            return Vec::new();
        }
        (0..self.sim.num_actions())
            .map(|a| {
                let step = self.sim.step(state, a, self.rng);
                (step.next_state, -step.reward, a as i64)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// PathToTerminal — shared optimistic-path cache
// ---------------------------------------------------------------------------

/// One hop on a cached optimistic path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PathStep {
    pub action: Action,
    pub reward: f64,
    pub next: State,
    /// True iff `next` is terminal.
    pub done: bool,
}

/// Per-state cache of optimistic paths to a terminal state.
///
/// For each queried state the cheapest path in `-reward` space is found by
/// SPFA over the determinised state graph; every state along the path is
/// cached, so the table grows append-only into a forest of paths (the
/// "path tree"). Because a clairvoyant deterministic rollout dominates any
/// partially observable policy, discounted values read off these paths are
/// admissible upper bounds.
pub struct PathToTerminal {
    steps: FxHashMap<State, PathStep>,
    max_expansions: usize,
}

impl PathToTerminal {
    /// `max_expansions` caps each SPFA run, bounding exploration on domains
    /// with huge or terminal-free reachable regions.
    pub fn new(max_expansions: usize) -> Self {
        Self {
            steps: FxHashMap::default(),
            max_expansions,
        }
    }

    /// The cached path forest: `state → next hop`.
    pub fn path_tree(&self) -> &FxHashMap<State, PathStep> {
        &self.steps
    }

    /// Make sure a path from `state` is cached.
    pub fn compute<S: PomdpSim + ?Sized>(&mut self, state: State, sim: &S, rng: &mut SmallRng) {
        if self.steps.contains_key(&state) || sim.is_terminal(state) {
            return;
        }

        let (costs, preds) =
            DeterminisedStepper { sim, rng }.calculate(state, self.max_expansions);

        // Cheapest terminal reached; if none was discovered within the cap,
        // the cheapest discovered state stands in as the path target. Ties
        // break on the smaller state id so reruns agree.
        let target = best_target(&costs, state, |s| sim.is_terminal(s))
            .or_else(|| best_target(&costs, state, |_| true));
        let Some(mut current) = target else {
            return;
        };

        // Walk predecessors back to the source, recording forward hops.
        // First write wins: the cache is append-only.
        let mut hops = 0;
        while current != state && hops <= self.max_expansions {
            let Some(&(parent, label)) = preds.get(&current) else {
                return;
            };
            let reward = costs[&parent] - costs[&current];
            self.steps.entry(parent).or_insert(PathStep {
                action: label as Action,
                reward,
                next: current,
                done: sim.is_terminal(current),
            });
            current = parent;
            hops += 1;
        }
    }

    /// Discounted value of the optimistic path from `state`, truncated to
    /// `max_depth` hops.
    pub fn value<S: PomdpSim + ?Sized>(
        &mut self,
        state: State,
        max_depth: usize,
        sim: &S,
        rng: &mut SmallRng,
    ) -> f64 {
        self.compute(state, sim, rng);
        let gamma = sim.discount();
        let mut value = 0.0;
        let mut discount = 1.0;
        let mut current = state;
        for _ in 0..max_depth {
            let Some(step) = self.steps.get(&current) else {
                break;
            };
            value += discount * step.reward;
            if step.done {
                break;
            }
            discount *= gamma;
            current = step.next;
        }
        value
    }
}

fn best_target(
    costs: &FxHashMap<State, f64>,
    source: State,
    mut keep: impl FnMut(State) -> bool,
) -> Option<State> {
    let mut best: Option<(f64, State)> = None;
    for (&s, &c) in costs {
        if s == source || !keep(s) {
            continue;
        }
        if best.map_or(true, |(bc, bs)| c < bc || (c == bc && s < bs)) {
            best = Some((c, s));
        }
    }
    best.map(|(_, s)| s)
}

// ---------------------------------------------------------------------------
// upper_bound_evaluation
// ---------------------------------------------------------------------------

/// Optimistic value of a belief: for each action, force it at step 0 and
/// follow the clairvoyant path afterwards; aggregate by belief weight.
/// Returns the argmax action and its value.
pub fn upper_bound_evaluation<S: PomdpSim + ?Sized>(
    belief: &Belief,
    heuristic: &mut PathToTerminal,
    eval_depth: usize,
    sim: &S,
    rng: &mut SmallRng,
) -> (Action, f64) {
    let gamma = sim.discount();
    let mut best_action = 0;
    let mut best_value = f64::NEG_INFINITY;
    for action in 0..sim.num_actions() {
        let mut q = 0.0;
        for (&state, &mass) in belief.iter() {
            if sim.is_terminal(state) {
                continue;
            }
            let step = sim.step(state, action, rng);
            let tail = if step.done {
                0.0
            } else {
                heuristic.value(step.next_state, eval_depth.saturating_sub(1), sim, rng)
            };
            q += mass * (step.reward + gamma * tail);
        }
        if q > best_value {
            best_value = q;
            best_action = action;
        }
    }
    (best_action, best_value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
