use crate::fsc::AlphaVectorFsc;
use crate::sim::{Action, PomdpSim, State};
use crate::tree::{BeliefTree, TreeNodeId};
use rand::rngs::SmallRng;
use std::fmt;

/// Steps sampled per action when picking a greedy fallback action.
const GREEDY_SAMPLES: usize = 8;

// ---------------------------------------------------------------------------
// RunningStats — Welford online aggregation
// ---------------------------------------------------------------------------

/// Online mean/variance (Welford) plus min/max of a stream of returns.
#[derive(Clone, Debug, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance; zero until two values have been pushed.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

impl fmt::Display for RunningStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "avg {:.4} min {:.4} max {:.4} var {:.4} (n = {})",
            self.mean,
            self.min,
            self.max,
            self.variance(),
            self.count
        )
    }
}

// ---------------------------------------------------------------------------
// Greedy fallback
// ---------------------------------------------------------------------------

/// Action maximising the sampled expected immediate reward at `state`. Used
/// whenever a policy runs off its controller or tree.
pub fn greedy_action<S: PomdpSim + ?Sized>(sim: &S, state: State, rng: &mut SmallRng) -> Action {
    let mut best_action = 0;
    let mut best_reward = f64::NEG_INFINITY;
    for action in 0..sim.num_actions() {
        let mut reward = 0.0;
        for _ in 0..GREEDY_SAMPLES {
            reward += sim.step(state, action, rng).reward;
        }
        reward /= GREEDY_SAMPLES as f64;
        if reward > best_reward {
            best_reward = reward;
            best_action = action;
        }
    }
    best_action
}

// ---------------------------------------------------------------------------
// Rollouts
// ---------------------------------------------------------------------------

/// One rollout under the controller from a sampled start state. When an
/// undefined edge is reached the rollout continues with greedy actions.
pub fn simulation_with_fsc<S: PomdpSim + ?Sized>(
    fsc: &AlphaVectorFsc,
    sim: &S,
    max_steps: usize,
    rng: &mut SmallRng,
) -> f64 {
    let gamma = sim.discount();
    let mut state = sim.sample_start_state(rng);
    let mut node = fsc.start();
    let mut total = 0.0;
    let mut discount = 1.0;
    for _ in 0..max_steps {
        if sim.is_terminal(state) {
            break;
        }
        let action = match node {
            Some(id) => fsc.node(id).best_action(),
            None => greedy_action(sim, state, rng),
        };
        let step = sim.step(state, action, rng);
        total += discount * step.reward;
        node = node.and_then(|id| fsc.edge(id, step.obs));
        if step.done {
            break;
        }
        discount *= gamma;
        state = step.next_state;
    }
    total
}

/// Aggregate `num_sims` controller rollouts.
pub fn evaluation_with_simulation_fsc<S: PomdpSim + ?Sized>(
    fsc: &AlphaVectorFsc,
    sim: &S,
    max_steps: usize,
    num_sims: usize,
    rng: &mut SmallRng,
) -> RunningStats {
    let mut stats = RunningStats::new();
    for _ in 0..num_sims {
        stats.push(simulation_with_fsc(fsc, sim, max_steps, rng));
    }
    stats
}

/// Aggregate rollouts that act from the belief tree instead: at each step
/// take the current tree node's best action and follow the observation edge;
/// once the tree runs out, fall back to greedy actions.
pub fn evaluation_with_greedy_tree_policy<S: PomdpSim + ?Sized>(
    tree: &BeliefTree,
    root: TreeNodeId,
    sim: &S,
    max_steps: usize,
    num_sims: usize,
    rng: &mut SmallRng,
) -> RunningStats {
    let gamma = sim.discount();
    let mut stats = RunningStats::new();
    for _ in 0..num_sims {
        let mut state = sim.sample_start_state(rng);
        let mut node = Some(root);
        let mut total = 0.0;
        let mut discount = 1.0;
        for _ in 0..max_steps {
            if sim.is_terminal(state) {
                break;
            }
            let action = match node {
                Some(id) => tree[id].best_action(),
                None => greedy_action(sim, state, rng),
            };
            let step = sim.step(state, action, rng);
            total += discount * step.reward;
            node = node.and_then(|id| {
                tree[id]
                    .action(tree[id].best_action())
                    .and_then(|edge| edge.children().get(&step.obs).copied())
            });
            if step.done {
                break;
            }
            discount *= gamma;
            state = step.next_state;
        }
        stats.push(total);
    }
    stats
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
