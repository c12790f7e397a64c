use crate::belief::{Belief, MASS_TOLERANCE};
use crate::bounds::find_r_lower;
use crate::error::PlannerError;
use crate::fsc::NodeId;
use crate::heuristic::{upper_bound_evaluation, PathToTerminal};
use crate::sim::{Action, Obs, PomdpSim};
use rand::rngs::SmallRng;
use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

// ---------------------------------------------------------------------------
// TreeNodeId — typed arena index
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TreeNodeId(u32);

impl TreeNodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Knobs shared by node construction and action expansion.
#[derive(Clone, Copy, Debug)]
pub struct ExpandParams {
    /// Cap on distinct states sampled per action expansion.
    pub max_belief_samples: usize,
    /// Horizon for heuristic evaluation and blind rollouts.
    pub eval_depth: usize,
    /// Convergence threshold for the blind-policy estimate.
    pub eval_epsilon: f64,
    /// Rollout cap per action in the blind-policy estimate.
    pub r_lower_restarts: u64,
}

// ---------------------------------------------------------------------------
// ActionNode — belief-tree edge after one action
// ---------------------------------------------------------------------------

/// Everything known about taking one action from a belief: the posterior
/// child per observation, observation likelihoods, the expected immediate
/// reward, and weighted averages of the children's bounds.
#[derive(Clone, Debug)]
pub struct ActionNode {
    children: BTreeMap<Obs, TreeNodeId>,
    weights: BTreeMap<Obs, f64>,
    avg_reward: f64,
    avg_lower: f64,
    avg_upper: f64,
}

impl ActionNode {
    pub fn children(&self) -> &BTreeMap<Obs, TreeNodeId> {
        &self.children
    }

    pub fn weights(&self) -> &BTreeMap<Obs, f64> {
        &self.weights
    }

    pub fn avg_reward(&self) -> f64 {
        self.avg_reward
    }

    pub fn avg_lower(&self) -> f64 {
        self.avg_lower
    }

    pub fn avg_upper(&self) -> f64 {
        self.avg_upper
    }

    /// Pessimistic one-step Bellman value of this action.
    pub fn q_lower(&self, gamma: f64) -> f64 {
        self.avg_reward + gamma * self.avg_lower
    }

    /// Optimistic one-step Bellman value of this action.
    pub fn q_upper(&self, gamma: f64) -> f64 {
        self.avg_reward + gamma * self.avg_upper
    }
}

// ---------------------------------------------------------------------------
// BeliefTreeNode
// ---------------------------------------------------------------------------

/// A reachable belief with its bounds, lazily expanded action children and
/// the controller node it has committed to.
#[derive(Clone, Debug)]
pub struct BeliefTreeNode {
    belief: Belief,
    action_edges: BTreeMap<Action, ActionNode>,
    best_action: Action,
    lower: f64,
    upper: f64,
    fsc_node: Option<NodeId>,
}

impl BeliefTreeNode {
    pub fn belief(&self) -> &Belief {
        &self.belief
    }

    pub fn best_action(&self) -> Action {
        self.best_action
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn gap(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn fsc_node(&self) -> Option<NodeId> {
        self.fsc_node
    }

    pub fn set_fsc_node(&mut self, id: NodeId) {
        self.fsc_node = Some(id);
    }

    pub fn action(&self, action: Action) -> Option<&ActionNode> {
        self.action_edges.get(&action)
    }

    /// Raise the lower bound to an achieved value, never past the upper.
    pub fn raise_lower(&mut self, value: f64) {
        if value > self.lower {
            self.lower = value.min(self.upper);
        }
    }
}

// ---------------------------------------------------------------------------
// BeliefTree — arena of belief nodes
// ---------------------------------------------------------------------------

/// Owns every reachable belief node; parents refer to children by
/// [`TreeNodeId`], so identical posteriors reached through different actions
/// simply become separate arena entries.
#[derive(Default)]
pub struct BeliefTree {
    nodes: Vec<BeliefTreeNode>,
}

impl BeliefTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create a node for `belief`: upper bound and initial best action from
    /// the clairvoyant heuristic, lower bound from the blind policy.
    pub fn insert<S: PomdpSim + ?Sized>(
        &mut self,
        belief: Belief,
        heuristic: &mut PathToTerminal,
        params: &ExpandParams,
        sim: &S,
        rng: &mut SmallRng,
    ) -> TreeNodeId {
        let (best_action, upper) =
            upper_bound_evaluation(&belief, heuristic, params.eval_depth, sim, rng);
        let lower = find_r_lower(
            sim,
            &belief,
            params.eval_epsilon,
            params.r_lower_restarts,
            params.eval_depth,
            rng,
        );
        let id = TreeNodeId(self.nodes.len() as u32);
        self.nodes.push(BeliefTreeNode {
            belief,
            action_edges: BTreeMap::new(),
            best_action,
            // Both bounds are sampled estimates; keep them ordered.
            lower: lower.min(upper),
            upper,
            fsc_node: None,
        });
        id
    }

    /// Lazily build the action child: sample the belief without replacement,
    /// bucket successor states by observation, renormalise each bucket into
    /// a posterior child node, and weight buckets by sampled mass.
    pub fn expand_action<S: PomdpSim + ?Sized>(
        &mut self,
        id: TreeNodeId,
        action: Action,
        heuristic: &mut PathToTerminal,
        params: &ExpandParams,
        sim: &S,
        rng: &mut SmallRng,
    ) -> Result<(), PlannerError> {
        if action >= sim.num_actions() {
            return Err(PlannerError::ActionOutOfRange {
                action,
                size: sim.num_actions(),
            });
        }
        if self[id].action_edges.contains_key(&action) {
            return Ok(());
        }

        let mut working = self[id].belief.clone();
        let mut posteriors: BTreeMap<Obs, Belief> = BTreeMap::new();
        let mut prob_sum = 0.0;
        let mut reward_sum = 0.0;
        for _ in 0..params.max_belief_samples {
            let Some((state, prob)) = working.sample_destructive(rng) else {
                break;
            };
            prob_sum += prob;
            let step = sim.step(state, action, rng);
            if step.obs >= sim.num_observations() {
                return Err(PlannerError::ObservationOutOfRange {
                    obs: step.obs,
                    size: sim.num_observations(),
                });
            }
            if step.done && !sim.is_terminal(step.next_state) {
                return Err(PlannerError::TerminalMismatch {
                    state: step.next_state,
                });
            }
            reward_sum += prob * step.reward;
            posteriors
                .entry(step.obs)
                .or_default()
                .add_mass(step.next_state, prob);
        }

        let avg_reward = if prob_sum > 0.0 { reward_sum / prob_sum } else { 0.0 };
        let mut children = BTreeMap::new();
        let mut weights = BTreeMap::new();
        let mut weight_sum = 0.0;
        for (obs, mut posterior) in posteriors {
            let weight = posterior.mass() / prob_sum;
            posterior.normalise();
            let child = self.insert(posterior, heuristic, params, sim, rng);
            children.insert(obs, child);
            weights.insert(obs, weight);
            weight_sum += weight;
        }
        if !children.is_empty() && (weight_sum - 1.0).abs() > MASS_TOLERANCE {
            return Err(PlannerError::WeightsNotNormalised { mass: weight_sum });
        }

        let mut node = ActionNode {
            children,
            weights,
            avg_reward,
            avg_lower: 0.0,
            avg_upper: 0.0,
        };
        let (avg_lower, avg_upper) = self.child_bound_averages(&node);
        node.avg_lower = avg_lower;
        node.avg_upper = avg_upper;
        self.nodes[id.index()].action_edges.insert(action, node);
        Ok(())
    }

    fn child_bound_averages(&self, node: &ActionNode) -> (f64, f64) {
        let mut lower = 0.0;
        let mut upper = 0.0;
        for (obs, &child) in &node.children {
            let w = node.weights[obs];
            lower += w * self[child].lower;
            upper += w * self[child].upper;
        }
        (lower, upper)
    }

    /// Recompute an action's bound averages from the children's current
    /// bounds. Children tighten between iterations, so the cached averages
    /// go stale.
    pub fn refresh_action(&mut self, id: TreeNodeId, action: Action) {
        let refreshed = self[id]
            .action_edges
            .get(&action)
            .map(|node| self.child_bound_averages(node));
        if let Some((lower, upper)) = refreshed {
            let node = self.nodes[id.index()]
                .action_edges
                .get_mut(&action)
                .expect("action checked above");
            node.avg_lower = lower;
            node.avg_upper = upper;
        }
    }

    /// Re-pick the best action by pessimistic Bellman value and tighten the
    /// node's bounds monotonically: the lower bound only rises, the upper
    /// only falls. The upper bound is the max over all actions, so it only
    /// tightens once every one of the `num_actions` children is expanded.
    pub fn update_best_action(&mut self, id: TreeNodeId, gamma: f64, num_actions: usize) {
        let mut best: Option<(Action, f64)> = None;
        let mut best_upper = f64::NEG_INFINITY;
        for (&action, node) in &self[id].action_edges {
            let q_lower = node.q_lower(gamma);
            let q_upper = node.q_upper(gamma);
            if best.map_or(true, |(_, q)| q_lower > q) {
                best = Some((action, q_lower));
            }
            if q_upper > best_upper {
                best_upper = q_upper;
            }
        }
        let all_expanded = self[id].action_edges.len() == num_actions;
        if let Some((action, q_lower)) = best {
            let node = &mut self.nodes[id.index()];
            node.best_action = action;
            if q_lower > node.lower {
                node.lower = q_lower.min(node.upper);
            }
            if all_expanded && best_upper < node.upper {
                node.upper = best_upper;
                node.lower = node.lower.min(node.upper);
            }
        }
    }

    /// Pick the best action's child with the largest weighted excess
    /// uncertainty `weight · ((upper − lower) − target)`. `None` means the
    /// node has no expandable children and the descent ends here.
    pub fn choose_observation(&self, id: TreeNodeId, target: f64) -> Option<(Obs, TreeNodeId)> {
        let node = &self[id];
        let action = node.action_edges.get(&node.best_action)?;
        let mut best: Option<(Obs, TreeNodeId)> = None;
        let mut best_gap = f64::NEG_INFINITY;
        for (&obs, &child) in &action.children {
            let gap = action.weights[&obs] * (self[child].gap() - target);
            if gap > best_gap {
                best_gap = gap;
                best = Some((obs, child));
            }
        }
        best
    }
}

impl Index<TreeNodeId> for BeliefTree {
    type Output = BeliefTreeNode;
    fn index(&self, id: TreeNodeId) -> &Self::Output {
        &self.nodes[id.index()]
    }
}

impl IndexMut<TreeNodeId> for BeliefTree {
    fn index_mut(&mut self, id: TreeNodeId) -> &mut Self::Output {
        &mut self.nodes[id.index()]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::ChainSim;
    use rand::SeedableRng;

    fn params() -> ExpandParams {
        ExpandParams {
            max_belief_samples: 100,
            eval_depth: 30,
            eval_epsilon: 1e-6,
            r_lower_restarts: 100,
        }
    }

    fn setup() -> (ChainSim, PathToTerminal, SmallRng) {
        (ChainSim::new(3), PathToTerminal::new(1000), SmallRng::seed_from_u64(42))
    }

    // ---- insert ----

    #[test]
    fn insert_orders_bounds() {
        let (sim, mut heuristic, mut rng) = setup();
        let mut tree = BeliefTree::new();
        let id = tree.insert(
            Belief::from_states([0, 1]),
            &mut heuristic,
            &params(),
            &sim,
            &mut rng,
        );
        assert!(tree[id].lower() <= tree[id].upper());
        assert!(tree[id].fsc_node().is_none());
    }

    #[test]
    fn insert_on_chain_prefers_marching() {
        let (sim, mut heuristic, mut rng) = setup();
        let mut tree = BeliefTree::new();
        let id = tree.insert(Belief::from_states([0]), &mut heuristic, &params(), &sim, &mut rng);
        assert_eq!(tree[id].best_action(), 0);
        // The blind bound for constant action 0 equals the optimum here.
        assert!((tree[id].lower() - (-1.95)).abs() < 1e-6);
        assert!((tree[id].upper() - (-1.95)).abs() < 1e-6);
    }

    // ---- expand_action ----

    #[test]
    fn expand_action_builds_delta_posteriors() {
        let (sim, mut heuristic, mut rng) = setup();
        let mut tree = BeliefTree::new();
        let belief: Belief = [(0, 0.5), (1, 0.5)].into_iter().collect();
        let root = tree.insert(belief, &mut heuristic, &params(), &sim, &mut rng);

        tree.expand_action(root, 0, &mut heuristic, &params(), &sim, &mut rng).unwrap();
        let action = tree[root].action(0).expect("expanded");

        // Deterministic simulator: one observation per sampled state, each
        // posterior a delta distribution.
        assert_eq!(action.children().len(), 2);
        let weight_sum: f64 = action.weights().values().sum();
        assert!((weight_sum - 1.0).abs() < MASS_TOLERANCE);
        for (obs, &child) in action.children() {
            assert_eq!(tree[child].belief().len(), 1);
            assert!((tree[child].belief().mass() - 1.0).abs() < MASS_TOLERANCE);
            // Observation equals the successor state on the chain.
            assert!((tree[child].belief().mass_of(*obs as u64) - 1.0).abs() < 1e-12);
        }
        assert!((action.avg_reward() - (-1.0)).abs() < 1e-12);
    }

    #[test]
    fn expand_action_rejects_out_of_range_actions() {
        let (sim, mut heuristic, mut rng) = setup();
        let mut tree = BeliefTree::new();
        let root = tree.insert(Belief::from_states([0]), &mut heuristic, &params(), &sim, &mut rng);

        let err = tree
            .expand_action(root, 9, &mut heuristic, &params(), &sim, &mut rng)
            .unwrap_err();
        assert_eq!(err, PlannerError::ActionOutOfRange { action: 9, size: 2 });
    }

    #[test]
    fn expand_action_is_lazy_and_idempotent() {
        let (sim, mut heuristic, mut rng) = setup();
        let mut tree = BeliefTree::new();
        let root = tree.insert(Belief::from_states([0]), &mut heuristic, &params(), &sim, &mut rng);

        tree.expand_action(root, 0, &mut heuristic, &params(), &sim, &mut rng).unwrap();
        let before = tree.len();
        tree.expand_action(root, 0, &mut heuristic, &params(), &sim, &mut rng).unwrap();
        assert_eq!(tree.len(), before);
    }

    // ---- bounds ----

    #[test]
    fn update_best_action_tightens_monotonically() {
        let (sim, mut heuristic, mut rng) = setup();
        let gamma = sim.discount();
        let mut tree = BeliefTree::new();
        let root = tree.insert(Belief::from_states([0]), &mut heuristic, &params(), &sim, &mut rng);

        for action in 0..sim.num_actions() {
            tree.expand_action(root, action, &mut heuristic, &params(), &sim, &mut rng).unwrap();
        }
        tree.update_best_action(root, gamma, sim.num_actions());

        assert_eq!(tree[root].best_action(), 0);
        let (lower, upper) = (tree[root].lower(), tree[root].upper());
        assert!(lower <= upper);

        // A second pass never worsens either bound.
        for action in 0..sim.num_actions() {
            tree.refresh_action(root, action);
        }
        tree.update_best_action(root, gamma, sim.num_actions());
        assert!(tree[root].lower() >= lower);
        assert!(tree[root].upper() <= upper);
    }

    #[test]
    fn raise_lower_clamps_at_upper() {
        let (sim, mut heuristic, mut rng) = setup();
        let mut tree = BeliefTree::new();
        let root = tree.insert(Belief::from_states([0]), &mut heuristic, &params(), &sim, &mut rng);

        tree[root].raise_lower(1000.0);
        assert_eq!(tree[root].lower(), tree[root].upper());
    }

    // ---- choose_observation ----

    #[test]
    fn choose_observation_requires_expansion() {
        let (sim, mut heuristic, mut rng) = setup();
        let mut tree = BeliefTree::new();
        let root = tree.insert(Belief::from_states([0]), &mut heuristic, &params(), &sim, &mut rng);
        assert!(tree.choose_observation(root, 0.0).is_none());
    }

    #[test]
    fn choose_observation_prefers_the_wider_gap() {
        let (sim, mut heuristic, mut rng) = setup();
        let mut tree = BeliefTree::new();
        let belief: Belief = [(0, 0.5), (1, 0.5)].into_iter().collect();
        let root = tree.insert(belief, &mut heuristic, &params(), &sim, &mut rng);
        tree.expand_action(root, 1, &mut heuristic, &params(), &sim, &mut rng).unwrap();
        tree.update_best_action(root, sim.discount(), sim.num_actions());

        // Action 1 (stay) keeps both states non-terminal; both children
        // exist and the chosen one carries the larger weighted gap.
        let (obs, child) = tree.choose_observation(root, 0.0).expect("children exist");
        let action = tree[root].action(tree[root].best_action()).unwrap();
        for (&other_obs, &other_child) in action.children() {
            if other_obs != obs {
                let w = action.weights()[&other_obs];
                let chosen_w = action.weights()[&obs];
                assert!(chosen_w * tree[child].gap() >= w * tree[other_child].gap() - 1e-12);
            }
        }
    }
}
