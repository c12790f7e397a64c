use crate::belief::Belief;
use crate::bounds::find_r_lower;
use crate::error::PlannerError;
use crate::fsc::{AlphaNode, AlphaVectorFsc, EdgeMap};
use crate::heuristic::PathToTerminal;
use crate::sim::PomdpSim;
use crate::tree::{BeliefTree, ExpandParams, TreeNodeId};
use rand::rngs::SmallRng;
use std::time::{Duration, Instant};

/// States sampled per backup when estimating a controller node's value.
const VALUE_SAMPLES: usize = 16;

// ---------------------------------------------------------------------------
// PlanConfig
// ---------------------------------------------------------------------------

/// Planner knobs — immutable for the lifetime of a planner.
#[derive(Clone, Debug)]
pub struct PlanConfig {
    /// Horizon for Monte-Carlo trajectory rollouts and the belief descent.
    pub max_sim_depth: usize,
    /// Cap on states sampled per action expansion.
    pub max_belief_samples: usize,
    /// Hard cap on planner iterations per `plan` call.
    pub max_iter: usize,
    /// Terminate once `upper - lower` at the root falls below this.
    pub converge_thresh: f64,
    /// Horizon for heuristic evaluation.
    pub eval_depth: usize,
    /// Convergence threshold for blind-bound estimation.
    pub eval_epsilon: f64,
    /// Soft cap / initial capacity for the controller node table.
    pub max_node_size: usize,
    /// Wall-clock budget; when exceeded the current controller is returned.
    pub max_computation_ms: Option<u64>,
    /// Rollout cap per action inside the blind bound.
    pub r_lower_restarts: u64,
    /// Expansion cap per heuristic shortest-path run.
    pub max_heuristic_expansions: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            max_sim_depth: 30,
            max_belief_samples: 100,
            max_iter: 30,
            converge_thresh: 0.1,
            eval_depth: 40,
            eval_epsilon: 0.005,
            max_node_size: 10_000,
            max_computation_ms: None,
            r_lower_restarts: 100,
            max_heuristic_expansions: 10_000,
        }
    }
}

/// Outcome of one `plan` call.
#[derive(Clone, Debug)]
pub struct PlanStats {
    pub iterations: usize,
    pub root_lower: f64,
    pub root_upper: f64,
    pub fsc_nodes: usize,
    pub converged: bool,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// McviPlanner
// ---------------------------------------------------------------------------

/// Monte-Carlo value iteration: interleaves forward belief sampling with
/// leaves-first Monte-Carlo backups until the root's bound gap closes.
///
/// Owns the belief tree, the controller under construction, the shared
/// heuristic cache and the RNG every sub-component borrows. `plan` may be
/// called repeatedly; each call continues from the previous state, which is
/// what makes the planner anytime.
pub struct McviPlanner<'a, S: PomdpSim + ?Sized> {
    sim: &'a S,
    config: PlanConfig,
    initial_belief: Belief,
    tree: BeliefTree,
    fsc: AlphaVectorFsc,
    heuristic: PathToTerminal,
    rng: SmallRng,
    root: Option<TreeNodeId>,
    r_lower: Option<f64>,
}

impl<'a, S: PomdpSim + ?Sized> McviPlanner<'a, S> {
    pub fn new(sim: &'a S, initial_belief: Belief, config: PlanConfig, rng: SmallRng) -> Self {
        let fsc = AlphaVectorFsc::with_capacity(config.max_node_size);
        let heuristic = PathToTerminal::new(config.max_heuristic_expansions);
        Self {
            sim,
            config,
            initial_belief,
            tree: BeliefTree::new(),
            fsc,
            heuristic,
            rng,
            root: None,
            r_lower: None,
        }
    }

    pub fn fsc(&self) -> &AlphaVectorFsc {
        &self.fsc
    }

    pub fn into_fsc(self) -> AlphaVectorFsc {
        self.fsc
    }

    pub fn tree(&self) -> &BeliefTree {
        &self.tree
    }

    pub fn root(&self) -> Option<TreeNodeId> {
        self.root
    }

    /// Run the sample → backup → converge loop.
    pub fn plan(&mut self) -> Result<PlanStats, PlannerError> {
        let start_time = Instant::now();
        let Self {
            sim,
            config,
            initial_belief,
            tree,
            fsc,
            heuristic,
            rng,
            root,
            r_lower,
        } = self;
        let sim: &S = *sim;
        let ctx = Ctx {
            sim,
            params: ExpandParams {
                max_belief_samples: config.max_belief_samples,
                eval_depth: config.eval_depth,
                eval_epsilon: config.eval_epsilon,
                r_lower_restarts: config.r_lower_restarts,
            },
            cfg: config,
            r_lower: *r_lower.get_or_insert_with(|| {
                find_r_lower(
                    sim,
                    initial_belief,
                    config.eval_epsilon,
                    config.r_lower_restarts,
                    config.max_sim_depth,
                    rng,
                )
            }),
        };

        let root_id = match *root {
            Some(id) => id,
            None => {
                // Oversized particle sets are downsampled once up front; the
                // per-expansion cap handles everything downstream.
                let belief = if initial_belief.len() > ctx.cfg.max_belief_samples {
                    initial_belief.downsample(ctx.cfg.max_belief_samples, rng)
                } else {
                    initial_belief.clone()
                };
                let id = tree.insert(belief, heuristic, &ctx.params, sim, rng);
                *root = Some(id);
                id
            }
        };

        // Seed controller so simulated trajectories have somewhere to start.
        if fsc.is_empty() {
            let seed = fsc.add_node(AlphaNode::new(tree[root_id].best_action()));
            fsc.set_start(seed);
        }

        let mut iterations = 0;
        let mut converged = tree[root_id].gap() < ctx.cfg.converge_thresh;
        while !converged && iterations < ctx.cfg.max_iter {
            if let Some(ms) = ctx.cfg.max_computation_ms {
                if start_time.elapsed() >= Duration::from_millis(ms) {
                    break;
                }
            }

            let mut traversal = Vec::new();
            sample_beliefs(tree, fsc, heuristic, rng, &ctx, root_id, &mut traversal)?;
            for &id in traversal.iter().rev() {
                back_up(tree, fsc, heuristic, rng, &ctx, id)?;
            }
            if let Some(start) = tree[root_id].fsc_node() {
                fsc.set_start(start);
            }

            iterations += 1;
            converged = tree[root_id].gap() < ctx.cfg.converge_thresh;
            tracing::debug!(
                iteration = iterations,
                lower = tree[root_id].lower(),
                upper = tree[root_id].upper(),
                fsc_nodes = fsc.len(),
                "planner iteration"
            );
        }

        Ok(PlanStats {
            iterations,
            root_lower: tree[root_id].lower(),
            root_upper: tree[root_id].upper(),
            fsc_nodes: fsc.len(),
            converged,
            elapsed: start_time.elapsed(),
        })
    }
}

/// Read-only per-`plan` context threaded through the descent.
struct Ctx<'a, S: PomdpSim + ?Sized> {
    sim: &'a S,
    params: ExpandParams,
    cfg: &'a PlanConfig,
    r_lower: f64,
}

// ---------------------------------------------------------------------------
// sample_beliefs — excess-uncertainty descent
// ---------------------------------------------------------------------------

/// Descend from the root, backing up each visited node and recursing into
/// the observation with the largest weighted excess uncertainty. The target
/// gap inflates by `γ^{-depth}` so deep nodes are only expanded when their
/// resolution still matters at the root.
fn sample_beliefs<S: PomdpSim + ?Sized>(
    tree: &mut BeliefTree,
    fsc: &mut AlphaVectorFsc,
    heuristic: &mut PathToTerminal,
    rng: &mut SmallRng,
    ctx: &Ctx<'_, S>,
    root: TreeNodeId,
    traversal: &mut Vec<TreeNodeId>,
) -> Result<(), PlannerError> {
    let gamma = ctx.sim.discount();
    let mut current = root;
    for depth in 0..ctx.cfg.max_sim_depth {
        if tree[current].belief().all_terminal(ctx.sim) {
            break;
        }
        back_up(tree, fsc, heuristic, rng, ctx, current)?;
        traversal.push(current);

        let target = ctx.cfg.converge_thresh * gamma.powi(-(depth as i32 + 1));
        match tree.choose_observation(current, target) {
            Some((_, child)) => current = child,
            None => break,
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// back_up — Monte-Carlo backup of one belief node
// ---------------------------------------------------------------------------

/// Expand and refresh every action child, re-pick the best action, commit
/// the node to a (deduplicated) controller node wired to the children's
/// controller nodes, and fold the achieved simulated value into the bounds.
fn back_up<S: PomdpSim + ?Sized>(
    tree: &mut BeliefTree,
    fsc: &mut AlphaVectorFsc,
    heuristic: &mut PathToTerminal,
    rng: &mut SmallRng,
    ctx: &Ctx<'_, S>,
    id: TreeNodeId,
) -> Result<(), PlannerError> {
    let sim = ctx.sim;
    // Terminal beliefs never commit to a controller node.
    if tree[id].belief().all_terminal(sim) {
        return Ok(());
    }

    for action in 0..sim.num_actions() {
        tree.expand_action(id, action, heuristic, &ctx.params, sim, rng)?;
        tree.refresh_action(id, action);
    }
    tree.update_best_action(id, sim.discount(), sim.num_actions());

    let best = tree[id].best_action();
    let mut edges = EdgeMap::new();
    {
        let action = tree[id].action(best).expect("all actions expanded");
        if action.children().is_empty() {
            return Ok(());
        }
        for (&obs, &child) in action.children() {
            // Children that never went through a backup stay undefined; the
            // trajectory simulator prices those edges with the blind tail.
            if let Some(node) = tree[child].fsc_node() {
                edges.insert(obs, node);
            }
        }
    }

    let node_id = fsc.find_or_insert(AlphaNode::new(best), edges);
    tree[id].set_fsc_node(node_id);

    // Achieved value of the committed controller node under this belief.
    let mut value = 0.0;
    for _ in 0..VALUE_SAMPLES {
        let state = tree[id].belief().sample_one_state(rng);
        value += fsc.node_alpha(state, node_id, ctx.r_lower, ctx.cfg.max_sim_depth, sim, rng);
    }
    value /= VALUE_SAMPLES as f64;
    fsc.node_mut(node_id).fold_value(value);
    tree[id].raise_lower(value);

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{initial_belief, BlockedEdgeSim, ChainSim};
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    fn chain_planner(sim: &ChainSim, seed: u64) -> McviPlanner<'_, ChainSim> {
        // The deterministic chain starts with a closed gap, so force a few
        // iterations to make the planner actually build the controller.
        McviPlanner::new(
            sim,
            Belief::from_states([0]),
            PlanConfig {
                converge_thresh: 0.0,
                max_iter: 5,
                ..PlanConfig::default()
            },
            SmallRng::seed_from_u64(seed),
        )
    }

    // ---- trivial chain (scenario: 3 states, -1 per step) ----

    #[test]
    fn chain_converges_to_the_marching_controller() {
        let sim = ChainSim::new(3);
        let mut planner = chain_planner(&sim, 42);
        let stats = planner.plan().unwrap();

        assert!((stats.root_lower - (-1.95)).abs() < 0.05, "lower = {}", stats.root_lower);
        assert!((stats.root_upper - (-1.95)).abs() < 0.05, "upper = {}", stats.root_upper);

        let fsc = planner.fsc();
        let start = fsc.start().expect("start node set");
        assert_eq!(fsc.node(start).best_action(), 0);
        // Marching from state 0 emits observation 1 (the next state); that
        // edge is wired. The terminal observation edge stays undefined.
        assert!(fsc.edge(start, 1).is_some());
        assert!(fsc.edge(start, 2).is_none());
    }

    #[test]
    fn chain_controller_simulates_to_its_lower_bound() {
        let sim = ChainSim::new(3);
        let mut planner = chain_planner(&sim, 42);
        let stats = planner.plan().unwrap();

        let fsc = planner.fsc();
        let mut rng = SmallRng::seed_from_u64(1);
        let value = fsc.simulate_trajectory(fsc.start(), 0, 30, stats.root_lower, &sim, &mut rng);
        assert!((value - stats.root_lower).abs() < 0.05, "value = {value}");
    }

    // ---- bounds ----

    #[test]
    fn root_bounds_are_ordered_and_monotone_across_iterations() {
        let sim = ChainSim::new(4);
        let mut planner = McviPlanner::new(
            &sim,
            Belief::from_states([0, 1]),
            PlanConfig {
                max_iter: 1,
                converge_thresh: 0.0,
                ..PlanConfig::default()
            },
            SmallRng::seed_from_u64(42),
        );

        let mut previous: Option<(f64, f64)> = None;
        for _ in 0..5 {
            let stats = planner.plan().unwrap();
            assert!(stats.root_lower <= stats.root_upper + 1e-9);
            if let Some((lower, upper)) = previous {
                assert!(stats.root_lower >= lower - 1e-9);
                assert!(stats.root_upper <= upper + 1e-9);
            }
            previous = Some((stats.root_lower, stats.root_upper));
        }
    }

    // ---- blocked edge (scenario: probe or declare) ----

    #[test]
    fn blocked_edge_lower_bound_clears_minus_three() {
        let sim = BlockedEdgeSim;
        let mut rng = SmallRng::seed_from_u64(42);
        let belief = initial_belief(&sim, 200, &mut rng);
        let mut planner = McviPlanner::new(
            &sim,
            belief,
            PlanConfig {
                max_iter: 20,
                converge_thresh: 0.05,
                ..PlanConfig::default()
            },
            SmallRng::seed_from_u64(42),
        );

        let stats = planner.plan().unwrap();
        assert!(stats.root_lower >= -3.0, "lower = {}", stats.root_lower);
        assert!(stats.root_lower <= stats.root_upper + 1e-9);
    }

    // ---- boundaries ----

    #[test]
    fn terminal_initial_belief_yields_the_seed_controller() {
        let sim = ChainSim::new(1); // state 0 is terminal
        let mut planner = McviPlanner::new(
            &sim,
            Belief::from_states([0]),
            PlanConfig::default(),
            SmallRng::seed_from_u64(42),
        );

        let stats = planner.plan().unwrap();
        assert!(stats.converged);
        assert_eq!(stats.iterations, 0);
        assert_eq!(stats.root_lower, 0.0);
        assert_eq!(stats.root_upper, 0.0);
        assert_eq!(planner.fsc().len(), 1);
        assert_eq!(planner.fsc().start().map(|id| id.index()), Some(0));
    }

    #[test]
    fn zero_time_budget_returns_the_current_controller() {
        let sim = ChainSim::new(3);
        let mut planner = McviPlanner::new(
            &sim,
            Belief::from_states([0]),
            PlanConfig {
                max_computation_ms: Some(0),
                ..PlanConfig::default()
            },
            SmallRng::seed_from_u64(42),
        );

        let stats = planner.plan().unwrap();
        assert_eq!(stats.iterations, 0);
        assert!(!planner.fsc().is_empty());
        assert!(planner.fsc().start().is_some());
    }

    // ---- dedup ----

    #[test]
    fn controller_nodes_are_unique_by_action_and_edges() {
        let sim = ChainSim::new(4);
        let mut planner = McviPlanner::new(
            &sim,
            Belief::from_states([0, 1]),
            PlanConfig {
                converge_thresh: 0.0,
                max_iter: 10,
                ..PlanConfig::default()
            },
            SmallRng::seed_from_u64(42),
        );
        planner.plan().unwrap();

        let fsc = planner.fsc();
        let mut seen = BTreeSet::new();
        for id in fsc.ids() {
            let key = (fsc.node(id).best_action(), fsc.edges(id).clone());
            assert!(seen.insert(key), "duplicate controller node {}", id.index());
        }
    }

    // ---- determinism ----

    #[test]
    fn identical_seeds_produce_identical_controllers() {
        let sim = ChainSim::new(4);
        let mut dots = Vec::new();
        for _ in 0..2 {
            let mut planner = McviPlanner::new(
                &sim,
                Belief::from_states([0, 1]),
                PlanConfig {
                    converge_thresh: 0.0,
                    max_iter: 5,
                    ..PlanConfig::default()
                },
                SmallRng::seed_from_u64(42),
            );
            planner.plan().unwrap();
            let mut out = Vec::new();
            planner.fsc().write_graphviz(&mut out, &[], &[]).unwrap();
            dots.push(String::from_utf8(out).unwrap());
        }
        assert_eq!(dots[0], dots[1]);
    }
}
