use crate::belief::Belief;
use crate::heuristic::{PathStep, PathToTerminal};
use crate::sim::{Action, Obs, PomdpSim, State};
use rand::rngs::SmallRng;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::io;

// ---------------------------------------------------------------------------
// NodeId — typed index into the controller's node table
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Outgoing edges of one controller node: `observation → successor`.
/// Observations absent from the map are undefined edges.
pub type EdgeMap = BTreeMap<Obs, NodeId>;

// ---------------------------------------------------------------------------
// AlphaNode — one controller state
// ---------------------------------------------------------------------------

/// A finite-state-controller node: the action it emits, a memo of simulated
/// per-state values (the node's alpha function), and a running value summary
/// under the beliefs that committed to it.
#[derive(Clone, Debug)]
pub struct AlphaNode {
    best_action: Action,
    alpha: FxHashMap<State, f64>,
    v_node: f64,
    v_count: u64,
}

impl AlphaNode {
    pub fn new(best_action: Action) -> Self {
        Self {
            best_action,
            alpha: FxHashMap::default(),
            v_node: 0.0,
            v_count: 0,
        }
    }

    pub fn best_action(&self) -> Action {
        self.best_action
    }

    pub fn v_node(&self) -> f64 {
        self.v_node
    }

    pub fn alpha(&self, state: State) -> Option<f64> {
        self.alpha.get(&state).copied()
    }

    fn set_alpha(&mut self, state: State, value: f64) {
        self.alpha.insert(state, value);
    }

    /// Welford running-average update of the node's value summary.
    pub fn fold_value(&mut self, value: f64) {
        self.v_count += 1;
        self.v_node += (value - self.v_node) / self.v_count as f64;
    }
}

// ---------------------------------------------------------------------------
// AlphaVectorFsc — the controller graph
// ---------------------------------------------------------------------------

/// Policy graph: a node table plus per-node observation edges. Nodes refer
/// to each other only through [`NodeId`], so self-loops and shared suffixes
/// need no special treatment.
#[derive(Clone, Debug, Default)]
pub struct AlphaVectorFsc {
    nodes: Vec<AlphaNode>,
    edges: Vec<EdgeMap>,
    start: Option<NodeId>,
}

impl AlphaVectorFsc {
    pub fn new() -> Self {
        Self::default()
    }

    /// `max_node_size` is a capacity hint; deduplication bounds real growth.
    pub fn with_capacity(max_node_size: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(max_node_size),
            edges: Vec::with_capacity(max_node_size),
            start: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &AlphaNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut AlphaNode {
        &mut self.nodes[id.index()]
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn start(&self) -> Option<NodeId> {
        self.start
    }

    pub fn set_start(&mut self, id: NodeId) {
        self.start = Some(id);
    }

    pub fn add_node(&mut self, node: AlphaNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        self.edges.push(EdgeMap::new());
        id
    }

    pub fn set_edge(&mut self, id: NodeId, obs: Obs, next: NodeId) {
        self.edges[id.index()].insert(obs, next);
    }

    /// Replace all outgoing edges of `id`.
    pub fn set_edges(&mut self, id: NodeId, edges: EdgeMap) {
        self.edges[id.index()] = edges;
    }

    pub fn edge(&self, id: NodeId, obs: Obs) -> Option<NodeId> {
        self.edges[id.index()].get(&obs).copied()
    }

    pub fn edges(&self, id: NodeId) -> &EdgeMap {
        &self.edges[id.index()]
    }

    /// Reuse an existing node with the same action and identical full edge
    /// map, or insert `node` with `edges`. Keeps the controller deduplicated
    /// and makes repeated identical backups idempotent.
    pub fn find_or_insert(&mut self, node: AlphaNode, edges: EdgeMap) -> NodeId {
        for id in self.ids() {
            if self.nodes[id.index()].best_action == node.best_action
                && self.edges[id.index()] == edges
            {
                return id;
            }
        }
        let id = self.add_node(node);
        self.set_edges(id, edges);
        id
    }

    /// Roll the controller forward from `start` at `state` for up to
    /// `max_depth` steps, returning the discounted return. Reaching an
    /// undefined edge contributes the pessimistic tail
    /// `γ^step · γ^max_depth · r_lower` and stops the rollout.
    pub fn simulate_trajectory<S: PomdpSim + ?Sized>(
        &self,
        start: Option<NodeId>,
        state: State,
        max_depth: usize,
        r_lower: f64,
        sim: &S,
        rng: &mut SmallRng,
    ) -> f64 {
        let gamma = sim.discount();
        let mut value = 0.0;
        let mut node = start;
        let mut state = state;
        for step in 0..max_depth {
            let Some(id) = node else {
                value += gamma.powi(step as i32) * gamma.powi(max_depth as i32) * r_lower;
                break;
            };
            let action = self.node(id).best_action();
            let transition = sim.step(state, action, rng);
            node = self.edge(id, transition.obs);
            value += gamma.powi(step as i32) * transition.reward;
            if transition.done {
                break;
            }
            state = transition.next_state;
        }
        value
    }

    /// Memoised per-state value of node `id`: simulated once, cached in the
    /// node's alpha map, reused across backups.
    pub fn node_alpha<S: PomdpSim + ?Sized>(
        &mut self,
        state: State,
        id: NodeId,
        r_lower: f64,
        max_depth_sim: usize,
        sim: &S,
        rng: &mut SmallRng,
    ) -> f64 {
        if let Some(value) = self.node(id).alpha(state) {
            return value;
        }
        let value = self.simulate_trajectory(Some(id), state, max_depth_sim, r_lower, sim, rng);
        self.node_mut(id).set_alpha(state, value);
        value
    }

    /// Seed a controller from the heuristic's path forest: one node per
    /// cached path state, edges wired through sampled observations.
    pub fn from_heuristic<S: PomdpSim + ?Sized>(
        heuristic: &mut PathToTerminal,
        initial_belief: &Belief,
        max_node_size: usize,
        sim: &S,
        rng: &mut SmallRng,
    ) -> Self {
        let states: Vec<State> = initial_belief.iter().map(|(&s, _)| s).collect();
        for state in states {
            heuristic.compute(state, sim, rng);
        }

        let path_tree: Vec<(State, PathStep)> = heuristic
            .path_tree()
            .iter()
            .map(|(&s, &step)| (s, step))
            .collect();

        let mut fsc = Self::with_capacity(max_node_size);
        let mut node_map: FxHashMap<State, NodeId> = FxHashMap::default();
        for &(state, step) in &path_tree {
            node_map
                .entry(state)
                .or_insert_with(|| fsc.add_node(AlphaNode::new(step.action)));
        }
        for &(state, step) in &path_tree {
            if step.done {
                continue;
            }
            if let Some(&next_id) = node_map.get(&step.next) {
                let transition = sim.step(state, step.action, rng);
                fsc.set_edge(node_map[&state], transition.obs, next_id);
            }
        }
        fsc
    }

    /// Serialise the controller to Graphviz dot. Action and observation
    /// labels fall back to their indices when the name tables are empty or
    /// too short.
    pub fn write_graphviz<W: io::Write>(
        &self,
        out: &mut W,
        actions: &[String],
        observations: &[String],
    ) -> io::Result<()> {
        writeln!(out, "digraph AlphaVectorFsc {{")?;
        writeln!(out, "node [shape=circle];")?;
        for id in self.ids() {
            let node = self.node(id);
            let i = id.index();
            let action = actions
                .get(node.best_action())
                .cloned()
                .unwrap_or_else(|| node.best_action().to_string());
            write!(out, " n{i} [label=\"{i}\\na: {action}\\nV: {:.4}\"", node.v_node())?;
            if self.start == Some(id) {
                write!(out, ", penwidth=3")?;
            }
            writeln!(out, "];")?;
            for (&obs, &next) in self.edges(id) {
                let label = observations
                    .get(obs)
                    .cloned()
                    .unwrap_or_else(|| obs.to_string());
                writeln!(out, "n{i} -> n{} [label=\"{label}\"];", next.index())?;
            }
        }
        writeln!(out, "}}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
