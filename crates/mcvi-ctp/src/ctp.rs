use crate::statespace::StateSpace;
use mcvi_core::{Action, Obs, PomdpSim, ShortestPathFaster, SpfaEdge, State, Step};
use rand::rngs::SmallRng;
use rand::Rng;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;

/// Undirected road edge, smaller endpoint first.
pub type RoadEdge = (u32, u32);

fn edge_key(a: u32, b: u32) -> RoadEdge {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

fn edge_factor((a, b): RoadEdge) -> String {
    format!("e{a}_{b}")
}

// ---------------------------------------------------------------------------
// GraphPath — shortest paths over the road graph
// ---------------------------------------------------------------------------

/// The road graph viewed as an SPFA instance: states are graph node ids,
/// edge labels the neighbour reached.
struct GraphPath {
    edges: BTreeMap<RoadEdge, f64>,
}

impl ShortestPathFaster for GraphPath {
    fn edges(&mut self, state: State) -> Vec<SpfaEdge> {
        let node = state as u32;
        self.edges
            .iter()
            .filter_map(|(&(a, b), &w)| {
                if a == node {
                    Some((b as State, w, b as i64))
                } else if b == node {
                    Some((a as State, w, a as i64))
                } else {
                    None
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Ctp — Canadian Traveller simulator
// ---------------------------------------------------------------------------

/// Canadian Traveller Problem: reach `goal` from `origin` over a road graph
/// whose stochastic edges are each blocked with a fixed probability, drawn
/// once per episode and hidden until the traveller stands next to them.
///
/// State factors: `loc` (a node index, plus a virtual pre-observation start
/// location and an absorbing post-declaration location) and one 0/1
/// open-flag per stochastic edge. Actions: move-to-node per graph node,
/// plus a final `decide_goal_unreachable` action that terminates correctly
/// only when the goal is truly severed.
/// Observation = `loc · 2^w + local edge bits` where `w` is the maximum
/// number of stochastic edges adjacent to any single node.
pub struct Ctp {
    nodes: Vec<u32>,
    edges: BTreeMap<RoadEdge, f64>,
    stoch_edges: BTreeMap<RoadEdge, f64>,
    origin_idx: u64,
    goal_idx: u64,
    state_space: StateSpace,
    obs_width: u64,
    idle_reward: f64,
    bad_action_reward: f64,
    goal_reachable: RefCell<FxHashMap<State, bool>>,
}

impl Ctp {
    pub fn new(
        mut nodes: Vec<u32>,
        edges: BTreeMap<RoadEdge, f64>,
        stoch_edges: BTreeMap<RoadEdge, f64>,
        origin: u32,
        goal: u32,
    ) -> Self {
        nodes.sort_unstable();
        assert!(stoch_edges.keys().all(|e| edges.contains_key(e)));
        let origin_idx = nodes.binary_search(&origin).expect("origin not a node") as u64;
        let goal_idx = nodes.binary_search(&goal).expect("goal not a node") as u64;

        let mut factors = BTreeMap::new();
        // Two extra locations: the virtual start (observed as the origin
        // only after the first action resolves) and the absorbing state
        // entered by a correct unreachability declaration.
        factors.insert("loc".to_string(), nodes.len() as u64 + 2);
        for &edge in stoch_edges.keys() {
            factors.insert(edge_factor(edge), 2); // 0 = blocked, 1 = open
        }
        let state_space = StateSpace::new(factors);

        let max_adjacent = nodes
            .iter()
            .map(|&n| {
                stoch_edges
                    .keys()
                    .filter(|&&(a, b)| a == n || b == n)
                    .count()
            })
            .max()
            .unwrap_or(0);
        let obs_width = 1u64 << max_adjacent;

        Self {
            nodes,
            edges,
            stoch_edges,
            origin_idx,
            goal_idx,
            state_space,
            obs_width,
            idle_reward: -1.0,
            bad_action_reward: -50.0,
            goal_reachable: RefCell::new(FxHashMap::default()),
        }
    }

    /// Six-node instance: a deterministic detour of cost 10 against a
    /// stochastic shortcut of cost 3, both stochastic edges observable from
    /// the origin.
    pub fn demo_graph() -> Self {
        let nodes = vec![0, 1, 2, 3, 4, 5];
        let edges = BTreeMap::from([
            ((0, 1), 1.0),
            ((1, 5), 2.0),
            ((0, 4), 2.0),
            ((4, 5), 3.0),
            ((0, 2), 4.0),
            ((2, 3), 3.0),
            ((3, 5), 3.0),
        ]);
        let stoch_edges = BTreeMap::from([((0, 1), 0.3), ((0, 4), 0.5)]);
        Self::new(nodes, edges, stoch_edges, 0, 5)
    }

    pub fn nodes(&self) -> &[u32] {
        &self.nodes
    }

    pub fn origin(&self) -> u32 {
        self.nodes[self.origin_idx as usize]
    }

    pub fn goal(&self) -> u32 {
        self.nodes[self.goal_idx as usize]
    }

    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.iter().map(|n| n.to_string()).collect();
        names.push("decide_goal_unreachable".to_string());
        names
    }

    fn init_loc(&self) -> u64 {
        self.nodes.len() as u64
    }

    fn declared_loc(&self) -> u64 {
        self.nodes.len() as u64 + 1
    }

    fn declare_action(&self) -> Action {
        self.nodes.len()
    }

    fn loc_of(&self, state: State) -> u64 {
        self.state_space.factor_elem(state, "loc")
    }

    fn edge_open(&self, state: State, edge: RoadEdge) -> bool {
        self.state_space.factor_elem(state, &edge_factor(edge)) == 1
    }

    /// Stochastic edges touching `node`, ordered by the far endpoint.
    fn adjacent_stoch_edges(&self, node: u32) -> Vec<RoadEdge> {
        let mut adjacent: Vec<RoadEdge> = self
            .stoch_edges
            .keys()
            .copied()
            .filter(|&(a, b)| a == node || b == node)
            .collect();
        adjacent.sort_by_key(|&(a, b)| if a == node { b } else { a });
        adjacent
    }

    fn nodes_adjacent(&self, a: u32, b: u32, state: State) -> bool {
        if a == b {
            return true;
        }
        let edge = edge_key(a, b);
        if !self.edges.contains_key(&edge) {
            return false;
        }
        if !self.stoch_edges.contains_key(&edge) {
            return true;
        }
        self.edge_open(state, edge)
    }

    fn apply_action(&self, state: State, action: Action) -> (State, f64) {
        let loc = self.loc_of(state);
        if loc == self.init_loc() {
            // The first action only resolves the virtual start.
            return (self.state_space.update_factor(state, "loc", self.origin_idx), 0.0);
        }
        if loc == self.goal_idx || loc == self.declared_loc() {
            return (state, 0.0); // terminal states absorb
        }
        if action == self.declare_action() {
            // A correct declaration ends the episode; a wrong one is just an
            // expensive no-op.
            return if self.goal_unreachable(state) {
                (self.state_space.update_factor(state, "loc", self.declared_loc()), 0.0)
            } else {
                (state, self.bad_action_reward)
            };
        }
        if action as u64 == loc {
            return (state, self.idle_reward);
        }
        let here = self.nodes[loc as usize];
        let there = self.nodes[action];
        if !self.nodes_adjacent(here, there, state) {
            return (state, self.bad_action_reward);
        }
        let next = self.state_space.update_factor(state, "loc", action as u64);
        (next, -self.edges[&edge_key(here, there)])
    }

    fn observe(&self, state: State) -> Obs {
        let mut loc = self.loc_of(state);
        if loc == self.init_loc() || loc == self.declared_loc() {
            // The virtual start is observed as the origin; a declaration
            // leaves the traveller standing wherever the network is judged
            // from, which the observation also maps to the origin.
            loc = self.origin_idx;
        }
        let node = self.nodes[loc as usize];
        let mut bits = 0u64;
        for (n, edge) in self.adjacent_stoch_edges(node).into_iter().enumerate() {
            if self.edge_open(state, edge) {
                bits |= 1 << n;
            }
        }
        (loc * self.obs_width + bits) as Obs
    }

    fn finished(&self, state: State, next: State) -> bool {
        if self.loc_of(state) == self.init_loc() {
            return false;
        }
        self.is_terminal(next)
    }

    /// Whether the goal is severed from the origin under this edge
    /// configuration. Cached per configuration; answered by a shortest-path
    /// query over the currently open edges.
    fn goal_unreachable(&self, state: State) -> bool {
        let key = self.state_space.update_factor(state, "loc", self.origin_idx);
        if let Some(&reachable) = self.goal_reachable.borrow().get(&key) {
            return !reachable;
        }

        let open_edges: BTreeMap<RoadEdge, f64> = self
            .edges
            .iter()
            .filter(|(&edge, _)| {
                !self.stoch_edges.contains_key(&edge) || self.edge_open(state, edge)
            })
            .map(|(&edge, &w)| (edge, w))
            .collect();
        let cap = self.nodes.len() * (open_edges.len() + 1);
        let (costs, _) = GraphPath { edges: open_edges }.calculate(self.origin() as State, cap);
        let reachable = costs.contains_key(&(self.goal() as State));
        self.goal_reachable.borrow_mut().insert(key, reachable);
        !reachable
    }

    /// Render the road graph as Graphviz dot: origin and goal filled,
    /// stochastic edges dashed and labelled with their blocking probability.
    pub fn visualise<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "graph G {{")?;
        for &node in &self.nodes {
            write!(out, "  {node} [label=\"{node}\"")?;
            if node == self.origin() {
                write!(out, ", fillcolor=\"#ff7f0e\", style=filled")?;
            }
            if node == self.goal() {
                write!(out, ", fillcolor=\"#2ca02c\", style=filled")?;
            }
            writeln!(out, "];")?;
        }
        for (&(a, b), &weight) in &self.edges {
            match self.stoch_edges.get(&(a, b)) {
                Some(p) => writeln!(out, "  {a} -- {b} [label=\"{p} : {weight}\", style=dashed];")?,
                None => writeln!(out, "  {a} -- {b} [label=\"{weight}\"];")?,
            }
        }
        writeln!(out, "}}")
    }
}

impl PomdpSim for Ctp {
    fn sample_start_state(&self, rng: &mut SmallRng) -> State {
        let mut values = BTreeMap::new();
        values.insert("loc".to_string(), self.init_loc());
        for (&edge, &p_block) in &self.stoch_edges {
            let open = if rng.gen::<f64>() < p_block { 0 } else { 1 };
            values.insert(edge_factor(edge), open);
        }
        self.state_space.state_index(&values)
    }

    fn step(&self, state: State, action: Action, _rng: &mut SmallRng) -> Step {
        let (next, reward) = self.apply_action(state, action);
        Step {
            next_state: next,
            obs: self.observe(next),
            reward,
            done: self.finished(state, next),
        }
    }

    fn is_terminal(&self, state: State) -> bool {
        let loc = self.loc_of(state);
        loc == self.goal_idx || loc == self.declared_loc()
    }

    fn num_actions(&self) -> usize {
        self.nodes.len() + 1
    }

    fn num_observations(&self) -> usize {
        (self.nodes.len() as u64 * self.obs_width) as usize
    }

    fn discount(&self) -> f64 {
        0.95
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
