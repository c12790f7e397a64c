pub mod belief;
pub mod bounds;
pub mod error;
pub mod eval;
pub mod fsc;
pub mod heuristic;
pub mod planner;
pub mod sim;
pub mod spfa;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_util;

pub use belief::Belief;
pub use bounds::find_r_lower;
pub use error::PlannerError;
pub use eval::{
    evaluation_with_greedy_tree_policy, evaluation_with_simulation_fsc, greedy_action,
    simulation_with_fsc, RunningStats,
};
pub use fsc::{AlphaNode, AlphaVectorFsc, EdgeMap, NodeId};
pub use heuristic::{upper_bound_evaluation, PathStep, PathToTerminal};
pub use planner::{McviPlanner, PlanConfig, PlanStats};
pub use sim::{Action, Obs, PomdpSim, State, Step};
pub use spfa::{ShortestPathFaster, SpfaEdge};
pub use tree::{ActionNode, BeliefTree, BeliefTreeNode, ExpandParams, TreeNodeId};
