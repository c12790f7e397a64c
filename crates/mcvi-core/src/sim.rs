use rand::rngs::SmallRng;
use rand::Rng;

/// Opaque world-state identifier. The simulator owns the encoding; the
/// planner only ever compares, hashes and stores these.
pub type State = u64;

/// Action index in `[0, num_actions)`.
pub type Action = usize;

/// Observation index in `[0, num_observations)`.
pub type Obs = usize;

/// One simulator transition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Step {
    pub next_state: State,
    pub obs: Obs,
    pub reward: f64,
    /// True iff `next_state` is terminal under the domain's rules.
    pub done: bool,
}

// ---------------------------------------------------------------------------
// PomdpSim trait
// ---------------------------------------------------------------------------

/// Black-box POMDP the planner queries.
///
/// The simulator is stochastic but deterministic given its RNG; the planner
/// never assumes `step` is pure and always threads the RNG explicitly so
/// that runs with the same seed replay exactly.
pub trait PomdpSim {
    fn sample_start_state(&self, rng: &mut SmallRng) -> State;

    fn step(&self, state: State, action: Action, rng: &mut SmallRng) -> Step;

    fn is_terminal(&self, state: State) -> bool;

    fn num_actions(&self) -> usize;

    fn num_observations(&self) -> usize;

    /// Discount factor, in `(0, 1)`.
    fn discount(&self) -> f64;

    /// Uniformly random action. Domains with a smarter default can override.
    fn random_action(&self, rng: &mut SmallRng) -> Action {
        rng.gen_range(0..self.num_actions())
    }
}
