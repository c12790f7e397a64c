use crate::belief::Belief;
use crate::sim::{Action, PomdpSim, State, Step};
use rand::rngs::SmallRng;
use rand::Rng;

/// Linear corridor: states `0..len`, terminal at `len - 1`.
///
/// Action 0 moves right, action 1 stays; observation = resulting state;
/// reward -1 per step, 0 once terminal; discount 0.95.
pub struct ChainSim {
    len: u64,
}

impl ChainSim {
    pub fn new(len: u64) -> Self {
        assert!(len >= 1);
        Self { len }
    }

    fn terminal(&self) -> State {
        self.len - 1
    }
}

impl PomdpSim for ChainSim {
    fn sample_start_state(&self, _rng: &mut SmallRng) -> State {
        0
    }

    fn step(&self, state: State, action: Action, _rng: &mut SmallRng) -> Step {
        if state == self.terminal() {
            return Step {
                next_state: state,
                obs: state as usize,
                reward: 0.0,
                done: true,
            };
        }
        let next = if action == 0 { state + 1 } else { state };
        Step {
            next_state: next,
            obs: next as usize,
            reward: -1.0,
            done: next == self.terminal(),
        }
    }

    fn is_terminal(&self, state: State) -> bool {
        state == self.terminal()
    }

    fn num_actions(&self) -> usize {
        2
    }

    fn num_observations(&self) -> usize {
        self.len as usize
    }

    fn discount(&self) -> f64 {
        0.95
    }
}

/// Two-node graph with one stochastic edge, blocked with probability 0.5.
///
/// State = `loc * 2 + status` with `loc ∈ {0: start, 1: goal, 2: declared}`
/// and `status ∈ {0: blocked, 1: open}`. Action 0 attempts the traverse
/// (reward -1, succeeds iff open); action 1 declares the goal unreachable
/// (reward 0 if truly blocked, -50 otherwise, always terminal).
pub struct BlockedEdgeSim;

impl BlockedEdgeSim {
    fn loc(state: State) -> u64 {
        state / 2
    }

    fn status(state: State) -> u64 {
        state % 2
    }
}

impl PomdpSim for BlockedEdgeSim {
    fn sample_start_state(&self, rng: &mut SmallRng) -> State {
        if rng.gen_bool(0.5) {
            1 // open
        } else {
            0 // blocked
        }
    }

    fn step(&self, state: State, action: Action, _rng: &mut SmallRng) -> Step {
        if self.is_terminal(state) {
            return Step {
                next_state: state,
                obs: state as usize,
                reward: 0.0,
                done: true,
            };
        }
        let status = Self::status(state);
        let (next, reward) = match action {
            0 if status == 1 => (2 + status, -1.0), // traverse succeeds
            0 => (state, -1.0),                     // traverse bounces off the blocked edge
            _ => {
                let reward = if status == 0 { 0.0 } else { -50.0 };
                (4 + status, reward)
            }
        };
        Step {
            next_state: next,
            obs: next as usize,
            reward,
            done: Self::loc(next) >= 1,
        }
    }

    fn is_terminal(&self, state: State) -> bool {
        Self::loc(state) >= 1
    }

    fn num_actions(&self) -> usize {
        2
    }

    fn num_observations(&self) -> usize {
        6
    }

    fn discount(&self) -> f64 {
        0.95
    }
}

/// Sample `n` start states into an initial belief.
pub fn initial_belief<S: PomdpSim>(sim: &S, n: usize, rng: &mut SmallRng) -> Belief {
    Belief::from_states((0..n).map(|_| sim.sample_start_state(rng)))
}
