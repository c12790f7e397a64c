use crate::belief::Belief;
use crate::sim::PomdpSim;
use rand::rngs::SmallRng;

/// Restarts performed before the convergence check may fire.
const MIN_RESTARTS: u64 = 8;

/// Lower bound on the value of `belief`: the best constant-action ("blind")
/// policy. For each action the discounted return of applying it forever is
/// averaged over rollouts from belief-sampled states until the running mean
/// moves less than `epsilon` (or `max_restarts` trips); the maximum over
/// actions is returned. Achievable by construction, hence a valid bound.
pub fn find_r_lower<S: PomdpSim + ?Sized>(
    sim: &S,
    belief: &Belief,
    epsilon: f64,
    max_restarts: u64,
    max_depth: usize,
    rng: &mut SmallRng,
) -> f64 {
    let gamma = sim.discount();
    let mut best = f64::NEG_INFINITY;
    for action in 0..sim.num_actions() {
        let mut mean = 0.0;
        for restart in 0..max_restarts {
            let mut state = belief.sample_one_state(rng);
            let mut ret = 0.0;
            let mut discount = 1.0;
            for _ in 0..max_depth {
                if sim.is_terminal(state) {
                    break;
                }
                let step = sim.step(state, action, rng);
                ret += discount * step.reward;
                if step.done {
                    break;
                }
                discount *= gamma;
                state = step.next_state;
            }
            let previous = mean;
            mean += (ret - mean) / (restart + 1) as f64;
            if restart + 1 >= MIN_RESTARTS && (mean - previous).abs() < epsilon {
                break;
            }
        }
        if mean > best {
            best = mean;
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
