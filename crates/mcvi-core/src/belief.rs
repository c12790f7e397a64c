use crate::sim::{PomdpSim, State};
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::SmallRng;
use rustc_hash::FxHashMap;
use std::fmt;

/// Tolerance for probability-mass checks.
pub const MASS_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Belief — weighted particle distribution over states
// ---------------------------------------------------------------------------

/// Probability distribution over hidden states, stored as `state → mass`.
///
/// Masses are non-negative and, for a normalised belief, sum to 1 within
/// [`MASS_TOLERANCE`]. Working copies used for without-replacement sampling
/// are allowed to carry residual (unnormalised) mass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Belief {
    particles: FxHashMap<State, f64>,
}

impl Belief {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a belief from raw state draws, each contributing equal mass.
    /// Duplicate draws accumulate, so the result is already normalised.
    pub fn from_states(states: impl IntoIterator<Item = State>) -> Self {
        let states: Vec<State> = states.into_iter().collect();
        let mass = 1.0 / states.len() as f64;
        let mut belief = Self::new();
        for s in states {
            belief.add_mass(s, mass);
        }
        belief
    }

    /// Accumulate `mass` onto `state`.
    pub fn add_mass(&mut self, state: State, mass: f64) {
        *self.particles.entry(state).or_insert(0.0) += mass;
    }

    pub fn mass_of(&self, state: State) -> f64 {
        self.particles.get(&state).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&State, &f64)> {
        self.particles.iter()
    }

    /// Total probability mass.
    pub fn mass(&self) -> f64 {
        self.particles.values().sum()
    }

    /// Rescale so the total mass is exactly 1.
    pub fn normalise(&mut self) {
        let total = self.mass();
        if total > 0.0 {
            for p in self.particles.values_mut() {
                *p /= total;
            }
        }
    }

    /// True iff every supported state is terminal under `sim`.
    pub fn all_terminal<S: PomdpSim + ?Sized>(&self, sim: &S) -> bool {
        self.particles.keys().all(|&s| sim.is_terminal(s))
    }

    /// Draw one state with probability proportional to its mass.
    pub fn sample_one_state(&self, rng: &mut SmallRng) -> State {
        let (states, weights): (Vec<State>, Vec<f64>) =
            self.particles.iter().map(|(&s, &p)| (s, p)).unzip();
        let dist = WeightedIndex::new(&weights).expect("sampling from an empty belief");
        states[dist.sample(rng)]
    }

    /// Draw without replacement: sample a state proportionally to residual
    /// mass, remove it, and return `(state, mass)`. `None` once exhausted.
    ///
    /// Callers enumerate distinct posterior states by cloning the belief and
    /// draining the clone.
    pub fn sample_destructive(&mut self, rng: &mut SmallRng) -> Option<(State, f64)> {
        if self.particles.is_empty() {
            return None;
        }
        let state = self.sample_one_state(rng);
        let mass = self.particles.remove(&state).expect("sampled state must be present");
        Some((state, mass))
    }

    /// Weighted-shuffle downsampling: keep `k` distinct states drawn in
    /// proportion to their mass, then renormalise. Relative masses of the
    /// retained states are preserved.
    pub fn downsample(&self, k: usize, rng: &mut SmallRng) -> Belief {
        let mut working = self.clone();
        let mut kept = Belief::new();
        for _ in 0..k {
            match working.sample_destructive(rng) {
                Some((state, mass)) => kept.add_mass(state, mass),
                None => break,
            }
        }
        kept.normalise();
        kept
    }
}

impl FromIterator<(State, f64)> for Belief {
    fn from_iter<I: IntoIterator<Item = (State, f64)>>(iter: I) -> Self {
        let mut belief = Belief::new();
        for (s, p) in iter {
            belief.add_mass(s, p);
        }
        belief
    }
}

impl fmt::Display for Belief {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<(State, f64)> = self.particles.iter().map(|(&s, &p)| (s, p)).collect();
        entries.sort_by_key(|&(s, _)| s);
        write!(f, "{{")?;
        for (i, (s, p)) in entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{s}: {p:.6}")?;
        }
        write!(f, "}}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
