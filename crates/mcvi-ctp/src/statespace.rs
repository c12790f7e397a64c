use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// StateSpace — factored state indexing
// ---------------------------------------------------------------------------

/// Packs named state factors into a single integer and back.
///
/// Factors are ordered by name; each holds an element in `[0, cardinality)`.
/// The packed index is the mixed-radix number over the factor elements, so
/// the full space enumerates densely in `[0, size)`.
pub struct StateSpace {
    names: Vec<String>,
    sizes: Vec<u64>,
    /// Cumulative product of the sizes of all later factors.
    prod: Vec<u64>,
    size: u64,
}

impl StateSpace {
    pub fn new(factors: BTreeMap<String, u64>) -> Self {
        let names: Vec<String> = factors.keys().cloned().collect();
        let sizes: Vec<u64> = factors.values().copied().collect();
        let mut prod = vec![1u64; sizes.len()];
        for i in (0..sizes.len().saturating_sub(1)).rev() {
            prod[i] = prod[i + 1] * sizes[i + 1];
        }
        let size = sizes.iter().product();
        Self {
            names,
            sizes,
            prod,
            size,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn position(&self, name: &str) -> usize {
        self.names
            .binary_search_by(|n| n.as_str().cmp(name))
            .expect("unknown state factor")
    }

    /// Pack a full factor assignment into a state index.
    pub fn state_index(&self, values: &BTreeMap<String, u64>) -> u64 {
        assert_eq!(values.len(), self.names.len(), "partial state assignment");
        let mut state = 0;
        for (name, &value) in values {
            let i = self.position(name);
            assert!(value < self.sizes[i], "factor {name} out of range");
            state += value * self.prod[i];
        }
        state
    }

    /// Element of one factor within a packed state.
    pub fn factor_elem(&self, state: u64, name: &str) -> u64 {
        let i = self.position(name);
        (state / self.prod[i]) % self.sizes[i]
    }

    /// Packed state with one factor replaced.
    pub fn update_factor(&self, state: u64, name: &str, value: u64) -> u64 {
        let i = self.position(name);
        assert!(value < self.sizes[i], "factor {name} out of range");
        let current = (state / self.prod[i]) % self.sizes[i];
        state - current * self.prod[i] + value * self.prod[i]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> StateSpace {
        StateSpace::new(BTreeMap::from([
            ("e0_1".to_string(), 2),
            ("loc".to_string(), 3),
        ]))
    }

    #[test]
    fn size_is_the_factor_product() {
        assert_eq!(space().size(), 6);
    }

    #[test]
    fn pack_unpack_round_trip() {
        let space = space();
        for e in 0..2 {
            for loc in 0..3 {
                let values = BTreeMap::from([("e0_1".to_string(), e), ("loc".to_string(), loc)]);
                let state = space.state_index(&values);
                assert!(state < space.size());
                assert_eq!(space.factor_elem(state, "e0_1"), e);
                assert_eq!(space.factor_elem(state, "loc"), loc);
            }
        }
    }

    #[test]
    fn states_enumerate_densely() {
        let space = space();
        let mut seen = vec![false; 6];
        for e in 0..2 {
            for loc in 0..3 {
                let values = BTreeMap::from([("e0_1".to_string(), e), ("loc".to_string(), loc)]);
                seen[space.state_index(&values) as usize] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn update_factor_touches_only_its_factor() {
        let space = space();
        let values = BTreeMap::from([("e0_1".to_string(), 1), ("loc".to_string(), 2)]);
        let state = space.state_index(&values);

        let moved = space.update_factor(state, "loc", 0);
        assert_eq!(space.factor_elem(moved, "loc"), 0);
        assert_eq!(space.factor_elem(moved, "e0_1"), 1);

        // Writing the current value back is a no-op.
        assert_eq!(space.update_factor(state, "loc", 2), state);
    }

    #[test]
    #[should_panic(expected = "unknown state factor")]
    fn unknown_factor_panics() {
        space().factor_elem(0, "nope");
    }
}
