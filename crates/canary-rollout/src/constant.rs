//! A rollout that never changes.

use crate::store::Rollout;

/// Provides the same percentage for every slot.
///
/// The value may lie outside `[0.0, 1.0]`, exactly like a fetched value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantRollout {
    value: f64,
}

impl ConstantRollout {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl Rollout for ConstantRollout {
    fn get(&self, _slot: &str) -> Option<f64> {
        Some(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_value_for_any_slot() {
        let rollout = ConstantRollout::new(0.4);
        assert_eq!(rollout.get("canary"), Some(0.4));
        assert_eq!(rollout.get("maintenance"), Some(0.4));
    }

    #[test]
    fn out_of_range_value_is_passed_through() {
        assert_eq!(ConstantRollout::new(1.5).get("canary"), Some(1.5));
    }
}
