//! Witness selection
//!
//! Picks which candidate witnesses receive the anchor offer. A role is only
//! trimmed when the policy is purely count based for it (`OutOf(n,role)`
//! with `MinPercent(0,role)`), since percent requirements are measured
//! against every invited witness. Log-operating witnesses are preferred when
//! the policy requires a log.

use orb_core::{Witness, WitnessType};
use rand::seq::SliceRandom;

use crate::config::WitnessPolicyConfig;

impl WitnessPolicyConfig {
    /// Mark the selected witnesses and return them
    pub fn select(&self, candidates: Vec<Witness>) -> Vec<Witness> {
        let (system, batch): (Vec<Witness>, Vec<Witness>) = candidates
            .into_iter()
            .partition(|w| w.witness_type == WitnessType::System);

        let mut selected = self.select_role(WitnessType::System, system);
        selected.extend(self.select_role(WitnessType::Batch, batch));

        if self.log_required && !selected.iter().any(|w| w.has_log) {
            tracing::warn!("Log required by witness policy but no selected witness operates a log");
        }

        selected
    }

    fn select_role(&self, role: WitnessType, mut candidates: Vec<Witness>) -> Vec<Witness> {
        let wanted = self.min_number(role);
        let count_based = self.min_percent(role) == 0 && wanted > 0;

        if count_based && wanted < candidates.len() {
            candidates.shuffle(&mut rand::thread_rng());

            if self.log_required {
                // Stable sort keeps the shuffle order within each group
                candidates.sort_by_key(|w| !w.has_log);
            }

            candidates.truncate(wanted);

            tracing::debug!(role = %role, wanted, "Trimmed witness candidates");
        }

        for w in &mut candidates {
            w.selected = true;
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(role: WitnessType, n: usize, with_log: usize) -> Vec<Witness> {
        (0..n)
            .map(|i| Witness::new(role, format!("https://orb.{role}{i}.com/services/orb"), i < with_log))
            .collect()
    }

    #[test]
    fn test_default_policy_selects_everyone() {
        let config = WitnessPolicyConfig::default();

        let mut all = candidates(WitnessType::System, 3, 0);
        all.extend(candidates(WitnessType::Batch, 2, 0));

        let selected = config.select(all);
        assert_eq!(selected.len(), 5);
        assert!(selected.iter().all(|w| w.selected));
    }

    #[test]
    fn test_count_based_role_is_trimmed() {
        let config = WitnessPolicyConfig::parse("OutOf(2,system) MinPercent(0,system)").unwrap();

        let mut all = candidates(WitnessType::System, 5, 0);
        all.extend(candidates(WitnessType::Batch, 2, 0));

        let selected = config.select(all);
        let system = selected.iter().filter(|w| w.witness_type == WitnessType::System).count();
        let batch = selected.iter().filter(|w| w.witness_type == WitnessType::Batch).count();

        assert_eq!(system, 2);
        assert_eq!(batch, 2);
    }

    #[test]
    fn test_percent_role_is_not_trimmed() {
        // OutOf alone keeps the default 100% requirement
        let config = WitnessPolicyConfig::parse("OutOf(2,system)").unwrap();

        let selected = config.select(candidates(WitnessType::System, 5, 0));
        assert_eq!(selected.len(), 5);
    }

    #[test]
    fn test_log_witnesses_preferred() {
        let config = WitnessPolicyConfig::parse("OutOf(1,system) MinPercent(0,system) LogRequired").unwrap();

        for _ in 0..10 {
            let selected = config.select(candidates(WitnessType::System, 4, 1));
            assert_eq!(selected.len(), 1);
            assert!(selected[0].has_log);
        }
    }

    #[test]
    fn test_fewer_candidates_than_wanted() {
        let config = WitnessPolicyConfig::parse("OutOf(3,batch) MinPercent(0,batch)").unwrap();

        let selected = config.select(candidates(WitnessType::Batch, 2, 0));
        assert_eq!(selected.len(), 2);
    }
}
