//! Witness policy evaluation

use orb_core::{WitnessProof, WitnessType};

use crate::config::WitnessPolicyConfig;

/// Witness counts for one anchor
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub total_system: usize,
    pub total_batch: usize,
    pub proofs_system: usize,
    pub proofs_batch: usize,
    /// At least one proof came from a witness operating a log
    pub log_proof: bool,
}

impl Tally {
    /// Count invited witnesses and collected proofs per role
    pub fn from_proofs(proofs: &[WitnessProof]) -> Self {
        let mut tally = Self::default();

        for wp in proofs {
            let has_proof = wp.has_proof();

            match wp.witness_type {
                WitnessType::System => {
                    tally.total_system += 1;
                    if has_proof {
                        tally.proofs_system += 1;
                    }
                }
                WitnessType::Batch => {
                    tally.total_batch += 1;
                    if has_proof {
                        tally.proofs_batch += 1;
                    }
                }
            }

            if has_proof && wp.has_log {
                tally.log_proof = true;
            }
        }

        tally
    }
}

/// Share of `count` in `total`, rounded down.
///
/// A role without witnesses is vacuously complete.
pub fn percent(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }

    let pct = count.min(total) * 100 / total;
    u32::try_from(pct).unwrap_or(100)
}

impl WitnessPolicyConfig {
    /// Decide whether the tally satisfies the policy.
    ///
    /// `LogRequired` is ANDed into the result regardless of the operator.
    pub fn evaluate(&self, tally: &Tally) -> bool {
        let number_satisfied =
            tally.proofs_system >= self.min_number_system && tally.proofs_batch >= self.min_number_batch;

        let percent_satisfied = percent(tally.proofs_system, tally.total_system) >= self.min_percent_system
            && percent(tally.proofs_batch, tally.total_batch) >= self.min_percent_batch;

        let satisfied = self.operator.apply(number_satisfied, percent_satisfied);

        let log_satisfied = !self.log_required || tally.log_proof;

        tracing::debug!(
            ?tally,
            number_satisfied,
            percent_satisfied,
            log_satisfied,
            "Evaluated witness policy"
        );

        satisfied && log_satisfied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_core::Witness;
    use proptest::prelude::*;

    fn proof(witness_type: WitnessType, uri: &str, has_log: bool, responded: bool) -> WitnessProof {
        let mut wp = WitnessProof::pending(&Witness::new(witness_type, uri, has_log));
        if responded {
            wp.proof = Some(b"{\"proof\":{}}".to_vec());
        }
        wp
    }

    fn tally(proofs_system: usize, total_system: usize, proofs_batch: usize, total_batch: usize) -> Tally {
        Tally {
            total_system,
            total_batch,
            proofs_system,
            proofs_batch,
            log_proof: false,
        }
    }

    #[test]
    fn test_tally_from_proofs() {
        let proofs = vec![
            proof(WitnessType::System, "s1", true, true),
            proof(WitnessType::System, "s2", false, false),
            proof(WitnessType::Batch, "b1", false, true),
        ];

        let t = Tally::from_proofs(&proofs);
        assert_eq!(t.total_system, 2);
        assert_eq!(t.proofs_system, 1);
        assert_eq!(t.total_batch, 1);
        assert_eq!(t.proofs_batch, 1);
        assert!(t.log_proof);
    }

    #[test]
    fn test_log_witness_without_proof_does_not_count() {
        let proofs = vec![
            proof(WitnessType::System, "s1", true, false),
            proof(WitnessType::System, "s2", false, true),
        ];

        assert!(!Tally::from_proofs(&proofs).log_proof);
    }

    #[test]
    fn test_default_policy_requires_everyone() {
        let config = WitnessPolicyConfig::default();

        assert!(config.evaluate(&tally(2, 2, 1, 1)));
        assert!(!config.evaluate(&tally(1, 2, 1, 1)));
        assert!(!config.evaluate(&tally(2, 2, 0, 1)));
    }

    #[test]
    fn test_out_of_does_not_relax_default_percent() {
        let config = WitnessPolicyConfig::parse("OutOf(2,system) AND OutOf(1,batch)").unwrap();

        // 2 of 3 system witnesses is 66%, below the default 100%
        assert!(!config.evaluate(&tally(2, 3, 1, 1)));
        assert!(config.evaluate(&tally(3, 3, 1, 1)));
    }

    #[test]
    fn test_or_operator() {
        let config = WitnessPolicyConfig::parse("OutOf(2,system) OR OutOf(1,batch)").unwrap();

        // Number check passes, percent check fails
        assert!(config.evaluate(&tally(2, 3, 1, 2)));
        // Neither passes
        assert!(!config.evaluate(&tally(1, 3, 1, 2)));
    }

    #[test]
    fn test_explicit_percent() {
        let config = WitnessPolicyConfig::parse("MinPercent(50,system) MinPercent(0,batch)").unwrap();

        assert!(config.evaluate(&tally(2, 4, 0, 3)));
        assert!(!config.evaluate(&tally(1, 4, 0, 3)));
    }

    #[test]
    fn test_empty_role_is_vacuously_satisfied() {
        let config = WitnessPolicyConfig::default();

        assert!(config.evaluate(&tally(1, 1, 0, 0)));
        assert!(config.evaluate(&tally(0, 0, 0, 0)));
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn test_log_required_is_anded() {
        let config = WitnessPolicyConfig::parse("OutOf(1,system) OR MinPercent(0,batch) LogRequired").unwrap();

        let mut t = tally(1, 2, 0, 0);
        assert!(!config.evaluate(&t));

        t.log_proof = true;
        assert!(config.evaluate(&t));
    }

    proptest! {
        #[test]
        fn prop_more_proofs_never_unsatisfies(
            min_sys in 0usize..5,
            min_batch in 0usize..5,
            pct_sys in 0u32..=100,
            pct_batch in 0u32..=100,
            or in prop::bool::ANY,
            total_sys in 0usize..8,
            total_batch in 0usize..8,
            seed_sys in 0usize..8,
            seed_batch in 0usize..8,
            bump_system in prop::bool::ANY,
        ) {
            let policy = format!(
                "OutOf({min_sys},system) OutOf({min_batch},batch) MinPercent({pct_sys},system) MinPercent({pct_batch},batch) {}",
                if or { "OR" } else { "AND" }
            );
            let config = WitnessPolicyConfig::parse(&policy).unwrap();

            let before = tally(seed_sys.min(total_sys), total_sys, seed_batch.min(total_batch), total_batch);
            let mut after = before;
            if bump_system {
                after.proofs_system = (after.proofs_system + 1).min(total_sys);
            } else {
                after.proofs_batch = (after.proofs_batch + 1).min(total_batch);
            }

            if config.evaluate(&before) {
                prop_assert!(config.evaluate(&after));
            }
        }
    }
}
