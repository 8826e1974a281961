//! Witness policy parser

use orb_core::WitnessType;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PolicyError;

const OUT_OF: &str = "OutOf";
const MIN_PERCENT: &str = "MinPercent";
const LOG_REQUIRED: &str = "LogRequired";
const AND: &str = "AND";
const OR: &str = "OR";

/// Combines the number check with the percent check
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[default]
    And,
    Or,
}

impl Operator {
    pub fn apply(&self, lhs: bool, rhs: bool) -> bool {
        match self {
            Self::And => lhs && rhs,
            Self::Or => lhs || rhs,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => f.write_str(AND),
            Self::Or => f.write_str(OR),
        }
    }
}

/// Parsed witness policy.
///
/// Percent fields are always within `0..=100`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessPolicyConfig {
    pub min_number_system: usize,
    pub min_number_batch: usize,
    pub min_percent_system: u32,
    pub min_percent_batch: u32,
    pub operator: Operator,
    pub log_required: bool,
}

impl Default for WitnessPolicyConfig {
    fn default() -> Self {
        Self {
            min_number_system: 0,
            min_number_batch: 0,
            min_percent_system: 100,
            min_percent_batch: 100,
            operator: Operator::And,
            log_required: false,
        }
    }
}

impl WitnessPolicyConfig {
    /// Parse a policy string. The empty string yields the default policy.
    pub fn parse(policy: &str) -> Result<Self, PolicyError> {
        let mut config = Self::default();

        for token in policy.split_whitespace() {
            match token {
                AND => config.operator = Operator::And,
                OR => config.operator = Operator::Or,
                LOG_REQUIRED => config.log_required = true,
                _ => {
                    if let Some(args) = arguments(token, OUT_OF)? {
                        config.apply_out_of(token, args)?;
                    } else if let Some(args) = arguments(token, MIN_PERCENT)? {
                        config.apply_min_percent(token, args)?;
                    } else {
                        return Err(PolicyError::UnknownToken {
                            token: token.to_string(),
                        });
                    }
                }
            }
        }

        tracing::debug!(policy = %policy, config = %config, "Parsed witness policy");
        Ok(config)
    }

    pub fn min_number(&self, role: WitnessType) -> usize {
        match role {
            WitnessType::System => self.min_number_system,
            WitnessType::Batch => self.min_number_batch,
        }
    }

    pub fn min_percent(&self, role: WitnessType) -> u32 {
        match role {
            WitnessType::System => self.min_percent_system,
            WitnessType::Batch => self.min_percent_batch,
        }
    }

    fn apply_out_of(&mut self, token: &str, (raw, role): (&str, &str)) -> Result<(), PolicyError> {
        let n = raw.parse::<usize>().map_err(|_| PolicyError::InvalidNumber {
            token: token.to_string(),
            raw: raw.to_string(),
        })?;

        // An explicit zero minimum also removes the percent requirement
        match parse_role(token, role)? {
            WitnessType::System => {
                self.min_number_system = n;
                if n == 0 {
                    self.min_percent_system = 0;
                }
            }
            WitnessType::Batch => {
                self.min_number_batch = n;
                if n == 0 {
                    self.min_percent_batch = 0;
                }
            }
        }

        Ok(())
    }

    fn apply_min_percent(&mut self, token: &str, (raw, role): (&str, &str)) -> Result<(), PolicyError> {
        let value = raw.parse::<i64>().map_err(|_| PolicyError::InvalidNumber {
            token: token.to_string(),
            raw: raw.to_string(),
        })?;

        let p = u32::try_from(value)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| PolicyError::PercentOutOfRange {
                token: token.to_string(),
                value,
            })?;

        match parse_role(token, role)? {
            WitnessType::System => self.min_percent_system = p,
            WitnessType::Batch => self.min_percent_batch = p,
        }

        Ok(())
    }
}

impl fmt::Display for WitnessPolicyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "system: {} / {}%, batch: {} / {}%, operator: {}, log required: {}",
            self.min_number_system,
            self.min_percent_system,
            self.min_number_batch,
            self.min_percent_batch,
            self.operator,
            self.log_required
        )
    }
}

/// Split `Name(a,b)` into its two arguments.
///
/// Returns `None` if the token is not a call of `name`.
fn arguments<'a>(token: &'a str, name: &str) -> Result<Option<(&'a str, &'a str)>, PolicyError> {
    let Some(rest) = token.strip_prefix(name).and_then(|r| r.strip_prefix('(')) else {
        return Ok(None);
    };

    let invalid = || PolicyError::InvalidArguments {
        token: token.to_string(),
    };

    let inner = rest.strip_suffix(')').ok_or_else(invalid)?;
    let mut parts = inner.split(',');

    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) if !a.trim().is_empty() && !b.trim().is_empty() => {
            Ok(Some((a.trim(), b.trim())))
        }
        _ => Err(invalid()),
    }
}

fn parse_role(token: &str, role: &str) -> Result<WitnessType, PolicyError> {
    match role {
        "system" => Ok(WitnessType::System),
        "batch" => Ok(WitnessType::Batch),
        other => Err(PolicyError::UnknownRole {
            token: token.to_string(),
            role: other.to_string(),
        }),
    }
}
