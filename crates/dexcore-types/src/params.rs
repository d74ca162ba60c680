//! Module-wide parameters: the exchange's cut of every collected fee.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::coin::validate_denom;
use crate::{constants, DexError, Result};

/// Split override for one denom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenomSplit {
    pub denom: String,
    /// Basis points, `0..=10000`.
    pub split: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Basis points applied to denoms without an override.
    pub default_split: u16,
    #[serde(default)]
    pub denom_splits: Vec<DenomSplit>,
}

impl Params {
    #[must_use]
    pub fn new(default_split: u16, denom_splits: Vec<DenomSplit>) -> Self {
        Self {
            default_split,
            denom_splits,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut errs = Vec::new();
        if self.default_split > constants::MAX_SPLIT_BPS {
            errs.push(DexError::InvalidParams {
                reason: format!(
                    "default split {} cannot be greater than {}",
                    self.default_split,
                    constants::MAX_SPLIT_BPS
                ),
            });
        }
        let mut seen = BTreeSet::new();
        for ds in &self.denom_splits {
            if let Err(err) = validate_denom(&ds.denom) {
                errs.push(err);
            }
            if ds.split > constants::MAX_SPLIT_BPS {
                errs.push(DexError::InvalidParams {
                    reason: format!(
                        "{} split {} cannot be greater than {}",
                        ds.denom,
                        ds.split,
                        constants::MAX_SPLIT_BPS
                    ),
                });
            }
            if !seen.insert(ds.denom.as_str()) {
                errs.push(DexError::InvalidParams {
                    reason: format!("denom {} is defined in multiple denom splits", ds.denom),
                });
            }
        }
        DexError::join_result(errs)
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::new(constants::DEFAULT_SPLIT_BPS, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        let params = Params::default();
        assert_eq!(params.default_split, 500);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn every_problem_is_reported() {
        let params = Params::new(
            10_001,
            vec![
                DenomSplit { denom: "apple".into(), split: 20_000 },
                DenomSplit { denom: "apple".into(), split: 5 },
            ],
        );
        let err = params.validate().unwrap_err();
        assert_eq!(err.flatten().len(), 3);
    }
}
