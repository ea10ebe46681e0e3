//! Cardinality modes over a candidate list

use chaos_common::crd::SelectorMode;
use rand::Rng;

use crate::SelectError;

/// Narrow `candidates` according to `mode`.
///
/// Candidates are de-duplicated and sorted first, so every prefix mode is
/// deterministic for a given inventory. Only `RandomMaxPercent` draws from
/// `rng`, once per candidate.
pub fn apply_mode<R: Rng + ?Sized>(
    mut candidates: Vec<String>,
    mode: SelectorMode,
    rng: &mut R,
) -> Result<Vec<String>, SelectError> {
    candidates.sort();
    candidates.dedup();

    if candidates.is_empty() && mode.requires_candidates() {
        return Err(SelectError::NoTargets);
    }

    match mode {
        SelectorMode::All => Ok(candidates),
        SelectorMode::One => {
            candidates.truncate(1);
            Ok(candidates)
        }
        SelectorMode::Fixed(n) => {
            if candidates.len() < n {
                return Err(SelectError::InsufficientTargets {
                    requested: n,
                    available: candidates.len(),
                });
            }
            candidates.truncate(n);
            Ok(candidates)
        }
        SelectorMode::FixedPercent(pct) => {
            let n = candidates.len() * usize::from(pct) / 100;
            candidates.truncate(n);
            Ok(candidates)
        }
        SelectorMode::RandomMaxPercent(pct) => {
            let p = f64::from(pct) / 100.0;
            Ok(candidates
                .into_iter()
                .filter(|_| rng.gen_bool(p))
                .collect())
        }
    }
}
