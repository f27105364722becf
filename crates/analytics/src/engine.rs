use std::collections::HashMap;

/// Feasibility applied when a commodity carries no sector tag, or a tag
/// outside the table.
pub const DEFAULT_FEASIBILITY: f64 = 0.6;

/// Heuristic per-sector estimates of how hard domestic substitution is.
const SECTOR_FEASIBILITY: &[(&str, f64)] = &[
    ("electronics", 0.7),
    ("industrial", 0.6),
    ("automotive", 0.5),
    ("metals", 0.65),
    ("energy", 0.6),
    ("instruments", 0.65),
];

/// Herfindahl-style concentration index over per-partner trade values.
///
/// Returns the sum of squared shares, in `[0, 1]`. A zero total (no partners
/// or all-zero values) yields `0.0` by policy: a commodity lacking partner
/// breakdown must never be penalized as concentrated.
pub fn concentration_index(values: &[f64]) -> f64 {
    let total: f64 = values.iter().copied().sum();
    if total <= 0.0 {
        return 0.0;
    }
    values.iter().map(|v| (v / total).powi(2)).sum()
}

/// Log-compressed min-max normalization of the commodity universe.
///
/// Each value is `ln(1 + v)`-transformed, then scaled to `[0, 1]` against the
/// spread of the whole input map. A constant universe (zero spread) maps
/// everything to `0.0` to avoid a division error.
pub fn normalize_log(values: &HashMap<String, f64>) -> HashMap<String, f64> {
    if values.is_empty() {
        return HashMap::new();
    }
    let logs: Vec<(&String, f64)> = values.iter().map(|(k, v)| (k, v.max(0.0).ln_1p())).collect();
    let min = logs.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
    let max = logs.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    if span == 0.0 {
        return logs.into_iter().map(|(k, _)| (k.clone(), 0.0)).collect();
    }
    logs.into_iter()
        .map(|(k, v)| (k.clone(), (v - min) / span))
        .collect()
}

/// Technical feasibility for a commodity's sector tags.
///
/// Multiple tags combine by taking the maximum: the most feasible applicable
/// sector wins. Unknown tags fall back to [`DEFAULT_FEASIBILITY`], as does an
/// empty tag set.
pub fn feasibility_for(sectors: &[String]) -> f64 {
    if sectors.is_empty() {
        return DEFAULT_FEASIBILITY;
    }
    sectors
        .iter()
        .map(|sector| {
            let lower = sector.to_lowercase();
            SECTOR_FEASIBILITY
                .iter()
                .find(|(name, _)| *name == lower)
                .map(|(_, score)| *score)
                .unwrap_or(DEFAULT_FEASIBILITY)
        })
        .fold(DEFAULT_FEASIBILITY, f64::max)
}

/// The composite opportunity score.
///
/// `norm_value` is the universe-normalized log value term; `None` (no
/// current-period data) yields `0.0`, since a commodity with no recent
/// imports represents no opportunity. Never fails.
pub fn opportunity_score(
    norm_value: Option<f64>,
    concentration: f64,
    feasibility: f64,
    policy_multiplier: f64,
) -> f64 {
    match norm_value {
        Some(norm) => norm * (1.0 - concentration) * feasibility * policy_multiplier,
        None => 0.0,
    }
}
