//! Sparse gradients (spec.md §3): unordered `(index, delta)` pairs with
//! distinct indices. Producers (the worker) are responsible for
//! distinctness; the PS does not re-check it on apply.

/// Sparse LR gradient: `(index, delta)` pairs plus an opaque, monotonically
/// increasing `version` stamped by the producing worker. The PS never
/// interprets `version` beyond logging it (spec.md §4.4).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LrGradient {
    pub version: u32,
    pub deltas: Vec<(u32, f32)>,
}

impl LrGradient {
    pub fn new(version: u32, deltas: Vec<(u32, f32)>) -> Self {
        Self { version, deltas }
    }

    #[cfg(test)]
    pub fn has_distinct_indices(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.deltas.iter().all(|(i, _)| seen.insert(*i))
    }
}

/// Sparse MF gradient: bias deltas and per-side factor deltas. For each
/// side, the bias map and the factor list carry the same set of ids
/// (spec.md §3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MfGradient {
    pub user_bias_deltas: Vec<(u32, f32)>,
    pub item_bias_deltas: Vec<(u32, f32)>,
    pub user_factor_deltas: Vec<(u32, Vec<f32>)>,
    pub item_factor_deltas: Vec<(u32, Vec<f32>)>,
}

impl MfGradient {
    #[cfg(test)]
    pub fn ids_match(&self) -> bool {
        let user_bias: std::collections::HashSet<_> =
            self.user_bias_deltas.iter().map(|(id, _)| *id).collect();
        let user_factor: std::collections::HashSet<_> =
            self.user_factor_deltas.iter().map(|(id, _)| *id).collect();
        let item_bias: std::collections::HashSet<_> =
            self.item_bias_deltas.iter().map(|(id, _)| *id).collect();
        let item_factor: std::collections::HashSet<_> =
            self.item_factor_deltas.iter().map(|(id, _)| *id).collect();
        user_bias == user_factor && item_bias == item_factor
    }
}
