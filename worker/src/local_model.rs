//! Dense-looking facades over a pulled model slice (spec.md §4.4:
//! `materialize(indices → slice)`). The worker never holds the full model;
//! these types let `gradient_compute` index by global coordinate without
//! caring that only a handful of coordinates actually exist locally.

use std::collections::HashMap;

use ps_core::codec::MfEntry;

/// A materialized slice of the sparse LR model: `local[i]` reads as the
/// pulled weight at global index `i`, 0 for anything not pulled (which
/// should never happen in the worker loop, since the slice always covers
/// exactly the minibatch's touched indices).
#[derive(Debug, Clone, Default)]
pub struct LocalLrModel {
    weights: HashMap<u32, f32>,
}

impl LocalLrModel {
    pub fn from_slice(indices: &[u32], values: &[f32]) -> Self {
        assert_eq!(indices.len(), values.len());
        Self {
            weights: indices.iter().copied().zip(values.iter().copied()).collect(),
        }
    }

    pub fn get(&self, index: u32) -> f32 {
        self.weights.get(&index).copied().unwrap_or(0.0)
    }
}

/// A materialized slice of the sparse MF model covering one minibatch's
/// worth of users `[base_user_id, base_user_id + minibatch_size)` plus the
/// items they rated. `gradient_compute::sparse_grad_mf` mutates this in
/// place and diffs against the snapshot it started from to get the
/// aggregate displacement (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct LocalMfModel {
    pub base_user_id: u32,
    pub global_bias: f32,
    initial_user_bias: HashMap<u32, f32>,
    initial_item_bias: HashMap<u32, f32>,
    initial_user_factors: HashMap<u32, Vec<f32>>,
    initial_item_factors: HashMap<u32, Vec<f32>>,
    pub user_bias: HashMap<u32, f32>,
    pub item_bias: HashMap<u32, f32>,
    pub user_factors: HashMap<u32, Vec<f32>>,
    pub item_factors: HashMap<u32, Vec<f32>>,
}

impl LocalMfModel {
    pub fn new(base_user_id: u32, global_bias: f32, users: &[MfEntry], items: &[MfEntry]) -> Self {
        let user_bias: HashMap<u32, f32> = users.iter().map(|e| (e.id, e.bias)).collect();
        let item_bias: HashMap<u32, f32> = items.iter().map(|e| (e.id, e.bias)).collect();
        let user_factors: HashMap<u32, Vec<f32>> = users.iter().map(|e| (e.id, e.factors.clone())).collect();
        let item_factors: HashMap<u32, Vec<f32>> = items.iter().map(|e| (e.id, e.factors.clone())).collect();
        Self {
            base_user_id,
            global_bias,
            initial_user_bias: user_bias.clone(),
            initial_item_bias: item_bias.clone(),
            initial_user_factors: user_factors.clone(),
            initial_item_factors: item_factors.clone(),
            user_bias,
            item_bias,
            user_factors,
            item_factors,
        }
    }

    pub fn predict(&self, user_id: u32, item_id: u32) -> f32 {
        let ub = self.user_bias.get(&user_id).copied().unwrap_or(0.0);
        let ib = self.item_bias.get(&item_id).copied().unwrap_or(0.0);
        let dot: f32 = match (self.user_factors.get(&user_id), self.item_factors.get(&item_id)) {
            (Some(u), Some(i)) => u.iter().zip(i.iter()).map(|(a, b)| a * b).sum(),
            _ => 0.0,
        };
        self.global_bias + ub + ib + dot
    }

    /// `(user_id → Δbias, item_id → Δbias, user_id → Δfactors, item_id →
    /// Δfactors)`: the displacement accumulated since construction, one
    /// entry per touched id (spec.md §4.4).
    pub fn displacement(&self) -> (Vec<(u32, f32)>, Vec<(u32, f32)>, Vec<(u32, Vec<f32>)>, Vec<(u32, Vec<f32>)>) {
        let user_bias_deltas = self
            .user_bias
            .iter()
            .map(|(id, v)| (*id, v - self.initial_user_bias.get(id).copied().unwrap_or(0.0)))
            .collect();
        let item_bias_deltas = self
            .item_bias
            .iter()
            .map(|(id, v)| (*id, v - self.initial_item_bias.get(id).copied().unwrap_or(0.0)))
            .collect();
        let user_factor_deltas = self
            .user_factors
            .iter()
            .map(|(id, v)| {
                let initial = self.initial_user_factors.get(id);
                let delta = v
                    .iter()
                    .enumerate()
                    .map(|(k, x)| x - initial.and_then(|f| f.get(k)).copied().unwrap_or(0.0))
                    .collect();
                (*id, delta)
            })
            .collect();
        let item_factor_deltas = self
            .item_factors
            .iter()
            .map(|(id, v)| {
                let initial = self.initial_item_factors.get(id);
                let delta = v
                    .iter()
                    .enumerate()
                    .map(|(k, x)| x - initial.and_then(|f| f.get(k)).copied().unwrap_or(0.0))
                    .collect();
                (*id, delta)
            })
            .collect();
        (user_bias_deltas, item_bias_deltas, user_factor_deltas, item_factor_deltas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn local_lr_model_reads_pulled_weights() {
        let local = LocalLrModel::from_slice(&[3, 7], &[0.5, -0.25]);
        assert_eq!(local.get(3), 0.5);
        assert_eq!(local.get(7), -0.25);
        assert_eq!(local.get(99), 0.0);
    }

    #[test]
    fn local_mf_model_displacement_is_zero_before_mutation() {
        let users = vec![MfEntry { id: 0, bias: 1.0, factors: vec![0.1, 0.2] }];
        let items = vec![MfEntry { id: 5, bias: 2.0, factors: vec![0.3, 0.4] }];
        let local = LocalMfModel::new(0, 3.0, &users, &items);
        let (ub, ib, uf, itf) = local.displacement();
        assert_eq!(ub, vec![(0, 0.0)]);
        assert_eq!(ib, vec![(5, 0.0)]);
        assert_eq!(uf, vec![(0, vec![0.0, 0.0])]);
        assert_eq!(itf, vec![(5, vec![0.0, 0.0])]);
    }
}
