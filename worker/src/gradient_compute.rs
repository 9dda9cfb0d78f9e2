//! `sparse_grad` (spec.md §4.4): turns a pulled local model plus a
//! minibatch into the gradient the worker ships back to the PS.

use ps_core::{LrGradient, MfGradient, NumericError, SparseMinibatch};

use crate::local_model::{LocalLrModel, LocalMfModel};

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

#[derive(Debug, Clone, Copy)]
pub struct LrGradientConfig {
    pub epsilon: f32,
    pub grad_threshold: Option<f32>,
}

impl Default for LrGradientConfig {
    fn default() -> Self {
        Self { epsilon: 0.0, grad_threshold: None }
    }
}

/// Logistic-regression sparse gradient (spec.md §4.4): for each sample
/// `s` with label `y`, `z = Σ v·w[i]`, `e = y - σ(z)`, accumulate `v·e`
/// per touched coordinate, then add the L2 term `2ε·w[i]` and optionally
/// drop coordinates below `grad_threshold`.
pub fn sparse_grad_lr(
    local: &LocalLrModel,
    minibatch: &SparseMinibatch,
    version: u32,
    config: LrGradientConfig,
) -> Result<LrGradient, NumericError> {
    let labels = minibatch.labels.as_ref().expect("LR minibatch must carry labels");
    let mut accum: std::collections::HashMap<u32, f32> = std::collections::HashMap::new();

    for (sample, &y) in minibatch.samples.iter().zip(labels.iter()) {
        let z: f32 = sample.features.iter().map(|fv| fv.value * local.get(fv.index)).sum();
        if !z.is_finite() {
            return Err(NumericError::NonFinite { index: u32::MAX, value: z });
        }
        let e = y - sigmoid(z);
        for fv in &sample.features {
            *accum.entry(fv.index).or_insert(0.0) += fv.value * e;
        }
    }

    let mut deltas = Vec::with_capacity(accum.len());
    for (index, a) in accum {
        let w = local.get(index);
        let delta = a + 2.0 * config.epsilon * w;
        if !delta.is_finite() {
            return Err(NumericError::NonFinite { index, value: delta });
        }
        if let Some(threshold) = config.grad_threshold {
            if delta.abs() < threshold {
                continue;
            }
        }
        deltas.push((index, delta));
    }
    Ok(LrGradient { version, deltas })
}

#[derive(Debug, Clone, Copy)]
pub struct MfGradientConfig {
    pub learning_rate: f32,
    pub user_bias_reg: f32,
    pub item_bias_reg: f32,
    pub user_factor_reg: f32,
    pub item_factor_reg: f32,
}

/// Matrix-factorization sparse gradient (spec.md §4.4): runs
/// `minibatch_size` inline SGD sub-updates on `local`'s own copy of the
/// touched users/items, one user per minibatch row, then ships the total
/// displacement as the gradient.
pub fn sparse_grad_mf(local: &mut LocalMfModel, minibatch: &SparseMinibatch, config: MfGradientConfig) -> Result<MfGradient, NumericError> {
    for (row, sample) in minibatch.samples.iter().enumerate() {
        let user_id = local.base_user_id + row as u32;
        for fv in &sample.features {
            let item_id = fv.index;
            let rating = fv.value;
            let pred = local.predict(user_id, item_id);
            let err = rating - pred;
            if !err.is_finite() {
                return Err(NumericError::NonFinite { index: item_id, value: err });
            }

            let ub = local.user_bias.entry(user_id).or_insert(0.0);
            let ub_old = *ub;
            *ub += config.learning_rate * (err - config.user_bias_reg * ub_old);

            let ib = local.item_bias.entry(item_id).or_insert(0.0);
            let ib_old = *ib;
            *ib += config.learning_rate * (err - config.item_bias_reg * ib_old);

            let k = local
                .user_factors
                .get(&user_id)
                .or_else(|| local.item_factors.get(&item_id))
                .map(|f| f.len())
                .unwrap_or(0);
            let uf_old = local.user_factors.entry(user_id).or_insert_with(|| vec![0.0; k]).clone();
            let if_old = local.item_factors.entry(item_id).or_insert_with(|| vec![0.0; k]).clone();
            let uf = local.user_factors.get_mut(&user_id).unwrap();
            for d in 0..k {
                uf[d] += config.learning_rate * (err * if_old[d] - config.user_factor_reg * uf_old[d]);
            }
            let itf = local.item_factors.get_mut(&item_id).unwrap();
            for d in 0..k {
                itf[d] += config.learning_rate * (err * uf_old[d] - config.item_factor_reg * if_old[d]);
            }
        }
    }

    let (user_bias_deltas, item_bias_deltas, user_factor_deltas, item_factor_deltas) = local.displacement();
    Ok(MfGradient {
        user_bias_deltas,
        item_bias_deltas,
        user_factor_deltas,
        item_factor_deltas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_core::{FeatureValue, SparseSample};
    use pretty_assertions::assert_eq;

    #[test]
    fn lr_gradient_matches_logistic_rule_for_one_sample() {
        // single sample touching index 5 with value 1.0, label 1.0, weight 0.
        let local = LocalLrModel::from_slice(&[5], &[0.0]);
        let mb = SparseMinibatch {
            samples: vec![SparseSample { features: vec![FeatureValue { index: 5, value: 1.0 }] }],
            labels: Some(vec![1.0]),
        };
        let g = sparse_grad_lr(&local, &mb, 1, LrGradientConfig::default()).unwrap();
        // z=0, sigma(0)=0.5, e=0.5, delta = 1.0*0.5 = 0.5
        assert_eq!(g.deltas, vec![(5, 0.5)]);
        assert_eq!(g.version, 1);
    }

    #[test]
    fn lr_gradient_threshold_drops_small_deltas() {
        let local = LocalLrModel::from_slice(&[5], &[0.0]);
        let mb = SparseMinibatch {
            samples: vec![SparseSample { features: vec![FeatureValue { index: 5, value: 0.01 }] }],
            labels: Some(vec![0.5]),
        };
        let config = LrGradientConfig { epsilon: 0.0, grad_threshold: Some(1.0) };
        let g = sparse_grad_lr(&local, &mb, 0, config).unwrap();
        assert!(g.deltas.is_empty());
    }

    #[test]
    fn mf_gradient_moves_prediction_toward_rating() {
        use ps_core::codec::MfEntry;
        let users = vec![MfEntry { id: 0, bias: 0.0, factors: vec![0.0, 0.0] }];
        let items = vec![MfEntry { id: 0, bias: 0.0, factors: vec![0.0, 0.0] }];
        let mut local = LocalMfModel::new(0, 3.0, &users, &items);
        let mb = SparseMinibatch {
            samples: vec![SparseSample { features: vec![FeatureValue { index: 0, value: 5.0 } ] }],
            labels: None,
        };
        let config = MfGradientConfig {
            learning_rate: 0.1,
            user_bias_reg: 0.01,
            item_bias_reg: 0.01,
            user_factor_reg: 0.01,
            item_factor_reg: 0.01,
        };
        let before = local.predict(0, 0);
        sparse_grad_mf(&mut local, &mb, config).unwrap();
        let after = local.predict(0, 0);
        assert!((after - 5.0).abs() < (before - 5.0).abs());
    }
}
