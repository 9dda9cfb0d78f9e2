//! The sparse model (spec.md §3/§4.2): dense in memory because random-index
//! reads and updates dominate the hot path, even though the *traffic* is
//! sparse. See DESIGN.md for why a hash map is explicitly the wrong choice
//! here.

use crate::error::{ModelError, NumericError, ProtocolError};
use crate::gradient::{LrGradient, MfGradient};
use crate::optimizer::{OptimizerParams, OptimizerRule, OptimizerState};

fn check_id(id: u32, size: usize) -> Result<usize, ProtocolError> {
    let idx = id as usize;
    if idx >= size {
        return Err(ProtocolError::IndexOutOfRange { index: id, size });
    }
    Ok(idx)
}

/// Dense logistic-regression model: `w[0..2^bits)` plus per-coordinate
/// optimizer state. Reads of never-written indices return `0.0` because the
/// backing arrays are zero-initialized and never shrink.
#[derive(Debug, Clone)]
pub struct SparseLrModel {
    bits: u32,
    weights: Vec<f32>,
    state: Vec<OptimizerState>,
    rule: OptimizerRule,
    params: OptimizerParams,
}

impl SparseLrModel {
    /// `bits` is `B` from spec.md's glossary: the model holds exactly
    /// `2^bits` weights.
    pub fn new(bits: u32, rule: OptimizerRule, params: OptimizerParams) -> Self {
        let size = 1usize << bits;
        Self {
            bits,
            weights: vec![0.0; size],
            state: vec![OptimizerState::default(); size],
            rule,
            params,
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    fn check_index(&self, index: u32) -> Result<usize, ProtocolError> {
        check_id(index, self.weights.len())
    }

    /// `read_slice`: current weight at each requested index, with the
    /// optimizer rule's read-time transform applied (identity for every
    /// rule but Nesterov's look-ahead). Rejects any index `>= 2^bits`
    /// (spec.md §7: the PS never panics on a bad client).
    pub fn read_slice(&self, indices: &[u32]) -> Result<Vec<f32>, ProtocolError> {
        indices
            .iter()
            .map(|&i| {
                let idx = self.check_index(i)?;
                Ok(self
                    .rule
                    .read_transform(&self.params, self.weights[idx], self.state[idx]))
            })
            .collect()
    }

    /// `apply_sparse`: applies every coordinate of `gradient` through the
    /// model's configured rule. The caller (the PS, holding `model_lock`
    /// for the whole call) is what makes this atomic w.r.t. concurrent
    /// snapshots/reads — see spec.md §5. Rejects any out-of-range index
    /// before touching the model.
    pub fn apply_sparse(&mut self, gradient: &LrGradient) -> Result<(), ModelError> {
        for &(index, _) in &gradient.deltas {
            self.check_index(index)?;
        }
        for &(index, delta) in &gradient.deltas {
            let idx = index as usize;
            let (new_w, new_s) = self
                .rule
                .apply(&self.params, self.weights[idx], self.state[idx], delta);
            if !new_w.is_finite() {
                return Err(NumericError::NonFinite {
                    index,
                    value: new_w,
                }
                .into());
            }
            self.weights[idx] = new_w;
            self.state[idx] = new_s;
        }
        Ok(())
    }

    /// `serialize_full`: an internally-consistent snapshot of the whole
    /// weight vector. Consistency here comes from the caller holding
    /// `model_lock` across the copy, not from anything in this method.
    pub fn snapshot(&self) -> Vec<f32> {
        self.weights.clone()
    }
}

/// One side (user or item) of the MF model: a dense bias vector and a dense
/// `[n][k]` factor matrix, each with parallel per-coordinate optimizer
/// state.
#[derive(Debug, Clone)]
struct MfSide {
    bias: Vec<f32>,
    bias_state: Vec<OptimizerState>,
    factors: Vec<f32>, // flattened [n][k]
    factor_state: Vec<OptimizerState>,
}

impl MfSide {
    fn new(n: usize, k: usize, init_bias: f32, mut init_factor: impl FnMut() -> f32) -> Self {
        Self {
            bias: vec![init_bias; n],
            bias_state: vec![OptimizerState::default(); n],
            factors: (0..n * k).map(|_| init_factor()).collect(),
            factor_state: vec![OptimizerState::default(); n * k],
        }
    }
}

/// Matrix-factorization model (spec.md §3): biases and latent factors for
/// `nusers` users and `nitems` items, `k` factors wide, plus regularization
/// and global-bias scalars.
#[derive(Debug, Clone)]
pub struct SparseMfModel {
    nusers: usize,
    nitems: usize,
    k: usize,
    users: MfSide,
    items: MfSide,
    pub global_bias: f32,
    pub user_bias_reg: f32,
    pub item_bias_reg: f32,
    pub user_factor_reg: f32,
    pub item_factor_reg: f32,
    rule: OptimizerRule,
    params: OptimizerParams,
}

impl SparseMfModel {
    /// Factors are drawn from `N(0, 1/k)` (via the supplied `rng_factor`
    /// closure); biases start at `global_mean_rating` (spec.md §4.2).
    pub fn new(
        nusers: usize,
        nitems: usize,
        k: usize,
        global_mean_rating: f32,
        mut rng_factor: impl FnMut() -> f32,
        rule: OptimizerRule,
        params: OptimizerParams,
    ) -> Self {
        Self {
            nusers,
            nitems,
            k,
            users: MfSide::new(nusers, k, global_mean_rating, &mut rng_factor),
            items: MfSide::new(nitems, k, global_mean_rating, &mut rng_factor),
            global_bias: global_mean_rating,
            user_bias_reg: 0.0,
            item_bias_reg: 0.0,
            user_factor_reg: 0.0,
            item_factor_reg: 0.0,
            rule,
            params,
        }
    }

    pub fn nusers(&self) -> usize {
        self.nusers
    }

    pub fn nitems(&self) -> usize {
        self.nitems
    }

    pub fn k(&self) -> usize {
        self.k
    }

    fn check_user(&self, id: u32) -> Result<usize, ProtocolError> {
        check_id(id, self.nusers)
    }

    fn check_item(&self, id: u32) -> Result<usize, ProtocolError> {
        check_id(id, self.nitems)
    }

    /// Reads `(bias, factor_slice)` for a contiguous run of `len` user ids
    /// starting at `base`, as `GET_MF_SPARSE_MODEL` needs (spec.md §4.1).
    /// Rejects any id `>= nusers` (spec.md §7: the PS never panics on a bad
    /// client).
    pub fn read_users(&self, base: u32, len: usize) -> Result<Vec<(f32, Vec<f32>)>, ProtocolError> {
        (0..len as u32)
            .map(|off| {
                let id = base.checked_add(off).unwrap_or(u32::MAX);
                let idx = self.check_user(id)?;
                Ok((self.users.bias[idx], self.users.factors[idx * self.k..(idx + 1) * self.k].to_vec()))
            })
            .collect()
    }

    /// Reads `(bias, factor_slice)` for an explicit list of item ids.
    pub fn read_items(&self, ids: &[u32]) -> Result<Vec<(f32, Vec<f32>)>, ProtocolError> {
        ids.iter()
            .map(|&id| {
                let idx = self.check_item(id)?;
                Ok((self.items.bias[idx], self.items.factors[idx * self.k..(idx + 1) * self.k].to_vec()))
            })
            .collect()
    }

    /// Applies an MF gradient side (bias + factor deltas for users or
    /// items) coordinate-wise through the configured optimizer rule.
    /// Rejects any out-of-range id before touching the model.
    fn apply_side(side: &mut MfSide, n: usize, k: usize, bias_deltas: &[(u32, f32)], factor_deltas: &[(u32, Vec<f32>)], rule: OptimizerRule, params: &OptimizerParams) -> Result<(), ModelError> {
        for &(id, _) in bias_deltas {
            check_id(id, n)?;
        }
        for (id, _) in factor_deltas {
            check_id(*id, n)?;
        }
        for &(id, delta) in bias_deltas {
            let idx = id as usize;
            let (new_w, new_s) = rule.apply(params, side.bias[idx], side.bias_state[idx], delta);
            if !new_w.is_finite() {
                return Err(NumericError::NonFinite { index: id, value: new_w }.into());
            }
            side.bias[idx] = new_w;
            side.bias_state[idx] = new_s;
        }
        for (id, deltas) in factor_deltas {
            let base = *id as usize * k;
            for (j, &delta) in deltas.iter().enumerate() {
                let pos = base + j;
                let (new_w, new_s) = rule.apply(params, side.factors[pos], side.factor_state[pos], delta);
                if !new_w.is_finite() {
                    return Err(NumericError::NonFinite { index: *id, value: new_w }.into());
                }
                side.factors[pos] = new_w;
                side.factor_state[pos] = new_s;
            }
        }
        Ok(())
    }

    /// `apply_sparse` for MF: applies both sides' bias and factor deltas.
    /// Like the LR model, atomicity w.r.t. concurrent snapshots comes from
    /// the caller holding `model_lock` across this call.
    pub fn apply_sparse(&mut self, gradient: &MfGradient) -> Result<(), ModelError> {
        Self::apply_side(
            &mut self.users,
            self.nusers,
            self.k,
            &gradient.user_bias_deltas,
            &gradient.user_factor_deltas,
            self.rule,
            &self.params,
        )?;
        Self::apply_side(
            &mut self.items,
            self.nitems,
            self.k,
            &gradient.item_bias_deltas,
            &gradient.item_factor_deltas,
            self.rule,
            &self.params,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// spec.md §8 scenario S4: model of size 2^4, apply (5, 1.0) under
    /// SGD(eta=0.1), pull [5,6] -> [0.1, 0.0].
    #[test]
    fn s4_end_to_end() {
        let mut model = SparseLrModel::new(
            4,
            OptimizerRule::Sgd,
            OptimizerParams {
                learning_rate: 0.1,
                ..Default::default()
            },
        );
        model
            .apply_sparse(&LrGradient {
                version: 1,
                deltas: vec![(5, 1.0)],
            })
            .unwrap();
        let slice = model.read_slice(&[5, 6]).unwrap();
        assert!((slice[0] - 0.1).abs() < 1e-6);
        assert_eq!(slice[1], 0.0);
    }

    /// spec.md §8 scenario S10: sparse-slice read reflects exactly the
    /// indices touched by the gradient and leaves the rest untouched.
    #[test]
    fn s10_sparse_slice_reflects_only_touched_coords() {
        let mut model = SparseLrModel::new(
            4,
            OptimizerRule::Sgd,
            OptimizerParams {
                learning_rate: 0.5,
                ..Default::default()
            },
        );
        model
            .apply_sparse(&LrGradient {
                version: 1,
                deltas: vec![(2, 1.0), (4, -2.0)],
            })
            .unwrap();
        let slice = model.read_slice(&[2, 3, 4]).unwrap();
        assert!((slice[0] - 0.5).abs() < 1e-6);
        assert_eq!(slice[1], 0.0);
        assert!((slice[2] - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn unknown_index_reads_zero() {
        let model = SparseLrModel::new(4, OptimizerRule::Sgd, OptimizerParams::default());
        assert_eq!(model.read_slice(&[15]).unwrap(), vec![0.0]);
    }

    #[test]
    fn nan_gradient_is_rejected() {
        let mut model = SparseLrModel::new(2, OptimizerRule::Sgd, OptimizerParams::default());
        let err = model
            .apply_sparse(&LrGradient {
                version: 1,
                deltas: vec![(0, f32::NAN)],
            })
            .unwrap_err();
        assert!(matches!(err, ModelError::Numeric(NumericError::NonFinite { .. })));
    }

    #[test]
    fn out_of_range_index_is_rejected_not_panicking() {
        let model = SparseLrModel::new(2, OptimizerRule::Sgd, OptimizerParams::default());
        let err = model.read_slice(&[4]).unwrap_err();
        assert!(matches!(err, ProtocolError::IndexOutOfRange { index: 4, size: 4 }));

        let mut model = SparseLrModel::new(2, OptimizerRule::Sgd, OptimizerParams::default());
        let err = model
            .apply_sparse(&LrGradient {
                version: 1,
                deltas: vec![(4, 1.0)],
            })
            .unwrap_err();
        assert!(matches!(err, ModelError::Protocol(ProtocolError::IndexOutOfRange { index: 4, size: 4 })));
    }

    #[test]
    fn mf_model_round_trip_apply_and_read() {
        let mut model = SparseMfModel::new(
            4,
            4,
            2,
            3.0,
            || 0.0,
            OptimizerRule::Sgd,
            OptimizerParams {
                learning_rate: 1.0,
                ..Default::default()
            },
        );
        let gradient = MfGradient {
            user_bias_deltas: vec![(0, 0.5)],
            item_bias_deltas: vec![(1, -0.25)],
            user_factor_deltas: vec![(0, vec![0.1, 0.2])],
            item_factor_deltas: vec![(1, vec![0.3, 0.4])],
        };
        model.apply_sparse(&gradient).unwrap();

        let users = model.read_users(0, 1).unwrap();
        assert!((users[0].0 - 3.5).abs() < 1e-6);
        assert!((users[0].1[0] - 0.1).abs() < 1e-6);

        let items = model.read_items(&[1]).unwrap();
        assert!((items[0].0 - 2.75).abs() < 1e-6);
        assert!((items[0].1[1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn mf_out_of_range_id_is_rejected_not_panicking() {
        let model = SparseMfModel::new(2, 2, 2, 0.0, || 0.0, OptimizerRule::Sgd, OptimizerParams::default());
        assert!(matches!(
            model.read_users(0, 3).unwrap_err(),
            ProtocolError::IndexOutOfRange { index: 2, size: 2 }
        ));
        assert!(matches!(
            model.read_items(&[5]).unwrap_err(),
            ProtocolError::IndexOutOfRange { index: 5, size: 2 }
        ));

        let mut model = SparseMfModel::new(2, 2, 2, 0.0, || 0.0, OptimizerRule::Sgd, OptimizerParams::default());
        let gradient = MfGradient {
            user_bias_deltas: vec![(9, 1.0)],
            item_bias_deltas: vec![],
            user_factor_deltas: vec![],
            item_factor_deltas: vec![],
        };
        assert!(matches!(
            model.apply_sparse(&gradient).unwrap_err(),
            ModelError::Protocol(ProtocolError::IndexOutOfRange { index: 9, size: 2 })
        ));
    }
}
