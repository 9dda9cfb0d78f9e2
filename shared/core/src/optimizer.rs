//! Optimizer rules (spec.md §4.2): per-coordinate recipes mapping
//! (current weight, per-coord state, incoming gradient value) to a new
//! weight and new state.

/// Per-coordinate scalar state. `Sgd` carries none; `Momentum`/`Nesterov`
/// carry a momentum accumulator; `AdaGrad` carries a sum of squared
/// gradients. `f32::default()` (`0.0`) is the correct init for all of them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OptimizerState(pub f32);

/// Hyperparameters shared by all rules; a given server run picks one rule
/// and uses a subset of these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerParams {
    pub learning_rate: f32,
    pub momentum_beta: f32,
    pub epsilon: f32,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            momentum_beta: 0.9,
            epsilon: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerRule {
    Sgd,
    Momentum,
    Nesterov,
    AdaGrad,
}

impl OptimizerRule {
    /// Applies one incoming gradient coordinate to `(weight, state)`,
    /// returning the updated pair. This is the only place optimizer math
    /// happens; the model just owns the arrays.
    pub fn apply(self, params: &OptimizerParams, weight: f32, state: OptimizerState, delta: f32) -> (f32, OptimizerState) {
        match self {
            OptimizerRule::Sgd => (weight + params.learning_rate * delta, state),
            OptimizerRule::Momentum | OptimizerRule::Nesterov => {
                let m = state.0;
                let new_m = if m == 0.0 {
                    delta
                } else {
                    params.momentum_beta * m + (1.0 - params.momentum_beta) * params.learning_rate * delta
                };
                (weight + new_m, OptimizerState(new_m))
            }
            OptimizerRule::AdaGrad => {
                let g = state.0 + delta * delta;
                let new_weight = weight + params.learning_rate * delta / (params.epsilon + g.sqrt());
                (new_weight, OptimizerState(g))
            }
        }
    }

    /// The read-time transform applied on a pull-slice / sparse-model read.
    /// Only `Nesterov` differs from identity: it returns the look-ahead
    /// `w + beta * m`, which must be computed server-side since only the
    /// server holds `m` (spec.md §9).
    pub fn read_transform(self, params: &OptimizerParams, weight: f32, state: OptimizerState) -> f32 {
        match self {
            OptimizerRule::Nesterov => weight + params.momentum_beta * state.0,
            _ => weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sgd_accumulates_linearly() {
        let params = OptimizerParams {
            learning_rate: 0.1,
            ..Default::default()
        };
        let mut w = 0.0f32;
        let mut s = OptimizerState::default();
        for delta in [1.0, 2.0, -0.5] {
            let (nw, ns) = OptimizerRule::Sgd.apply(&params, w, s, delta);
            w = nw;
            s = ns;
        }
        assert!((w - 0.1 * 2.5).abs() < 1e-6);
    }

    /// spec.md §8 scenario S4.
    #[test]
    fn s4_sgd_single_coordinate() {
        let params = OptimizerParams {
            learning_rate: 0.1,
            ..Default::default()
        };
        let (w, _) = OptimizerRule::Sgd.apply(&params, 0.0, OptimizerState::default(), 1.0);
        assert!((w - 0.1).abs() < 1e-6);
    }

    /// spec.md §8 scenario S5.
    #[test]
    fn s5_adagrad_two_applies() {
        let params = OptimizerParams {
            learning_rate: 1.0,
            epsilon: 1e-8,
            ..Default::default()
        };
        let (w1, s1) = OptimizerRule::AdaGrad.apply(&params, 0.0, OptimizerState::default(), 3.0);
        assert!((w1 - 1.0).abs() < 1e-3, "w1 = {w1}");
        assert!((s1.0 - 9.0).abs() < 1e-6);

        let (w2, s2) = OptimizerRule::AdaGrad.apply(&params, w1, s1, 3.0);
        assert!((s2.0 - 18.0).abs() < 1e-6);
        assert!((w2 - 1.7071).abs() < 1e-3, "w2 = {w2}");
    }

    #[test]
    fn momentum_first_touch_then_blend() {
        let params = OptimizerParams {
            learning_rate: 1.0,
            momentum_beta: 0.5,
            ..Default::default()
        };
        let (w1, s1) = OptimizerRule::Momentum.apply(&params, 0.0, OptimizerState::default(), 2.0);
        // first touch: m <- delta directly
        assert_eq!(s1.0, 2.0);
        assert_eq!(w1, 2.0);

        let (w2, s2) = OptimizerRule::Momentum.apply(&params, w1, s1, 4.0);
        // blended: m <- beta*m + (1-beta)*eta*delta = 0.5*2 + 0.5*1*4 = 3
        assert!((s2.0 - 3.0).abs() < 1e-6);
        assert!((w2 - (w1 + 3.0)).abs() < 1e-6);
    }

    #[test]
    fn nesterov_read_transform_is_lookahead() {
        let params = OptimizerParams {
            momentum_beta: 0.5,
            ..Default::default()
        };
        let w = OptimizerRule::Nesterov.read_transform(&params, 1.0, OptimizerState(2.0));
        assert!((w - 2.0).abs() < 1e-6); // 1.0 + 0.5*2.0
    }

    #[test]
    fn sgd_read_transform_is_identity() {
        let params = OptimizerParams::default();
        let w = OptimizerRule::Sgd.read_transform(&params, 1.0, OptimizerState(5.0));
        assert_eq!(w, 1.0);
    }
}
