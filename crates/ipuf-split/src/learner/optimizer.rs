//! オプティマイザ
//!
//! RPROP（resilient backpropagation）を実装する。勾配の大きさを使わず
//! 符号だけでパラメータごとのステップ幅を伸縮させるため、XOR の積で
//! 勾配のスケールが大きく変わるモデルでも学習率の調整が要らない。

use serde::{Deserialize, Serialize};

use crate::ltf::LtfArray;

/// 重み・バイアスの勾配
#[derive(Clone, Debug, PartialEq)]
pub struct Gradient {
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
}

impl Gradient {
    pub fn zeros(model: &LtfArray) -> Self {
        Self {
            weights: vec![0.0; model.weights().len()],
            bias: vec![0.0; model.bias().len()],
        }
    }

    pub fn clear(&mut self) {
        self.weights.fill(0.0);
        self.bias.fill(0.0);
    }
}

/// オプティマイザ trait
pub trait Optimizer {
    /// パラメータを更新
    fn step(&mut self, model: &mut LtfArray, grads: &Gradient);
}

/// RPROP のハイパーパラメータ
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpropConfig {
    /// 勾配の符号が変わらなかったときの拡大率
    pub eta_plus: f64,
    /// 勾配の符号が変わったときの縮小率
    pub eta_minus: f64,
    /// ステップ幅の初期値
    pub delta_init: f64,
    pub delta_min: f64,
    pub delta_max: f64,
}

impl Default for RpropConfig {
    fn default() -> Self {
        Self {
            eta_plus: 1.2,
            eta_minus: 0.5,
            delta_init: 0.1,
            delta_min: 1e-6,
            delta_max: 50.0,
        }
    }
}

/// iRPROP− オプティマイザ
pub struct Rprop {
    config: RpropConfig,
    /// ステップ幅（重み）
    delta_weights: Vec<f64>,
    /// 前回勾配（重み）
    prev_weights: Vec<f64>,
    /// ステップ幅（バイアス）
    delta_bias: Vec<f64>,
    /// 前回勾配（バイアス）
    prev_bias: Vec<f64>,
}

impl Rprop {
    pub fn new(model: &LtfArray, config: RpropConfig) -> Self {
        Self {
            config,
            delta_weights: vec![config.delta_init; model.weights().len()],
            prev_weights: vec![0.0; model.weights().len()],
            delta_bias: vec![config.delta_init; model.bias().len()],
            prev_bias: vec![0.0; model.bias().len()],
        }
    }
}

/// RPROP の更新式を適用（借用エラー回避のため独立関数として実装）
fn rprop_update_params(
    params: &mut [f64],
    grads: &[f64],
    delta: &mut [f64],
    prev: &mut [f64],
    config: &RpropConfig,
) {
    for i in 0..params.len() {
        let g = grads[i];
        let direction = prev[i] * g;
        if direction > 0.0 {
            delta[i] = (delta[i] * config.eta_plus).min(config.delta_max);
        } else if direction < 0.0 {
            // 符号反転: ステップを縮めて今回は動かさない
            delta[i] = (delta[i] * config.eta_minus).max(config.delta_min);
            prev[i] = 0.0;
            continue;
        }
        if g > 0.0 {
            params[i] -= delta[i];
        } else if g < 0.0 {
            params[i] += delta[i];
        }
        prev[i] = g;
    }
}

impl Optimizer for Rprop {
    fn step(&mut self, model: &mut LtfArray, grads: &Gradient) {
        let (weights, bias) = model.params_mut();
        rprop_update_params(
            weights,
            &grads.weights,
            &mut self.delta_weights,
            &mut self.prev_weights,
            &self.config,
        );
        rprop_update_params(
            bias,
            &grads.bias,
            &mut self.delta_bias,
            &mut self.prev_bias,
            &self.config,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rprop_grows_step_on_same_sign() {
        let config = RpropConfig::default();
        let mut params = [0.0];
        let mut delta = [0.1];
        let mut prev = [0.0];

        rprop_update_params(&mut params, &[1.0], &mut delta, &mut prev, &config);
        assert!((params[0] + 0.1).abs() < 1e-12);
        assert_eq!(prev[0], 1.0);

        rprop_update_params(&mut params, &[2.0], &mut delta, &mut prev, &config);
        assert!((delta[0] - 0.12).abs() < 1e-12);
        assert!((params[0] + 0.22).abs() < 1e-12);
    }

    #[test]
    fn test_rprop_backs_off_on_sign_change() {
        let config = RpropConfig::default();
        let mut params = [1.0];
        let mut delta = [0.4];
        let mut prev = [1.0];

        rprop_update_params(&mut params, &[-3.0], &mut delta, &mut prev, &config);
        assert_eq!(params[0], 1.0);
        assert!((delta[0] - 0.2).abs() < 1e-12);
        assert_eq!(prev[0], 0.0);

        // 次の反復は通常の更新
        rprop_update_params(&mut params, &[-3.0], &mut delta, &mut prev, &config);
        assert!((params[0] - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_rprop_respects_bounds() {
        let config = RpropConfig {
            delta_max: 0.15,
            ..RpropConfig::default()
        };
        let mut params = [0.0];
        let mut delta = [0.1];
        let mut prev = [1.0];
        for _ in 0..10 {
            rprop_update_params(&mut params, &[1.0], &mut delta, &mut prev, &config);
        }
        assert!((delta[0] - 0.15).abs() < 1e-12);
    }
}
