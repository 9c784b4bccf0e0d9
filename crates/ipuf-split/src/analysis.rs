//! 攻撃後の解析
//!
//! 真の層（ホワイトボックス）と学習済みモデルを比較する。攻撃の判断には使わない。

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::ltf::LtfArray;
use crate::metrics::accuracy_against;
use crate::simulation::{CombinedModel, InterposeOracle};

const ACCURACY_SEED: u64 = 31415;
const ACCURACY_UP_SEED: u64 = 31416;
const ACCURACY_DOWN_SEED: u64 = 31417;
const NOISE_SEED: u64 = 31418;

/// 相関行列（行 = 学習済みチェーン、列 = 真のチェーン）
///
/// 分散が 0 の組は定義できないので `None`。
pub type CorrelationMatrix = Vec<Vec<Option<f64>>>;

/// 最終解析
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// 合成モデルの精度（オラクル比）
    pub accuracy: f64,
    /// 上位層モデルの精度（真の上位層比）
    pub accuracy_up: f64,
    /// 下位層モデルの精度（真の下位層比）
    pub accuracy_down: f64,
    /// オラクルとノイズなしオラクルの一致率
    pub simulation_noise: f64,
    pub correlation_up: CorrelationMatrix,
    /// 下位層の interpose ビットより前の列
    pub correlation_down_front: CorrelationMatrix,
    /// 下位層の interpose ビットより後の列
    pub correlation_down_back: CorrelationMatrix,
}

impl Analysis {
    pub fn measure<O: InterposeOracle>(oracle: &O, model: &CombinedModel, samples: usize) -> Self {
        let split = model.split();
        let up_len = model.up().n();
        let down_len = model.down().n();
        let noise_free = oracle.noise_free();
        Self {
            accuracy: accuracy_against(oracle, model, samples, ACCURACY_SEED),
            accuracy_up: accuracy_against(oracle.upper(), model.up(), samples, ACCURACY_UP_SEED),
            accuracy_down: accuracy_against(
                oracle.lower(),
                model.down(),
                samples,
                ACCURACY_DOWN_SEED,
            ),
            simulation_noise: accuracy_against(oracle, &noise_free, samples, NOISE_SEED),
            correlation_up: weight_correlation(oracle.upper(), model.up(), 0..up_len),
            correlation_down_front: weight_correlation(oracle.lower(), model.down(), 0..split),
            correlation_down_back: weight_correlation(
                oracle.lower(),
                model.down(),
                split + 1..down_len,
            ),
        }
    }
}

/// ピアソンの積率相関係数
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let len = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / len;
    let mean_y = y.iter().sum::<f64>() / len;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mean_x, b - mean_y);
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some((cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0))
}

/// 真のチェーンと学習済みチェーンの重み相関（`columns` の範囲の列のみ）
pub fn weight_correlation(
    truth: &LtfArray,
    model: &LtfArray,
    columns: Range<usize>,
) -> CorrelationMatrix {
    (0..model.k())
        .map(|j| {
            let learned = &model.chain(j)[columns.clone()];
            (0..truth.k())
                .map(|i| pearson(&truth.chain(i)[columns.clone()], learned))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ltf::{Combiner, Transform};
    use crate::simulation::InterposePuf;

    #[test]
    fn test_pearson() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert!((pearson(&x, &[2.0, 4.0, 6.0, 8.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&x, &[-1.0, -2.0, -3.0, -4.0]).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&x, &[1.0, 1.0, 1.0, 1.0]), None);
        assert_eq!(pearson(&[1.0], &[1.0]), None);
    }

    #[test]
    fn test_weight_correlation_shape() {
        let truth = LtfArray::new(
            2,
            4,
            vec![1.0, 2.0, 3.0, 4.0, 4.0, 3.0, 2.0, 1.0],
            vec![0.0; 2],
            Transform::Atf,
            Combiner::Xor,
        )
        .unwrap();
        let model = LtfArray::new(
            1,
            4,
            vec![1.0, 2.0, 3.0, 5.0],
            vec![0.0],
            Transform::Atf,
            Combiner::Xor,
        )
        .unwrap();
        let c = weight_correlation(&truth, &model, 0..3);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].len(), 2);
        assert!((c[0][0].unwrap() - 1.0).abs() < 1e-12);
        assert!((c[0][1].unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_perfect_model_analysis() {
        let puf = InterposePuf::new(16, 2, 1, 7).unwrap();
        let model = puf.layers().clone();
        let analysis = Analysis::measure(&puf, &model, 2000);
        assert_eq!(analysis.accuracy, 1.0);
        assert_eq!(analysis.accuracy_up, 1.0);
        assert_eq!(analysis.accuracy_down, 1.0);
        assert_eq!(analysis.simulation_noise, 1.0);
        assert_eq!(analysis.correlation_up.len(), 2);
        assert!((analysis.correlation_up[1][1].unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(analysis.correlation_down_back[0].len(), 1);
    }
}
