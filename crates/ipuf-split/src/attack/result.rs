//! 攻撃結果
//!
//! 共訓練ループの途中で記録した時系列と最終モデルをまとめる。
//! 集計・可視化側へは serde でそのまま渡す。

use serde::{Deserialize, Serialize};

use crate::analysis::Analysis;
use crate::config::Parameters;
use crate::error::SplitResult;
use crate::ltf::LtfArray;
use crate::simulation::CombinedModel;

/// 上位層の精度系列で「学習できなかった」ことを表す値
pub const NOT_LEARNED: f64 = -1.0;

/// 攻撃の終了状態
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// 合成モデルのテスト精度が目標に到達
    Converged,
    /// ラウンド上限に到達、または途中で学習データが不足した
    Exhausted,
    /// 初期下位層が学習できない、または最初の上位層学習データが不足した
    Abandoned,
}

/// ループ中に記録した時系列
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AttackHistory {
    /// 合成モデルの精度（オラクル比）
    pub accuracies: Vec<f64>,
    /// 上位層モデルの精度（真の上位層比、学習できなければ -1）
    pub accuracies_up: Vec<f64>,
    /// 下位層モデルの精度（真の下位層比）
    pub accuracies_down: Vec<f64>,
    /// 反転した下位層モデルの精度
    pub accuracies_down_flipped: Vec<f64>,
    /// 上位層学習セットのラベルと真の上位層の一致率
    pub training_set_up_accuracy: Vec<f64>,
    /// 下位層学習セットのラベルと真の下位層の一致率
    pub training_set_down_accuracy: Vec<f64>,
    /// 下位層学習セットのラベルと反転した真の下位層の一致率
    pub training_set_down_flipped_accuracy: Vec<f64>,
    /// 上位層学習に選択された行数
    pub training_set_up_sizes: Vec<usize>,
}

impl AttackHistory {
    /// 下位層精度の組を追加
    pub(crate) fn push_down(&mut self, accuracy: f64, flipped: f64) {
        self.accuracies_down.push(accuracy);
        self.accuracies_down_flipped.push(flipped);
    }
}

/// 攻撃結果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    pub parameters: Parameters,
    pub outcome: Outcome,
    /// 最終的な上位層モデル（`n` ビット入力）
    pub model_up: LtfArray,
    /// 最終的な下位層モデル（`n + 1` ビット入力）
    pub model_down: LtfArray,
    /// 最終モデルの生テストセットに対する精度
    pub test_accuracy: f64,
    #[serde(flatten)]
    pub history: AttackHistory,
    /// 上位層・下位層の交互学習の回数
    pub rounds: usize,
    /// 初期下位層の試行回数
    pub first_rounds: usize,
    /// 学習器の反復数の合計
    pub iterations: usize,
    pub analysis: Analysis,
}

impl AttackResult {
    /// 最終モデルを合成
    pub fn model(&self) -> SplitResult<CombinedModel> {
        CombinedModel::new(self.model_up.clone(), self.model_down.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Outcome::Abandoned).unwrap(), "\"abandoned\"");
        let back: Outcome = serde_json::from_str("\"converged\"").unwrap();
        assert_eq!(back, Outcome::Converged);
    }

    #[test]
    fn test_push_down_keeps_series_aligned() {
        let mut history = AttackHistory::default();
        history.push_down(0.9, 0.1);
        history.push_down(0.8, 0.2);
        assert_eq!(history.accuracies_down, vec![0.9, 0.8]);
        assert_eq!(history.accuracies_down_flipped, vec![0.1, 0.2]);
    }
}
