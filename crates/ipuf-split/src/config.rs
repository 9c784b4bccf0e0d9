//! 攻撃パラメータと攻撃設定
//!
//! - `Parameters`: 攻撃対象と CRP 数（攻撃インスタンス作成後は不変）
//! - `AttackConfig`: 閾値・ブロックサイズ・ラウンド上限などの調整値
//!
//! どちらも serde で TOML / JSON から読み書きできる。

use serde::{Deserialize, Serialize};

use crate::error::{AttackError, SplitResult};
use crate::learner::FitOptions;

/// 攻撃対象の Interpose PUF と攻撃規模
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// チャレンジ長（偶数）
    pub n: usize,
    /// 上位層のチェーン数
    pub k_up: usize,
    /// 下位層のチェーン数
    pub k_down: usize,
    /// 学習用 CRP 数
    #[serde(rename = "N", alias = "n_crps")]
    pub n_crps: usize,
    pub seed: u64,
    /// 測定ノイズの強さ（0 でノイズなし）
    pub noisiness: f64,
    /// 学習器のミニバッチサイズ（学習セット以上ならフルバッチ）
    pub batch_size: usize,
}

impl Parameters {
    /// 設定エラーを検出（致命的・再試行しない）
    pub fn validate(&self) -> SplitResult<()> {
        if self.n < 2 || self.n % 2 != 0 {
            return Err(AttackError::InvalidParameters(format!(
                "n must be a positive multiple of 2, but was {}",
                self.n
            )));
        }
        if self.k_up == 0 || self.k_down == 0 {
            return Err(AttackError::InvalidParameters(format!(
                "layer widths must be positive, got k_up={}, k_down={}",
                self.k_up, self.k_down
            )));
        }
        if self.n_crps == 0 {
            return Err(AttackError::InvalidParameters(
                "N must be at least 1".to_string(),
            ));
        }
        if !self.noisiness.is_finite() || self.noisiness < 0.0 {
            return Err(AttackError::InvalidParameters(format!(
                "noisiness must be a finite non-negative number, got {}",
                self.noisiness
            )));
        }
        if self.batch_size == 0 {
            return Err(AttackError::InvalidParameters(
                "batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// interpose ビットの位置
    pub fn split(&self) -> usize {
        self.n / 2
    }

    /// 幅の広い層は1ラウンドあたりのコストが大きいため上限を絞る
    pub fn default_max_rounds(&self) -> usize {
        if self.k_up.max(self.k_down) < 5 { 5 } else { 1 }
    }
}

/// 向き（極性）の曖昧さをいつ解消するか
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlipPolicy {
    /// 両方の向きの精度を記録するだけで、学習器が収束した向きを使い続ける
    #[default]
    RecordOnly,
    /// ループ終了後に一度だけ、多数決レスポンスに対して良い方の向きを採用
    Final,
    /// 下位層を学習し直すたびに、良い方の向きを採用
    EveryRound,
}

/// 攻撃の調整値
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
    /// 上位層セット構築時のブロック行数
    pub block_size: usize,
    /// 上位層セットのバッファに上乗せするマージン（バイト）
    pub memory_margin_bytes: usize,
    /// 上位層セットとして最低限必要な行数
    pub min_upper_rows: usize,
    /// 上位層テストセットの最大行数
    pub max_upper_test_rows: usize,
    /// 上位層テストセットに回す割合
    pub upper_test_fraction: f64,
    /// 初期下位層モデルの試行回数
    pub bootstrap_attempts: usize,
    /// この範囲のテスト精度は当て推量と区別できないとみなす
    pub random_guess_band: (f64, f64),
    /// 初期下位層モデル学習時の目標テスト精度
    pub bootstrap_target_accuracy: f64,
    /// 合成モデルのテスト精度がこれ以上なら収束
    pub target_accuracy: f64,
    /// 上位層・下位層の交互学習の上限（`None` は層の幅から決める）
    pub max_rounds: Option<usize>,
    /// 生テストセットの CRP 数
    pub test_set_size: usize,
    /// 記録用の精度推定に使うランダムチャレンジ数
    pub accuracy_samples: usize,
    pub flip_policy: FlipPolicy,
    /// 極性判定の多数決に使う測定回数
    pub majority_votes: usize,
    /// 学習器の最小反復数
    pub min_iterations: usize,
    /// 学習器の最大反復数
    pub max_iterations: usize,
    /// 学習器の収束判定に使う小数桁数
    pub convergence_decimals: u32,
    /// 学習器の収束判定の猶予反復数
    pub patience: usize,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            block_size: 1_000_000,
            memory_margin_bytes: 500 * 1024 * 1024,
            min_upper_rows: 50,
            max_upper_test_rows: 10_000,
            upper_test_fraction: 0.05,
            bootstrap_attempts: 10,
            random_guess_band: (0.45, 0.55),
            bootstrap_target_accuracy: 0.74,
            target_accuracy: 0.95,
            max_rounds: None,
            test_set_size: 10_000,
            accuracy_samples: 10_000,
            flip_policy: FlipPolicy::RecordOnly,
            majority_votes: 11,
            min_iterations: 10,
            max_iterations: 1000,
            convergence_decimals: 2,
            patience: 10,
        }
    }
}

impl AttackConfig {
    pub fn validate(&self) -> SplitResult<()> {
        if self.block_size == 0 {
            return Err(AttackError::InvalidParameters(
                "block_size must be at least 1".to_string(),
            ));
        }
        if self.test_set_size == 0 {
            return Err(AttackError::InvalidParameters(
                "test_set_size must be at least 1".to_string(),
            ));
        }
        if self.bootstrap_attempts == 0 {
            return Err(AttackError::InvalidParameters(
                "bootstrap_attempts must be at least 1".to_string(),
            ));
        }
        let (low, high) = self.random_guess_band;
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low > high {
            return Err(AttackError::InvalidParameters(format!(
                "random_guess_band must be an ordered pair in [0, 1], got ({low}, {high})"
            )));
        }
        if !(0.0..=1.0).contains(&self.upper_test_fraction) {
            return Err(AttackError::InvalidParameters(format!(
                "upper_test_fraction must be in [0, 1], got {}",
                self.upper_test_fraction
            )));
        }
        Ok(())
    }

    /// 攻撃中の学習に共通する打ち切り条件（目標精度なし・シャッフルなし）
    pub fn fit_options(&self, batch_size: usize) -> FitOptions {
        FitOptions {
            target_test_accuracy: None,
            min_iterations: self.min_iterations,
            max_iterations: self.max_iterations,
            convergence_decimals: self.convergence_decimals,
            patience: self.patience,
            shuffle: false,
            minibatch_size: Some(batch_size),
        }
    }

    /// 当て推量と区別できない精度か
    pub fn is_random_guess(&self, accuracy: f64) -> bool {
        let (low, high) = self.random_guess_band;
        (low..=high).contains(&accuracy)
    }
}
