//! 1層モデルの学習器
//!
//! 攻撃本体は `Trainer` 契約だけに依存する。前ラウンドの重みを引き継ぐ
//! ウォームスタートは学習器の内部状態ではなく `FitRequest::warm_start` で
//! 明示的に渡す。
//!
//! - `logistic_regression`: ロジスティック回帰（XOR アービター PUF 用）
//! - `optimizer`: RPROP 更新則

pub mod logistic_regression;
pub mod optimizer;

use serde::{Deserialize, Serialize};

use crate::crp::ChallengeResponseSet;
use crate::error::SplitResult;
use crate::ltf::{LtfArray, Transform};

pub use logistic_regression::LogisticRegression;
pub use optimizer::{Optimizer, Rprop, RpropConfig};

/// 学習の打ち切り条件など
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// テスト精度がこの値に達したら即終了
    pub target_test_accuracy: Option<f64>,
    /// 収束判定を始めるまでの最小反復数
    pub min_iterations: usize,
    /// 最大反復数（エポック数）
    pub max_iterations: usize,
    /// 収束判定に使うテスト精度の小数桁数
    pub convergence_decimals: u32,
    /// 丸めたテスト精度が改善しない反復がこの回数続いたら収束
    pub patience: usize,
    /// エポックごとに学習データの順序をシャッフルするか
    pub shuffle: bool,
    /// ミニバッチサイズ（`None` はフルバッチ）
    pub minibatch_size: Option<usize>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            target_test_accuracy: None,
            min_iterations: 10,
            max_iterations: 1000,
            convergence_decimals: 2,
            patience: 10,
            shuffle: false,
            minibatch_size: None,
        }
    }
}

/// 1回の学習の入力
#[derive(Clone, Copy, Debug)]
pub struct FitRequest<'a> {
    pub training: &'a ChallengeResponseSet,
    pub test: &'a ChallengeResponseSet,
    /// チェーン数
    pub k: usize,
    /// 学習セットのチャレンジに対して使う変換
    pub transform: Transform,
    pub options: &'a FitOptions,
    /// 初期重み（前ラウンドのモデル）
    pub warm_start: Option<&'a LtfArray>,
    /// 初期重み・シャッフル用の乱数シード
    pub seed: u64,
}

/// 学習結果
#[derive(Clone, Debug)]
pub struct FitOutcome {
    pub model: LtfArray,
    /// 実行した反復数
    pub iterations: usize,
    /// 最終テスト精度（学習セットの変換に対する値）
    pub test_accuracy: f64,
}

/// 1層モデルの学習器
pub trait Trainer {
    fn fit(&self, request: &FitRequest<'_>) -> SplitResult<FitOutcome>;
}
