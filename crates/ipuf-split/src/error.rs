//! 攻撃処理のエラー型
//!
//! 設定エラーのみが呼び出し側にとって致命的。学習データ不足は
//! 共訓練ループ内で回復される（`attack::cotraining` 参照）。

/// 分割攻撃のエラー
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AttackError {
    /// パラメータ不正（奇数のチャレンジ長など）
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// 行列・CRP セットの形状不一致
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// 上位層用の学習データが閾値未満しか選択されなかった
    #[error(
        "insufficient training data for the upper layer: \
         selected {selected} rows, need at least {required}"
    )]
    InsufficientData { selected: usize, required: usize },

    /// 空の学習セットで学習しようとした
    #[error("empty training set")]
    EmptyTrainingSet,
}

/// Result type for split attack operations
pub type SplitResult<T> = Result<T, AttackError>;
