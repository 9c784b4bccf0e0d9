//! # ipuf-split
//!
//! Interpose PUF に対する分割統治（split）モデリング攻撃。
//!
//! ## モジュール構成
//!
//! - `crp`: チャレンジ行列・CRP セット・interpose 演算
//! - `ltf`: 1層分のモデル（LTF アレイ）
//! - `simulation`: オラクルの契約と Interpose PUF
//! - `metrics`: 距離・精度の推定
//! - `learner`: 1層モデルの学習器
//! - `attack`: 上位層セット構築・初期下位層学習・共訓練ループ
//! - `analysis`: 攻撃後の解析（重み相関など）
//! - `config`: パラメータと攻撃設定
//! - `error`: エラー型
//!

// データ
pub mod crp;
pub mod ltf;

// オラクル・評価
pub mod metrics;
pub mod simulation;

// 学習
pub mod learner;

// 攻撃本体
pub mod analysis;
pub mod attack;

pub mod config;
pub mod error;

pub use attack::{AttackResult, Outcome, SplitAttack};
pub use config::{AttackConfig, FlipPolicy, Parameters};
pub use error::{AttackError, SplitResult};
pub use simulation::{CombinedModel, InterposeOracle, InterposePuf, Simulation};
