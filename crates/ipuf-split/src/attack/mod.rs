//! 分割統治攻撃
//!
//! - `upper_set`: 下位層モデルから上位層の学習セットを導出（ブロック走査）
//! - `bootstrap`: ランダム interpose ビットによる初期下位層モデルの学習
//! - `cotraining`: 上位層・下位層の交互学習ループ
//! - `result`: 攻撃結果と時系列

pub mod bootstrap;
pub mod cotraining;
pub mod result;
pub mod upper_set;

pub use bootstrap::{BootstrapAttempt, BootstrapDownTrainer, BootstrapOutcome, BootstrapReport};
pub use cotraining::{Phase, SplitAttack};
pub use result::{AttackHistory, AttackResult, NOT_LEARNED, Outcome};
pub use upper_set::{Selection, UpperSet, UpperSetBuilder};
