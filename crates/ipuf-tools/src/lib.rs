//! Interpose PUF 分割攻撃の実行ツール
//!
//! - `common::io`: 入出力（gzip 対応）
//! - `run`: 攻撃設定の読み込みと実行記録

pub mod common;
pub mod run;
