//! 攻撃設定の読み込みと実行記録

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ipuf_split::{AttackConfig, AttackResult, Parameters, SplitAttack};
use serde::{Deserialize, Serialize};

use crate::common::io::read_to_string;

/// 1回の攻撃の実行記録
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    /// 実行時間（秒）
    pub measured_time: f64,
    pub pid: u32,
    #[serde(flatten)]
    pub result: AttackResult,
}

/// TOML の攻撃設定を読み込む（省略したキーは既定値）
pub fn load_attack_config(path: &Path) -> Result<AttackConfig> {
    let text = read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: AttackConfig = toml::from_str(&text)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}

/// シミュレーション上の Interpose PUF に対して攻撃を実行
pub fn run_simulated(params: Parameters, config: AttackConfig) -> Result<RunRecord> {
    let started_at = Utc::now();
    let start = Instant::now();
    let attack = SplitAttack::simulated(params, config).context("Failed to set up the attack")?;
    let result = attack.run().context("Split attack failed")?;
    Ok(RunRecord {
        started_at,
        measured_time: start.elapsed().as_secs_f64(),
        pid: std::process::id(),
        result,
    })
}
