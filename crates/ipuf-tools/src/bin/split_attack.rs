use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ipuf_split::{AttackConfig, FlipPolicy, Parameters};
use ipuf_tools::common::io::write_json;
use ipuf_tools::run::{load_attack_config, run_simulated};

/// 下位層の向きの決め方
#[derive(Clone, Copy, Debug, ValueEnum)]
enum FlipArg {
    /// 両方の向きの精度を記録するだけ
    RecordOnly,
    /// ループ終了後に多数決レスポンスで判定
    Final,
    /// 下位層を学習し直すたびに判定
    EveryRound,
}

impl From<FlipArg> for FlipPolicy {
    fn from(arg: FlipArg) -> Self {
        match arg {
            FlipArg::RecordOnly => FlipPolicy::RecordOnly,
            FlipArg::Final => FlipPolicy::Final,
            FlipArg::EveryRound => FlipPolicy::EveryRound,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Divide-and-conquer attack on a simulated Interpose PUF")]
struct Cli {
    /// チャレンジ長（偶数）
    #[arg(long, default_value_t = 64)]
    n: usize,

    /// 上位層のチェーン数
    #[arg(long, default_value_t = 1)]
    k_up: usize,

    /// 下位層のチェーン数
    #[arg(long, default_value_t = 1)]
    k_down: usize,

    /// 学習用 CRP 数
    #[arg(long = "crps", short = 'N', default_value_t = 100_000)]
    n_crps: usize,

    /// PUF・学習の乱数シード
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// 測定ノイズの強さ
    #[arg(long, default_value_t = 0.0)]
    noisiness: f64,

    /// 学習器のミニバッチサイズ
    #[arg(long, default_value_t = 100_000)]
    batch_size: usize,

    /// 攻撃設定（TOML）
    #[arg(long)]
    config: Option<PathBuf>,

    /// ブロック走査の行数（設定ファイルより優先）
    #[arg(long)]
    block_size: Option<usize>,

    /// 交互学習の上限（設定ファイルより優先）
    #[arg(long)]
    max_rounds: Option<usize>,

    /// 下位層の向きの決め方（設定ファイルより優先）
    #[arg(long, value_enum)]
    flip_policy: Option<FlipArg>,

    /// 結果の出力先（`-` は標準出力、`.gz` は gzip 圧縮）
    #[arg(long, short, default_value = "-")]
    output: PathBuf,

    /// JSON を整形して出力
    #[arg(long)]
    pretty: bool,
}

impl Cli {
    fn parameters(&self) -> Parameters {
        Parameters {
            n: self.n,
            k_up: self.k_up,
            k_down: self.k_down,
            n_crps: self.n_crps,
            seed: self.seed,
            noisiness: self.noisiness,
            batch_size: self.batch_size,
        }
    }

    fn attack_config(&self) -> Result<AttackConfig> {
        let mut config = match &self.config {
            Some(path) => load_attack_config(path)?,
            None => AttackConfig::default(),
        };
        if let Some(block_size) = self.block_size {
            config.block_size = block_size;
        }
        if let Some(max_rounds) = self.max_rounds {
            config.max_rounds = Some(max_rounds);
        }
        if let Some(flip) = self.flip_policy {
            config.flip_policy = flip.into();
        }
        config.validate().context("invalid attack configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let params = cli.parameters();
    params.validate().context("invalid attack parameters")?;
    let config = cli.attack_config()?;

    let record = run_simulated(params, config)?;
    log::info!(
        "{:?}: accuracy {:.4}, {} round(s), {} iterations, {:.1}s",
        record.result.outcome,
        record.result.analysis.accuracy,
        record.result.rounds,
        record.result.iterations,
        record.measured_time
    );

    write_json(&cli.output, &record, cli.pretty)
        .with_context(|| format!("Failed to write result: {}", cli.output.display()))?;
    Ok(())
}
