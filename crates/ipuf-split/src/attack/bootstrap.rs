//! 初期下位層モデルの学習
//!
//! 上位層が未知の段階では interpose ビットの代わりにランダムビットを挿入して
//! 下位層を学習する。当て推量と区別できるモデルが得られるまで、
//! 毎回新しいランダムビットで学習し直す。

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::{AttackConfig, Parameters};
use crate::crp::{ChallengeResponseSet, InterposeBits, random_bits};
use crate::error::{AttackError, SplitResult};
use crate::learner::{FitRequest, Trainer};
use crate::ltf::{LtfArray, Transform};
use crate::metrics::{accuracy_against, approx_dist_nonrandom};
use crate::simulation::{CombinedModel, InterposeOracle};

/// 重み初期化シードのオフセット（試行番号を加える）
pub(crate) const DOWN_WEIGHT_SEED_OFFSET: u64 = 271_828;
/// 候補評価用のランダム上位層のシードオフセット
pub(crate) const RANDOM_UP_SEED_OFFSET: u64 = 42;
/// 記録用の精度推定に使うシード
pub(crate) const ACCURACY_SEED: u64 = 1;

/// 1回の試行の記録
#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapAttempt {
    /// 生テストセットに対する候補モデル（ランダム上位層 + 候補下位層）の精度
    pub test_accuracy: f64,
    /// 候補モデルの精度（オラクル比）
    pub accuracy: f64,
    /// 下位層の精度（真の下位層比）
    pub accuracy_down: f64,
    /// 反転した下位層の精度
    pub accuracy_down_flipped: f64,
    pub iterations: usize,
}

/// 初期下位層学習の結果
#[derive(Clone, Debug, PartialEq)]
pub enum BootstrapOutcome {
    /// 当て推量と区別できる下位層モデルが得られた
    Accepted(LtfArray),
    /// 試行回数を使い切った（最後の候補を保持）
    Failed { last: LtfArray },
}

/// 試行の記録と結果
#[derive(Clone, Debug)]
pub struct BootstrapReport {
    pub attempts: Vec<BootstrapAttempt>,
    pub outcome: BootstrapOutcome,
}

/// 初期下位層モデルの学習器
pub struct BootstrapDownTrainer<'a, T: Trainer> {
    trainer: &'a T,
    params: &'a Parameters,
    config: &'a AttackConfig,
}

impl<'a, T: Trainer> BootstrapDownTrainer<'a, T> {
    pub fn new(trainer: &'a T, params: &'a Parameters, config: &'a AttackConfig) -> Self {
        Self {
            trainer,
            params,
            config,
        }
    }

    /// 生の学習・テストセットから初期下位層モデルを学習
    ///
    /// 候補の良し悪しはランダムな上位層と組み合わせた合成モデルの
    /// 生テストセットに対する精度で判定する（オラクルの内部は見ない）。
    pub fn run<O: InterposeOracle>(
        &self,
        oracle: &O,
        training: &ChallengeResponseSet,
        test: &ChallengeResponseSet,
    ) -> SplitResult<BootstrapReport> {
        let params = self.params;
        let config = self.config;
        let split = params.split();
        let mut bits_rng = Xoshiro256PlusPlus::seed_from_u64(params.seed);
        let random_up = LtfArray::normal(
            params.n,
            params.k_up,
            Transform::Atf,
            &mut Xoshiro256PlusPlus::seed_from_u64(params.seed.wrapping_add(RANDOM_UP_SEED_OFFSET)),
        );
        let options = {
            let mut options = config.fit_options(params.batch_size);
            options.target_test_accuracy = Some(config.bootstrap_target_accuracy);
            options
        };

        let mut attempts = Vec::with_capacity(config.bootstrap_attempts);
        let mut last = None;
        for attempt in 0..config.bootstrap_attempts {
            log::debug!("training initial lower layer model, attempt {}", attempt + 1);
            let training_bits = random_bits(training.len(), &mut bits_rng);
            let test_bits = random_bits(test.len(), &mut bits_rng);
            let training_down = training
                .interposed(InterposeBits::PerRow(&training_bits), split)
                .linearized(Transform::Atf);
            let test_down = test
                .interposed(InterposeBits::PerRow(&test_bits), split)
                .linearized(Transform::Atf);

            let outcome = self.trainer.fit(&FitRequest {
                training: &training_down,
                test: &test_down,
                k: params.k_down,
                transform: Transform::Id,
                options: &options,
                warm_start: None,
                seed: params
                    .seed
                    .wrapping_add(DOWN_WEIGHT_SEED_OFFSET)
                    .wrapping_add(attempt as u64),
            })?;
            let down = outcome.model.with_transform(Transform::Atf);

            let candidate = CombinedModel::new(random_up.clone(), down.clone())?;
            let samples = config.accuracy_samples;
            let record = BootstrapAttempt {
                test_accuracy: 1.0 - approx_dist_nonrandom(&candidate, test),
                accuracy: accuracy_against(&candidate, oracle, samples, ACCURACY_SEED),
                accuracy_down: accuracy_against(&down, oracle.lower(), samples, ACCURACY_SEED),
                accuracy_down_flipped: accuracy_against(
                    &down.flipped(split),
                    oracle.lower(),
                    samples,
                    ACCURACY_SEED,
                ),
                iterations: outcome.iterations,
            };
            log::debug!(
                "initial down model accuracy: {:.2} / flipped: {:.2}, test accuracy {:.4}",
                record.accuracy_down,
                record.accuracy_down_flipped,
                record.test_accuracy
            );

            let accepted = !config.is_random_guess(record.test_accuracy);
            attempts.push(record);
            if accepted {
                log::info!("initial lower layer model accepted after {} attempt(s)", attempt + 1);
                return Ok(BootstrapReport {
                    attempts,
                    outcome: BootstrapOutcome::Accepted(down),
                });
            }
            last = Some(down);
        }

        let Some(last) = last else {
            return Err(AttackError::InvalidParameters(
                "bootstrap_attempts must be at least 1".to_string(),
            ));
        };
        log::warn!(
            "initial lower layer model is indistinguishable from random guessing \
             after {} attempts, giving up",
            attempts.len()
        );
        Ok(BootstrapReport {
            attempts,
            outcome: BootstrapOutcome::Failed { last },
        })
    }
}
