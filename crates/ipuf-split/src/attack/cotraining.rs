//! 共訓練ループ
//!
//! 上位層と下位層を交互に学習し直す。
//!
//! ```text
//! Bootstrapping ─┬─> RefiningUpper <──> RefiningDown
//!                │         │                 │
//!                └─────────┴──> Converged | Exhausted | Abandoned
//! ```
//!
//! 状態（系列・カウンタ・最良モデル）はすべて `SplitAttack` が持ち、
//! 各状態の処理は次の状態を値として返す。

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use super::bootstrap::{
    ACCURACY_SEED, BootstrapDownTrainer, BootstrapOutcome, DOWN_WEIGHT_SEED_OFFSET,
};
use super::result::{AttackHistory, AttackResult, NOT_LEARNED, Outcome};
use super::upper_set::UpperSetBuilder;
use crate::analysis::Analysis;
use crate::config::{AttackConfig, FlipPolicy, Parameters};
use crate::crp::{ChallengeMatrix, ChallengeResponseSet, InterposeBits};
use crate::error::{AttackError, SplitResult};
use crate::learner::{FitRequest, LogisticRegression, Trainer};
use crate::ltf::{LtfArray, Transform};
use crate::metrics::{accuracy_against, agreement, approx_dist_nonrandom, majority_vote_set};
use crate::simulation::{CombinedModel, InterposeOracle, InterposePuf, Simulation};

/// 測定ノイズ・テストセットのシードオフセット
const TEST_SEED_OFFSET: u64 = 1;
/// 上位層の重み初期化シードのオフセット
const UP_WEIGHT_SEED_OFFSET: u64 = 43;
/// 上位層が一度も学習できなかった場合のランダム上位層
const FALLBACK_UP_SEED_OFFSET: u64 = 27_182;
/// 初期下位層を諦めた場合のランダム上位層（固定シード）
const ABANDONED_UP_SEED: u64 = 1;
/// 極性判定用の多数決チャレンジ
const MAJORITY_SEED_OFFSET: u64 = 3;

/// ループの状態
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Bootstrapping,
    RefiningUpper,
    RefiningDown,
    Converged,
    Exhausted,
    Abandoned,
}

/// 状態と、その状態で使うモデル
enum Step {
    Bootstrap,
    RefineUpper {
        up: Option<LtfArray>,
        down: LtfArray,
    },
    RefineDown {
        up: LtfArray,
        down: LtfArray,
    },
    Done {
        outcome: Outcome,
        up: LtfArray,
        down: LtfArray,
    },
}

impl Step {
    fn phase(&self) -> Phase {
        match self {
            Step::Bootstrap => Phase::Bootstrapping,
            Step::RefineUpper { .. } => Phase::RefiningUpper,
            Step::RefineDown { .. } => Phase::RefiningDown,
            Step::Done { outcome, .. } => match outcome {
                Outcome::Converged => Phase::Converged,
                Outcome::Exhausted => Phase::Exhausted,
                Outcome::Abandoned => Phase::Abandoned,
            },
        }
    }
}

/// 生の学習・テストセット（攻撃中は不変）
struct RawData {
    training: ChallengeResponseSet,
    test: ChallengeResponseSet,
}

/// これまでで生テストセット精度が最も高いモデル
struct BestModel {
    up: LtfArray,
    down: LtfArray,
    test_accuracy: f64,
}

/// 分割統治攻撃
pub struct SplitAttack<O, T = LogisticRegression> {
    oracle: O,
    trainer: T,
    params: Parameters,
    config: AttackConfig,
    max_rounds: usize,
    history: AttackHistory,
    rounds: usize,
    first_rounds: usize,
    iterations: usize,
    best: Option<BestModel>,
    /// 多数決レスポンス（極性判定で初めて必要になったときに作る）
    ground_truth: Option<ChallengeResponseSet>,
}

impl SplitAttack<InterposePuf, LogisticRegression> {
    /// パラメータから Interpose PUF を生成して攻撃を準備
    ///
    /// PUF の重みは `seed`、測定ノイズは `seed + 1` から決まる。
    pub fn simulated(params: Parameters, config: AttackConfig) -> SplitResult<Self> {
        params.validate()?;
        let oracle = InterposePuf::new(params.n, params.k_up, params.k_down, params.seed)?
            .with_noise(params.noisiness, params.seed.wrapping_add(TEST_SEED_OFFSET));
        Self::new(params, config, oracle, LogisticRegression::default())
    }
}

impl<O: InterposeOracle, T: Trainer> SplitAttack<O, T> {
    pub fn new(
        params: Parameters,
        config: AttackConfig,
        oracle: O,
        trainer: T,
    ) -> SplitResult<Self> {
        params.validate()?;
        config.validate()?;
        if oracle.challenge_length() != params.n {
            return Err(AttackError::ShapeMismatch {
                expected: params.n,
                actual: oracle.challenge_length(),
            });
        }
        let max_rounds = config.max_rounds.unwrap_or_else(|| params.default_max_rounds());
        Ok(Self {
            oracle,
            trainer,
            params,
            config,
            max_rounds,
            history: AttackHistory::default(),
            rounds: 0,
            first_rounds: 0,
            iterations: 0,
            best: None,
            ground_truth: None,
        })
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// オラクルに問い合わせて生の学習・テストセットを作る
    fn prepare(&self) -> RawData {
        let seed = self.params.seed;
        let training = ChallengeResponseSet::generate(
            &self.oracle,
            self.params.n_crps,
            &mut Xoshiro256PlusPlus::seed_from_u64(seed),
        );
        let test = ChallengeResponseSet::generate(
            &self.oracle,
            self.config.test_set_size,
            &mut Xoshiro256PlusPlus::seed_from_u64(seed.wrapping_add(TEST_SEED_OFFSET)),
        );
        log::debug!(
            "raw training set: {} CRPs ({:.2} MiB), test set: {} CRPs",
            training.len(),
            training.challenges().nbytes() as f64 / (1024.0 * 1024.0),
            test.len()
        );
        RawData { training, test }
    }

    /// 攻撃を実行
    pub fn run(mut self) -> SplitResult<AttackResult> {
        log::info!(
            "split attack starting: n={}, k_up={}, k_down={}, N={}, noisiness={}, seed={}",
            self.params.n,
            self.params.k_up,
            self.params.k_down,
            self.params.n_crps,
            self.params.noisiness,
            self.params.seed
        );
        let raw = self.prepare();

        let mut step = Step::Bootstrap;
        let (outcome, up, mut down) = loop {
            step = match step {
                Step::Bootstrap => self.bootstrap(&raw)?,
                Step::RefineUpper { up, down } => self.refine_upper(&raw, up, down)?,
                Step::RefineDown { up, down } => self.refine_down(&raw, up, down)?,
                Step::Done { outcome, up, down } => break (outcome, up, down),
            };
            log::info!("phase: {:?} (round {})", step.phase(), self.rounds);
        };

        if self.config.flip_policy == FlipPolicy::Final && outcome != Outcome::Abandoned {
            let (resolved, flipped) = self.resolve_orientation(&up, down)?;
            down = resolved;
            if flipped {
                self.compose(&up, &down, &raw.test)?;
            }
        }

        let model = CombinedModel::new(up, down)?;
        let test_accuracy = 1.0 - approx_dist_nonrandom(&model, &raw.test);
        let analysis = Analysis::measure(&self.oracle, &model, self.config.accuracy_samples);
        log::info!(
            "split attack finished: {outcome:?} after {} round(s), \
             accuracy {:.4} (up {:.4}, down {:.4})",
            self.rounds,
            analysis.accuracy,
            analysis.accuracy_up,
            analysis.accuracy_down
        );
        let (model_up, model_down) = model.into_parts();
        Ok(AttackResult {
            parameters: self.params,
            outcome,
            model_up,
            model_down,
            test_accuracy,
            history: self.history,
            rounds: self.rounds,
            first_rounds: self.first_rounds,
            iterations: self.iterations,
            analysis,
        })
    }

    fn bootstrap(&mut self, raw: &RawData) -> SplitResult<Step> {
        let report = BootstrapDownTrainer::new(&self.trainer, &self.params, &self.config).run(
            &self.oracle,
            &raw.training,
            &raw.test,
        )?;
        for attempt in &report.attempts {
            self.history.accuracies.push(attempt.accuracy);
            self.history.push_down(attempt.accuracy_down, attempt.accuracy_down_flipped);
            self.iterations += attempt.iterations;
        }
        self.first_rounds = report.attempts.len();

        match report.outcome {
            BootstrapOutcome::Accepted(down) => Ok(Step::RefineUpper { up: None, down }),
            BootstrapOutcome::Failed { last } => {
                let up = self.random_up(ABANDONED_UP_SEED);
                self.history.accuracies_up.push(NOT_LEARNED);
                self.rounds = 0;
                self.compose(&up, &last, &raw.test)?;
                Ok(Step::Done {
                    outcome: Outcome::Abandoned,
                    up,
                    down: last,
                })
            }
        }
    }

    fn refine_upper(
        &mut self,
        raw: &RawData,
        up: Option<LtfArray>,
        down: LtfArray,
    ) -> SplitResult<Step> {
        let split = self.params.split();
        let builder = UpperSetBuilder::from_config(&self.config);
        let set = match builder.build(&down, &raw.training, split) {
            Ok(set) => set,
            Err(AttackError::InsufficientData { selected, required }) => {
                self.history.training_set_up_sizes.push(selected);
                log::warn!(
                    "could not create a large enough training set for the upper layer \
                     ({selected} < {required} rows), aborting"
                );
                return self.abort_upper(raw, up, down);
            }
            Err(e) => return Err(e),
        };
        self.history.training_set_up_sizes.push(set.selected);

        let labels_agreement = agreement(
            &self.oracle.upper().eval(set.training.challenges().view()),
            set.training.responses(),
        );
        self.history.training_set_up_accuracy.push(labels_agreement);
        log::debug!(
            "new up training set accuracy: {labels_agreement:.2}, size: {}",
            set.training.len()
        );

        let training = set.training.linearized(Transform::Atf);
        let test = set.test.linearized(Transform::Atf);
        let options = self.config.fit_options(self.params.batch_size);
        let outcome = self.trainer.fit(&FitRequest {
            training: &training,
            test: &test,
            k: self.params.k_up,
            transform: Transform::Id,
            options: &options,
            warm_start: up.as_ref(),
            seed: self.params.seed.wrapping_add(UP_WEIGHT_SEED_OFFSET),
        })?;
        self.iterations += outcome.iterations;
        let up = outcome.model.with_transform(Transform::Atf);

        let accuracy_up = self.layer_accuracy(&up, self.oracle.upper());
        self.history.accuracies_up.push(accuracy_up);
        log::debug!("new up model accuracy: {accuracy_up:.2}");

        let test_accuracy = self.compose(&up, &down, &raw.test)?;
        Ok(self.next_step(test_accuracy, up, down, |up, down| Step::RefineDown { up, down }))
    }

    /// 上位層の学習データが不足したときの終了処理
    fn abort_upper(
        &mut self,
        raw: &RawData,
        up: Option<LtfArray>,
        down: LtfArray,
    ) -> SplitResult<Step> {
        match up {
            None => {
                let up = self.random_up(self.params.seed.wrapping_add(FALLBACK_UP_SEED_OFFSET));
                self.history.accuracies_up.push(NOT_LEARNED);
                self.compose(&up, &down, &raw.test)?;
                Ok(Step::Done {
                    outcome: Outcome::Abandoned,
                    up,
                    down,
                })
            }
            Some(up) => {
                let (up, down) = match self.best.take() {
                    Some(best) => (best.up, best.down),
                    None => (up, down),
                };
                self.compose(&up, &down, &raw.test)?;
                Ok(Step::Done {
                    outcome: Outcome::Exhausted,
                    up,
                    down,
                })
            }
        }
    }

    fn refine_down(&mut self, raw: &RawData, up: LtfArray, down: LtfArray) -> SplitResult<Step> {
        let split = self.params.split();
        log::debug!(
            "copying challenges of size {:.2} MiB for the lower layer",
            raw.training.challenges().nbytes() as f64 / (1024.0 * 1024.0)
        );
        let training_bits = up.eval(raw.training.challenges().view());
        let test_bits = up.eval(raw.test.challenges().view());
        let training = raw.training.interposed(InterposeBits::PerRow(&training_bits), split);
        let test = raw.test.interposed(InterposeBits::PerRow(&test_bits), split);

        let lower = self.oracle.lower();
        let direct = agreement(&lower.eval(training.challenges().view()), training.responses());
        let flipped = agreement(
            &lower.flipped(split).eval(training.challenges().view()),
            training.responses(),
        );
        self.history.training_set_down_accuracy.push(direct);
        self.history.training_set_down_flipped_accuracy.push(flipped);
        log::debug!("new down training set accuracy: {direct:.2}, flipped: {flipped:.2}");

        let training = training.linearized(Transform::Atf);
        let test = test.linearized(Transform::Atf);
        let options = self.config.fit_options(self.params.batch_size);
        let outcome = self.trainer.fit(&FitRequest {
            training: &training,
            test: &test,
            k: self.params.k_down,
            transform: Transform::Id,
            options: &options,
            warm_start: Some(&down),
            seed: self.params.seed.wrapping_add(DOWN_WEIGHT_SEED_OFFSET),
        })?;
        self.iterations += outcome.iterations;
        let mut down = outcome.model.with_transform(Transform::Atf);
        self.record_down_accuracy(&down);

        if self.config.flip_policy == FlipPolicy::EveryRound {
            down = self.resolve_orientation(&up, down)?.0;
        }

        self.rounds += 1;
        let test_accuracy = self.compose(&up, &down, &raw.test)?;
        Ok(self.next_step(test_accuracy, up, down, |up, down| Step::RefineUpper {
            up: Some(up),
            down,
        }))
    }

    /// 収束・ラウンド上限の判定
    fn next_step(
        &self,
        test_accuracy: f64,
        up: LtfArray,
        down: LtfArray,
        proceed: impl FnOnce(LtfArray, LtfArray) -> Step,
    ) -> Step {
        if test_accuracy >= self.config.target_accuracy {
            Step::Done {
                outcome: Outcome::Converged,
                up,
                down,
            }
        } else if self.rounds >= self.max_rounds {
            Step::Done {
                outcome: Outcome::Exhausted,
                up,
                down,
            }
        } else {
            proceed(up, down)
        }
    }

    /// 合成モデルを作って精度を記録し、生テストセットに対する精度を返す
    fn compose(
        &mut self,
        up: &LtfArray,
        down: &LtfArray,
        test: &ChallengeResponseSet,
    ) -> SplitResult<f64> {
        let model = CombinedModel::new(up.clone(), down.clone())?;
        let samples = self.config.accuracy_samples;
        let accuracy = accuracy_against(&model, &self.oracle, samples, ACCURACY_SEED);
        self.history.accuracies.push(accuracy);
        let test_accuracy = 1.0 - approx_dist_nonrandom(&model, test);

        let last = |series: &[f64]| series.last().copied().unwrap_or(f64::NAN);
        log::debug!(
            "current accuracy up: {:.2}, down: {:.2}, down flipped: {:.2}, \
             total: {accuracy:.4}, test: {test_accuracy:.4}",
            last(&self.history.accuracies_up),
            last(&self.history.accuracies_down),
            last(&self.history.accuracies_down_flipped)
        );

        if self.best.as_ref().is_none_or(|best| test_accuracy > best.test_accuracy) {
            self.best = Some(BestModel {
                up: up.clone(),
                down: down.clone(),
                test_accuracy,
            });
        }
        Ok(test_accuracy)
    }

    fn record_down_accuracy(&mut self, down: &LtfArray) {
        let split = self.params.split();
        let direct = self.layer_accuracy(down, self.oracle.lower());
        let flipped = self.layer_accuracy(&down.flipped(split), self.oracle.lower());
        self.history.push_down(direct, flipped);
        log::debug!("down model accuracy: {direct:.2} / flipped: {flipped:.2}");
    }

    fn layer_accuracy(&self, model: &LtfArray, truth: &LtfArray) -> f64 {
        accuracy_against(model, truth, self.config.accuracy_samples, ACCURACY_SEED)
    }

    fn random_up(&self, seed: u64) -> LtfArray {
        LtfArray::normal(
            self.params.n,
            self.params.k_up,
            Transform::Atf,
            &mut Xoshiro256PlusPlus::seed_from_u64(seed),
        )
    }

    /// 下位層の向きを多数決レスポンスで判定し、良い方を返す（反転したら `true`）
    fn resolve_orientation(
        &mut self,
        up: &LtfArray,
        down: LtfArray,
    ) -> SplitResult<(LtfArray, bool)> {
        let ground_truth = match self.ground_truth.take() {
            Some(set) => set,
            None => {
                let challenges = ChallengeMatrix::random(
                    self.config.test_set_size,
                    self.params.n,
                    &mut Xoshiro256PlusPlus::seed_from_u64(
                        self.params.seed.wrapping_add(MAJORITY_SEED_OFFSET),
                    ),
                );
                majority_vote_set(&self.oracle, challenges, self.config.majority_votes)?
            }
        };

        let flipped = down.flipped(self.params.split());
        let direct = CombinedModel::new(up.clone(), down.clone())?;
        let mirrored = CombinedModel::new(up.clone(), flipped.clone())?;
        let direct_dist = approx_dist_nonrandom(&direct, &ground_truth);
        let flipped_dist = approx_dist_nonrandom(&mirrored, &ground_truth);
        self.ground_truth = Some(ground_truth);
        log::debug!(
            "orientation check against majority vote: direct {:.4}, flipped {:.4}",
            1.0 - direct_dist,
            1.0 - flipped_dist
        );
        if flipped_dist < direct_dist {
            log::info!("flipping the lower layer model");
            Ok((flipped, true))
        } else {
            Ok((down, false))
        }
    }
}
