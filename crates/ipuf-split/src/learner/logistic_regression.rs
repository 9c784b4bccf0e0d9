//! ロジスティック回帰による XOR アービター PUF の学習
//!
//! モデル出力 `f = Π_i (w_i · x + b_i)` に対し、レスポンス `y ∈ {±1}` の
//! 確率を `σ(y f)` とみなして交差エントロピーを最小化する。
//! 更新は RPROP。打ち切りは以下のいずれか:
//! - テスト精度が `target_test_accuracy` に到達
//! - `min_iterations` 以降、丸めたテスト精度が `patience` 回改善しない
//! - `max_iterations` に到達

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;

use super::optimizer::{Gradient, Optimizer, Rprop, RpropConfig};
use super::{FitOutcome, FitRequest, Trainer};
use crate::crp::ChallengeResponseSet;
use crate::error::{AttackError, SplitResult};
use crate::ltf::LtfArray;
use crate::metrics::approx_dist_nonrandom;

/// ロジスティック回帰学習器
#[derive(Clone, Debug, Default)]
pub struct LogisticRegression {
    rprop: RpropConfig,
}

impl LogisticRegression {
    /// 初期モデル: ウォームスタートの重み、なければ N(0, 1) の乱数重み
    fn initial_model(
        request: &FitRequest<'_>,
        n: usize,
        rng: &mut Xoshiro256PlusPlus,
    ) -> SplitResult<LtfArray> {
        match request.warm_start {
            Some(model) => {
                if model.n() != n {
                    return Err(AttackError::ShapeMismatch {
                        expected: n,
                        actual: model.n(),
                    });
                }
                if model.k() != request.k {
                    return Err(AttackError::ShapeMismatch {
                        expected: request.k,
                        actual: model.k(),
                    });
                }
                Ok(model.clone().with_transform(request.transform))
            }
            None => Ok(LtfArray::normal(n, request.k, request.transform, rng)),
        }
    }
}

/// シグモイド関数
#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// 小数 `decimals` 桁で丸める
fn round_to(x: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (x * scale).round() / scale
}

/// `rows` で指定した行の平均損失の勾配を `grads` に書き込む
///
/// 学習セットのチャレンジは線形化済み（モデルの変換は恒等）であること。
fn accumulate_gradient(
    model: &LtfArray,
    set: &ChallengeResponseSet,
    rows: &[usize],
    grads: &mut Gradient,
    delays: &mut [f64],
) {
    grads.clear();
    let n = model.n();
    let scale = 1.0 / rows.len() as f64;
    for &r in rows {
        let x = set.challenges().row(r);
        let y = f64::from(set.responses()[r]);
        model.delays_of_features(x, delays);
        let f: f64 = delays.iter().product();
        // d(-log σ(y f)) / df
        let dl_df = -y * sigmoid(-y * f) * scale;
        if dl_df == 0.0 {
            continue;
        }
        for i in 0..delays.len() {
            let others: f64 = delays
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, d)| d)
                .product();
            let g = dl_df * others;
            for (gw, &xj) in grads.weights[i * n..(i + 1) * n].iter_mut().zip(x) {
                *gw += g * f64::from(xj);
            }
            grads.bias[i] += g;
        }
    }
}

impl Trainer for LogisticRegression {
    fn fit(&self, request: &FitRequest<'_>) -> SplitResult<FitOutcome> {
        let training = request.training;
        if training.is_empty() {
            return Err(AttackError::EmptyTrainingSet);
        }
        if request.k == 0 {
            return Err(AttackError::InvalidParameters("k must be positive".to_string()));
        }
        let options = request.options;
        let n = training.challenges().width();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(request.seed);
        let mut model = Self::initial_model(request, n, &mut rng)?;
        let mut optimizer = Rprop::new(&model, self.rprop);
        let mut grads = Gradient::zeros(&model);
        let mut delays = vec![0.0; request.k];

        let mut order: Vec<usize> = (0..training.len()).collect();
        let batch = options
            .minibatch_size
            .unwrap_or(training.len())
            .clamp(1, training.len());
        // テストセットが空なら学習セットで精度を測る
        let evaluation_set = if request.test.is_empty() {
            training
        } else {
            request.test
        };

        let mut best_rounded = f64::NEG_INFINITY;
        let mut stale = 0usize;
        let mut iterations = 0usize;
        let mut accuracy = 1.0 - approx_dist_nonrandom(&model, evaluation_set);

        while iterations < options.max_iterations {
            if iterations >= options.min_iterations
                && options.target_test_accuracy.is_some_and(|target| accuracy >= target)
            {
                break;
            }
            iterations += 1;

            if options.shuffle {
                order.shuffle(&mut rng);
            }
            for rows in order.chunks(batch) {
                accumulate_gradient(&model, training, rows, &mut grads, &mut delays);
                optimizer.step(&mut model, &grads);
            }

            accuracy = 1.0 - approx_dist_nonrandom(&model, evaluation_set);
            log::trace!("iteration {iterations}: test accuracy {accuracy:.4}");

            let rounded = round_to(accuracy, options.convergence_decimals);
            if rounded > best_rounded {
                best_rounded = rounded;
                stale = 0;
            } else {
                stale += 1;
            }
            if iterations >= options.min_iterations && stale >= options.patience {
                break;
            }
        }

        log::debug!(
            "logistic regression finished after {iterations} iterations, \
             test accuracy {accuracy:.4} ({} training, {} test rows)",
            training.len(),
            request.test.len()
        );

        Ok(FitOutcome {
            model,
            iterations,
            test_accuracy: accuracy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crp::ChallengeMatrix;
    use crate::learner::FitOptions;
    use crate::ltf::Transform;
    use crate::metrics::accuracy_against;

    /// 単一 LTF（アービター PUF）の CRP を線形化済みで作る
    fn linearized_sets(
        target: &LtfArray,
        train: usize,
        test: usize,
        seed: u64,
    ) -> (ChallengeResponseSet, ChallengeResponseSet) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let training =
            ChallengeResponseSet::generate(target, train, &mut rng).linearized(Transform::Atf);
        let test =
            ChallengeResponseSet::generate(target, test, &mut rng).linearized(Transform::Atf);
        (training, test)
    }

    #[test]
    fn test_sigmoid_and_round() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(100.0) > 0.99);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert_eq!(round_to(0.12345, 2), 0.12);
        assert_eq!(round_to(0.987, 1), 1.0);
    }

    #[test]
    fn test_learns_single_arbiter_puf() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(100);
        let target = LtfArray::normal(32, 1, Transform::Atf, &mut rng);
        let (training, test) = linearized_sets(&target, 4000, 1000, 101);

        let options = FitOptions::default();
        let outcome = LogisticRegression::default()
            .fit(&FitRequest {
                training: &training,
                test: &test,
                k: 1,
                transform: Transform::Id,
                options: &options,
                warm_start: None,
                seed: 1,
            })
            .unwrap();

        assert!(outcome.iterations >= options.min_iterations);
        let learned = outcome.model.with_transform(Transform::Atf);
        let accuracy = accuracy_against(&learned, &target, 10_000, 7);
        assert!(accuracy >= 0.95, "accuracy {accuracy}");
    }

    #[test]
    fn test_target_accuracy_stops_early() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(200);
        let target = LtfArray::normal(16, 1, Transform::Atf, &mut rng);
        let (training, test) = linearized_sets(&target, 2000, 500, 201);

        let options = FitOptions {
            target_test_accuracy: Some(0.6),
            min_iterations: 0,
            max_iterations: 500,
            ..FitOptions::default()
        };
        let exact = target.clone().with_transform(Transform::Id);
        let outcome = LogisticRegression::default()
            .fit(&FitRequest {
                training: &training,
                test: &test,
                k: 1,
                transform: Transform::Id,
                options: &options,
                warm_start: Some(&exact),
                seed: 1,
            })
            .unwrap();
        // 正解の重みから始めれば初回判定で目標に届いている
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.test_accuracy, 1.0);
    }

    #[test]
    fn test_warm_start_shape_checked() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(300);
        let target = LtfArray::normal(16, 1, Transform::Atf, &mut rng);
        let (training, test) = linearized_sets(&target, 100, 50, 301);
        let wrong = LtfArray::normal(17, 1, Transform::Id, &mut rng);
        let options = FitOptions::default();
        let err = LogisticRegression::default()
            .fit(&FitRequest {
                training: &training,
                test: &test,
                k: 1,
                transform: Transform::Id,
                options: &options,
                warm_start: Some(&wrong),
                seed: 1,
            })
            .unwrap_err();
        assert!(matches!(err, AttackError::ShapeMismatch { expected: 16, actual: 17 }));
    }

    #[test]
    fn test_empty_training_set_is_rejected() {
        let empty =
            ChallengeResponseSet::new(ChallengeMatrix::with_capacity(0, 8), vec![]).unwrap();
        let options = FitOptions::default();
        let err = LogisticRegression::default()
            .fit(&FitRequest {
                training: &empty,
                test: &empty,
                k: 1,
                transform: Transform::Id,
                options: &options,
                warm_start: None,
                seed: 0,
            })
            .unwrap_err();
        assert_eq!(err, AttackError::EmptyTrainingSet);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(400);
        let target = LtfArray::normal(16, 1, Transform::Atf, &mut rng);
        let (training, test) = linearized_sets(&target, 500, 200, 401);
        let options = FitOptions {
            shuffle: true,
            minibatch_size: Some(128),
            max_iterations: 30,
            ..FitOptions::default()
        };
        let request = FitRequest {
            training: &training,
            test: &test,
            k: 1,
            transform: Transform::Id,
            options: &options,
            warm_start: None,
            seed: 5,
        };
        let a = LogisticRegression::default().fit(&request).unwrap();
        let b = LogisticRegression::default().fit(&request).unwrap();
        assert_eq!(a.model, b.model);
        assert_eq!(a.iterations, b.iterations);
    }
}
