//! シミュレーション（オラクル）の契約と Interpose PUF
//!
//! 攻撃本体は `Simulation::eval` によるブラックボックス問い合わせしか使わない。
//! `InterposeOracle` の `upper` / `lower` は解析用（精度記録・相関）にのみ参照する。

use std::cell::RefCell;

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::crp::{ChallengeView, InterposeBits, interpose};
use crate::error::{AttackError, SplitResult};
use crate::ltf::{LtfArray, Transform};

/// チャレンジ行列 → レスポンス列 を計算するもの
///
/// 同じ入力に対して呼び出しごとに異なる結果を返してもよい（測定ノイズ）。
pub trait Simulation {
    /// 受け付けるチャレンジ長
    fn challenge_length(&self) -> usize;

    /// 各行のレスポンス（±1）
    fn eval(&self, challenges: ChallengeView<'_>) -> Vec<i8>;
}

/// 2層構造を持つ攻撃対象
pub trait InterposeOracle: Simulation {
    /// 上位層（`n` ビット入力、interpose ビットを生成する側）
    fn upper(&self) -> &LtfArray;

    /// 下位層（`n + 1` ビット入力、最終レスポンスを出す側）
    fn lower(&self) -> &LtfArray;

    /// 同じ重みでノイズのないインスタンス
    fn noise_free(&self) -> Self
    where
        Self: Sized;

    /// interpose ビットの挿入位置
    fn split(&self) -> usize {
        self.challenge_length() / 2
    }
}

/// 上位層モデルと下位層モデルの合成
#[derive(Clone, Debug, PartialEq)]
pub struct CombinedModel {
    up: LtfArray,
    down: LtfArray,
    split: usize,
}

impl CombinedModel {
    /// 上位層の長さ `n` は偶数、下位層は `n + 1` であること
    pub fn new(up: LtfArray, down: LtfArray) -> SplitResult<Self> {
        let n = up.n();
        if n % 2 != 0 {
            return Err(AttackError::InvalidParameters(format!(
                "challenge length must be even, got {n}"
            )));
        }
        if down.n() != n + 1 {
            return Err(AttackError::ShapeMismatch {
                expected: n + 1,
                actual: down.n(),
            });
        }
        Ok(Self { up, down, split: n / 2 })
    }

    pub fn up(&self) -> &LtfArray {
        &self.up
    }

    pub fn down(&self) -> &LtfArray {
        &self.down
    }

    pub fn split(&self) -> usize {
        self.split
    }

    pub fn into_parts(self) -> (LtfArray, LtfArray) {
        (self.up, self.down)
    }
}

impl Simulation for CombinedModel {
    fn challenge_length(&self) -> usize {
        self.up.n()
    }

    fn eval(&self, challenges: ChallengeView<'_>) -> Vec<i8> {
        let bits = self.up.eval(challenges);
        let extended = interpose(challenges, InterposeBits::PerRow(&bits), self.split);
        self.down.eval(extended.view())
    }
}

/// 測定ノイズ
///
/// 評価のたびに各チェーンの遅延差へガウスノイズを加える。
/// 乱数状態は評価で進むため `RefCell` に持つ（インスタンスは共有しない前提）。
#[derive(Debug)]
struct MeasurementNoise {
    noisiness: f64,
    rng: RefCell<Xoshiro256PlusPlus>,
}

impl MeasurementNoise {
    /// 長さ `n` の層に対するノイズの標準偏差（重みは N(0, 1)）
    fn sigma(&self, n: usize) -> f64 {
        self.noisiness * (n as f64).sqrt()
    }
}

/// シミュレーション上の Interpose PUF
#[derive(Debug)]
pub struct InterposePuf {
    layers: CombinedModel,
    noise: Option<MeasurementNoise>,
}

impl InterposePuf {
    /// ノイズなしのインスタンスを `seed` から決定的に生成
    pub fn new(n: usize, k_up: usize, k_down: usize, seed: u64) -> SplitResult<Self> {
        if n == 0 || n % 2 != 0 {
            return Err(AttackError::InvalidParameters(format!(
                "challenge length must be a positive even number, got {n}"
            )));
        }
        if k_up == 0 || k_down == 0 {
            return Err(AttackError::InvalidParameters(format!(
                "layer widths must be positive, got k_up={k_up}, k_down={k_down}"
            )));
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let up = LtfArray::normal(n, k_up, Transform::Atf, &mut rng);
        let down = LtfArray::normal(n + 1, k_down, Transform::Atf, &mut rng);
        Ok(Self {
            layers: CombinedModel::new(up, down)?,
            noise: None,
        })
    }

    /// 測定ノイズを付与（`noisiness == 0` ならノイズなしのまま）
    pub fn with_noise(mut self, noisiness: f64, noise_seed: u64) -> Self {
        self.noise = (noisiness > 0.0).then(|| MeasurementNoise {
            noisiness,
            rng: RefCell::new(Xoshiro256PlusPlus::seed_from_u64(noise_seed)),
        });
        self
    }

    pub fn layers(&self) -> &CombinedModel {
        &self.layers
    }

    pub fn noisiness(&self) -> f64 {
        self.noise.as_ref().map_or(0.0, |noise| noise.noisiness)
    }
}

impl Simulation for InterposePuf {
    fn challenge_length(&self) -> usize {
        self.layers.challenge_length()
    }

    fn eval(&self, challenges: ChallengeView<'_>) -> Vec<i8> {
        let Some(noise) = &self.noise else {
            return self.layers.eval(challenges);
        };
        let up = self.layers.up();
        let down = self.layers.down();
        let mut rng = noise.rng.borrow_mut();
        let bits = up.eval_noisy(challenges, noise.sigma(up.n()), &mut *rng);
        let extended = interpose(challenges, InterposeBits::PerRow(&bits), self.layers.split());
        down.eval_noisy(extended.view(), noise.sigma(down.n()), &mut *rng)
    }
}

impl InterposeOracle for InterposePuf {
    fn upper(&self) -> &LtfArray {
        self.layers.up()
    }

    fn lower(&self) -> &LtfArray {
        self.layers.down()
    }

    fn noise_free(&self) -> Self {
        Self {
            layers: self.layers.clone(),
            noise: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crp::ChallengeMatrix;

    #[test]
    fn test_rejects_odd_length() {
        assert!(matches!(
            InterposePuf::new(63, 1, 1, 0),
            Err(AttackError::InvalidParameters(_))
        ));
        assert!(InterposePuf::new(64, 0, 1, 0).is_err());
    }

    #[test]
    fn test_same_seed_same_instance() {
        let a = InterposePuf::new(32, 2, 2, 9).unwrap();
        let b = InterposePuf::new(32, 2, 2, 9).unwrap();
        assert_eq!(a.layers(), b.layers());
        let c = InterposePuf::new(32, 2, 2, 10).unwrap();
        assert_ne!(a.layers(), c.layers());
    }

    #[test]
    fn test_eval_matches_manual_composition() {
        let puf = InterposePuf::new(16, 2, 3, 1).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let c = ChallengeMatrix::random(300, 16, &mut rng);

        let up_bits = puf.upper().eval(c.view());
        let extended = interpose(c.view(), InterposeBits::PerRow(&up_bits), 8);
        assert_eq!(puf.eval(c.view()), puf.lower().eval(extended.view()));
    }

    #[test]
    fn test_noise_changes_some_responses_but_not_most() {
        let puf = InterposePuf::new(32, 1, 1, 4).unwrap().with_noise(0.1, 5);
        let clean = puf.noise_free();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(6);
        let c = ChallengeMatrix::random(5000, 32, &mut rng);

        let noisy = puf.eval(c.view());
        let reference = clean.eval(c.view());
        let differing = noisy.iter().zip(&reference).filter(|(a, b)| a != b).count();
        assert!(differing > 0);
        assert!(differing < 2500, "noise flipped {differing} of 5000 responses");
        assert_eq!(clean.noisiness(), 0.0);
    }
}
