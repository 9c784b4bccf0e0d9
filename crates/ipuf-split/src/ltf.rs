//! LTF (Linear Threshold Function) アレイ
//!
//! 1層分のモデル（= `LayerModel`）。`k` 本のチェーンそれぞれが
//! 遅延差 `d_i = w_i · T(c) + b_i` を計算し、コンバイナで1ビットにまとめる。
//!
//! - `Transform`: 生チャレンジ → 線形化済み特徴量
//! - `Combiner`: 複数チェーンの出力の結合方法
//! - `LtfArray::flipped`: interpose ビットより後ろの列を反転したモデル

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::crp::ChallengeView;
use crate::error::{AttackError, SplitResult};
use crate::simulation::Simulation;

/// チャレンジの線形化変換
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    /// 恒等変換（入力が既に線形化済みの場合）
    #[default]
    Id,
    /// アービター PUF の特徴量変換: `x[i] = c[i] * c[i+1] * ... * c[n-1]`
    Atf,
}

impl Transform {
    /// 1行をその場で変換
    #[inline]
    pub fn apply_in_place(self, row: &mut [i8]) {
        match self {
            Transform::Id => {}
            Transform::Atf => {
                for i in (0..row.len().saturating_sub(1)).rev() {
                    row[i] *= row[i + 1];
                }
            }
        }
    }
}

/// チェーン出力の結合方法
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combiner {
    /// XOR（±1 表現では積）
    #[default]
    Xor,
}

impl Combiner {
    /// 実数値のチェーン出力を結合
    #[inline]
    pub fn combine(self, delays: &[f64]) -> f64 {
        match self {
            Combiner::Xor => delays.iter().product(),
        }
    }
}

/// 実数値を ±1 に丸める（0 は +1）
#[inline]
pub fn sign(x: f64) -> i8 {
    if x < 0.0 { -1 } else { 1 }
}

/// `k` 本の LTF からなるアレイ
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LtfArray {
    k: usize,
    n: usize,
    /// 行優先 `k × n`
    weights: Vec<f64>,
    /// チェーンごとのバイアス（長さ `k`）
    bias: Vec<f64>,
    transform: Transform,
    combiner: Combiner,
}

impl LtfArray {
    pub fn new(
        k: usize,
        n: usize,
        weights: Vec<f64>,
        bias: Vec<f64>,
        transform: Transform,
        combiner: Combiner,
    ) -> SplitResult<Self> {
        if k == 0 || n == 0 {
            return Err(AttackError::InvalidParameters(format!(
                "LTF array needs k >= 1 and n >= 1, got k={k}, n={n}"
            )));
        }
        if weights.len() != k * n {
            return Err(AttackError::ShapeMismatch {
                expected: k * n,
                actual: weights.len(),
            });
        }
        if bias.len() != k {
            return Err(AttackError::ShapeMismatch {
                expected: k,
                actual: bias.len(),
            });
        }
        Ok(Self {
            k,
            n,
            weights,
            bias,
            transform,
            combiner,
        })
    }

    /// 標準正規分布の重み・ゼロバイアスでランダムなアレイを作成
    pub fn normal<R: Rng + ?Sized>(n: usize, k: usize, transform: Transform, rng: &mut R) -> Self {
        let weights = (0..k * n).map(|_| rng.sample::<f64, _>(StandardNormal)).collect();
        Self {
            k,
            n,
            weights,
            bias: vec![0.0; k],
            transform,
            combiner: Combiner::Xor,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn bias(&self) -> &[f64] {
        &self.bias
    }

    /// チェーン `i` の重み
    pub fn chain(&self, i: usize) -> &[f64] {
        &self.weights[i * self.n..(i + 1) * self.n]
    }

    /// 変換を差し替えたアレイを返す
    ///
    /// 線形化済みの学習セットで `Transform::Id` として学習したモデルを、
    /// 生チャレンジで評価できるよう `Transform::Atf` に戻すときに使う。
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub(crate) fn params_mut(&mut self) -> (&mut [f64], &mut [f64]) {
        (&mut self.weights, &mut self.bias)
    }

    /// 線形化済み特徴量に対する各チェーンの遅延差
    #[inline]
    pub fn delays_of_features(&self, features: &[i8], out: &mut [f64]) {
        debug_assert_eq!(features.len(), self.n);
        debug_assert_eq!(out.len(), self.k);
        for (i, d) in out.iter_mut().enumerate() {
            let w = self.chain(i);
            let dot: f64 = w.iter().zip(features).map(|(w, &x)| w * f64::from(x)).sum();
            *d = dot + self.bias[i];
        }
    }

    /// 生チャレンジ各行について、変換適用後の遅延差を `f` に渡す
    fn for_each_delays<F: FnMut(&[f64])>(&self, challenges: ChallengeView<'_>, mut f: F) {
        assert_eq!(
            challenges.width(),
            self.n,
            "challenge width does not match LTF array length"
        );
        let mut scratch = vec![0i8; self.n];
        let mut delays = vec![0.0f64; self.k];
        for row in challenges.iter() {
            let features = if self.transform == Transform::Id {
                row
            } else {
                scratch.copy_from_slice(row);
                self.transform.apply_in_place(&mut scratch);
                &scratch[..]
            };
            self.delays_of_features(features, &mut delays);
            f(&delays);
        }
    }

    /// 各チェーンの遅延差に N(0, sigma²) のノイズを加えて評価
    pub fn eval_noisy<R: Rng + ?Sized>(
        &self,
        challenges: ChallengeView<'_>,
        sigma: f64,
        rng: &mut R,
    ) -> Vec<i8> {
        let mut out = Vec::with_capacity(challenges.rows());
        let mut noisy = vec![0.0f64; self.k];
        self.for_each_delays(challenges, |d| {
            for (nd, &x) in noisy.iter_mut().zip(d) {
                *nd = x + sigma * rng.sample::<f64, _>(StandardNormal);
            }
            out.push(sign(self.combiner.combine(&noisy)));
        });
        out
    }

    /// interpose 位置 `split` より後ろの重みとバイアスを反転したアレイ
    ///
    /// ATF 特徴量のうち列 `0..=split` は interpose ビットを含み、
    /// `split+1..` は含まない。上位層出力の極性は攻撃側から観測できないため、
    /// 下位層モデルはこの反転の分だけ曖昧さを持つ。
    pub fn flipped(&self, split: usize) -> Self {
        assert!(split < self.n, "split {split} out of range for n={}", self.n);
        let mut weights = self.weights.clone();
        for chain in weights.chunks_exact_mut(self.n) {
            for w in &mut chain[split + 1..] {
                *w = -*w;
            }
        }
        Self {
            weights,
            bias: self.bias.iter().map(|b| -b).collect(),
            ..self.clone()
        }
    }
}

impl Simulation for LtfArray {
    fn challenge_length(&self) -> usize {
        self.n
    }

    fn eval(&self, challenges: ChallengeView<'_>) -> Vec<i8> {
        let mut out = Vec::with_capacity(challenges.rows());
        self.for_each_delays(challenges, |d| out.push(sign(self.combiner.combine(d))));
        out
    }
}
