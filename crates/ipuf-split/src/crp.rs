//! チャレンジ行列と CRP（Challenge-Response Pair）セット
//!
//! チャレンジ・レスポンスはすべて ±1 の `i8` で表現する。{0,1} ではなく
//! ±1 表現なので、ビットの一致判定を積で書ける（`a * b == 1` ⇔ `a == b`）。
//!
//! - `ChallengeMatrix`: 行優先の ±1 行列（1行 = 1チャレンジ）
//! - `ChallengeView`: 行列の借用ビュー（ブロック走査用）
//! - `ChallengeResponseSet`: チャレンジ行列と同じ長さのレスポンス列
//! - `interpose` / `interpose_into`: 中央への interpose ビット挿入

use std::ops::Range;

use rand::Rng;

use crate::error::{AttackError, SplitResult};
use crate::ltf::Transform;
use crate::simulation::Simulation;

/// ±1 のランダムビットを1つ生成
#[inline]
pub fn random_bit<R: Rng + ?Sized>(rng: &mut R) -> i8 {
    if rng.random::<bool>() { 1 } else { -1 }
}

/// ±1 のランダムビット列を生成
pub fn random_bits<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Vec<i8> {
    (0..len).map(|_| random_bit(rng)).collect()
}

/// 行優先のチャレンジ行列
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChallengeMatrix {
    data: Vec<i8>,
    width: usize,
}

impl ChallengeMatrix {
    /// 行優先のバッファから行列を作成
    pub fn from_vec(data: Vec<i8>, width: usize) -> SplitResult<Self> {
        if width == 0 {
            return Err(AttackError::InvalidParameters(
                "challenge width must be positive".to_string(),
            ));
        }
        if data.len() % width != 0 {
            return Err(AttackError::ShapeMismatch {
                expected: data.len().div_ceil(width) * width,
                actual: data.len(),
            });
        }
        Ok(Self { data, width })
    }

    /// 行数 `rows` 分の領域を確保した空の行列を作成
    ///
    /// 確保後に `rows` 行以下を `push_row` している限り再確保は起きない。
    pub fn with_capacity(rows: usize, width: usize) -> Self {
        Self {
            data: Vec::with_capacity(rows * width),
            width,
        }
    }

    /// 一様ランダムなチャレンジを `rows` 個生成
    pub fn random<R: Rng + ?Sized>(rows: usize, width: usize, rng: &mut R) -> Self {
        Self {
            data: random_bits(rows * width, rng),
            width,
        }
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.width
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 確保済みの行数
    pub fn capacity_rows(&self) -> usize {
        self.data.capacity() / self.width
    }

    /// バッファのバイト数
    pub fn nbytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<i8>()
    }

    pub fn row(&self, i: usize) -> &[i8] {
        &self.data[i * self.width..(i + 1) * self.width]
    }

    pub fn as_slice(&self) -> &[i8] {
        &self.data
    }

    pub fn view(&self) -> ChallengeView<'_> {
        ChallengeView {
            data: &self.data,
            width: self.width,
        }
    }

    /// 指定範囲の行だけを見るビュー
    pub fn view_rows(&self, rows: Range<usize>) -> ChallengeView<'_> {
        self.view().slice(rows)
    }

    /// 1行追加
    pub fn push_row(&mut self, row: &[i8]) {
        debug_assert_eq!(row.len(), self.width);
        self.data.extend_from_slice(row);
    }

    /// 行を全削除（確保済み領域は保持）
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// 先頭 `at` 行と残りに分割
    ///
    /// 先頭側だけを新規確保し、残りは元のバッファを詰め直して再利用する。
    pub fn split_front(mut self, at: usize) -> (Self, Self) {
        let cut = at.min(self.rows()) * self.width;
        let front = Self {
            data: self.data[..cut].to_vec(),
            width: self.width,
        };
        self.data.drain(..cut);
        (front, self)
    }

    /// 変換をバッファ上でその場適用し、変換済み行列として返す
    ///
    /// `self` を消費するため、変換前の表現への別名は残らない。
    /// 大規模な CRP セットをコピーせずに線形化するために使う。
    pub fn linearized(mut self, transform: Transform) -> Self {
        if transform != Transform::Id {
            for row in self.data.chunks_exact_mut(self.width) {
                transform.apply_in_place(row);
            }
        }
        self
    }
}

/// チャレンジ行列の借用ビュー
#[derive(Clone, Copy, Debug)]
pub struct ChallengeView<'a> {
    data: &'a [i8],
    width: usize,
}

impl<'a> ChallengeView<'a> {
    pub fn rows(&self) -> usize {
        self.data.len() / self.width
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn row(&self, i: usize) -> &'a [i8] {
        &self.data[i * self.width..(i + 1) * self.width]
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a [i8]> + 'a {
        self.data.chunks_exact(self.width)
    }

    /// 行範囲で切り出す（範囲は行数でクランプ）
    pub fn slice(&self, rows: Range<usize>) -> ChallengeView<'a> {
        let end = rows.end.min(self.rows());
        let start = rows.start.min(end);
        ChallengeView {
            data: &self.data[start * self.width..end * self.width],
            width: self.width,
        }
    }
}

/// interpose するビット
#[derive(Clone, Copy, Debug)]
pub enum InterposeBits<'a> {
    /// 全行に同じビットを挿入
    Constant(i8),
    /// 行ごとに異なるビットを挿入（長さ = 行数）
    PerRow(&'a [i8]),
}

/// 列 `split` にビットを挿入した新しい行列（幅 +1）を返す
///
/// 入力は変更しない。`split` は通常 `n / 2`。
pub fn interpose(
    challenges: ChallengeView<'_>,
    bits: InterposeBits<'_>,
    split: usize,
) -> ChallengeMatrix {
    assert!(split <= challenges.width(), "split {split} out of range");
    if let InterposeBits::PerRow(b) = bits {
        assert_eq!(b.len(), challenges.rows(), "one interpose bit per challenge required");
    }

    let mut out = ChallengeMatrix::with_capacity(challenges.rows(), challenges.width() + 1);
    for (i, row) in challenges.iter().enumerate() {
        let bit = match bits {
            InterposeBits::Constant(b) => b,
            InterposeBits::PerRow(b) => b[i],
        };
        out.data.extend_from_slice(&row[..split]);
        out.data.push(bit);
        out.data.extend_from_slice(&row[split..]);
    }
    out
}

/// 定数ビットを挿入した結果を既存バッファ `out` に書き込む
///
/// `out` の内容は置き換えられるが確保済み領域は再利用される。
/// ブロック走査でブロックごとの確保を避けるために使う。
pub fn interpose_into(
    challenges: ChallengeView<'_>,
    bit: i8,
    split: usize,
    out: &mut ChallengeMatrix,
) {
    assert!(split <= challenges.width(), "split {split} out of range");
    out.width = challenges.width() + 1;
    out.data.clear();
    for row in challenges.iter() {
        out.data.extend_from_slice(&row[..split]);
        out.data.push(bit);
        out.data.extend_from_slice(&row[split..]);
    }
}

/// チャレンジとレスポンスの組
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChallengeResponseSet {
    challenges: ChallengeMatrix,
    responses: Vec<i8>,
}

impl ChallengeResponseSet {
    /// 行数とレスポンス数が一致しない場合はエラー
    pub fn new(challenges: ChallengeMatrix, responses: Vec<i8>) -> SplitResult<Self> {
        if challenges.rows() != responses.len() {
            return Err(AttackError::ShapeMismatch {
                expected: challenges.rows(),
                actual: responses.len(),
            });
        }
        Ok(Self { challenges, responses })
    }

    /// シミュレーション（オラクル）に一様ランダムなチャレンジを問い合わせて生成
    pub fn generate<S, R>(simulation: &S, rows: usize, rng: &mut R) -> Self
    where
        S: Simulation + ?Sized,
        R: Rng + ?Sized,
    {
        let challenges = ChallengeMatrix::random(rows, simulation.challenge_length(), rng);
        let responses = simulation.eval(challenges.view());
        Self { challenges, responses }
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn challenges(&self) -> &ChallengeMatrix {
        &self.challenges
    }

    pub fn responses(&self) -> &[i8] {
        &self.responses
    }

    pub fn into_parts(self) -> (ChallengeMatrix, Vec<i8>) {
        (self.challenges, self.responses)
    }

    /// 行範囲のブロック（チャレンジビュー, レスポンス）
    pub fn block(&self, rows: Range<usize>) -> (ChallengeView<'_>, &[i8]) {
        let view = self.challenges.view_rows(rows.clone());
        let end = rows.end.min(self.len());
        let start = rows.start.min(end);
        (view, &self.responses[start..end])
    }

    /// interpose ビットを挿入したセットを新規に作成（レスポンスは複製）
    pub fn interposed(&self, bits: InterposeBits<'_>, split: usize) -> Self {
        Self {
            challenges: interpose(self.challenges.view(), bits, split),
            responses: self.responses.clone(),
        }
    }

    /// チャレンジを線形化したセットを返す（`self` を消費）
    pub fn linearized(self, transform: Transform) -> Self {
        Self {
            challenges: self.challenges.linearized(transform),
            responses: self.responses,
        }
    }

    /// 先頭 `at` 行と残りに分割
    pub fn split_front(self, at: usize) -> (Self, Self) {
        let at = at.min(self.len());
        let (front_c, rest_c) = self.challenges.split_front(at);
        let mut responses = self.responses;
        let rest_r = responses.split_off(at);
        (
            Self {
                challenges: front_c,
                responses,
            },
            Self {
                challenges: rest_c,
                responses: rest_r,
            },
        )
    }
}
