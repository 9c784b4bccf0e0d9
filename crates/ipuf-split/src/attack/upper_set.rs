//! 上位層学習セットの構築（ブロック走査）
//!
//! 生の学習セットをブロック単位で走査し、下位層モデルの予測が
//! interpose ビットに依存する行だけを残す。残した行のラベルは
//! 「+1 を挿入したときの予測 × 記録済みレスポンス」で、これが
//! 上位層の出力の推定値になる（±1 表現なので一致なら +1、不一致なら -1）。
//!
//! メモリ使用量は「拡張ブロック2つ + 結果バッファ」で頭打ちになる。
//! 結果バッファは走査前に確保し、走査中に再確保しない。

use crate::config::AttackConfig;
use crate::crp::{ChallengeMatrix, ChallengeResponseSet, interpose_into};
use crate::error::{AttackError, SplitResult};
use crate::ltf::LtfArray;
use crate::simulation::Simulation;

/// ブロック走査で選択された行（学習・テストに分割する前）
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    /// interpose ビットを含まないチャレンジと推定ラベル
    pub set: ChallengeResponseSet,
    /// ブロックごとの選択行数
    pub block_counts: Vec<usize>,
}

/// 上位層の学習・テストセット
#[derive(Clone, Debug, PartialEq)]
pub struct UpperSet {
    pub training: ChallengeResponseSet,
    pub test: ChallengeResponseSet,
    /// 選択された行数の合計（学習 + テスト）
    pub selected: usize,
    pub block_counts: Vec<usize>,
}

/// 上位層学習セットのビルダー
#[derive(Clone, Debug)]
pub struct UpperSetBuilder {
    block_size: usize,
    memory_margin_bytes: usize,
    min_rows: usize,
    max_test_rows: usize,
    test_fraction: f64,
}

impl Default for UpperSetBuilder {
    fn default() -> Self {
        Self::from_config(&AttackConfig::default())
    }
}

impl UpperSetBuilder {
    pub fn from_config(config: &AttackConfig) -> Self {
        Self {
            block_size: config.block_size.max(1),
            memory_margin_bytes: config.memory_margin_bytes,
            min_rows: config.min_upper_rows,
            max_test_rows: config.max_upper_test_rows,
            test_fraction: config.upper_test_fraction,
        }
    }

    /// ブロックサイズを変更
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 結果バッファの行数
    ///
    /// 選択される行はおおよそ半数なので、`N/2` にマージンを足して
    /// ブロックサイズの倍数に切り上げる（ちょうど倍数ならそのまま）。
    /// 選択行数は `N` を超えないため `N` でクランプしても再確保は起きない。
    pub fn capacity_for(&self, total_rows: usize, width: usize) -> usize {
        let margin_rows = self.memory_margin_bytes as f64 / width.max(1) as f64;
        let expected = total_rows as f64 / 2.0 + margin_rows;
        let blocks = (expected / self.block_size as f64).ceil() as usize;
        blocks.saturating_mul(self.block_size).min(total_rows)
    }

    /// 選択行数に対するテストセットの行数
    pub fn test_rows(&self, selected: usize) -> usize {
        let fraction = (self.test_fraction * selected as f64).floor() as usize;
        fraction.max(1).min(self.max_test_rows).min(selected)
    }

    /// ブロック走査で interpose ビットに依存する行を選択
    ///
    /// `down` は幅 `n + 1`、`raw` のチャレンジは幅 `n`（線形化前）であること。
    pub fn select(
        &self,
        down: &LtfArray,
        raw: &ChallengeResponseSet,
        split: usize,
    ) -> SplitResult<Selection> {
        let width = raw.challenges().width();
        if down.n() != width + 1 {
            return Err(AttackError::ShapeMismatch {
                expected: width + 1,
                actual: down.n(),
            });
        }

        let total = raw.len();
        let capacity = self.capacity_for(total, width);
        log::debug!(
            "reserving {capacity} rows ({:.2} MiB) for the upper layer training set, \
             {:.2}% of all challenges",
            (capacity * width) as f64 / (1024.0 * 1024.0),
            capacity as f64 / total.max(1) as f64 * 100.0
        );
        let mut challenges = ChallengeMatrix::with_capacity(capacity, width);
        let mut labels: Vec<i8> = Vec::with_capacity(capacity);

        // 拡張ブロック用バッファは走査全体で使い回す
        let block_rows = self.block_size.min(total);
        let mut plus = ChallengeMatrix::with_capacity(block_rows, width + 1);
        let mut minus = ChallengeMatrix::with_capacity(block_rows, width + 1);
        let mut block_counts = Vec::with_capacity(total.div_ceil(self.block_size));

        for (index, start) in (0..total).step_by(self.block_size).enumerate() {
            let end = start.saturating_add(self.block_size).min(total);
            let (block, responses) = raw.block(start..end);

            interpose_into(block, 1, split, &mut plus);
            interpose_into(block, -1, split, &mut minus);
            let predicted_plus = down.eval(plus.view());
            let predicted_minus = down.eval(minus.view());

            let mut kept = 0usize;
            for (row, ((&p, &m), &r)) in predicted_plus
                .iter()
                .zip(&predicted_minus)
                .zip(responses)
                .enumerate()
            {
                if p != m {
                    challenges.push_row(block.row(row));
                    labels.push(p * r);
                    kept += 1;
                }
            }
            log::debug!(
                "block {index} (rows {start}..{end}): kept {kept} of {} challenges, \
                 {} selected so far",
                end - start,
                labels.len()
            );
            block_counts.push(kept);
        }

        debug_assert!(labels.len() <= capacity);
        Ok(Selection {
            set: ChallengeResponseSet::new(challenges, labels)?,
            block_counts,
        })
    }

    /// 選択した行を先頭のテストセットと残りの学習セットに分割
    ///
    /// 選択行数が最小行数に満たない場合は `InsufficientData`。
    pub fn build(
        &self,
        down: &LtfArray,
        raw: &ChallengeResponseSet,
        split: usize,
    ) -> SplitResult<UpperSet> {
        let Selection { set, block_counts } = self.select(down, raw, split)?;
        let selected = set.len();
        if selected < self.min_rows {
            return Err(AttackError::InsufficientData {
                selected,
                required: self.min_rows,
            });
        }

        let (test, training) = set.split_front(self.test_rows(selected));
        log::debug!(
            "upper layer sets created: {} training rows ({:.2} MiB), {} test rows",
            training.len(),
            training.challenges().nbytes() as f64 / (1024.0 * 1024.0),
            test.len()
        );
        Ok(UpperSet {
            training,
            test,
            selected,
            block_counts,
        })
    }
}
