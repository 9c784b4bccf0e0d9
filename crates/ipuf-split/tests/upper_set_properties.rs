//! 上位層学習セット構築の性質テスト

use std::collections::HashMap;

use ipuf_split::attack::{Selection, UpperSetBuilder};
use ipuf_split::crp::{ChallengeResponseSet, InterposeBits, interpose};
use ipuf_split::error::AttackError;
use ipuf_split::ltf::{LtfArray, Transform};
use ipuf_split::{InterposeOracle, InterposePuf, Simulation};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// 真の Interpose PUF と、そこから得た生 CRP セット
fn raw_crps(
    n: usize,
    k_down: usize,
    rows: usize,
    seed: u64,
) -> (InterposePuf, ChallengeResponseSet) {
    let puf = InterposePuf::new(n, 1, k_down, seed).unwrap();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed ^ 0x5eed);
    let raw = ChallengeResponseSet::generate(&puf, rows, &mut rng);
    (puf, raw)
}

fn select_with_block(
    block: usize,
    down: &LtfArray,
    raw: &ChallengeResponseSet,
    split: usize,
) -> Selection {
    UpperSetBuilder::default()
        .with_block_size(block)
        .select(down, raw, split)
        .unwrap()
}

/// 行を (チャレンジ, ラベル) の昇順リストにする
fn sorted_rows(selection: &Selection) -> Vec<(Vec<i8>, i8)> {
    let set = &selection.set;
    let mut rows: Vec<_> = (0..set.len())
        .map(|i| (set.challenges().row(i).to_vec(), set.responses()[i]))
        .collect();
    rows.sort();
    rows
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 16, .. ProptestConfig::default() })]

    #[test]
    fn prop_selection_independent_of_block_size(
        seed in any::<u64>(),
        rows in 1usize..600,
        block_a in 1usize..700,
        block_b in 1usize..700,
        k_down in 1usize..4,
    ) {
        let (puf, raw) = raw_crps(16, k_down, rows, seed);
        let split = puf.split();
        let a = select_with_block(block_a, puf.lower(), &raw, split);
        let b = select_with_block(block_b, puf.lower(), &raw, split);
        prop_assert_eq!(sorted_rows(&a), sorted_rows(&b));
    }

    #[test]
    fn prop_block_counts_are_conserved(
        seed in any::<u64>(),
        rows in 1usize..600,
        block in 1usize..200,
    ) {
        let (puf, raw) = raw_crps(16, 1, rows, seed);
        let selection = select_with_block(block, puf.lower(), &raw, puf.split());
        prop_assert_eq!(selection.block_counts.len(), rows.div_ceil(block));
        for (index, &kept) in selection.block_counts.iter().enumerate() {
            let block_rows = block.min(rows - index * block);
            prop_assert!(kept <= block_rows);
        }
        prop_assert_eq!(selection.block_counts.iter().sum::<usize>(), selection.set.len());
    }
}

#[test]
fn test_labels_follow_plus_one_prediction() {
    let (puf, raw) = raw_crps(32, 2, 3000, 21);
    let split = puf.split();
    let down = puf.lower();
    let responses: HashMap<Vec<i8>, i8> = (0..raw.len())
        .map(|i| (raw.challenges().row(i).to_vec(), raw.responses()[i]))
        .collect();

    let selection = select_with_block(700, down, &raw, split);
    assert!(!selection.set.is_empty());
    let challenges = selection.set.challenges().view();
    let plus = down.eval(interpose(challenges, InterposeBits::Constant(1), split).view());
    let minus = down.eval(interpose(challenges, InterposeBits::Constant(-1), split).view());
    for (i, &label) in selection.set.responses().iter().enumerate() {
        assert_ne!(plus[i], minus[i], "row {i} does not depend on the interpose bit");
        let recorded = responses[challenges.row(i)];
        let expected = if plus[i] == recorded { 1 } else { -1 };
        assert_eq!(label, expected);
    }
}

#[test]
fn test_true_lower_layer_recovers_upper_layer_labels() {
    // 真の下位層・ノイズなしなら選択行のラベルは真の上位層の出力そのもの
    let (puf, raw) = raw_crps(32, 1, 4000, 8);
    let upper_set = UpperSetBuilder::default().build(puf.lower(), &raw, puf.split()).unwrap();
    let truth = puf.upper().eval(upper_set.training.challenges().view());
    assert_eq!(truth, upper_set.training.responses());
    assert_eq!(upper_set.selected, upper_set.training.len() + upper_set.test.len());
    assert_eq!(upper_set.test.len(), (upper_set.selected as f64 * 0.05).floor() as usize);
}

#[test]
fn test_too_few_rows_are_reported() {
    let (puf, raw) = raw_crps(64, 1, 40, 2);
    let err = UpperSetBuilder::default().build(puf.lower(), &raw, puf.split()).unwrap_err();
    match err {
        AttackError::InsufficientData { selected, required } => {
            assert!(selected <= 40);
            assert_eq!(required, 50);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_flipped_model_mirrors_interpose_bit() {
    // 反転モデルに -b を挿入した出力 = (-1)^k × 元モデルに +b を挿入した出力
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(13);
    let n = 32;
    let split = n / 2;
    let raw = ipuf_split::crp::ChallengeMatrix::random(2000, n, &mut rng);
    for k in 1..=3 {
        let model = LtfArray::normal(n + 1, k, Transform::Atf, &mut rng);
        let flipped = model.flipped(split);
        let sign: i8 = if k % 2 == 0 { 1 } else { -1 };
        for bit in [1i8, -1] {
            let with_bit = interpose(raw.view(), InterposeBits::Constant(bit), split);
            let with_opposite = interpose(raw.view(), InterposeBits::Constant(-bit), split);
            let original = model.eval(with_bit.view());
            let mirrored = flipped.eval(with_opposite.view());
            assert!(
                original.iter().zip(&mirrored).all(|(&o, &m)| m == sign * o),
                "k={k}, bit={bit}"
            );
        }
    }
}
