//! モデル間距離・精度の推定

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::crp::{ChallengeMatrix, ChallengeResponseSet};
use crate::error::SplitResult;
use crate::simulation::Simulation;

/// 2つのレスポンス列の一致率
pub fn agreement(a: &[i8], b: &[i8]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if a.is_empty() {
        return 0.0;
    }
    let equal = a.iter().zip(b).filter(|(x, y)| x == y).count();
    equal as f64 / a.len() as f64
}

/// 一様ランダムな `num` 個のチャレンジ上で `a` と `b` が異なる割合
pub fn approx_dist<A, B, R>(a: &A, b: &B, num: usize, rng: &mut R) -> f64
where
    A: Simulation + ?Sized,
    B: Simulation + ?Sized,
    R: Rng + ?Sized,
{
    assert_eq!(
        a.challenge_length(),
        b.challenge_length(),
        "simulations must accept the same challenge length"
    );
    if num == 0 {
        return 0.0;
    }
    let challenges = ChallengeMatrix::random(num, a.challenge_length(), rng);
    1.0 - agreement(&a.eval(challenges.view()), &b.eval(challenges.view()))
}

/// 固定シードで `approx_dist` を測り、精度（1 - 距離）として返す
pub fn accuracy_against<A, B>(a: &A, b: &B, num: usize, seed: u64) -> f64
where
    A: Simulation + ?Sized,
    B: Simulation + ?Sized,
{
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    1.0 - approx_dist(a, b, num, &mut rng)
}

/// 記録済みのテストセットに対してモデルが外れる割合
pub fn approx_dist_nonrandom<S: Simulation + ?Sized>(
    model: &S,
    test_set: &ChallengeResponseSet,
) -> f64 {
    if test_set.is_empty() {
        return 0.0;
    }
    1.0 - agreement(&model.eval(test_set.challenges().view()), test_set.responses())
}

/// 同じチャレンジを `repetitions` 回測定し、多数決レスポンスのセットを作る
///
/// 同数の場合は +1。ノイズのあるオラクルに対して極性判定の基準として使う。
pub fn majority_vote_set<S: Simulation + ?Sized>(
    oracle: &S,
    challenges: ChallengeMatrix,
    repetitions: usize,
) -> SplitResult<ChallengeResponseSet> {
    let mut votes = vec![0i32; challenges.rows()];
    for _ in 0..repetitions.max(1) {
        for (v, r) in votes.iter_mut().zip(oracle.eval(challenges.view())) {
            *v += i32::from(r);
        }
    }
    let responses = votes.into_iter().map(|v| if v < 0 { -1 } else { 1 }).collect();
    ChallengeResponseSet::new(challenges, responses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ltf::{LtfArray, Transform};
    use crate::simulation::{InterposeOracle, InterposePuf};

    #[test]
    fn test_agreement() {
        assert_eq!(agreement(&[1, -1, 1, 1], &[1, 1, 1, -1]), 0.5);
        assert_eq!(agreement(&[], &[]), 0.0);
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let ltf = LtfArray::normal(32, 2, Transform::Atf, &mut rng);
        assert_eq!(approx_dist(&ltf, &ltf, 1000, &mut rng), 0.0);
        assert_eq!(accuracy_against(&ltf, &ltf, 1000, 1), 1.0);
    }

    #[test]
    fn test_independent_models_are_near_half() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let a = LtfArray::normal(32, 1, Transform::Atf, &mut rng);
        let b = LtfArray::normal(32, 1, Transform::Atf, &mut rng);
        let d = approx_dist(&a, &b, 20_000, &mut rng);
        assert!((0.2..0.8).contains(&d), "distance {d}");
    }

    #[test]
    fn test_nonrandom_distance_on_own_responses() {
        let puf = InterposePuf::new(16, 1, 1, 3).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        let set = ChallengeResponseSet::generate(&puf, 500, &mut rng);
        assert_eq!(approx_dist_nonrandom(&puf, &set), 0.0);
    }

    #[test]
    fn test_majority_vote_recovers_noise_free_responses() {
        let puf = InterposePuf::new(32, 1, 1, 8).unwrap().with_noise(0.05, 9);
        let clean = puf.noise_free();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(10);
        let challenges = ChallengeMatrix::random(2000, 32, &mut rng);
        let single =
            ChallengeResponseSet::new(challenges.clone(), puf.eval(challenges.view())).unwrap();
        let voted = majority_vote_set(&puf, challenges, 15).unwrap();
        assert!(
            approx_dist_nonrandom(&clean, &voted) <= approx_dist_nonrandom(&clean, &single),
            "majority vote should not be noisier than a single measurement"
        );
    }
}
