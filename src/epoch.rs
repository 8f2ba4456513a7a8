//! Epoch schedule and block reward
//!
//! An epoch is a run of consecutive blocks sharing one difficulty and one
//! per-block reward. At each boundary the next epoch's length and difficulty
//! are retargeted from the elapsed time of the finished epoch.

use crate::config::EpochParams;
use crate::types::*;

/// GenesisEpoch: the epoch starting at block 0.
pub fn genesis_epoch(params: &EpochParams, genesis: &Header) -> EpochExt {
    let length = params.genesis_length;
    EpochExt {
        number: 0,
        start_number: 0,
        length,
        difficulty: genesis.difficulty.max(1),
        block_reward: params.reward / length,
        remainder_reward: params.reward % length,
        last_block_hash_in_previous_epoch: [0; 32],
    }
}

/// NextEpoch: 𝓔 × ℕ × ℍ → 𝓔
///
/// With `actual` the elapsed milliseconds of `last` and `target` the
/// configured duration:
///
/// - length' = clamp(length × target / actual, min, max)
/// - difficulty' = clamp(difficulty × length × target / (actual × length'),
///   difficulty / 2, difficulty × 2), at least 1
/// - block_reward' = reward / length', remainder' = reward mod length'
pub fn next_epoch(
    params: &EpochParams,
    last: &EpochExt,
    elapsed: u64,
    last_block_hash: Hash,
) -> EpochExt {
    let actual = u128::from(elapsed.max(1));
    let target = u128::from(params.duration_target);
    let length = u128::from(last.length);

    let raw_length = length * target / actual;
    let next_length =
        raw_length.clamp(u128::from(params.min_length), u128::from(params.max_length));

    let difficulty = u128::from(last.difficulty);
    let raw_difficulty = difficulty * length * target / (actual * next_length);
    let lower = (difficulty / 2).max(1);
    let upper = difficulty.saturating_mul(2).min(u128::from(u64::MAX));
    let next_difficulty = raw_difficulty.clamp(lower, upper) as u64;

    let next_length = next_length as u64;
    EpochExt {
        number: last.number + 1,
        start_number: last.end_number() + 1,
        length: next_length,
        difficulty: next_difficulty,
        block_reward: params.reward / next_length,
        remainder_reward: params.reward % next_length,
        last_block_hash_in_previous_epoch: last_block_hash,
    }
}

/// BlockReward: the primary issuance of block `number` inside `epoch`.
///
/// The first `remainder_reward` blocks earn one extra shannon, so the blocks
/// of a full epoch sum to exactly the epoch reward.
pub fn block_reward(epoch: &EpochExt, number: BlockNumber) -> Capacity {
    let index = number.saturating_sub(epoch.start_number);
    if index < epoch.remainder_reward {
        epoch.block_reward + 1
    } else {
        epoch.block_reward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> EpochParams {
        EpochParams {
            genesis_length: 100,
            min_length: 50,
            max_length: 200,
            duration_target: 100_000,
            reward: 1_000_003,
        }
    }

    fn genesis() -> EpochExt {
        genesis_epoch(&params(), &Header { difficulty: 1000, ..Default::default() })
    }

    #[test]
    fn test_genesis_epoch() {
        let epoch = genesis();
        assert_eq!(epoch.number, 0);
        assert_eq!(epoch.length, 100);
        assert_eq!(epoch.block_reward, 10_000);
        assert_eq!(epoch.remainder_reward, 3);
    }

    #[test]
    fn test_epoch_reward_is_exact() {
        let epoch = genesis();
        let total: u64 = (epoch.start_number..=epoch.end_number())
            .map(|number| block_reward(&epoch, number))
            .sum();
        assert_eq!(total, params().reward);
    }

    #[test]
    fn test_on_target_epoch_keeps_shape() {
        let next = next_epoch(&params(), &genesis(), 100_000, [1; 32]);
        assert_eq!(next.number, 1);
        assert_eq!(next.start_number, 100);
        assert_eq!(next.length, 100);
        assert_eq!(next.difficulty, 1000);
        assert_eq!(next.last_block_hash_in_previous_epoch, [1; 32]);
    }

    #[test]
    fn test_fast_epoch_grows_and_hardens() {
        let next = next_epoch(&params(), &genesis(), 25_000, [0; 32]);
        assert_eq!(next.length, 200);
        // 1000 * 100 * 100_000 / (25_000 * 200) = 2000, at the upper clamp
        assert_eq!(next.difficulty, 2000);
    }

    #[test]
    fn test_slow_epoch_shrinks_and_eases() {
        let next = next_epoch(&params(), &genesis(), 1_000_000, [0; 32]);
        assert_eq!(next.length, 50);
        assert_eq!(next.difficulty, 500);
    }

    #[test]
    fn test_zero_elapsed_does_not_divide_by_zero() {
        let next = next_epoch(&params(), &genesis(), 0, [0; 32]);
        assert_eq!(next.length, 200);
        assert_eq!(next.difficulty, 2000);
    }
}
