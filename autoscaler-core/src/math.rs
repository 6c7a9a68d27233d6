//! Scaling math (component E): translate a scaling intent into a target
//! shard count.
//!
//! All arithmetic is integer-only (ceiling/floor division formulas) so the
//! result never depends on float rounding, per the Design Note on
//! float-vs-fixed-point arithmetic.

use crate::decision::Direction;

/// `ceil(numerator / denominator)` for non-negative integers.
fn ceil_div(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator - 1) / denominator
}

#[derive(Debug, Clone, Copy)]
pub enum Amount {
    Count(i64),
    Pct(i64),
}

/// `newShardCount(current, count|pct, direction, min, max)`.
///
/// Resolution of an internal inconsistency in the source spec: the UP
/// formula's textual description splits into an additive branch
/// (`pct < 100`) and a multiplicative branch (`pct >= 100`), but the
/// worked example (`current=75, pct=150, UP -> 188`) only holds under the
/// additive formula applied unconditionally. The DOWN-subtractive branch
/// (`pct <= 100`) similarly only reproduces its worked example
/// (`current=75, pct=25, DOWN -> 56`) when the product is rounded up
/// before subtracting, not down. Both are implemented to match the
/// worked examples; see DESIGN.md.
pub fn new_shard_count(
    current: i64,
    amount: Amount,
    direction: Direction,
    min: Option<i64>,
    max: Option<i64>,
) -> i64 {
    let raw = match amount {
        Amount::Count(count) => match direction {
            Direction::Up => current + count,
            Direction::Down => current - count,
        },
        Amount::Pct(pct) => match direction {
            Direction::Up => {
                // Always additive: factor = (100+pct)/100.
                ceil_div(current * (100 + pct), 100)
            }
            Direction::Down => {
                if pct > 100 {
                    // Divisive: factor = pct/100.
                    (current * 100) / pct
                } else {
                    // Subtractive: current - ceil(current * pct / 100).
                    current - ceil_div(current * pct, 100)
                }
            }
        },
    };

    let floor = min.unwrap_or(1).max(1);
    let mut target = raw.max(floor);
    if let Some(max) = max {
        target = target.min(max);
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1_count_up() {
        assert_eq!(
            new_shard_count(10, Amount::Count(3), Direction::Up, None, None),
            13
        );
    }

    #[test]
    fn scenario_2_pct_up_additive() {
        assert_eq!(
            new_shard_count(10, Amount::Pct(20), Direction::Up, None, None),
            12
        );
    }

    #[test]
    fn scenario_3_pct_up_large() {
        assert_eq!(
            new_shard_count(75, Amount::Pct(150), Direction::Up, None, None),
            188
        );
    }

    #[test]
    fn scenario_4_pct_down_subtractive() {
        assert_eq!(
            new_shard_count(75, Amount::Pct(25), Direction::Down, None, None),
            56
        );
    }

    #[test]
    fn scenario_5_pct_down_divisive() {
        assert_eq!(
            new_shard_count(10, Amount::Pct(200), Direction::Down, None, None),
            5
        );
    }

    #[test]
    fn clamps_to_bounds() {
        assert_eq!(
            new_shard_count(10, Amount::Count(100), Direction::Up, Some(1), Some(20)),
            20
        );
        assert_eq!(
            new_shard_count(2, Amount::Count(100), Direction::Down, Some(1), Some(20)),
            1
        );
    }

    #[test]
    fn floors_at_one_without_explicit_min() {
        assert_eq!(
            new_shard_count(1, Amount::Count(10), Direction::Down, None, None),
            1
        );
    }

    #[test]
    fn monotone_in_current_for_fixed_params() {
        let a = new_shard_count(10, Amount::Pct(30), Direction::Up, None, None);
        let b = new_shard_count(20, Amount::Pct(30), Direction::Up, None, None);
        assert!(b > a);
        let a = new_shard_count(20, Amount::Pct(30), Direction::Down, None, None);
        let b = new_shard_count(10, Amount::Pct(30), Direction::Down, None, None);
        assert!(a > b);
    }

    #[test]
    fn always_within_clamp_bounds() {
        for current in 1..50 {
            for pct in [5, 25, 50, 99, 100, 150, 250] {
                for dir in [Direction::Up, Direction::Down] {
                    let v = new_shard_count(current, Amount::Pct(pct), dir, Some(2), Some(40));
                    assert!((2..=40).contains(&v), "current={current} pct={pct} dir={dir:?} -> {v}");
                }
            }
        }
    }
}
