use async_trait::async_trait;

use crate::error::DeviceError;

use super::Device;

/// Linear-position focuser (§4.B). Move contract: if `current > target`,
/// overshoot below target by `backlash` then approach from below, so
/// arrivals always come from the same mechanical direction. No-op if
/// direction already matches (current <= target).
#[async_trait]
pub trait Focuser: Device {
    fn min(&self) -> i32;
    fn max(&self) -> i32;
    async fn current(&self) -> i32;
    fn backlash(&self) -> i32;

    /// Issues the one or two underlying `moveto` calls the backlash policy
    /// requires. Implementors should *not* reimplement the overshoot
    /// sequencing themselves — call [`plan_moves`] and issue each step via
    /// their driver-specific primitive move.
    async fn moveto(&self, target: i32) -> Result<(), DeviceError>;
}

/// Pure function computing the sequence of raw positions a `moveto(target)`
/// call must visit, given the current position and backlash amount.
/// Scenario 2 (§8): start 5000, backlash 250, target 3000 → `[2750, 3000]`.
pub fn plan_moves(current: i32, target: i32, backlash: i32) -> Vec<i32> {
    if current > target {
        vec![target - backlash, target]
    } else {
        vec![target]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_backlash_from_below() {
        assert_eq!(plan_moves(5000, 3000, 250), vec![2750, 3000]);
    }

    #[test]
    fn test_no_op_when_already_below() {
        assert_eq!(plan_moves(1000, 3000, 250), vec![3000]);
    }

    #[test]
    fn test_equal_position_is_single_step() {
        assert_eq!(plan_moves(3000, 3000, 250), vec![3000]);
    }
}
