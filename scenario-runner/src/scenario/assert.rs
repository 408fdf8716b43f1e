//! Amount comparisons used by `Assert` steps.

use crate::amount::AssetAmount;
use crate::error::{CallResult, ScenarioError};

/// Passes iff `|actual - expected| <= tolerance * |expected|`.
///
/// A zero tolerance demands exact equality. A negative or non-finite
/// tolerance is a malformed scenario and yields `SetupError`.
pub fn assert_approx(actual: AssetAmount, expected: AssetAmount, tolerance: f64) -> CallResult<()> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(ScenarioError::setup(format!(
            "relative tolerance must be a non-negative number, got {}",
            tolerance
        )));
    }

    let within = if tolerance == 0.0 {
        actual == expected
    } else {
        let diff = actual.abs_diff(expected).raw() as f64;
        diff <= tolerance * expected.raw() as f64
    };

    if within {
        Ok(())
    } else {
        Err(ScenarioError::ToleranceExceeded {
            actual,
            expected,
            tolerance,
        })
    }
}

pub fn assert_exact(actual: AssetAmount, expected: AssetAmount) -> CallResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(ScenarioError::ValueMismatch { actual, expected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_tolerance_is_exact() {
        assert!(assert_approx(AssetAmount(100), AssetAmount(100), 0.0).is_ok());
        assert!(matches!(
            assert_approx(AssetAmount(101), AssetAmount(100), 0.0),
            Err(ScenarioError::ToleranceExceeded { .. })
        ));
    }

    #[test]
    fn equal_values_pass_any_tolerance() {
        for tolerance in [0.0, 1e-9, 0.5, 1e6] {
            for value in [0u128, 1, 1_000_000, u128::MAX] {
                assert!(assert_approx(AssetAmount(value), AssetAmount(value), tolerance).is_ok());
            }
        }
    }

    #[test]
    fn boundary_is_inclusive() {
        assert!(assert_approx(AssetAmount(1_010), AssetAmount(1_000), 0.01).is_ok());
        assert!(assert_approx(AssetAmount(1_011), AssetAmount(1_000), 0.01).is_err());
    }

    #[test]
    fn rejects_bad_tolerance() {
        for tolerance in [-0.1, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                assert_approx(AssetAmount(1), AssetAmount(1), tolerance),
                Err(ScenarioError::SetupError { .. })
            ));
        }
    }
}
