//! Tolerance-based numeric assertions

use serde_json::Value;
use std::fmt;

/// An expectation that did not hold, with the exact values involved
#[derive(Debug, Clone, PartialEq)]
pub struct AssertionFailure {
    /// What was checked, e.g. a JSON pointer
    pub context: String,
    pub expected: String,
    pub actual: String,
    pub tolerance: Option<i128>,
}

impl AssertionFailure {
    pub fn new(context: impl Into<String>, expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self {
            context: context.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
            tolerance: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }
        write!(f, "expected {}", self.expected)?;
        if let Some(tol) = self.tolerance {
            write!(f, " (±{})", tol)?;
        }
        write!(f, ", got {}", self.actual)
    }
}

impl std::error::Error for AssertionFailure {}

/// Pass when `expected - tolerance <= actual <= expected + tolerance`
///
/// Out of tolerance, falls back to exact equality so the failure carries
/// both exact values. A negative tolerance is treated as zero.
pub fn approx_equal(actual: i128, expected: i128, tolerance: i128) -> Result<(), AssertionFailure> {
    let tolerance = tolerance.max(0);
    let low = expected.saturating_sub(tolerance);
    let high = expected.saturating_add(tolerance);

    if (low..=high).contains(&actual) {
        return Ok(());
    }

    exact_equal(actual, expected).map_err(|mut failure| {
        failure.tolerance = Some(tolerance);
        failure
    })
}

fn exact_equal(actual: i128, expected: i128) -> Result<(), AssertionFailure> {
    if actual == expected {
        Ok(())
    } else {
        Err(AssertionFailure::new("", expected, actual))
    }
}

/// Read an integer from a JSON number or a decimal string (Uint128/Integer wire format)
pub fn parse_integer(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from)),
        Value::String(s) => s.trim().parse::<i128>().ok(),
        _ => None,
    }
}

/// `approx_equal` on a JSON value
pub fn approx_equal_json(actual: &Value, expected: i128, tolerance: i128) -> Result<(), AssertionFailure> {
    match parse_integer(actual) {
        Some(actual) => approx_equal(actual, expected, tolerance),
        None => Err(AssertionFailure {
            context: String::new(),
            expected: expected.to_string(),
            actual: format!("non-numeric {}", actual),
            tolerance: Some(tolerance.max(0)),
        }),
    }
}
