// Custom test assertions and matchers for integration tests

use serde_json::Value;
use std::time::{Duration, Instant};

/// Assertion result for detailed error messages
#[derive(Debug)]
pub struct AssertionResult {
    pub passed: bool,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl AssertionResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            message: String::new(),
            expected: None,
            actual: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn with_actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }

    pub fn assert(self) {
        if !self.passed {
            let mut msg = self.message;
            if let Some(expected) = self.expected {
                msg.push_str(&format!("\n  expected: {}", expected));
            }
            if let Some(actual) = self.actual {
                msg.push_str(&format!("\n  actual: {}", actual));
            }
            panic!("{}", msg);
        }
    }
}

/// Retry an assertion until it passes or times out
pub async fn assert_eventually<F, Fut>(
    f: F,
    timeout: Duration,
    interval: Duration,
) -> AssertionResult
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = AssertionResult>,
{
    let start = Instant::now();
    let mut last_result = AssertionResult::fail("No attempts made");

    while start.elapsed() < timeout {
        last_result = f().await;
        if last_result.passed {
            return last_result;
        }
        tokio::time::sleep(interval).await;
    }

    AssertionResult::fail(format!(
        "Assertion did not pass within {:?}: {}",
        timeout, last_result.message
    ))
    .with_expected(last_result.expected.unwrap_or_default())
    .with_actual(last_result.actual.unwrap_or_default())
}

/// Compare a field of a JSON body.
pub fn assert_field(body: &Value, field: &str, expected: &Value) -> AssertionResult {
    let actual = &body[field];
    if actual == expected {
        AssertionResult::pass()
    } else {
        AssertionResult::fail(format!("Field '{}' mismatch", field))
            .with_expected(expected.to_string())
            .with_actual(actual.to_string())
    }
}

/// Check an error response's status and `error` kind.
pub fn assert_error(status: u16, body: &Value, expected_status: u16, expected_kind: &str) -> AssertionResult {
    if status != expected_status {
        return AssertionResult::fail("Status code mismatch")
            .with_expected(expected_status.to_string())
            .with_actual(format!("{} {}", status, body));
    }
    assert_field(body, "error", &Value::String(expected_kind.to_string()))
}

/// Each row of a probability output sums to one.
pub fn assert_probabilities(rows: &Value) -> AssertionResult {
    let Some(rows) = rows.as_array() else {
        return AssertionResult::fail("Probabilities are not an array").with_actual(rows.to_string());
    };
    for (i, row) in rows.iter().enumerate() {
        let sum: f64 = row
            .as_array()
            .map(|values| values.iter().filter_map(Value::as_f64).sum())
            .unwrap_or(0.0);
        if (sum - 1.0).abs() > 1e-9 {
            return AssertionResult::fail(format!("Row {} does not sum to 1", i))
                .with_expected("1.0")
                .with_actual(sum.to_string());
        }
    }
    AssertionResult::pass()
}

/// Assert that a value is within a range
#[macro_export]
macro_rules! assert_in_range {
    ($value:expr, $min:expr, $max:expr) => {
        assert!(
            $value >= $min && $value <= $max,
            "Expected {} to be in range [{}, {}]",
            $value,
            $min,
            $max
        );
    };
}
