//! Remark-gating rules for measurement entries.
//!
//! The engine never rejects a reading outright. An out-of-range quantitative
//! value or a failing qualitative verdict is accepted once the operator has
//! explained it in the remark field.

use serde::Serialize;

use crate::parameters::{Parameter, ParameterKind};

/// Passing verdict token for qualitative parameters.
pub const QUALITATIVE_PASS: &str = "OK";
/// Failing verdict token for qualitative parameters; requires a remark.
pub const QUALITATIVE_FAIL: &str = "NOT OK";
/// The complete token set a qualitative entry may hold (besides blank).
pub const QUALITATIVE_TOKENS: [&str; 2] = [QUALITATIVE_PASS, QUALITATIVE_FAIL];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ValidationResult::Valid => None,
            ValidationResult::Invalid(msg) => Some(msg),
        }
    }
}

/// Parse a quantitative reading. Non-finite or unparsable input is `None`.
pub fn parse_reading(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Decide whether a (value, remark) pair can be accepted for `parameter`.
pub fn evaluate(parameter: &Parameter, value: &str, remark: &str) -> ValidationResult {
    let value = value.trim();
    if value.is_empty() {
        return ValidationResult::Valid;
    }
    let remark_blank = remark.trim().is_empty();

    match parameter.kind {
        ParameterKind::Qualitative => {
            if value == QUALITATIVE_FAIL && remark_blank {
                ValidationResult::Invalid(format!(
                    "'{QUALITATIVE_FAIL}' selected: remarks required to explain the issue"
                ))
            } else {
                ValidationResult::Valid
            }
        }
        ParameterKind::Quantitative => {
            // Non-numeric input is an input-format problem, not a range problem.
            let Some(reading) = parse_reading(value) else {
                return ValidationResult::Valid;
            };

            let (min, max) = parameter.bounds();
            if min.is_none() && max.is_none() {
                return ValidationResult::Valid;
            }

            let in_range =
                min.is_none_or(|lo| reading >= lo) && max.is_none_or(|hi| reading <= hi);
            if in_range || !remark_blank {
                return ValidationResult::Valid;
            }

            ValidationResult::Invalid(format!(
                "Value {value} out-of-range (min {}, max {}): remarks required",
                bound_label(min),
                bound_label(max),
            ))
        }
    }
}

fn bound_label(bound: Option<f64>) -> String {
    bound.map_or_else(|| "none".to_string(), |b| b.to_string())
}

/// Aggregate submission gate: nothing invalid and at least one value filled.
pub fn can_submit<'a, I>(rows: I) -> bool
where
    I: IntoIterator<Item = (&'a str, &'a ValidationResult)>,
{
    let mut any_filled = false;
    for (value, verdict) in rows {
        if !verdict.is_valid() {
            return false;
        }
        any_filled |= !value.trim().is_empty();
    }
    any_filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::fixtures::{qualitative, quantitative};

    #[test]
    fn blank_value_is_always_valid() {
        let p = quantitative(1, "IR", Some(40.0), Some(60.0));
        assert_eq!(evaluate(&p, "", ""), ValidationResult::Valid);
        assert_eq!(evaluate(&p, "   ", ""), ValidationResult::Valid);
        assert_eq!(evaluate(&qualitative(2, "Visual"), "", ""), ValidationResult::Valid);
    }

    #[test]
    fn quantitative_boundaries_are_inclusive() {
        let p = quantitative(1, "IR", Some(40.0), Some(60.0));
        assert!(evaluate(&p, "40", "").is_valid());
        assert!(evaluate(&p, "60", "").is_valid());
        assert!(!evaluate(&p, "39.999", "").is_valid());
        assert!(!evaluate(&p, "60.001", "").is_valid());
        assert!(evaluate(&p, "39.999", "noise").is_valid());
    }

    #[test]
    fn out_of_range_message_lists_bounds() {
        let p = quantitative(1, "IR", Some(40.0), None);
        assert_eq!(
            evaluate(&p, "12.5", "  "),
            ValidationResult::Invalid(
                "Value 12.5 out-of-range (min 40, max none): remarks required".to_string()
            )
        );
    }

    #[test]
    fn out_of_range_message_echoes_operator_input() {
        let p = quantitative(1, "IR", Some(40.0), None);
        assert_eq!(
            evaluate(&p, " 0039.50 ", ""),
            ValidationResult::Invalid(
                "Value 0039.50 out-of-range (min 40, max none): remarks required".to_string()
            )
        );
    }

    #[test]
    fn unbounded_quantitative_passes_anything_numeric() {
        let p = quantitative(1, "Torque", None, None);
        for value in ["-1e9", "0", "42", "1e12"] {
            assert!(evaluate(&p, value, "").is_valid(), "{value}");
        }
    }

    #[test]
    fn non_numeric_quantitative_is_not_a_range_error() {
        let p = quantitative(1, "IR", Some(40.0), Some(60.0));
        assert!(evaluate(&p, "abc", "").is_valid());
        assert!(evaluate(&p, "NaN", "").is_valid());
    }

    #[test]
    fn qualitative_not_ok_requires_remark() {
        let p = qualitative(2, "Visual");
        assert!(!evaluate(&p, "NOT OK", "").is_valid());
        assert!(!evaluate(&p, "NOT OK", "   ").is_valid());
        assert!(evaluate(&p, "NOT OK", "cracked casing").is_valid());
        assert!(evaluate(&p, "OK", "").is_valid());
    }

    #[test]
    fn evaluation_is_idempotent() {
        let p = quantitative(1, "IR", Some(40.0), Some(60.0));
        for (value, remark) in [("39", ""), ("50", ""), ("70", "ok by QA"), ("x", "")] {
            assert_eq!(evaluate(&p, value, remark), evaluate(&p, value, remark));
        }
    }

    #[test]
    fn gate_needs_a_filled_value_and_no_errors() {
        let valid = ValidationResult::Valid;
        let invalid = ValidationResult::Invalid("bad".into());

        assert!(!can_submit([("", &valid), (" ", &valid)]));
        assert!(can_submit([("", &valid), ("12", &valid)]));
        assert!(!can_submit([("12", &valid), ("99", &invalid)]));
    }
}
