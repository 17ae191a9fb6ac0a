//! Production line / shift pairs offered as entry header choices.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct LineShift {
    pub line: String,
    pub shift: String,
}

impl LineShift {
    /// Trimmed copy; both names must be non-blank.
    pub fn normalized(&self) -> Result<LineShift, CoreError> {
        let line = self.line.trim();
        let shift = self.shift.trim();
        for (field, name) in [("line", line), ("shift", shift)] {
            if name.is_empty() {
                return Err(CoreError::InvalidDefinition {
                    field,
                    message: format!("{field} name must not be blank"),
                });
            }
        }
        Ok(LineShift {
            line: line.to_string(),
            shift: shift.to_string(),
        })
    }
}

/// Configured pairs plus the distinct lines and shifts derived from them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Configurations {
    pub configurations: Vec<LineShift>,
    pub lines: Vec<String>,
    pub shifts: Vec<String>,
}

impl Configurations {
    /// Build from raw rows. Blank names are dropped, the rest trimmed and
    /// deduplicated; every list comes out sorted.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let unique: BTreeSet<LineShift> = pairs
            .into_iter()
            .filter_map(|(line, shift)| {
                let (line, shift) = (line.trim(), shift.trim());
                (!line.is_empty() && !shift.is_empty()).then(|| LineShift {
                    line: line.to_string(),
                    shift: shift.to_string(),
                })
            })
            .collect();

        let lines: BTreeSet<&str> = unique.iter().map(|p| p.line.as_str()).collect();
        let shifts: BTreeSet<&str> = unique.iter().map(|p| p.shift.as_str()).collect();

        Configurations {
            lines: lines.into_iter().map(str::to_string).collect(),
            shifts: shifts.into_iter().map(str::to_string).collect(),
            configurations: unique.into_iter().collect(),
        }
    }

    pub fn shifts_for(&self, line: &str) -> Vec<&str> {
        self.configurations
            .iter()
            .filter(|p| p.line == line.trim())
            .map(|p| p.shift.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(line: &str, shift: &str) -> (String, String) {
        (line.to_string(), shift.to_string())
    }

    #[test]
    fn derives_distinct_sorted_lines_and_shifts() {
        let config = Configurations::from_pairs([
            pair("L2", "B"),
            pair("L1", "A"),
            pair("L1", "B"),
            pair(" L1 ", "A"),
            pair("", "C"),
        ]);

        assert_eq!(config.configurations.len(), 3);
        assert_eq!(config.lines, vec!["L1", "L2"]);
        assert_eq!(config.shifts, vec!["A", "B"]);
        assert_eq!(config.shifts_for("L1"), vec!["A", "B"]);
        assert!(config.shifts_for("L9").is_empty());
    }

    #[test]
    fn normalized_pair_is_trimmed_and_non_blank() {
        let pair = LineShift {
            line: " L3 ".into(),
            shift: "C".into(),
        };
        assert_eq!(
            pair.normalized(),
            Ok(LineShift {
                line: "L3".into(),
                shift: "C".into()
            })
        );

        let blank = LineShift {
            line: "L3".into(),
            shift: "  ".into(),
        };
        assert!(matches!(
            blank.normalized(),
            Err(CoreError::InvalidDefinition { field: "shift", .. })
        ));
    }
}
