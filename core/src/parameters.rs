use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::CoreError;

/// Unit label shown when a parameter has no unit of measurement.
pub const NO_UNIT: &str = "N/A";

/// Whether a parameter is measured as a number or judged as a pass/fail token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ParameterKind {
    Quantitative,
    Qualitative,
}

impl ParameterKind {
    /// Lenient parse used at the storage boundary: anything mentioning
    /// "qual" (but not "quant") is qualitative, everything else quantitative.
    pub fn parse_lenient(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        if lower.contains("qual") && !lower.contains("quant") {
            ParameterKind::Qualitative
        } else {
            ParameterKind::Quantitative
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParameterKind::Quantitative => "Quantitative",
            ParameterKind::Qualitative => "Qualitative",
        }
    }
}

impl std::fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A measurement definition from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Parameter {
    pub id: i64,
    pub name: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub unit: Option<String>,
    /// Lower bound, only meaningful for quantitative parameters
    #[serde(default)]
    pub min: Option<f64>,
    /// Upper bound, only meaningful for quantitative parameters
    #[serde(default)]
    pub max: Option<f64>,
    /// Acceptance description, required for qualitative parameters
    #[serde(default)]
    pub criteria: Option<String>,
}

impl Parameter {
    pub fn is_qualitative(&self) -> bool {
        self.kind == ParameterKind::Qualitative
    }

    /// Bounds that actually constrain a reading. Qualitative parameters have none.
    pub fn bounds(&self) -> (Option<f64>, Option<f64>) {
        match self.kind {
            ParameterKind::Quantitative => (
                self.min.filter(|v| v.is_finite()),
                self.max.filter(|v| v.is_finite()),
            ),
            ParameterKind::Qualitative => (None, None),
        }
    }

    pub fn unit_label(&self) -> &str {
        match self.unit.as_deref().map(str::trim) {
            Some(u) if !u.is_empty() => u,
            _ => NO_UNIT,
        }
    }
}

/// Payload for creating or replacing a parameter definition.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ParameterDraft {
    pub name: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub criteria: Option<String>,
}

impl ParameterDraft {
    /// Check the definition invariants and return a normalized copy:
    /// trimmed name, blank unit/criteria collapsed to `None`, bounds dropped
    /// for qualitative parameters.
    pub fn normalized(&self) -> Result<ParameterDraft, CoreError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(CoreError::InvalidDefinition {
                field: "name",
                message: "name must not be empty".to_string(),
            });
        }

        let unit = non_blank(self.unit.as_deref());
        let criteria = non_blank(self.criteria.as_deref());

        for (field, bound) in [("min", self.min), ("max", self.max)] {
            if bound.is_some_and(|v| !v.is_finite()) {
                return Err(CoreError::InvalidDefinition {
                    field,
                    message: format!("{field} must be a finite number"),
                });
            }
        }

        match self.kind {
            ParameterKind::Quantitative => {
                if let (Some(min), Some(max)) = (self.min, self.max) {
                    if min > max {
                        return Err(CoreError::InvalidDefinition {
                            field: "min",
                            message: format!("min {min} is greater than max {max}"),
                        });
                    }
                }
                Ok(ParameterDraft {
                    name: name.to_string(),
                    kind: self.kind,
                    unit,
                    min: self.min,
                    max: self.max,
                    criteria,
                })
            }
            ParameterKind::Qualitative => {
                if criteria.is_none() {
                    return Err(CoreError::InvalidDefinition {
                        field: "criteria",
                        message: "qualitative parameters need acceptance criteria".to_string(),
                    });
                }
                Ok(ParameterDraft {
                    name: name.to_string(),
                    kind: self.kind,
                    unit,
                    min: None,
                    max: None,
                    criteria,
                })
            }
        }
    }

    pub fn into_parameter(self, id: i64) -> Parameter {
        Parameter {
            id,
            name: self.name,
            kind: self.kind,
            unit: self.unit,
            min: self.min,
            max: self.max,
            criteria: self.criteria,
        }
    }
}

fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Read-only view of the parameter catalog with id and name indexes.
#[derive(Debug, Clone, Default)]
pub struct ParameterCatalog {
    parameters: Vec<Parameter>,
    by_id: HashMap<i64, usize>,
    by_name: HashMap<String, usize>,
}

impl ParameterCatalog {
    /// Build a catalog, keeping the given order. Fails when two parameters
    /// share an id or a name, since name resolution depends on uniqueness.
    pub fn new(parameters: Vec<Parameter>) -> Result<Self, CoreError> {
        let mut by_id = HashMap::with_capacity(parameters.len());
        let mut by_name = HashMap::with_capacity(parameters.len());

        for (idx, p) in parameters.iter().enumerate() {
            if by_name.insert(p.name.trim().to_string(), idx).is_some()
                || by_id.insert(p.id, idx).is_some()
            {
                return Err(CoreError::DuplicateDefinition {
                    name: p.name.clone(),
                });
            }
        }

        Ok(Self {
            parameters,
            by_id,
            by_name,
        })
    }

    pub fn get(&self, id: i64) -> Option<&Parameter> {
        self.by_id.get(&id).map(|&idx| &self.parameters[idx])
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Parameter> {
        self.by_name
            .get(name.trim())
            .map(|&idx| &self.parameters[idx])
    }

    /// Resolve by id when supplied, else by name. An id that is present but
    /// unknown does not fall back to the name.
    pub fn resolve(&self, id: Option<i64>, name: Option<&str>) -> Option<&Parameter> {
        match (id, name) {
            (Some(id), _) => self.get(id),
            (None, Some(name)) => self.find_by_name(name),
            (None, None) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn into_vec(self) -> Vec<Parameter> {
        self.parameters
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn quantitative(id: i64, name: &str, min: Option<f64>, max: Option<f64>) -> Parameter {
        Parameter {
            id,
            name: name.to_string(),
            kind: ParameterKind::Quantitative,
            unit: Some("V".to_string()),
            min,
            max,
            criteria: None,
        }
    }

    pub fn qualitative(id: i64, name: &str) -> Parameter {
        Parameter {
            id,
            name: name.to_string(),
            kind: ParameterKind::Qualitative,
            unit: None,
            min: None,
            max: None,
            criteria: Some("No visible damage".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{qualitative, quantitative};
    use super::*;

    #[test]
    fn lenient_kind_parsing() {
        assert_eq!(ParameterKind::parse_lenient("Qualitative"), ParameterKind::Qualitative);
        assert_eq!(ParameterKind::parse_lenient(" qual "), ParameterKind::Qualitative);
        assert_eq!(ParameterKind::parse_lenient("Quantitative"), ParameterKind::Quantitative);
        assert_eq!(ParameterKind::parse_lenient(""), ParameterKind::Quantitative);
    }

    #[test]
    fn catalog_resolves_by_id_then_name() {
        let catalog = ParameterCatalog::new(vec![
            quantitative(1, "Voltage", Some(220.0), Some(240.0)),
            qualitative(2, "Visual Inspection"),
        ])
        .expect("unique catalog");

        assert_eq!(catalog.resolve(Some(2), None).map(|p| p.id), Some(2));
        assert_eq!(catalog.resolve(None, Some("Voltage")).map(|p| p.id), Some(1));
        assert_eq!(catalog.resolve(None, Some(" Voltage ")).map(|p| p.id), Some(1));
        assert!(catalog.resolve(Some(9), Some("Voltage")).is_none());
        assert!(catalog.resolve(None, None).is_none());
    }

    #[test]
    fn catalog_rejects_duplicate_names() {
        let err = ParameterCatalog::new(vec![
            quantitative(1, "Voltage", None, None),
            quantitative(2, "Voltage", None, None),
        ])
        .expect_err("duplicate name must fail");
        assert!(matches!(err, CoreError::DuplicateDefinition { .. }));
    }

    #[test]
    fn draft_rejects_inverted_bounds() {
        let draft = ParameterDraft {
            name: "Voltage".into(),
            kind: ParameterKind::Quantitative,
            unit: Some("V".into()),
            min: Some(240.0),
            max: Some(220.0),
            criteria: None,
        };
        let err = draft.normalized().expect_err("min > max must fail");
        assert!(matches!(err, CoreError::InvalidDefinition { field: "min", .. }));
    }

    #[test]
    fn qualitative_draft_requires_criteria_and_drops_bounds() {
        let mut draft = ParameterDraft {
            name: " Visual ".into(),
            kind: ParameterKind::Qualitative,
            unit: Some("  ".into()),
            min: Some(1.0),
            max: None,
            criteria: Some("   ".into()),
        };
        assert!(draft.normalized().is_err());

        draft.criteria = Some("No cracks".into());
        let normalized = draft.normalized().expect("valid qualitative draft");
        assert_eq!(normalized.name, "Visual");
        assert_eq!(normalized.unit, None);
        assert_eq!(normalized.min, None);
    }

    #[test]
    fn unit_label_falls_back_to_na() {
        let mut p = quantitative(1, "Voltage", None, None);
        assert_eq!(p.unit_label(), "V");
        p.unit = Some(" ".into());
        assert_eq!(p.unit_label(), NO_UNIT);
    }
}
