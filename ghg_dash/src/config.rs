//! Dashboard configuration: column aliases, CSV dialect, display unit.

use serde::{Deserialize, Serialize};

use crate::{DashError, Unit};

fn aliases(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Header aliases for the emissions table. The first header matching any
/// alias (trimmed, case-insensitive) is used.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmissionColumns {
    pub year: Vec<String>,
    pub category: Vec<String>,
    pub subcategory: Vec<String>,
    pub model_id: Vec<String>,
    pub emissions: Vec<String>,
}

impl Default for EmissionColumns {
    fn default() -> Self {
        Self {
            year: aliases(&["Year", "Année", "Annee"]),
            category: aliases(&["Category", "Catégorie Bilan Carbone", "Categorie Bilan Carbone"]),
            subcategory: aliases(&[
                "Subcategory",
                "Sous-Catégorie Bilan Carbone",
                "Sous-Categorie Bilan Carbone",
            ]),
            model_id: aliases(&["ModelID", "Model ID", "model_id", "Identifiant du modèle"]),
            emissions: aliases(&[
                "Emissions",
                "GHG Emissions (kgCO2e)",
                "Emissions_kgCO2e",
                "emissions_kg",
            ]),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActionColumns {
    pub year: Vec<String>,
    pub solution: Vec<String>,
    pub reduction: Vec<String>,
}

impl Default for ActionColumns {
    fn default() -> Self {
        Self {
            year: aliases(&["Year", "Année", "Annee"]),
            solution: aliases(&["Solution", "Action"]),
            reduction: aliases(&[
                "Reduction",
                "Reduction (kgCO2e)",
                "Reduction compared to no action (kgCO2e)",
            ]),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CsvOptions {
    pub delimiter: char,
    /// Accept `1 234,5` style numbers.
    pub decimal_comma: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            decimal_comma: false,
        }
    }
}

impl CsvOptions {
    pub fn delimiter_byte(&self) -> Result<u8, DashError> {
        if self.delimiter.is_ascii() {
            Ok(self.delimiter as u8)
        } else {
            Err(DashError::Config(format!(
                "delimiter must be a single ASCII character, got {:?}",
                self.delimiter
            )))
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    pub title: String,
    pub unit: Unit,
    pub csv: CsvOptions,
    pub emissions_columns: EmissionColumns,
    pub actions_columns: ActionColumns,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            title: "GHG Emissions Dashboard".to_string(),
            unit: Unit::Kg,
            csv: CsvOptions::default(),
            emissions_columns: EmissionColumns::default(),
            actions_columns: ActionColumns::default(),
        }
    }
}

impl DashboardConfig {
    pub fn from_json_str(text: &str) -> Result<Self, DashError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| DashError::Config(e.to_string()))?;
        config.csv.delimiter_byte()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = DashboardConfig::from_json_str(
            r#"{ "unit": "tonnes", "csv": { "delimiter": ";", "decimal_comma": true } }"#,
        )
        .unwrap();
        assert_eq!(config.unit, Unit::Tonnes);
        assert_eq!(config.csv.delimiter_byte().unwrap(), b';');
        assert!(config.csv.decimal_comma);
        assert_eq!(config.emissions_columns, EmissionColumns::default());
        assert_eq!(config.title, "GHG Emissions Dashboard");
    }

    #[test]
    fn rejects_non_ascii_delimiter() {
        let err =
            DashboardConfig::from_json_str(r#"{ "csv": { "delimiter": "é" } }"#).unwrap_err();
        assert!(matches!(err, DashError::Config(_)));
    }

    #[test]
    fn delimiter_narrows_to_reader_byte() {
        let config = DashboardConfig::from_json_str(r#"{ "csv": { "delimiter": "\t" } }"#).unwrap();
        assert_eq!(config.csv.delimiter, '\t');
        assert_eq!(config.csv.delimiter_byte().unwrap(), b'\t');
        assert_eq!(CsvOptions::default().delimiter_byte().unwrap(), b',');
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(DashboardConfig::from_json_str("{ unit: ").is_err());
    }
}
