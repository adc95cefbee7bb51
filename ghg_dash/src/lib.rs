//! Core greenhouse-gas dashboard library: loading, filtering, aggregation and
//! waterfall cascades for emissions and decarbonization-action tables.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod aggregate;
pub mod cascade;
pub mod config;
pub mod figure;
pub mod load;
pub mod treemap;

pub use aggregate::{
    emission_tree, reduction_series, stacked_bars, ReductionSeries, StackedBars, TreeNode,
};
pub use cascade::{
    build_cascade, cascade_bars, CascadeBar, CascadeStep, ConnectorStyle, StepKind, Waterfall,
};
pub use config::{ActionColumns, CsvOptions, DashboardConfig, EmissionColumns};
pub use load::{emissions_to_csv, parse_actions, parse_emissions};

#[derive(Error, Debug)]
pub enum DashError {
    #[error("missing column: {0}")]
    MissingColumn(String),
    #[error("row {row}: invalid number in column '{column}': {value:?}")]
    InvalidNumber {
        row: usize,
        column: String,
        value: String,
    },
    #[error("failed to parse CSV: {0}")]
    Csv(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("dataset has no emission rows")]
    EmptyDataset,
}

/// Display unit. Source data is always kilograms of CO2-equivalent.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Kg,
    Tonnes,
}

impl Unit {
    pub fn scale(self, kg: f64) -> f64 {
        match self {
            Unit::Kg => kg,
            Unit::Tonnes => kg / 1000.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Unit::Kg => "kgCO2e",
            Unit::Tonnes => "tCO2e",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EmissionRecord {
    pub year: i32,
    pub category: String,
    pub subcategory: String,
    pub model_id: String,
    pub emissions_kg: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActionRecord {
    pub year: i32,
    pub solution: String,
    pub reduction_kg: f64,
}

/// Choices offered by the year and category controls.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct FilterOptions {
    /// Distinct years, most recent first.
    pub years: Vec<i32>,
    /// Distinct categories in first-appearance order.
    pub categories: Vec<String>,
}

pub fn filter_options(emissions: &[EmissionRecord]) -> FilterOptions {
    let mut years: Vec<i32> = emissions.iter().map(|r| r.year).collect();
    years.sort_unstable_by(|a, b| b.cmp(a));
    years.dedup();

    let mut seen = HashSet::new();
    let categories = emissions
        .iter()
        .filter(|r| seen.insert(r.category.as_str()))
        .map(|r| r.category.clone())
        .collect();

    FilterOptions { years, categories }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Selection {
    pub year: i32,
    pub categories: Vec<String>,
}

impl Selection {
    /// Most recent year with every category selected, or `None` for an empty table.
    pub fn default_for(emissions: &[EmissionRecord]) -> Option<Self> {
        let options = filter_options(emissions);
        let year = *options.years.first()?;
        Some(Self {
            year,
            categories: options.categories,
        })
    }

    pub fn includes(&self, record: &EmissionRecord) -> bool {
        record.year == self.year && self.categories.iter().any(|c| *c == record.category)
    }
}

pub fn filter_emissions<'a>(
    emissions: &'a [EmissionRecord],
    selection: &Selection,
) -> Vec<&'a EmissionRecord> {
    emissions.iter().filter(|r| selection.includes(r)).collect()
}

/// Actions recorded for `year`, in their original order.
pub fn actions_for_year(actions: &[ActionRecord], year: i32) -> Vec<ActionRecord> {
    actions.iter().filter(|a| a.year == year).cloned().collect()
}

pub fn total_emissions(rows: &[&EmissionRecord]) -> f64 {
    rows.iter().map(|r| r.emissions_kg).sum()
}

/// Round to two decimals, halves away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Summary {
    pub year: i32,
    pub categories: Vec<String>,
    pub rows: usize,
    pub total_kg: f64,
    pub total: f64,
    pub unit: Unit,
}

pub fn summarize(emissions: &[EmissionRecord], selection: &Selection, unit: Unit) -> Summary {
    let rows = filter_emissions(emissions, selection);
    let total_kg = total_emissions(&rows);
    Summary {
        year: selection.year,
        categories: selection.categories.clone(),
        rows: rows.len(),
        total_kg,
        total: round2(unit.scale(total_kg)),
        unit,
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Dataset {
    pub emissions: Vec<EmissionRecord>,
    pub actions: Vec<ActionRecord>,
    /// Hex SHA-256 over every source file, in load order.
    pub fingerprint: String,
}

impl Dataset {
    pub fn new(
        emissions: Vec<EmissionRecord>,
        actions: Vec<ActionRecord>,
        fingerprint: String,
    ) -> Self {
        Self {
            emissions,
            actions,
            fingerprint,
        }
    }

    /// Parse in-memory sources with `config`. Empty emission tables are rejected.
    pub fn from_sources(
        emission_sources: &[&[u8]],
        action_source: Option<&[u8]>,
        config: &DashboardConfig,
    ) -> Result<Self, DashError> {
        let mut emissions = Vec::new();
        for bytes in emission_sources {
            emissions.extend(parse_emissions(bytes, &config.emissions_columns, &config.csv)?);
        }
        if emissions.is_empty() {
            return Err(DashError::EmptyDataset);
        }
        let actions = match action_source {
            Some(bytes) => parse_actions(bytes, &config.actions_columns, &config.csv)?,
            None => Vec::new(),
        };
        let fingerprint = fingerprint(emission_sources.iter().copied().chain(action_source));
        Ok(Self::new(emissions, actions, fingerprint))
    }

    pub fn options(&self) -> FilterOptions {
        filter_options(&self.emissions)
    }

    pub fn waterfall(&self, year: i32) -> Waterfall {
        Waterfall::for_year(&self.actions, year)
    }
}

pub fn fingerprint<'a, I>(sources: I) -> String
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = Sha256::new();
    for source in sources {
        hasher.update((source.len() as u64).to_le_bytes());
        hasher.update(source);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emission(year: i32, category: &str, subcategory: &str, kg: f64) -> EmissionRecord {
        EmissionRecord {
            year,
            category: category.to_string(),
            subcategory: subcategory.to_string(),
            model_id: format!("{category}-{subcategory}"),
            emissions_kg: kg,
        }
    }

    fn sample() -> Vec<EmissionRecord> {
        vec![
            emission(2022, "Energy", "Electricity", 120.0),
            emission(2023, "Travel", "Flights", 300.0),
            emission(2023, "Energy", "Gas", 80.5),
            emission(2021, "Travel", "Train", 4.0),
            emission(2023, "Purchases", "IT", 19.125),
        ]
    }

    #[test]
    fn options_sort_years_descending_and_keep_category_order() {
        let options = filter_options(&sample());
        assert_eq!(options.years, vec![2023, 2022, 2021]);
        assert_eq!(options.categories, vec!["Energy", "Travel", "Purchases"]);
    }

    #[test]
    fn default_selection_is_latest_year_with_all_categories() {
        let selection = Selection::default_for(&sample()).unwrap();
        assert_eq!(selection.year, 2023);
        assert_eq!(selection.categories.len(), 3);
        assert!(Selection::default_for(&[]).is_none());
    }

    #[test]
    fn filter_honours_year_and_categories() {
        let data = sample();
        let selection = Selection {
            year: 2023,
            categories: vec!["Travel".into(), "Purchases".into()],
        };
        let rows = filter_emissions(&data, &selection);
        assert_eq!(rows.len(), 2);
        assert_eq!(total_emissions(&rows), 319.125);

        let nothing = Selection {
            year: 2023,
            categories: Vec::new(),
        };
        assert!(filter_emissions(&data, &nothing).is_empty());
    }

    #[test]
    fn summary_rounds_to_two_decimals() {
        let data = sample();
        let selection = Selection::default_for(&data).unwrap();
        let summary = summarize(&data, &selection, Unit::Kg);
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.total, 399.63);

        let tonnes = summarize(&data, &selection, Unit::Tonnes);
        assert_eq!(tonnes.total, 0.4);
        assert_eq!(tonnes.unit.label(), "tCO2e");
    }

    #[test]
    fn actions_for_year_keeps_input_order() {
        let actions = vec![
            ActionRecord {
                year: 2030,
                solution: "Solar".into(),
                reduction_kg: -5.0,
            },
            ActionRecord {
                year: 2025,
                solution: "Bike".into(),
                reduction_kg: -1.0,
            },
            ActionRecord {
                year: 2030,
                solution: "Insulation".into(),
                reduction_kg: -3.0,
            },
        ];
        let picked = actions_for_year(&actions, 2030);
        let labels: Vec<&str> = picked.iter().map(|a| a.solution.as_str()).collect();
        assert_eq!(labels, vec!["Solar", "Insulation"]);
    }

    #[test]
    fn fingerprint_depends_on_source_boundaries() {
        let joined = fingerprint([b"ab".as_slice(), b"c".as_slice()]);
        let split = fingerprint([b"a".as_slice(), b"bc".as_slice()]);
        assert_ne!(joined, split);
        assert_eq!(joined.len(), 64);
    }

    #[test]
    fn dataset_rejects_empty_emissions() {
        let config = DashboardConfig::default();
        let csv = b"Year,Category,Subcategory,ModelID,Emissions\n";
        let err = Dataset::from_sources(&[csv.as_slice()], None, &config).unwrap_err();
        assert!(matches!(err, DashError::EmptyDataset));
    }
}
