//! Waterfall cascade for a single period of decarbonization actions.
//!
//! A cascade is `N + 2` steps: an absolute baseline at zero, one relative step
//! per action in input order, and an absolute projected total equal to the
//! sum of the relative steps.

use serde::{Deserialize, Serialize};

use crate::{actions_for_year, ActionRecord};

pub const BASELINE_LABEL: &str = "Baseline Emissions";
pub const PROJECTED_LABEL: &str = "Projected Emissions";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Absolute,
    Relative,
}

impl StepKind {
    /// Plotly waterfall `measure` value.
    pub fn measure(self) -> &'static str {
        match self {
            StepKind::Absolute => "absolute",
            StepKind::Relative => "relative",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CascadeStep {
    pub label: String,
    pub value: f64,
    pub kind: StepKind,
}

impl CascadeStep {
    fn absolute(label: &str, value: f64) -> Self {
        Self {
            label: label.to_string(),
            value,
            kind: StepKind::Absolute,
        }
    }

    fn relative(label: &str, value: f64) -> Self {
        Self {
            label: label.to_string(),
            value,
            kind: StepKind::Relative,
        }
    }
}

/// Build the cascade for `actions`, which the caller has already restricted
/// to one period. Labels are neither sorted nor merged.
pub fn build_cascade(actions: &[ActionRecord]) -> Vec<CascadeStep> {
    let mut steps = Vec::with_capacity(actions.len() + 2);
    steps.push(CascadeStep::absolute(BASELINE_LABEL, 0.0));
    let mut projected = 0.0;
    for action in actions {
        projected += action.reduction_kg;
        steps.push(CascadeStep::relative(&action.solution, action.reduction_kg));
    }
    steps.push(CascadeStep::absolute(PROJECTED_LABEL, projected));
    steps
}

/// A drawable waterfall bar spanning `start..end` on the value axis.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CascadeBar {
    pub label: String,
    pub start: f64,
    pub end: f64,
    pub kind: StepKind,
}

impl CascadeBar {
    pub fn low(&self) -> f64 {
        self.start.min(self.end)
    }

    pub fn high(&self) -> f64 {
        self.start.max(self.end)
    }
}

/// Resolve steps into bars. Absolute steps span from zero and reset the
/// running total; relative steps move it.
pub fn cascade_bars(steps: &[CascadeStep]) -> Vec<CascadeBar> {
    let mut running = 0.0;
    steps
        .iter()
        .map(|step| {
            let (start, end) = match step.kind {
                StepKind::Absolute => (0.0, step.value),
                StepKind::Relative => (running, running + step.value),
            };
            running = end;
            CascadeBar {
                label: step.label.clone(),
                start,
                end,
                kind: step.kind,
            }
        })
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConnectorStyle {
    pub color: String,
    pub dash: String,
    pub width: f64,
}

impl Default for ConnectorStyle {
    fn default() -> Self {
        Self {
            color: "rgb(63, 63, 63)".to_string(),
            dash: "solid".to_string(),
            width: 1.0,
        }
    }
}

/// Cascade plus the rendering hints a waterfall chart needs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Waterfall {
    pub year: i32,
    pub steps: Vec<CascadeStep>,
    pub connector: ConnectorStyle,
}

impl Waterfall {
    pub fn for_year(actions: &[ActionRecord], year: i32) -> Self {
        Self {
            year,
            steps: build_cascade(&actions_for_year(actions, year)),
            connector: ConnectorStyle::default(),
        }
    }

    pub fn projected(&self) -> f64 {
        self.steps.last().map(|s| s.value).unwrap_or(0.0)
    }
}
