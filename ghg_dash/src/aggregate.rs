//! Group-by aggregations behind the bar, treemap and area charts.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::{ActionRecord, EmissionRecord};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BarSegment {
    pub subcategory: String,
    /// Aligned with `StackedBars::categories`.
    pub values: Vec<f64>,
}

/// Emissions per category, stacked by subcategory.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct StackedBars {
    pub categories: Vec<String>,
    pub segments: Vec<BarSegment>,
}

impl StackedBars {
    pub fn category_totals(&self) -> Vec<f64> {
        (0..self.categories.len())
            .map(|i| self.segments.iter().map(|s| s.values[i]).sum())
            .collect()
    }
}

pub fn stacked_bars(rows: &[&EmissionRecord]) -> StackedBars {
    let mut category_index: HashMap<&str, usize> = HashMap::new();
    let mut segment_index: HashMap<&str, usize> = HashMap::new();
    let mut bars = StackedBars::default();

    for row in rows {
        let c = *category_index.entry(row.category.as_str()).or_insert_with(|| {
            bars.categories.push(row.category.clone());
            for segment in bars.segments.iter_mut() {
                segment.values.push(0.0);
            }
            bars.categories.len() - 1
        });
        let width = bars.categories.len();
        let s = *segment_index.entry(row.subcategory.as_str()).or_insert_with(|| {
            bars.segments.push(BarSegment {
                subcategory: row.subcategory.clone(),
                values: vec![0.0; width],
            });
            bars.segments.len() - 1
        });
        bars.segments[s].values[c] += row.emissions_kg;
    }
    bars
}

pub const TREE_ROOT_LABEL: &str = "All";

/// Category → subcategory → model id hierarchy. Each node's value is the sum
/// of its leaves.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TreeNode {
    pub label: String,
    pub value: f64,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            value: 0.0,
            children: Vec::new(),
        }
    }

    fn child_mut(&mut self, label: &str) -> &mut TreeNode {
        let idx = match self.children.iter().position(|c| c.label == label) {
            Some(idx) => idx,
            None => {
                self.children.push(TreeNode::new(label));
                self.children.len() - 1
            }
        };
        &mut self.children[idx]
    }

    pub(crate) fn sort_descending(&mut self) {
        self.children.sort_by_key(|c| Reverse(OrderedFloat(c.value)));
        for child in self.children.iter_mut() {
            child.sort_descending();
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Visit nodes depth-first with the label path from the root's children down.
    pub fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(&[&str], &TreeNode),
    {
        fn go<'a, F>(node: &'a TreeNode, path: &mut Vec<&'a str>, visit: &mut F)
        where
            F: FnMut(&[&str], &TreeNode),
        {
            for child in &node.children {
                path.push(child.label.as_str());
                visit(path, child);
                go(child, path, visit);
                path.pop();
            }
        }
        let mut path = Vec::new();
        go(self, &mut path, &mut visit);
    }
}

pub fn emission_tree(rows: &[&EmissionRecord]) -> TreeNode {
    let mut root = TreeNode::new(TREE_ROOT_LABEL);
    for row in rows {
        let kg = row.emissions_kg;
        root.value += kg;
        let category = root.child_mut(&row.category);
        category.value += kg;
        let subcategory = category.child_mut(&row.subcategory);
        subcategory.value += kg;
        subcategory.child_mut(&row.model_id).value += kg;
    }
    root.sort_descending();
    root
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SolutionSeries {
    pub solution: String,
    /// Aligned with `ReductionSeries::years`.
    pub values: Vec<f64>,
}

/// Reduction per solution across every year of the actions table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct ReductionSeries {
    pub years: Vec<i32>,
    pub series: Vec<SolutionSeries>,
}

pub fn reduction_series(actions: &[ActionRecord]) -> ReductionSeries {
    let years: Vec<i32> = actions
        .iter()
        .map(|a| a.year)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let year_index: HashMap<i32, usize> = years.iter().enumerate().map(|(i, y)| (*y, i)).collect();

    let mut series: Vec<SolutionSeries> = Vec::new();
    let mut solution_index: HashMap<&str, usize> = HashMap::new();
    for action in actions {
        let s = *solution_index
            .entry(action.solution.as_str())
            .or_insert_with(|| {
                series.push(SolutionSeries {
                    solution: action.solution.clone(),
                    values: vec![0.0; years.len()],
                });
                series.len() - 1
            });
        series[s].values[year_index[&action.year]] += action.reduction_kg;
    }
    ReductionSeries { years, series }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emission(category: &str, subcategory: &str, model_id: &str, kg: f64) -> EmissionRecord {
        EmissionRecord {
            year: 2023,
            category: category.to_string(),
            subcategory: subcategory.to_string(),
            model_id: model_id.to_string(),
            emissions_kg: kg,
        }
    }

    fn action(year: i32, solution: &str, kg: f64) -> ActionRecord {
        ActionRecord {
            year,
            solution: solution.to_string(),
            reduction_kg: kg,
        }
    }

    #[test]
    fn bars_align_segments_with_categories() {
        let data = vec![
            emission("Energy", "Gas", "g1", 10.0),
            emission("Travel", "Flights", "f1", 40.0),
            emission("Energy", "Electricity", "e1", 5.0),
            emission("Travel", "Gas", "g2", 1.0),
            emission("Energy", "Gas", "g3", 2.5),
        ];
        let rows: Vec<&EmissionRecord> = data.iter().collect();
        let bars = stacked_bars(&rows);
        assert_eq!(bars.categories, vec!["Energy", "Travel"]);
        let names: Vec<&str> = bars.segments.iter().map(|s| s.subcategory.as_str()).collect();
        assert_eq!(names, vec!["Gas", "Flights", "Electricity"]);
        assert_eq!(bars.segments[0].values, vec![12.5, 1.0]);
        assert_eq!(bars.segments[1].values, vec![0.0, 40.0]);
        assert_eq!(bars.segments[2].values, vec![5.0, 0.0]);
        assert_eq!(bars.category_totals(), vec![17.5, 41.0]);
    }

    #[test]
    fn late_category_pads_existing_segments() {
        let data = vec![
            emission("Energy", "Gas", "g1", 1.0),
            emission("Waste", "Landfill", "w1", 2.0),
        ];
        let rows: Vec<&EmissionRecord> = data.iter().collect();
        let bars = stacked_bars(&rows);
        for segment in &bars.segments {
            assert_eq!(segment.values.len(), bars.categories.len());
        }
    }

    #[test]
    fn tree_sums_and_sorts_children() {
        let data = vec![
            emission("Energy", "Gas", "boiler", 10.0),
            emission("Travel", "Flights", "long-haul", 40.0),
            emission("Energy", "Electricity", "grid", 5.0),
            emission("Energy", "Gas", "stove", 2.0),
        ];
        let rows: Vec<&EmissionRecord> = data.iter().collect();
        let tree = emission_tree(&rows);
        assert_eq!(tree.label, TREE_ROOT_LABEL);
        assert_eq!(tree.value, 57.0);
        assert_eq!(tree.children[0].label, "Travel");
        let energy = &tree.children[1];
        assert_eq!(energy.value, 17.0);
        assert_eq!(energy.children[0].label, "Gas");
        assert_eq!(energy.children[0].value, 12.0);
        assert_eq!(energy.children[0].children[0].label, "boiler");

        let mut visited = Vec::new();
        tree.walk(|path, node| {
            let child_sum: f64 = node.children.iter().map(|c| c.value).sum();
            if !node.is_leaf() {
                assert_eq!(node.value, child_sum);
            }
            visited.push(path.join("/"));
        });
        assert_eq!(visited.len(), 2 + 3 + 4);
        assert!(visited.contains(&"Energy/Gas/stove".to_string()));
    }

    #[test]
    fn reduction_series_fills_gaps_with_zero() {
        let actions = vec![
            action(2030, "Solar", -500.0),
            action(2025, "Solar", -100.0),
            action(2030, "Insulation", -300.0),
            action(2030, "Solar", -50.0),
        ];
        let series = reduction_series(&actions);
        assert_eq!(series.years, vec![2025, 2030]);
        assert_eq!(series.series[0].solution, "Solar");
        assert_eq!(series.series[0].values, vec![-100.0, -550.0]);
        assert_eq!(series.series[1].values, vec![0.0, -300.0]);
    }
}
