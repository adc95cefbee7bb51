//! Plotly figure specs (`{"data": [...], "layout": {...}}`) for the dashboard charts.

use serde_json::{json, Value as JsonValue};

use crate::aggregate::{ReductionSeries, StackedBars, TreeNode};
use crate::cascade::Waterfall;
use crate::treemap::positive_tree;
use crate::Unit;

pub const BAR_TITLE: &str = "Emissions by Category and Subcategory";
pub const TREEMAP_TITLE: &str = "Emissions Breakdown: Category > Subcategory > Model";
pub const AREA_TITLE: &str = "Emission Reductions Over Time by Solution";

pub fn waterfall_title(year: i32) -> String {
    format!("Emissions Cascade {year}")
}

fn axis_title(text: &str) -> JsonValue {
    json!({ "title": { "text": text } })
}

fn scaled(values: &[f64], unit: Unit) -> Vec<f64> {
    values.iter().map(|v| unit.scale(*v)).collect()
}

pub fn bar_figure(bars: &StackedBars, unit: Unit) -> JsonValue {
    let data: Vec<JsonValue> = bars
        .segments
        .iter()
        .map(|segment| {
            json!({
                "type": "bar",
                "name": segment.subcategory,
                "x": bars.categories,
                "y": scaled(&segment.values, unit),
                "hovertemplate": format!(
                    "%{{x}}<br>{}: %{{y:.2f}} {}<extra></extra>",
                    segment.subcategory,
                    unit.label()
                ),
            })
        })
        .collect();
    json!({
        "data": data,
        "layout": {
            "title": { "text": BAR_TITLE },
            "barmode": "stack",
            "xaxis": axis_title("Category"),
            "yaxis": axis_title(&format!("Emissions ({})", unit.label())),
            "legend": { "title": { "text": "Subcategory" } },
        },
    })
}

/// Non-positive nodes are dropped first: a `total` treemap cannot draw a
/// child larger than its parent.
pub fn treemap_figure(tree: &TreeNode, unit: Unit) -> JsonValue {
    let tree = &positive_tree(tree);
    let mut ids = vec![tree.label.clone()];
    let mut labels = vec![tree.label.clone()];
    let mut parents = vec![String::new()];
    let mut values = vec![unit.scale(tree.value)];
    tree.walk(|path, node| {
        let parent = if path.len() > 1 {
            format!("{}/{}", tree.label, path[..path.len() - 1].join("/"))
        } else {
            tree.label.clone()
        };
        ids.push(format!("{}/{}", tree.label, path.join("/")));
        labels.push(node.label.clone());
        parents.push(parent);
        values.push(unit.scale(node.value));
    });
    json!({
        "data": [{
            "type": "treemap",
            "ids": ids,
            "labels": labels,
            "parents": parents,
            "values": values,
            "branchvalues": "total",
            "textinfo": "label+value+percent parent",
        }],
        "layout": {
            "title": { "text": TREEMAP_TITLE },
            "margin": { "t": 50, "l": 25, "r": 25, "b": 25 },
        },
    })
}

pub fn area_figure(series: &ReductionSeries, unit: Unit) -> JsonValue {
    let data: Vec<JsonValue> = series
        .series
        .iter()
        .map(|s| {
            json!({
                "type": "scatter",
                "mode": "lines",
                "name": s.solution,
                "x": series.years,
                "y": scaled(&s.values, unit),
                "stackgroup": "reductions",
            })
        })
        .collect();
    json!({
        "data": data,
        "layout": {
            "title": { "text": AREA_TITLE },
            "xaxis": axis_title("Year"),
            "yaxis": axis_title(&format!("Reduction compared to no action ({})", unit.label())),
            "legend": { "title": { "text": "Solution" } },
        },
    })
}

/// Steps sit at integer positions with their labels as tick text, so repeated
/// solution names keep separate bars.
pub fn waterfall_figure(waterfall: &Waterfall, unit: Unit) -> JsonValue {
    let measure: Vec<&str> = waterfall.steps.iter().map(|s| s.kind.measure()).collect();
    let x: Vec<usize> = (0..waterfall.steps.len()).collect();
    let labels: Vec<&str> = waterfall.steps.iter().map(|s| s.label.as_str()).collect();
    let y: Vec<f64> = waterfall.steps.iter().map(|s| unit.scale(s.value)).collect();
    let text: Vec<String> = y.iter().map(|v| format!("{v:.2}")).collect();
    let connector = &waterfall.connector;
    json!({
        "data": [{
            "type": "waterfall",
            "name": waterfall.year.to_string(),
            "orientation": "v",
            "measure": measure,
            "x": x,
            "y": y,
            "text": text,
            "hovertext": labels,
            "textposition": "outside",
            "connector": {
                "line": {
                    "color": connector.color,
                    "dash": connector.dash,
                    "width": connector.width,
                },
            },
        }],
        "layout": {
            "title": { "text": waterfall_title(waterfall.year) },
            "showlegend": false,
            "xaxis": {
                "tickmode": "array",
                "tickvals": x,
                "ticktext": labels,
            },
            "yaxis": axis_title(&format!("Emissions ({})", unit.label())),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{emission_tree, reduction_series, stacked_bars};
    use crate::{ActionRecord, EmissionRecord};

    fn rows() -> Vec<EmissionRecord> {
        vec![
            EmissionRecord {
                year: 2023,
                category: "Energy".into(),
                subcategory: "Gas".into(),
                model_id: "boiler".into(),
                emissions_kg: 1500.0,
            },
            EmissionRecord {
                year: 2023,
                category: "Travel".into(),
                subcategory: "Flights".into(),
                model_id: "long-haul".into(),
                emissions_kg: 500.0,
            },
        ]
    }

    fn action(year: i32, solution: &str, reduction_kg: f64) -> ActionRecord {
        ActionRecord {
            year,
            solution: solution.to_string(),
            reduction_kg,
        }
    }

    #[test]
    fn repeated_solutions_keep_separate_slots() {
        let actions = vec![action(2030, "Solar", -100.0), action(2030, "Solar", -50.0)];
        let fig = waterfall_figure(&Waterfall::for_year(&actions, 2030), Unit::Kg);
        let trace = &fig["data"][0];
        let xaxis = &fig["layout"]["xaxis"];

        assert_eq!(trace["x"], json!([0, 1, 2, 3]));
        assert_eq!(trace["y"], json!([0.0, -100.0, -50.0, -150.0]));
        assert_eq!(xaxis["tickmode"], "array");
        assert_eq!(xaxis["tickvals"], trace["x"]);
        assert_eq!(
            xaxis["ticktext"],
            json!(["Baseline Emissions", "Solar", "Solar", "Projected Emissions"])
        );
    }

    #[test]
    fn treemap_drops_sinks_and_keeps_totals_consistent() {
        let mut data = rows();
        data.push(EmissionRecord {
            year: 2023,
            category: "Forestry".into(),
            subcategory: "Sink".into(),
            model_id: "trees".into(),
            emissions_kg: -20.0,
        });
        let refs: Vec<&EmissionRecord> = data.iter().collect();
        let fig = treemap_figure(&emission_tree(&refs), Unit::Kg);
        let trace = &fig["data"][0];
        let ids = trace["ids"].as_array().unwrap();
        let parents = trace["parents"].as_array().unwrap();
        let values = trace["values"].as_array().unwrap();

        assert!(!ids.iter().any(|id| id.as_str().unwrap().contains("Forestry")));
        assert_eq!(values[0], 2000.0);
        for (i, parent) in parents.iter().enumerate().skip(1) {
            let p = ids.iter().position(|id| id == parent).unwrap();
            let child = values[i].as_f64().unwrap();
            assert!(child > 0.0);
            assert!(child <= values[p].as_f64().unwrap(), "{} exceeds {}", ids[i], parent);
        }
    }

    #[test]
    fn bar_traces_follow_segments() {
        let data = rows();
        let refs: Vec<&EmissionRecord> = data.iter().collect();
        let fig = bar_figure(&stacked_bars(&refs), Unit::Tonnes);
        assert_eq!(fig["layout"]["barmode"], "stack");
        assert_eq!(fig["data"].as_array().unwrap().len(), 2);
        assert_eq!(fig["data"][0]["name"], "Gas");
        assert_eq!(fig["data"][0]["y"], json!([1.5, 0.0]));
        assert_eq!(fig["layout"]["yaxis"]["title"]["text"], "Emissions (tCO2e)");
    }

    #[test]
    fn treemap_parents_resolve_to_ids() {
        let data = rows();
        let refs: Vec<&EmissionRecord> = data.iter().collect();
        let fig = treemap_figure(&emission_tree(&refs), Unit::Kg);
        let ids = fig["data"][0]["ids"].as_array().unwrap();
        let parents = fig["data"][0]["parents"].as_array().unwrap();
        assert_eq!(ids.len(), 1 + 2 + 2 + 2);
        for parent in parents.iter().skip(1) {
            assert!(ids.contains(parent), "dangling parent {parent}");
        }
        assert_eq!(fig["data"][0]["values"][0], 2000.0);
        assert!(ids.contains(&json!("All/Energy/Gas/boiler")));
    }

    #[test]
    fn waterfall_arrays_are_aligned() {
        let actions = vec![action(2030, "Solar", -500.0), action(2030, "Insulation", -300.0)];
        let fig = waterfall_figure(&Waterfall::for_year(&actions, 2030), Unit::Kg);
        let trace = &fig["data"][0];
        assert_eq!(
            trace["measure"],
            json!(["absolute", "relative", "relative", "absolute"])
        );
        assert_eq!(trace["x"], json!([0, 1, 2, 3]));
        assert_eq!(
            fig["layout"]["xaxis"]["ticktext"],
            json!(["Baseline Emissions", "Solar", "Insulation", "Projected Emissions"])
        );
        assert_eq!(trace["y"], json!([0.0, -500.0, -300.0, -800.0]));
        assert_eq!(trace["text"][3], "-800.00");
        assert_eq!(trace["connector"]["line"]["color"], "rgb(63, 63, 63)");
        assert_eq!(fig["layout"]["title"]["text"], "Emissions Cascade 2030");
    }

    #[test]
    fn area_traces_share_a_stackgroup() {
        let actions = vec![action(2025, "Solar", -100.0), action(2030, "Wind", -300.0)];
        let fig = area_figure(&reduction_series(&actions), Unit::Kg);
        assert_eq!(fig["data"][0]["x"], json!([2025, 2030]));
        assert_eq!(fig["data"][1]["y"], json!([0.0, -300.0]));
        assert_eq!(fig["data"][0]["stackgroup"], fig["data"][1]["stackgroup"]);
    }
}
