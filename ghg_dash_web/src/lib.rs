use leptos::*;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_COMMIT: &str = env!("GHG_DASH_COMMIT");

use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Blob, FileList, HtmlInputElement, HtmlSelectElement};

#[cfg(feature = "chart_plotly")]
use serde::Serialize;

use ghg_dash::figure::{area_figure, bar_figure, treemap_figure, waterfall_figure};
use ghg_dash::{
    emission_tree, emissions_to_csv, filter_emissions, reduction_series, stacked_bars, summarize,
    DashboardConfig, Dataset, FilterOptions, Selection, Summary, Unit,
};

#[derive(Clone)]
struct FileBytes {
    name: String,
    bytes: Vec<u8>,
}

async fn read_files_from_list(list: &FileList) -> Vec<FileBytes> {
    let mut out = Vec::new();
    for i in 0..list.length() {
        if let Some(file) = list.item(i) {
            let name = file.name();
            if let Ok(buf) = JsFuture::from(file.array_buffer()).await {
                let u8arr = js_sys::Uint8Array::new(&buf);
                let mut bytes = vec![0u8; u8arr.length() as usize];
                u8arr.copy_to(&mut bytes[..]);
                out.push(FileBytes { name, bytes });
            }
        }
    }
    out
}

async fn read_files_from_input(input: &HtmlInputElement) -> Vec<FileBytes> {
    match input.files() {
        Some(list) => read_files_from_list(&list).await,
        None => Vec::new(),
    }
}

/// Plotly wants plain objects, not the `Map`s serde-wasm-bindgen emits by default.
#[cfg(feature = "chart_plotly")]
fn to_js(value: &serde_json::Value) -> Result<JsValue, serde_wasm_bindgen::Error> {
    value.serialize(&serde_wasm_bindgen::Serializer::json_compatible())
}

#[cfg(feature = "chart_plotly")]
fn plot_figure(div_id: &str, figure: &serde_json::Value) {
    let Some(div) = web_sys::window()
        .and_then(|w| w.document())
        .and_then(|d| d.get_element_by_id(div_id))
    else {
        return;
    };
    let (Ok(data), Ok(layout)) = (to_js(&figure["data"]), to_js(&figure["layout"])) else {
        return;
    };
    let plotly = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("Plotly"))
        .unwrap_or(JsValue::UNDEFINED);
    if let Ok(func) = js_sys::Reflect::get(&plotly, &JsValue::from_str("react"))
        .or_else(|_| js_sys::Reflect::get(&plotly, &JsValue::from_str("newPlot")))
        .and_then(|v| v.dyn_into::<js_sys::Function>())
    {
        let _ = func.call3(&JsValue::NULL, &JsValue::from(div), &data, &layout);
    }
}

#[cfg(not(feature = "chart_plotly"))]
fn plot_figure(_div_id: &str, _figure: &serde_json::Value) {}

fn blob_url_from_str(s: &str) -> Option<String> {
    let parts = js_sys::Array::new();
    parts.push(&JsValue::from_str(s));
    let blob = Blob::new_with_str_sequence(&parts).ok()?;
    web_sys::Url::create_object_url_with_blob(&blob).ok()
}

fn target_input(ev: &leptos::ev::Event) -> Option<HtmlInputElement> {
    ev.target()?.dyn_into::<HtmlInputElement>().ok()
}

fn target_select(ev: &leptos::ev::Event) -> Option<HtmlSelectElement> {
    ev.target()?.dyn_into::<HtmlSelectElement>().ok()
}

fn delimiter_from_value(value: &str) -> char {
    match value {
        "tab" => '\t',
        ";" => ';',
        _ => ',',
    }
}

fn delimiter_value(delimiter: char) -> &'static str {
    match delimiter {
        '\t' => "tab",
        ';' => ";",
        _ => ",",
    }
}

/// Check or uncheck `category`, keeping selected categories in option order.
fn toggle_category(selection: &mut Selection, category: &str, checked: bool, order: &[String]) {
    if !checked {
        selection.categories.retain(|c| c != category);
        return;
    }
    if selection.categories.iter().any(|c| c == category) {
        return;
    }
    selection.categories.push(category.to_string());
    selection
        .categories
        .sort_by_key(|c| order.iter().position(|o| o == c).unwrap_or(usize::MAX));
}

fn metric_text(summary: &Summary) -> String {
    format!("{:.2} {}", summary.total, summary.unit.label())
}

#[component]
pub fn App() -> impl IntoView {
    let (emission_files, set_emission_files) = create_signal(Vec::<FileBytes>::new());
    let (action_file, set_action_file) = create_signal(Option::<FileBytes>::None);
    let (delimiter, set_delimiter) = create_signal(',');
    let (decimal_comma, set_decimal_comma) = create_signal(false);
    let (unit, set_unit) = create_signal(Unit::Kg);
    let (dataset, set_dataset) = create_signal(Option::<Dataset>::None);
    let (selection, set_selection) = create_signal(Option::<Selection>::None);
    let (status, set_status) = create_signal(String::from("Choose an emissions CSV to begin."));
    let (rows_href, set_rows_href) = create_signal(String::new());

    // Reload whenever the files or the CSV dialect change
    create_effect(move |_| {
        let files = emission_files.get();
        let actions = action_file.get();
        if files.is_empty() {
            set_dataset.set(None);
            set_selection.set(None);
            return;
        }
        let mut config = DashboardConfig::default();
        config.csv.delimiter = delimiter.get();
        config.csv.decimal_comma = decimal_comma.get();

        let sources: Vec<&[u8]> = files.iter().map(|f| f.bytes.as_slice()).collect();
        let action_bytes = actions.as_ref().map(|f| f.bytes.as_slice());
        match Dataset::from_sources(&sources, action_bytes, &config) {
            Ok(ds) => {
                set_status.set(format!(
                    "Loaded {} emission rows and {} actions.",
                    ds.emissions.len(),
                    ds.actions.len()
                ));
                set_selection.set(Selection::default_for(&ds.emissions));
                set_dataset.set(Some(ds));
            }
            Err(err) => {
                set_dataset.set(None);
                set_selection.set(None);
                set_status.set(format!("Could not load data: {err}"));
            }
        }
    });

    // Every control change redraws all four charts from scratch
    create_effect(move |_| {
        let unit = unit.get();
        let Some(sel) = selection.get() else {
            return;
        };
        dataset.with(|ds| {
            let Some(ds) = ds else {
                return;
            };
            let rows = filter_emissions(&ds.emissions, &sel);
            plot_figure("bar_plot", &bar_figure(&stacked_bars(&rows), unit));
            plot_figure("treemap_plot", &treemap_figure(&emission_tree(&rows), unit));
            plot_figure("area_plot", &area_figure(&reduction_series(&ds.actions), unit));
            plot_figure("waterfall_plot", &waterfall_figure(&ds.waterfall(sel.year), unit));

            let old = rows_href.get_untracked();
            if !old.is_empty() {
                let _ = web_sys::Url::revoke_object_url(&old);
            }
            match emissions_to_csv(&rows) {
                Ok(text) => set_rows_href.set(blob_url_from_str(&text).unwrap_or_default()),
                Err(err) => {
                    set_rows_href.set(String::new());
                    set_status.set(format!("CSV export failed: {err}"));
                }
            }
        });
    });

    let options = move || {
        dataset.with(|ds| {
            ds.as_ref()
                .map(|d| d.options())
                .unwrap_or_else(FilterOptions::default)
        })
    };
    let summary = move || {
        let sel = selection.get()?;
        dataset.with(|ds| {
            ds.as_ref()
                .map(|d| summarize(&d.emissions, &sel, unit.get()))
        })
    };

    let on_emissions = move |ev: leptos::ev::Event| {
        if let Some(input) = target_input(&ev) {
            set_status.set("Reading files…".to_string());
            spawn_local(async move {
                let files = read_files_from_input(&input).await;
                input.set_value("");
                if files.is_empty() {
                    set_status.set("No readable files selected.".to_string());
                } else {
                    set_emission_files.set(files);
                }
            });
        }
    };

    let on_actions = move |ev: leptos::ev::Event| {
        if let Some(input) = target_input(&ev) {
            set_status.set("Reading actions…".to_string());
            spawn_local(async move {
                let files = read_files_from_input(&input).await;
                input.set_value("");
                set_action_file.set(files.into_iter().next());
            });
        }
    };

    let file_list_view = move || {
        emission_files
            .get()
            .into_iter()
            .map(|f| view! { <li>{f.name}</li> })
            .chain(action_file.get().map(|f| view! { <li>{f.name}{" (actions)"}</li> }))
            .collect_view()
    };

    let year_options = move || {
        options()
            .years
            .into_iter()
            .map(|y| view! { <option value={y.to_string()}>{y}</option> })
            .collect_view()
    };

    let category_boxes = move || {
        let order = options().categories;
        order
            .iter()
            .cloned()
            .map(|category| {
                let order = order.clone();
                let shown = category.clone();
                let toggled = category.clone();
                view! {
                    <label>
                        <input type="checkbox"
                            prop:checked=move || selection.with(|s| s.as_ref().map(|s| s.categories.contains(&category)).unwrap_or(false))
                            on:change=move |ev| {
                                if let Some(inp) = target_input(&ev) {
                                    let checked = inp.checked();
                                    set_selection.update(|s| {
                                        if let Some(s) = s.as_mut() {
                                            toggle_category(s, &toggled, checked, &order);
                                        }
                                    });
                                }
                            }/>
                        " "{shown}
                    </label>
                }
            })
            .collect_view()
    };

    view! {
        <main class="tufte" on:dragover=move |e| { e.prevent_default(); } on:drop=move |e| {
            e.prevent_default();
            if let Some(dt) = e.data_transfer() { if let Some(list) = dt.files() {
                spawn_local(async move {
                    let files = read_files_from_list(&list).await;
                    if !files.is_empty() { set_emission_files.set(files); }
                });
            }}
        }>
            <header>
                <h1>"GHG Emissions Dashboard"</h1>
                <p class="subtitle">"Explore emissions by year and category, and see how planned actions cascade into projected emissions."</p>
                <p class="note">{"Web version "}{APP_VERSION}{" ("}{APP_COMMIT}{")"}</p>
            </header>
            <section class="controls">
                <label class="dropzone">
                    <span>"Emissions CSV: drag & drop or click to choose"</span>
                    <input id="emissions_input" type="file" accept=".csv,text/csv" multiple on:change=on_emissions />
                </label>
                <label class="dropzone">
                    <span>"Decarbonization actions CSV"</span>
                    <input id="actions_input" type="file" accept=".csv,text/csv" on:change=on_actions />
                </label>
                <div class="control-row">
                    <label>"Delimiter: "
                        <select on:change=move |ev| {
                            if let Some(sel) = target_select(&ev) { set_delimiter.set(delimiter_from_value(&sel.value())); }
                        } prop:value=move || delimiter_value(delimiter.get())>
                            <option value=",">"comma"</option>
                            <option value=";">"semicolon"</option>
                            <option value="tab">"tab"</option>
                        </select>
                    </label>
                    <label><input type="checkbox" prop:checked=move || decimal_comma.get() on:change=move |ev| {
                        if let Some(inp) = target_input(&ev) { set_decimal_comma.set(inp.checked()); }
                    }/>" Decimal comma"</label>
                    <label><input type="checkbox" prop:checked=move || unit.get() == Unit::Tonnes on:change=move |ev| {
                        if let Some(inp) = target_input(&ev) { set_unit.set(if inp.checked() { Unit::Tonnes } else { Unit::Kg }); }
                    }/>" Show tonnes"</label>
                </div>
                <div class="control-row">
                    <label class="note">"Select Year:"</label>
                    <select on:change=move |ev| {
                        if let Some(sel) = target_select(&ev) {
                            if let Ok(year) = sel.value().parse::<i32>() {
                                set_selection.update(|s| { if let Some(s) = s.as_mut() { s.year = year; } });
                            }
                        }
                    } prop:value=move || selection.get().map(|s| s.year.to_string()).unwrap_or_default()>
                        {year_options}
                    </select>
                </div>
                <div class="control-row">
                    <label class="note">"Select Categories:"</label>
                    {category_boxes}
                </div>
                <span class="note">{move || status.get()}</span>
            </section>
            <section class="files">
                <ul>{file_list_view}</ul>
            </section>
            <section class="metric">
                <h2>{move || summary().map(|s| format!("Total Emissions in {}", s.year)).unwrap_or_default()}</h2>
                <p class="metric">{move || summary().map(|s| metric_text(&s)).unwrap_or_default()}</p>
            </section>
            <section class="plots">
                <div id="bar_plot" class="plot"></div>
                <div id="treemap_plot" class="plot"></div>
                <div id="area_plot" class="plot"></div>
                <div id="waterfall_plot" class="plot"></div>
            </section>
            <section class="downloads">
                <a id="dl_rows" href=move || rows_href.get() download="filtered_emissions.csv" style=move || if rows_href.get().is_empty() {"display:none;".to_string()} else {"display:inline;".to_string()}>"Download filtered rows"</a>
            </section>
            <section class="files">
                <p class="note">"Nothing leaves your device. All processing happens locally in your browser."</p>
            </section>
        </main>
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    leptos::mount_to_body(|| view! { <App/> });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(categories: &[&str]) -> Selection {
        Selection {
            year: 2023,
            categories: categories.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn toggling_keeps_option_order() {
        let order: Vec<String> = ["Energy", "Travel", "Waste"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let mut sel = selection(&["Energy", "Travel", "Waste"]);
        toggle_category(&mut sel, "Travel", false, &order);
        assert_eq!(sel.categories, vec!["Energy", "Waste"]);
        toggle_category(&mut sel, "Travel", true, &order);
        assert_eq!(sel.categories, vec!["Energy", "Travel", "Waste"]);
        toggle_category(&mut sel, "Travel", true, &order);
        assert_eq!(sel.categories.len(), 3);
    }

    #[test]
    fn unchecking_everything_leaves_an_empty_selection() {
        let order = vec!["Energy".to_string()];
        let mut sel = selection(&["Energy"]);
        toggle_category(&mut sel, "Energy", false, &order);
        assert!(sel.categories.is_empty());
    }

    #[test]
    fn delimiter_values_round_trip() {
        for d in [',', ';', '\t'] {
            assert_eq!(delimiter_from_value(delimiter_value(d)), d);
        }
        assert_eq!(delimiter_from_value("anything"), ',');
    }

    #[test]
    fn metric_uses_two_decimals_and_unit() {
        let summary = Summary {
            year: 2023,
            categories: vec!["Energy".into()],
            rows: 2,
            total_kg: 1234.5,
            total: 1.23,
            unit: Unit::Tonnes,
        };
        assert_eq!(metric_text(&summary), "1.23 tCO2e");
    }
}
