use std::fs::{self, File};
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use ghg_dash::aggregate::TreeNode;
use ghg_dash::cascade::{cascade_bars, CascadeBar, StepKind, Waterfall};
use ghg_dash::figure::{
    area_figure, bar_figure, treemap_figure, waterfall_figure, waterfall_title, AREA_TITLE,
    BAR_TITLE, TREEMAP_TITLE,
};
use ghg_dash::treemap::{self, Rect};
use ghg_dash::{
    emission_tree, emissions_to_csv, filter_emissions, parse_actions, parse_emissions,
    reduction_series, stacked_bars, summarize, DashError, DashboardConfig, Dataset,
    EmissionRecord, ReductionSeries, Selection, StackedBars, Summary, Unit,
};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Greenhouse-gas emissions dashboard CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the year and category choices found in the emissions data
    Options(DataArgs),
    /// Print total emissions for the selected year and categories
    Summary(SummaryArgs),
    /// Write the chart tables and the filtered rows as CSV
    Export(ExportArgs),
    /// Render the dashboard charts to PNG or SVG
    Plot(PlotArgs),
    /// Write a standalone HTML dashboard with interactive Plotly charts
    Html(HtmlArgs),
}

impl Command {
    fn data(&self) -> &DataArgs {
        match self {
            Command::Options(args) => args,
            Command::Summary(args) => &args.data,
            Command::Export(args) => &args.data,
            Command::Plot(args) => &args.data,
            Command::Html(args) => &args.data,
        }
    }
}

#[derive(Args, Debug)]
struct DataArgs {
    /// Emissions CSV files (concatenated in the order given)
    #[arg(long, required = true, num_args = 1.., value_hint = ValueHint::FilePath)]
    emissions: Vec<PathBuf>,

    /// Decarbonization actions CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    actions: Option<PathBuf>,

    /// JSON dashboard config (column aliases, CSV dialect, unit)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Year to show (defaults to the most recent)
    #[arg(long)]
    year: Option<i32>,

    /// Comma separated categories (defaults to all)
    #[arg(long)]
    categories: Option<String>,

    /// CSV field delimiter
    #[arg(long)]
    delimiter: Option<char>,

    /// Numbers use a decimal comma (`1 234,5`)
    #[arg(long, action = ArgAction::SetTrue)]
    decimal_comma: bool,

    /// Display tonnes instead of kilograms
    #[arg(long, action = ArgAction::SetTrue)]
    tonnes: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Log stage timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Args, Debug)]
struct SummaryArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Print a JSON report instead of the metric line
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Output directory (`-` writes only the cascade to stdout)
    #[arg(short, long, default_value = "export", value_hint = ValueHint::DirPath)]
    out_dir: PathBuf,
}

#[derive(Args, Debug)]
struct PlotArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Output directory for chart images
    #[arg(short, long, default_value = "charts", value_hint = ValueHint::DirPath)]
    out_dir: PathBuf,

    /// Image format
    #[arg(long, value_enum, default_value_t = ChartKind::Png)]
    format: ChartKind,

    /// Charts to render (defaults to all)
    #[arg(long, value_enum, value_delimiter = ',')]
    charts: Vec<ChartName>,

    /// Image width in pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Image height in pixels
    #[arg(long, default_value_t = 760)]
    height: u32,
}

#[derive(Args, Debug)]
struct HtmlArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Output HTML path
    #[arg(short, long, default_value = "dashboard.html", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ChartKind {
    Png,
    Svg,
}

impl ChartKind {
    fn extension(self) -> &'static str {
        match self {
            ChartKind::Png => "png",
            ChartKind::Svg => "svg",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ChartName {
    Bar,
    Treemap,
    Area,
    Waterfall,
}

impl ChartName {
    const ALL: [ChartName; 4] = [
        ChartName::Bar,
        ChartName::Treemap,
        ChartName::Area,
        ChartName::Waterfall,
    ];

    fn file_stem(self) -> &'static str {
        match self {
            ChartName::Bar => "emissions_bar",
            ChartName::Treemap => "emissions_treemap",
            ChartName::Area => "reductions_area",
            ChartName::Waterfall => "emissions_waterfall",
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.command.data().verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Options(args) => handle_options(args),
        Command::Summary(args) => handle_summary(args),
        Command::Export(args) => handle_export(args),
        Command::Plot(args) => handle_plot(args),
        Command::Html(args) => handle_html(args),
    }
}

fn load_config(args: &DataArgs) -> Result<DashboardConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            DashboardConfig::from_json_str(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => DashboardConfig::default(),
    };
    if let Some(delimiter) = args.delimiter {
        config.csv.delimiter = delimiter;
        config.csv.delimiter_byte()?;
    }
    if args.decimal_comma {
        config.csv.decimal_comma = true;
    }
    if args.tonnes {
        config.unit = Unit::Tonnes;
    }
    Ok(config)
}

fn load_dataset(args: &DataArgs, config: &DashboardConfig) -> Result<Dataset> {
    let t_parse = Instant::now();
    let inputs: Vec<(usize, PathBuf)> = args.emissions.iter().cloned().enumerate().collect();

    let mut parsed: Vec<(usize, Vec<u8>, Vec<EmissionRecord>)> = inputs
        .par_iter()
        .map(
            |(idx, path)| -> Result<(usize, Vec<u8>, Vec<EmissionRecord>)> {
                let bytes =
                    fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
                let rows = parse_emissions(&bytes, &config.emissions_columns, &config.csv)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
                debug!("{}: {} emission rows", path.display(), rows.len());
                Ok((*idx, bytes, rows))
            },
        )
        .collect::<Result<Vec<_>>>()?;

    // Restore argument order
    parsed.sort_by_key(|(idx, _, _)| *idx);

    let action_bytes = match args.actions.as_ref() {
        Some(path) => {
            Some(fs::read(path).with_context(|| format!("failed to read {}", path.display()))?)
        }
        None => None,
    };
    let actions = match (action_bytes.as_deref(), args.actions.as_ref()) {
        (Some(bytes), Some(path)) => parse_actions(bytes, &config.actions_columns, &config.csv)
            .with_context(|| format!("failed to parse {}", path.display()))?,
        _ => Vec::new(),
    };

    let fingerprint = ghg_dash::fingerprint(
        parsed
            .iter()
            .map(|(_, bytes, _)| bytes.as_slice())
            .chain(action_bytes.as_deref()),
    );
    let emissions: Vec<EmissionRecord> = parsed
        .into_iter()
        .flat_map(|(_, _, rows)| rows)
        .collect();
    if emissions.is_empty() {
        return Err(DashError::EmptyDataset.into());
    }

    if args.profile || args.verbose {
        info!(
            "Parse stage: {:.1} ms ({} emission rows, {} action rows)",
            t_parse.elapsed().as_secs_f64() * 1000.0,
            emissions.len(),
            actions.len()
        );
    }
    Ok(Dataset::new(emissions, actions, fingerprint))
}

fn parse_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn resolve_selection(args: &DataArgs, dataset: &Dataset) -> Result<Selection> {
    let options = dataset.options();
    let mut selection =
        Selection::default_for(&dataset.emissions).ok_or(DashError::EmptyDataset)?;
    if let Some(year) = args.year {
        if !options.years.contains(&year) {
            warn!("Year {} not present in emissions data {:?}", year, options.years);
        }
        selection.year = year;
    }
    if let Some(list) = args.categories.as_ref() {
        let categories = parse_list(list);
        for category in &categories {
            if !options.categories.contains(category) {
                warn!("Unknown category '{}'", category);
            }
        }
        selection.categories = categories;
    }
    debug!(
        "Selection: year {} with {} categories",
        selection.year,
        selection.categories.len()
    );
    Ok(selection)
}

/// Everything a run needs: parsed data, resolved selection, config.
struct Session {
    config: DashboardConfig,
    dataset: Dataset,
    selection: Selection,
}

impl Session {
    fn open(args: &DataArgs) -> Result<Self> {
        let config = load_config(args)?;
        let dataset = load_dataset(args, &config)?;
        let selection = resolve_selection(args, &dataset)?;
        Ok(Self {
            config,
            dataset,
            selection,
        })
    }

    fn unit(&self) -> Unit {
        self.config.unit
    }

    fn rows(&self) -> Vec<&EmissionRecord> {
        filter_emissions(&self.dataset.emissions, &self.selection)
    }

    fn summary(&self) -> Summary {
        summarize(&self.dataset.emissions, &self.selection, self.unit())
    }

    fn waterfall(&self) -> Waterfall {
        self.dataset.waterfall(self.selection.year)
    }
}

fn handle_options(args: DataArgs) -> Result<()> {
    let config = load_config(&args)?;
    let dataset = load_dataset(&args, &config)?;
    let options = dataset.options();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "Years:")?;
    for (idx, year) in options.years.iter().enumerate() {
        let marker = if idx == 0 { " (default)" } else { "" };
        writeln!(out, "  {}{}", year, marker)?;
    }
    writeln!(out, "Categories (all selected by default):")?;
    for category in &options.categories {
        writeln!(out, "  {}", category)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct SummaryReport<'a> {
    #[serde(flatten)]
    summary: &'a Summary,
    fingerprint: &'a str,
    generated_at: String,
    emissions_files: Vec<String>,
    actions_file: Option<String>,
}

fn metric_line(summary: &Summary) -> String {
    format!(
        "Total Emissions in {} ({}): {:.2}",
        summary.year,
        summary.unit.label(),
        summary.total
    )
}

fn handle_summary(args: SummaryArgs) -> Result<()> {
    let session = Session::open(&args.data)?;
    let summary = session.summary();
    info!(
        "Summarized {} rows across {} categories",
        summary.rows,
        summary.categories.len()
    );

    if args.json {
        let report = SummaryReport {
            summary: &summary,
            fingerprint: &session.dataset.fingerprint,
            generated_at: Utc::now().to_rfc3339(),
            emissions_files: args
                .data
                .emissions
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            actions_file: args.data.actions.as_ref().map(|p| p.display().to_string()),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", metric_line(&summary));
    }
    Ok(())
}

fn handle_export(args: ExportArgs) -> Result<()> {
    let session = Session::open(&args.data)?;
    let waterfall = session.waterfall();

    if args.out_dir.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        return write_cascade_rows(&waterfall, &mut writer);
    }

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;
    let rows = session.rows();

    let path = args.out_dir.join("bars.csv");
    write_bar_rows(&stacked_bars(&rows), &mut csv_file(&path)?)?;
    info!("Wrote {}", path.display());

    let path = args.out_dir.join("treemap.csv");
    write_tree_rows(&emission_tree(&rows), &mut csv_file(&path)?)?;
    info!("Wrote {}", path.display());

    let path = args.out_dir.join("reductions.csv");
    write_reduction_rows(&reduction_series(&session.dataset.actions), &mut csv_file(&path)?)?;
    info!("Wrote {}", path.display());

    let path = args.out_dir.join("cascade.csv");
    write_cascade_rows(&waterfall, &mut csv_file(&path)?)?;
    info!("Wrote {}", path.display());

    let path = args.out_dir.join("rows.csv");
    fs::write(&path, emissions_to_csv(&rows)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Wrote {} ({} rows)", path.display(), rows.len());
    Ok(())
}

fn csv_file(path: &Path) -> Result<csv::Writer<File>> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(csv::Writer::from_writer(file))
}

fn write_bar_rows<W: Write>(bars: &StackedBars, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record(["category", "subcategory", "emissions_kg"])?;
    for segment in &bars.segments {
        for (category, value) in bars.categories.iter().zip(segment.values.iter()) {
            writer.write_record([
                category.as_str(),
                segment.subcategory.as_str(),
                value.to_string().as_str(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_tree_rows<W: Write>(tree: &TreeNode, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record(["depth", "category", "subcategory", "model_id", "emissions_kg"])?;
    let mut rows: Vec<[String; 5]> = Vec::new();
    tree.walk(|path, node| {
        let level = |i: usize| path.get(i).map(|s| s.to_string()).unwrap_or_default();
        rows.push([
            path.len().to_string(),
            level(0),
            level(1),
            level(2),
            node.value.to_string(),
        ]);
    });
    for row in rows {
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_reduction_rows<W: Write>(
    series: &ReductionSeries,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record(["year", "solution", "reduction_kg"])?;
    for solution in &series.series {
        for (year, value) in series.years.iter().zip(solution.values.iter()) {
            writer.write_record([
                year.to_string(),
                solution.solution.clone(),
                value.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_cascade_rows<W: Write>(waterfall: &Waterfall, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record(["position", "label", "kind", "value_kg", "start_kg", "end_kg"])?;
    let bars = cascade_bars(&waterfall.steps);
    for (idx, (step, bar)) in waterfall.steps.iter().zip(bars.iter()).enumerate() {
        writer.write_record([
            idx.to_string(),
            step.label.clone(),
            step.kind.measure().to_string(),
            step.value.to_string(),
            bar.start.to_string(),
            bar.end.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<()> {
    let session = Session::open(&args.data)?;
    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;

    let rows = session.rows();
    if rows.is_empty() {
        warn!("Selection matched no emission rows; emission charts will be empty");
    }
    let bars = stacked_bars(&rows);
    let tree = emission_tree(&rows);
    let reductions = reduction_series(&session.dataset.actions);
    let waterfall = session.waterfall();

    let charts: Vec<ChartName> = if args.charts.is_empty() {
        ChartName::ALL.to_vec()
    } else {
        args.charts.clone()
    };
    let size = (args.width.max(320), args.height.max(240));
    let unit = session.unit();

    for name in charts {
        let job = match name {
            ChartName::Bar => ChartJob::Bar(&bars),
            ChartName::Treemap => ChartJob::Treemap(&tree),
            ChartName::Area => {
                if reductions.years.is_empty() {
                    info!("No action rows; skipping area chart");
                    continue;
                }
                ChartJob::Area(&reductions)
            }
            ChartName::Waterfall => ChartJob::Waterfall(&waterfall),
        };
        let path = args
            .out_dir
            .join(format!("{}.{}", name.file_stem(), args.format.extension()));
        let t_plot = Instant::now();
        match render_chart_guard(&job, &path, args.format, size, unit) {
            Ok(()) => info!("Wrote plot: {}", path.display()),
            Err(err) => warn!("Skipping {} ({}): {}", name.file_stem(), path.display(), err),
        }
        if args.data.profile {
            info!(
                "Plot stage {}: {:.1} ms",
                name.file_stem(),
                t_plot.elapsed().as_secs_f64() * 1000.0
            );
        }
    }
    Ok(())
}

enum ChartJob<'a> {
    Bar(&'a StackedBars),
    Treemap(&'a TreeNode),
    Area(&'a ReductionSeries),
    Waterfall(&'a Waterfall),
}

impl ChartJob<'_> {
    fn draw<DB>(&self, root: DrawingArea<DB, Shift>, unit: Unit) -> Result<()>
    where
        DB: DrawingBackend,
        DB::ErrorType: 'static,
    {
        match self {
            ChartJob::Bar(bars) => draw_bar_chart(root, bars, unit),
            ChartJob::Treemap(tree) => draw_treemap(root, tree, unit),
            ChartJob::Area(series) => draw_area_chart(root, series, unit),
            ChartJob::Waterfall(waterfall) => draw_waterfall(root, waterfall, unit),
        }
    }
}

fn render_chart(
    job: &ChartJob<'_>,
    path: &Path,
    kind: ChartKind,
    size: (u32, u32),
    unit: Unit,
) -> Result<()> {
    match kind {
        ChartKind::Png => job.draw(BitMapBackend::new(path, size).into_drawing_area(), unit),
        ChartKind::Svg => job.draw(SVGBackend::new(path, size).into_drawing_area(), unit),
    }
}

fn render_chart_guard(
    job: &ChartJob<'_>,
    path: &Path,
    kind: ChartKind,
    size: (u32, u32),
    unit: Unit,
) -> Result<(), String> {
    let render = || {
        render_chart(job, path, kind, size, unit).map_err(|e| format!("plotting error: {}", e))
    };
    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

const PALETTE: [RGBColor; 10] = [
    RGBColor(99, 110, 250),
    RGBColor(239, 85, 59),
    RGBColor(0, 204, 150),
    RGBColor(171, 99, 250),
    RGBColor(255, 161, 90),
    RGBColor(25, 211, 243),
    RGBColor(255, 102, 146),
    RGBColor(182, 232, 128),
    RGBColor(255, 151, 255),
    RGBColor(254, 203, 82),
];

fn palette(idx: usize) -> RGBColor {
    PALETTE[idx % PALETTE.len()]
}

fn label_font(size: f64) -> FontDesc<'static> {
    FontDesc::new(FontFamily::SansSerif, size, FontStyle::Normal)
}

/// Axis range covering zero and every finite value, padded away from zero.
fn padded_range<I>(values: I) -> (f64, f64)
where
    I: IntoIterator<Item = f64>,
{
    let (mut lo, mut hi) = (0.0_f64, 0.0_f64);
    for v in values.into_iter().filter(|v| v.is_finite()) {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if hi - lo < f64::EPSILON {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.1;
    (
        if lo < 0.0 { lo - pad } else { lo },
        if hi > 0.0 { hi + pad } else { hi },
    )
}

/// Tick label for a categorical axis drawn on integer positions.
fn category_label(labels: &[String], position: f64) -> String {
    let rounded = position.round();
    if (position - rounded).abs() > 1e-6 || rounded < 0.0 {
        return String::new();
    }
    labels.get(rounded as usize).cloned().unwrap_or_default()
}

fn draw_bar_chart<DB>(root: DrawingArea<DB, Shift>, bars: &StackedBars, unit: Unit) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let n = bars.categories.len();
    let mut pos_top = vec![0.0_f64; n];
    let mut neg_bottom = vec![0.0_f64; n];
    let mut stacks: Vec<Vec<(usize, f64, f64)>> = Vec::with_capacity(bars.segments.len());
    for segment in &bars.segments {
        let mut cells = Vec::new();
        for (i, raw) in segment.values.iter().enumerate() {
            let v = unit.scale(*raw);
            if !v.is_finite() || v == 0.0 {
                continue;
            }
            if v > 0.0 {
                cells.push((i, pos_top[i], pos_top[i] + v));
                pos_top[i] += v;
            } else {
                cells.push((i, neg_bottom[i] + v, neg_bottom[i]));
                neg_bottom[i] += v;
            }
        }
        stacks.push(cells);
    }

    let (y_min, y_max) = padded_range(pos_top.iter().chain(neg_bottom.iter()).copied());
    let x_max = n.max(1) as f64 - 0.5;

    let mut chart = ChartBuilder::on(&root)
        .caption(BAR_TITLE, ("sans-serif", 26))
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 90)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(-0.5..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n.max(1))
        .x_label_formatter(&|v| category_label(&bars.categories, *v))
        .y_label_formatter(&|v| format!("{:.0}", v))
        .y_desc(format!("Emissions ({})", unit.label()))
        .label_style(label_font(16.0))
        .draw()?;

    for (idx, (segment, cells)) in bars.segments.iter().zip(stacks.iter()).enumerate() {
        let color = palette(idx);
        chart
            .draw_series(cells.iter().map(|&(i, lo, hi)| {
                let x = i as f64;
                Rectangle::new([(x - 0.35, lo), (x + 0.35, hi)], color.filled())
            }))?
            .label(segment.subcategory.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 6), (x + 14, y + 6)], color.filled()));
    }

    if !bars.segments.is_empty() {
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK.mix(0.3))
            .label_font(label_font(14.0))
            .position(SeriesLabelPosition::UpperRight)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

fn pixel_rect(rect: &Rect) -> ((i32, i32), (i32, i32)) {
    (
        (rect.x.round() as i32, rect.y.round() as i32),
        ((rect.x + rect.w).round() as i32, (rect.y + rect.h).round() as i32),
    )
}

fn draw_treemap<DB>(root: DrawingArea<DB, Shift>, tree: &TreeNode, unit: Unit) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let area = root.titled(TREEMAP_TITLE, ("sans-serif", 26))?;
    let (w, h) = area.dim_in_pixel();
    let bounds = Rect::new(8.0, 8.0, (w as f64 - 16.0).max(1.0), (h as f64 - 16.0).max(1.0));
    let tiles = treemap::layout(tree, bounds);
    let categories: Vec<&str> = tiles
        .iter()
        .filter(|t| t.depth == 1)
        .map(|t| t.label())
        .collect();

    for tile in &tiles {
        let idx = categories
            .iter()
            .position(|c| *c == tile.path[0])
            .unwrap_or(0);
        let base = palette(idx);
        let (upper_left, bottom_right) = pixel_rect(&tile.rect);
        let (fill, border) = match tile.depth {
            1 => (base.mix(0.3), WHITE.stroke_width(4)),
            2 => (base.mix(0.6), WHITE.stroke_width(2)),
            _ => (base.mix(0.9), WHITE.stroke_width(1)),
        };
        area.draw(&Rectangle::new([upper_left, bottom_right], fill.filled()))?;
        area.draw(&Rectangle::new([upper_left, bottom_right], border))?;
    }

    for tile in &tiles {
        let ((x0, y0), (x1, y1)) = pixel_rect(&tile.rect);
        if x1 - x0 < 80 || y1 - y0 < 22 {
            continue;
        }
        let (text, pos, size) = match tile.depth {
            1 => (tile.label().to_string(), (x0 + 6, y0 + 6), 18.0),
            3 => (
                format!("{} {:.0}", tile.label(), unit.scale(tile.value)),
                (x0 + 6, y0 + (y1 - y0) / 2),
                13.0,
            ),
            _ => continue,
        };
        area.draw(&Text::new(text, pos, label_font(size).color(&BLACK)))?;
    }

    root.present()?;
    Ok(())
}

fn draw_area_chart<DB>(
    root: DrawingArea<DB, Shift>,
    series: &ReductionSeries,
    unit: Unit,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let xs: Vec<f64> = series.years.iter().map(|y| *y as f64).collect();
    let mut lower = vec![0.0_f64; xs.len()];
    let mut bands: Vec<(Vec<f64>, Vec<f64>)> = Vec::with_capacity(series.series.len());
    for solution in &series.series {
        let upper: Vec<f64> = lower
            .iter()
            .zip(solution.values.iter())
            .map(|(lo, v)| lo + unit.scale(*v))
            .collect();
        bands.push((lower, upper.clone()));
        lower = upper;
    }

    let (y_min, y_max) = padded_range(
        bands
            .iter()
            .flat_map(|(lo, hi)| lo.iter().chain(hi.iter()).copied()),
    );
    let (x_min, x_max) = match (xs.first(), xs.last()) {
        (Some(first), Some(last)) if last > first => (*first, *last),
        (Some(only), _) => (*only - 0.5, *only + 0.5),
        _ => (0.0, 1.0),
    };

    let mut chart = ChartBuilder::on(&root)
        .caption(AREA_TITLE, ("sans-serif", 26))
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 90)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_labels(xs.len().clamp(2, 12))
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.0}", v))
        .x_desc("Year")
        .y_desc(format!("Reduction ({})", unit.label()))
        .label_style(label_font(16.0))
        .draw()?;

    for (idx, (solution, (lo, hi))) in series.series.iter().zip(bands.iter()).enumerate() {
        let color = palette(idx);
        let outline: Vec<(f64, f64)> = xs
            .iter()
            .copied()
            .zip(hi.iter().copied())
            .chain(xs.iter().copied().zip(lo.iter().copied()).rev())
            .collect();
        chart.draw_series(std::iter::once(Polygon::new(outline, color.mix(0.45).filled())))?;
        chart
            .draw_series(LineSeries::new(
                xs.iter().copied().zip(hi.iter().copied()),
                color.stroke_width(2),
            ))?
            .label(solution.solution.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 6), (x + 14, y + 6)], color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK.mix(0.3))
        .label_font(label_font(14.0))
        .position(SeriesLabelPosition::LowerLeft)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Parse `rgb(r, g, b)` as emitted in connector hints.
fn parse_rgb(text: &str) -> Option<RGBColor> {
    let inner = text.trim().strip_prefix("rgb(")?.strip_suffix(')')?;
    let mut parts = inner.split(',').map(|p| p.trim().parse::<u8>());
    let r = parts.next()?.ok()?;
    let g = parts.next()?.ok()?;
    let b = parts.next()?.ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(RGBColor(r, g, b))
}

fn bar_color(bar: &CascadeBar) -> RGBColor {
    match bar.kind {
        StepKind::Absolute => RGBColor(68, 153, 255),
        StepKind::Relative if bar.end < bar.start => RGBColor(61, 153, 112),
        StepKind::Relative => RGBColor(255, 65, 54),
    }
}

fn draw_waterfall<DB>(root: DrawingArea<DB, Shift>, waterfall: &Waterfall, unit: Unit) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let bars = cascade_bars(&waterfall.steps);
    let labels: Vec<String> = bars.iter().map(|b| b.label.clone()).collect();
    let n = bars.len();
    let (y_min, y_max) = padded_range(
        bars.iter()
            .flat_map(|b| [unit.scale(b.start), unit.scale(b.end)]),
    );

    let mut chart = ChartBuilder::on(&root)
        .caption(waterfall_title(waterfall.year), ("sans-serif", 26))
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 90)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(-0.5..(n.max(1) as f64 - 0.5), y_min..y_max)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n.max(1))
        .x_label_formatter(&|v| category_label(&labels, *v))
        .y_label_formatter(&|v| format!("{:.0}", v))
        .y_desc(format!("Emissions ({})", unit.label()))
        .label_style(label_font(15.0))
        .draw()?;

    let finite: Vec<(usize, &CascadeBar)> = bars
        .iter()
        .enumerate()
        .filter(|(_, b)| b.start.is_finite() && b.end.is_finite())
        .collect();

    chart.draw_series(finite.iter().map(|&(i, bar)| {
        let x = i as f64;
        Rectangle::new(
            [(x - 0.35, unit.scale(bar.low())), (x + 0.35, unit.scale(bar.high()))],
            bar_color(bar).filled(),
        )
    }))?;

    let connector_color = parse_rgb(&waterfall.connector.color).unwrap_or(RGBColor(63, 63, 63));
    let connector_width = waterfall.connector.width.max(1.0).round() as u32;
    chart.draw_series(
        finite
            .windows(2)
            .filter(|pair| pair[1].0 == pair[0].0 + 1)
            .map(|pair| {
                let (i, bar) = pair[0];
                let level = unit.scale(bar.end);
                PathElement::new(
                    vec![(i as f64 + 0.35, level), (i as f64 + 0.65, level)],
                    connector_color.stroke_width(connector_width),
                )
            }),
    )?;

    chart.draw_series(finite.iter().map(|&(i, bar)| {
        Text::new(
            format!("{:.2}", unit.scale(waterfall.steps[i].value)),
            (i as f64 - 0.3, unit.scale(bar.high())),
            label_font(14.0).color(&BLACK),
        )
    }))?;

    root.present()?;
    Ok(())
}

fn handle_html(args: HtmlArgs) -> Result<()> {
    let session = Session::open(&args.data)?;
    let unit = session.unit();
    let rows = session.rows();
    let summary = session.summary();

    let mut figures: Vec<(&str, JsonValue)> = vec![
        ("bar", bar_figure(&stacked_bars(&rows), unit)),
        ("treemap", treemap_figure(&emission_tree(&rows), unit)),
    ];
    if session.dataset.actions.is_empty() {
        info!("No action rows; omitting reduction and cascade charts");
    } else {
        figures.push(("area", area_figure(&reduction_series(&session.dataset.actions), unit)));
        figures.push(("waterfall", waterfall_figure(&session.waterfall(), unit)));
    }

    let page = dashboard_html(&session.config.title, &summary, &figures)?;
    fs::write(&args.output, page)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!("Wrote dashboard: {}", args.output.display());
    Ok(())
}

const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const PAGE_STYLE: &str = "body { font-family: sans-serif; margin: 2rem; } \
    .metric { font-size: 2rem; font-weight: bold; } .plot { min-height: 480px; }";

fn dashboard_html(title: &str, summary: &Summary, figures: &[(&str, JsonValue)]) -> Result<String> {
    if figures.is_empty() {
        return Err(anyhow!("no figures to render"));
    }
    let mut divs = Vec::with_capacity(figures.len());
    let mut scripts = Vec::with_capacity(figures.len());
    for (id, figure) in figures {
        divs.push(format!("    <div id=\"{id}\" class=\"plot\"></div>"));
        // Keep `</script>` sequences inside string literals from closing the tag.
        let json = serde_json::to_string(figure)?.replace("</", "<\\/");
        scripts.push(format!("  var fig_{id} = {json};"));
        scripts.push(format!(
            "  Plotly.newPlot(\"{id}\", fig_{id}.data, fig_{id}.layout, {{responsive: true}});"
        ));
    }

    let title = escape_html(title);
    let lines = [
        "<!DOCTYPE html>".to_string(),
        "<html lang=\"en\">".to_string(),
        "<head>".to_string(),
        "  <meta charset=\"utf-8\">".to_string(),
        format!("  <title>{title}</title>"),
        format!("  <script src=\"{PLOTLY_CDN}\"></script>"),
        format!("  <style>{PAGE_STYLE}</style>"),
        "</head>".to_string(),
        "<body>".to_string(),
        format!("  <h1>{title}</h1>"),
        format!("  <h2>Total Emissions in {}</h2>", summary.year),
        format!(
            "  <p class=\"metric\">{:.2} {}</p>",
            summary.total,
            summary.unit.label()
        ),
        format!(
            "  <p class=\"note\">Categories: {}</p>",
            escape_html(&summary.categories.join(", "))
        ),
        "  <main>".to_string(),
        divs.join("\n"),
        "  </main>".to_string(),
        "  <script>".to_string(),
        scripts.join("\n"),
        "  </script>".to_string(),
        "</body>".to_string(),
        "</html>".to_string(),
    ];
    let mut page = lines.join("\n");
    page.push('\n');
    Ok(page)
}
