//! Chart rendering from a worksheet.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use async_trait::async_trait;
use calamine::Data;
use plotters::prelude::*;
use plotters::style::{register_font, FontStyle};
use serde_json::{json, Map, Value};

use super::excel::{load_sheet, SheetTable};
use super::{str_arg, ParamKind, ParamSpec, Tool, ToolError};

const CHART_SIZE: (u32, u32) = (1000, 600);
const FONT_FAMILY: &str = "sans-serif";

/// Fonts tried when no explicit font is configured.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Line,
    Bar,
    Scatter,
}

impl ChartKind {
    fn title_word(self) -> &'static str {
        match self {
            ChartKind::Line => "Line",
            ChartKind::Bar => "Bar",
            ChartKind::Scatter => "Scatter",
        }
    }
}

impl FromStr for ChartKind {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "line" => Ok(ChartKind::Line),
            "bar" => Ok(ChartKind::Bar),
            "scatter" => Ok(ChartKind::Scatter),
            _ => Err(ToolError::UnsupportedChartType(s.to_string())),
        }
    }
}

/// Points extracted from two columns of a sheet.
#[derive(Debug, Clone, PartialEq)]
struct Series {
    points: Vec<(f64, f64)>,
    /// Category labels by position when the x column is not numeric
    categories: Option<Vec<String>>,
}

fn cell_number(cell: &Data) -> Option<f64> {
    let value = match cell {
        Data::Int(i) => Some(*i as f64),
        Data::Float(f) => Some(*f),
        Data::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Data::DateTime(dt) => Some(dt.as_f64()),
        Data::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

fn build_series(table: &SheetTable, x_index: usize, y_index: usize) -> Series {
    let rows: Vec<(&Data, f64)> = table
        .column(x_index)
        .zip(table.column(y_index))
        .filter_map(|(x, y)| cell_number(y).map(|y| (x, y)))
        .collect();

    let numeric_x: Option<Vec<f64>> = rows.iter().map(|(x, _)| cell_number(x)).collect();
    match numeric_x {
        Some(xs) => Series {
            points: xs.into_iter().zip(rows.iter().map(|(_, y)| *y)).collect(),
            categories: None,
        },
        None => Series {
            points: rows
                .iter()
                .enumerate()
                .map(|(i, (_, y))| (i as f64, *y))
                .collect(),
            categories: Some(rows.iter().map(|(x, _)| x.to_string()).collect()),
        },
    }
}

/// Padded `(min, max)` so single points and flat lines still get an area.
/// `None` when the span does not fit in an `f64`.
fn axis_range(values: impl Iterator<Item = f64>, include_zero: bool) -> Option<(f64, f64)> {
    let (mut lo, mut hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if include_zero {
        lo = lo.min(0.0);
        hi = hi.max(0.0);
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 1.0 };
    lo -= pad;
    hi += pad;
    (lo.is_finite() && hi.is_finite() && (hi - lo).is_finite()).then_some((lo, hi))
}

/// Axis bounds of a series: `(x_min, x_max, y_min, y_max)`.
fn plot_bounds(series: &Series, kind: ChartKind) -> Result<(f64, f64, f64, f64), ToolError> {
    let too_wide = || {
        ToolError::Execution("Values are too large to plot on a single chart".to_string())
    };
    let (x_min, x_max) =
        axis_range(series.points.iter().map(|(x, _)| *x), false).ok_or_else(too_wide)?;
    let (y_min, y_max) = axis_range(
        series.points.iter().map(|(_, y)| *y),
        kind == ChartKind::Bar,
    )
    .ok_or_else(too_wide)?;
    Ok((x_min, x_max, y_min, y_max))
}

/// Half the width of a bar: 40% of the tightest spacing between x values.
fn bar_half_width(points: &[(f64, f64)]) -> f64 {
    let mut xs: Vec<f64> = points.iter().map(|(x, _)| *x).collect();
    xs.sort_by(|a, b| a.total_cmp(b));
    xs.dedup();
    let gap = xs
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(f64::INFINITY, f64::min);
    if gap.is_finite() {
        gap * 0.4
    } else {
        0.4
    }
}

fn category_label(categories: &[String], x: f64) -> String {
    let rounded = x.round();
    if (x - rounded).abs() > 1e-6 || rounded < 0.0 {
        return String::new();
    }
    categories.get(rounded as usize).cloned().unwrap_or_default()
}

/// Register a font for chart text once per process.
fn fonts_available(configured: Option<&Path>) -> bool {
    static REGISTERED: OnceLock<bool> = OnceLock::new();
    *REGISTERED.get_or_init(|| {
        let candidates = configured
            .map(Path::to_path_buf)
            .into_iter()
            .chain(FONT_CANDIDATES.iter().map(PathBuf::from));

        for candidate in candidates {
            let Ok(bytes) = std::fs::read(&candidate) else {
                continue;
            };
            let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
            if register_font(FONT_FAMILY, FontStyle::Normal, bytes).is_ok() {
                tracing::debug!("Using {} for chart text", candidate.display());
                return true;
            }
        }

        tracing::warn!("No usable font found; charts will be rendered without text");
        false
    })
}

fn render_error(e: impl std::fmt::Display) -> ToolError {
    ToolError::Execution(format!("Failed to render chart: {}", e))
}

fn render(
    path: &Path,
    kind: ChartKind,
    series: &Series,
    bounds: (f64, f64, f64, f64),
    x_label: &str,
    y_label: &str,
    with_text: bool,
) -> Result<(), ToolError> {
    let (x_min, x_max, y_min, y_max) = bounds;
    let root = BitMapBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;

    let mut builder = ChartBuilder::on(&root);
    builder.margin(20);
    if with_text {
        builder
            .caption(
                format!("{} chart of {} vs {}", kind.title_word(), y_label, x_label),
                (FONT_FAMILY, 28),
            )
            .x_label_area_size(50)
            .y_label_area_size(70);
    }
    let mut chart = builder
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(render_error)?;

    let x_formatter = |x: &f64| match &series.categories {
        Some(categories) => category_label(categories, *x),
        None => format!("{}", x),
    };
    let mut mesh = chart.configure_mesh();
    if with_text {
        mesh.x_desc(x_label).y_desc(y_label).x_label_formatter(&x_formatter);
        if let Some(categories) = &series.categories {
            mesh.x_labels(categories.len().max(2));
        }
    }
    mesh.draw().map_err(render_error)?;

    match kind {
        ChartKind::Line => {
            chart
                .draw_series(LineSeries::new(series.points.iter().copied(), &BLUE))
                .map_err(render_error)?;
        }
        ChartKind::Scatter => {
            chart
                .draw_series(
                    series
                        .points
                        .iter()
                        .map(|&(x, y)| Circle::new((x, y), 4, BLUE.filled())),
                )
                .map_err(render_error)?;
        }
        ChartKind::Bar => {
            let half = bar_half_width(&series.points);
            let base = 0.0_f64.clamp(y_min, y_max);
            chart
                .draw_series(series.points.iter().map(|&(x, y)| {
                    Rectangle::new([(x - half, base), (x + half, y)], BLUE.filled())
                }))
                .map_err(render_error)?;
        }
    }

    root.present().map_err(render_error)?;
    Ok(())
}

/// Load the sheet, validate the request and render into a fresh PNG.
pub fn graph_from_sheet(
    file_path: &Path,
    sheet_name: &str,
    x_column: &str,
    y_column: &str,
    chart_type: &str,
    output_dir: &Path,
    font: Option<&Path>,
) -> Result<PathBuf, ToolError> {
    let table = load_sheet(file_path, sheet_name)?;

    let (x_index, y_index) = match (table.column_index(x_column), table.column_index(y_column)) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(ToolError::InvalidColumn {
                available: table.headers.clone(),
            })
        }
    };

    let kind: ChartKind = chart_type.parse()?;

    let series = build_series(&table, x_index, y_index);
    if series.points.is_empty() {
        return Err(ToolError::Execution(format!(
            "Column '{}' has no numeric values to plot",
            y_column
        )));
    }
    let bounds = plot_bounds(&series, kind)?;

    std::fs::create_dir_all(output_dir)?;
    let file = tempfile::Builder::new()
        .prefix("chart_")
        .suffix(".png")
        .tempfile_in(output_dir)?;
    let (_, path) = file.keep().map_err(|e| ToolError::Execution(e.to_string()))?;

    if let Err(e) = render(
        &path,
        kind,
        &series,
        bounds,
        x_column,
        y_column,
        fonts_available(font),
    ) {
        let _ = std::fs::remove_file(&path);
        return Err(e);
    }

    Ok(path)
}

/// Plot two columns of a worksheet.
pub struct GraphFromExcel {
    output_dir: PathBuf,
    font: Option<PathBuf>,
}

impl GraphFromExcel {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            font: None,
        }
    }

    pub fn with_font(mut self, font: Option<PathBuf>) -> Self {
        self.font = font;
        self
    }
}

#[async_trait]
impl Tool for GraphFromExcel {
    fn name(&self) -> &str {
        "graph_from_excel"
    }

    fn description(&self) -> &str {
        "Generate a graph from an Excel file. Requires sheet name, x and y column names."
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("file_path", ParamKind::String, "Path to the Excel workbook"),
            ParamSpec::required("sheet_name", ParamKind::String, "Worksheet to plot"),
            ParamSpec::required("x_column", ParamKind::String, "Column for the x axis"),
            ParamSpec::required("y_column", ParamKind::String, "Column for the y axis"),
            ParamSpec::optional(
                "chart_type",
                ParamKind::String,
                "One of line, bar, scatter",
                json!("line"),
            ),
        ]
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let file_path = PathBuf::from(str_arg(args, "file_path")?);
        let sheet_name = str_arg(args, "sheet_name")?.to_string();
        let x_column = str_arg(args, "x_column")?.to_string();
        let y_column = str_arg(args, "y_column")?.to_string();
        let chart_type = args
            .get("chart_type")
            .and_then(Value::as_str)
            .unwrap_or("line")
            .to_string();
        let output_dir = self.output_dir.clone();
        let font = self.font.clone();

        let path = tokio::task::spawn_blocking(move || {
            graph_from_sheet(
                &file_path,
                &sheet_name,
                &x_column,
                &y_column,
                &chart_type,
                &output_dir,
                font.as_deref(),
            )
        })
        .await
        .map_err(|e| ToolError::Execution(format!("Chart task failed: {}", e)))??;

        tracing::info!("Rendered chart to {}", path.display());
        Ok(format!("Chart saved to: {}", path.display()))
    }
}
