//! Workbook introspection: sheet names and header rows.

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, Range, Reader, Sheets, Xlsx, XlsxError};
use serde_json::{Map, Value};

use super::{str_arg, ParamKind, ParamSpec, Tool, ToolError};

static EMPTY_CELL: Data = Data::Empty;

/// A sheet loaded into memory: header row plus data rows.
#[derive(Debug, Clone)]
pub struct SheetTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Data>>,
}

impl SheetTable {
    fn from_range(range: &Range<Data>) -> Self {
        let mut rows = range.rows();
        let headers = rows
            .next()
            .map(|r| r.iter().map(header_text).collect())
            .unwrap_or_default();
        let rows = rows.map(|r| r.to_vec()).collect();
        Self { headers, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cells of one column; short rows yield `Data::Empty`.
    pub fn column(&self, index: usize) -> impl Iterator<Item = &Data> + '_ {
        self.rows
            .iter()
            .map(move |r| r.get(index).unwrap_or(&EMPTY_CELL))
    }
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn format_error(path: &Path, e: impl std::fmt::Display) -> ToolError {
    ToolError::Format(format!(
        "Failed to read Excel file {}: {}",
        path.display(),
        e
    ))
}

/// First row of an xlsx sheet, streamed so data rows are never parsed.
fn xlsx_first_row<RS: Read + Seek>(
    workbook: &mut Xlsx<RS>,
    name: &str,
) -> Result<Vec<String>, XlsxError> {
    let mut cells = workbook.worksheet_cells_reader(name)?;
    let mut headers = Vec::new();
    let mut origin: Option<(u32, u32)> = None;

    while let Some(cell) = cells.next_cell()? {
        let (row, col) = cell.get_position();
        let (header_row, first_col) = *origin.get_or_insert((row, col));
        if row != header_row {
            break;
        }
        let index = col.saturating_sub(first_col) as usize;
        if headers.len() <= index {
            headers.resize(index + 1, String::new());
        }
        headers[index] = header_text(&Data::from(cell.get_value().clone()));
    }
    Ok(headers)
}

/// Header row of every sheet, in workbook order.
///
/// xlsx sheets are read up to the end of their first row; other formats are
/// loaded whole by calamine.
pub fn read_sheet_headers(path: &Path) -> Result<Vec<(String, Vec<String>)>, ToolError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| format_error(path, e))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let headers = match &mut workbook {
            Sheets::Xlsx(xlsx) => {
                xlsx_first_row(xlsx, &name).map_err(|e| format_error(path, e))?
            }
            other => other
                .worksheet_range(&name)
                .map_err(|e| format_error(path, e))?
                .rows()
                .next()
                .map(|r| r.iter().map(header_text).collect())
                .unwrap_or_default(),
        };
        sheets.push((name, headers));
    }
    Ok(sheets)
}

/// Load a whole sheet. A missing sheet is reported with the sheets that exist.
pub fn load_sheet(path: &Path, sheet_name: &str) -> Result<SheetTable, ToolError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| format_error(path, e))?;

    let names = workbook.sheet_names();
    if !names.iter().any(|n| n == sheet_name) {
        return Err(ToolError::Execution(format!(
            "Sheet '{}' not found. Available sheets: {}",
            sheet_name,
            names.join(", ")
        )));
    }

    let range = workbook
        .worksheet_range(sheet_name)
        .map_err(|e| format_error(path, e))?;
    Ok(SheetTable::from_range(&range))
}

/// List sheet and column names of a workbook.
pub struct ExcelMetadata;

#[async_trait]
impl Tool for ExcelMetadata {
    fn name(&self) -> &str {
        "get_excel_metadata"
    }

    fn description(&self) -> &str {
        "Use this tool to see all sheet names and column names in an Excel file before plotting."
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "file_path",
            ParamKind::String,
            "Path to the Excel workbook",
        )]
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let path = PathBuf::from(str_arg(args, "file_path")?);

        let sheets = tokio::task::spawn_blocking(move || read_sheet_headers(&path))
            .await
            .map_err(|e| ToolError::Execution(format!("Workbook task failed: {}", e)))??;

        let mut metadata = Map::new();
        for (name, headers) in sheets {
            metadata.insert(
                name,
                Value::Array(headers.into_iter().map(Value::String).collect()),
            );
        }

        serde_json::to_string(&Value::Object(metadata))
            .map_err(|e| ToolError::Execution(e.to_string()))
    }
}
