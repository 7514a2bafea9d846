//! Formatted spreadsheet mirror of the lead file
//!
//! The workbook is regenerated from the full record set each time, written
//! to a temporary file next to the target and renamed over it, so readers
//! never observe a half-written spreadsheet.

use crate::output::csv::{LeadRow, COLUMNS};
use crate::LeadRecord;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use std::path::Path;
use tracing::debug;

use super::{OutputError, OutputResult};

const SHEET_NAME: &str = "Leads";
const MAX_COLUMN_WIDTH: usize = 50;
const HEADER_BACKGROUND: u32 = 0xD7E4BC;

impl From<XlsxError> for OutputError {
    fn from(err: XlsxError) -> Self {
        OutputError::XlsxError(err.to_string())
    }
}

enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    fn text(value: Option<String>) -> Self {
        value.map(Cell::Text).unwrap_or(Cell::Empty)
    }

    fn number(value: Option<f64>) -> Self {
        value.map(Cell::Number).unwrap_or(Cell::Empty)
    }

    fn display_len(&self) -> usize {
        match self {
            Cell::Text(s) => s.chars().count(),
            Cell::Number(n) => n.to_string().len(),
            Cell::Empty => 0,
        }
    }
}

fn cells(lead: &LeadRecord) -> [Cell; 16] {
    let row = LeadRow::from(lead);
    [
        Cell::Text(row.name),
        Cell::text(row.address),
        Cell::text(row.phone),
        Cell::text(row.website),
        Cell::number(row.rating),
        Cell::number(row.review_count.map(f64::from)),
        Cell::text(row.business_status),
        Cell::Text(row.primary_type),
        Cell::Text(row.all_types),
        Cell::Text(row.opening_hours),
        Cell::number(row.latitude),
        Cell::number(row.longitude),
        Cell::text(row.place_id),
        Cell::Text(row.search_query),
        Cell::Text(row.search_location),
        Cell::Text(row.scraped_at),
    ]
}

/// Write `leads` to a formatted workbook at `path`.
///
/// Bold wrapped header row on a green fill, column widths fitted to the
/// longest value (capped at 50), autofilter over the whole table. Returns
/// the number of data rows written.
pub fn export<P: AsRef<Path>>(leads: &[LeadRecord], path: P) -> OutputResult<usize> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;
    }

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    fill_sheet(worksheet, leads)?;

    let tmp = path.with_extension("xlsx.tmp");
    workbook.save(&tmp)?;
    std::fs::rename(&tmp, path)
        .map_err(|e| OutputError::IoError(format!("Failed to replace spreadsheet: {}", e)))?;

    debug!(path = %path.display(), rows = leads.len(), "Spreadsheet exported");
    Ok(leads.len())
}

fn fill_sheet(worksheet: &mut Worksheet, leads: &[LeadRecord]) -> Result<(), XlsxError> {
    worksheet.set_name(SHEET_NAME)?;

    let header = Format::new()
        .set_bold()
        .set_text_wrap()
        .set_align(FormatAlign::Top)
        .set_background_color(Color::RGB(HEADER_BACKGROUND))
        .set_border(FormatBorder::Thin);

    let mut widths: Vec<usize> = COLUMNS.iter().map(|c| c.len()).collect();
    for (col, name) in COLUMNS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *name, &header)?;
    }

    for (index, lead) in leads.iter().enumerate() {
        let row = index as u32 + 1;
        for (col, cell) in cells(lead).into_iter().enumerate() {
            widths[col] = widths[col].max(cell.display_len());
            match cell {
                Cell::Text(value) => {
                    worksheet.write_string(row, col as u16, value)?;
                }
                Cell::Number(value) => {
                    worksheet.write_number(row, col as u16, value)?;
                }
                Cell::Empty => {}
            }
        }
    }

    for (col, width) in widths.iter().enumerate() {
        let width = (width + 2).min(MAX_COLUMN_WIDTH);
        worksheet.set_column_width(col as u16, width as f64)?;
    }

    let last_col = (COLUMNS.len() - 1) as u16;
    worksheet.autofilter(0, 0, leads.len() as u32, last_col)?;
    worksheet.set_freeze_panes(1, 0)?;
    Ok(())
}
