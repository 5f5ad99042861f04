//! Spreadsheet decoding: uploaded bytes to [`RawRow`]s.
//!
//! CSV is read with `csv`; Excel and OpenDocument workbooks with
//! `calamine`, first sheet only. The first row supplies the column names
//! and rows whose cells are all empty are skipped.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use rowbridge_core::normalize::RawRow;
use rowbridge_core::value::CellValue;

/// File extensions accepted for upload.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xlsm", "xlsb", "xls", "ods"];

#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("Unsupported file type '{0}', expected one of: csv, xlsx, xlsm, xlsb, xls, ods")]
    UnsupportedFormat(String),

    #[error("Could not read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Could not read workbook: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("Workbook contains no sheets")]
    NoSheets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    /// Any format `calamine` detects on its own.
    Workbook,
}

impl SheetFormat {
    /// Pick the decoder from a file name's extension.
    pub fn from_file_name(file_name: &str) -> Result<Self, SheetError> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "csv" => Ok(Self::Csv),
            ext if SUPPORTED_EXTENSIONS.contains(&ext) => Ok(Self::Workbook),
            _ => Err(SheetError::UnsupportedFormat(extension)),
        }
    }
}

/// Decode an uploaded file into rows.
pub fn decode(bytes: Vec<u8>, format: SheetFormat) -> Result<Vec<RawRow>, SheetError> {
    match format {
        SheetFormat::Csv => decode_csv(&bytes),
        SheetFormat::Workbook => decode_workbook(bytes),
    }
}

/// Decode CSV text. Every non-empty field is a text cell.
pub fn decode_csv(bytes: &[u8]) -> Result<Vec<RawRow>, SheetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cells = record.iter().map(|field| {
            if field.is_empty() {
                CellValue::Empty
            } else {
                CellValue::text(field)
            }
        });
        if let Some(row) = build_row(&headers, cells) {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Decode the first sheet of an Excel or OpenDocument workbook.
pub fn decode_workbook(bytes: Vec<u8>) -> Result<Vec<RawRow>, SheetError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(SheetError::NoSheets)??;

    let mut data_rows = range.rows();
    let Some(header_row) = data_rows.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_row
        .iter()
        .map(|cell| cell_from_data(cell).key_text().unwrap_or_default())
        .collect();

    Ok(data_rows
        .filter_map(|cells| build_row(&headers, cells.iter().map(cell_from_data)))
        .collect())
}

/// Pair cells with headers. Returns `None` for an all-empty row.
///
/// Cells beyond the last header get an empty column name, which never
/// matches a field.
fn build_row(headers: &[String], cells: impl Iterator<Item = CellValue>) -> Option<RawRow> {
    let mut row = RawRow::new();
    let mut has_value = false;
    for (i, cell) in cells.enumerate() {
        has_value |= !cell.is_blank();
        let column = headers.get(i).cloned().unwrap_or_default();
        row.push(column, cell);
    }
    has_value.then_some(row)
}

fn cell_from_data(cell: &Data) -> CellValue {
    match cell {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::String(s) if s.is_empty() => CellValue::Empty,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::text(s.clone()),
        Data::Int(i) => CellValue::Integer(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(naive) => CellValue::DateTime(naive),
            None => CellValue::Float(dt.as_f64()),
        },
    }
}

#[cfg(test)]
mod tests {
    use rust_xlsxwriter::Workbook;

    use super::*;

    fn xlsx_fixture() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in ["Name", "Price", "Category", "Tags"].iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        sheet.write_string(1, 0, "Widget").unwrap();
        sheet.write_number(1, 1, 9.99).unwrap();
        sheet.write_string(1, 2, "Tools").unwrap();
        sheet.write_string(1, 3, "red, blue").unwrap();
        // Row 2 left empty.
        sheet.write_string(3, 0, "Gizmo").unwrap();
        sheet.write_number(3, 1, 5).unwrap();
        sheet.write_string(3, 2, "Toys").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn extensions_select_the_decoder() {
        assert_eq!(SheetFormat::from_file_name("a.CSV").unwrap(), SheetFormat::Csv);
        assert_eq!(
            SheetFormat::from_file_name("products.xlsx").unwrap(),
            SheetFormat::Workbook
        );
        assert!(matches!(
            SheetFormat::from_file_name("notes.txt"),
            Err(SheetError::UnsupportedFormat(ext)) if ext == "txt"
        ));
        assert!(SheetFormat::from_file_name("no_extension").is_err());
    }

    #[test]
    fn csv_rows_use_the_header_line() {
        let csv = "Name,Price,Category\nWidget,9.99,Tools\n,,\nGizmo,5,\n";
        let rows = decode_csv(csv.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].cells,
            vec![
                ("Name".to_string(), CellValue::text("Widget")),
                ("Price".to_string(), CellValue::text("9.99")),
                ("Category".to_string(), CellValue::text("Tools")),
            ]
        );
        assert_eq!(rows[1].cells[2].1, CellValue::Empty);
    }

    #[test]
    fn workbook_rows_keep_native_cell_types() {
        let rows = decode_workbook(xlsx_fixture()).unwrap();

        assert_eq!(rows.len(), 2, "the empty row is skipped");
        assert_eq!(rows[0].cells[0], ("Name".to_string(), CellValue::text("Widget")));
        assert_eq!(rows[0].cells[1].1, CellValue::Float(9.99));
        assert_eq!(rows[0].cells[3].1, CellValue::text("red, blue"));
        assert_eq!(rows[1].cells[1].1, CellValue::Float(5.0));
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let err = decode(b"not a workbook".to_vec(), SheetFormat::Workbook).unwrap_err();
        assert!(matches!(err, SheetError::Workbook(_)));
    }
}
