use std::io::Cursor;

use calamine::{Data, Reader};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::record::FieldValue;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Malformed {format} payload: {reason}")]
    Malformed { format: FileFormat, reason: String },
}

pub type TransformResult<T> = Result<T, TransformError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Csv,
    Spreadsheet,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" | "xlsm" | "xls" | "ods" => Some(Self::Spreadsheet),
            _ => None,
        }
    }

    pub fn from_filename(filename: &str) -> TransformResult<Self> {
        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| TransformError::UnsupportedFormat(format!("{filename}: no extension")))?;

        Self::from_extension(ext).ok_or_else(|| TransformError::UnsupportedFormat(ext.to_string()))
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv => f.write_str("csv"),
            Self::Spreadsheet => f.write_str("spreadsheet"),
        }
    }
}

/// Header row plus data rows, before any field normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<FieldValue>>,
}

pub trait Decoder: Send + Sync {
    fn supported_formats(&self) -> &[FileFormat];

    fn can_decode(&self, format: FileFormat) -> bool {
        self.supported_formats().contains(&format)
    }

    fn decode(&self, data: &[u8], format: FileFormat) -> TransformResult<RawTable>;
}

pub struct CsvDecoder;

impl CsvDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for CsvDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CsvDecoder {
    fn supported_formats(&self) -> &[FileFormat] {
        &[FileFormat::Csv]
    }

    fn decode(&self, data: &[u8], format: FileFormat) -> TransformResult<RawTable> {
        let malformed = |e: csv::Error| TransformError::Malformed {
            format,
            reason: e.to_string(),
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(data);

        let headers: Vec<String> = reader
            .headers()
            .map_err(malformed)?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.map_err(malformed)?;
            rows.push(record.iter().map(FieldValue::text).collect());
        }

        Ok(RawTable { headers, rows })
    }
}

pub struct SpreadsheetDecoder;

impl SpreadsheetDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for SpreadsheetDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SpreadsheetDecoder {
    fn supported_formats(&self) -> &[FileFormat] {
        &[FileFormat::Spreadsheet]
    }

    fn decode(&self, data: &[u8], format: FileFormat) -> TransformResult<RawTable> {
        let malformed = |reason: String| TransformError::Malformed { format, reason };

        let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(data))
            .map_err(|e| malformed(e.to_string()))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| malformed("workbook has no worksheets".to_string()))?
            .map_err(|e| malformed(e.to_string()))?;

        let mut row_iter = range.rows();
        let headers = row_iter
            .next()
            .map(|cells| cells.iter().map(|c| c.to_string().trim().to_string()).collect())
            .unwrap_or_default();

        let rows = row_iter
            .map(|cells| cells.iter().map(cell_value).collect())
            .collect();

        Ok(RawTable { headers, rows })
    }
}

fn cell_value(cell: &Data) -> FieldValue {
    match cell {
        Data::Empty | Data::Error(_) => FieldValue::Null,
        Data::Int(i) => FieldValue::Int(*i),
        Data::Float(f) => FieldValue::Float(*f),
        Data::Bool(b) => FieldValue::Bool(*b),
        Data::String(s) => FieldValue::text(s.trim()),
        Data::DateTime(dt) => {
            serial_to_date(dt.as_f64()).map_or(FieldValue::Null, FieldValue::Date)
        }
        Data::DateTimeIso(s) | Data::DurationIso(s) => FieldValue::text(s.trim()),
    }
}

/// Spreadsheet serial dates count days from 1899-12-30.
#[allow(clippy::cast_possible_truncation)]
fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.floor() as i64))
}

pub struct CompositeDecoder {
    decoders: Vec<Box<dyn Decoder>>,
}

impl CompositeDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoders: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_decoder(mut self, decoder: Box<dyn Decoder>) -> Self {
        self.decoders.push(decoder);
        self
    }

    fn find_decoder(&self, format: FileFormat) -> Option<&dyn Decoder> {
        self.decoders
            .iter()
            .find(|d| d.can_decode(format))
            .map(AsRef::as_ref)
    }
}

impl Default for CompositeDecoder {
    fn default() -> Self {
        Self::new()
            .with_decoder(Box::new(CsvDecoder::new()))
            .with_decoder(Box::new(SpreadsheetDecoder::new()))
    }
}

impl Decoder for CompositeDecoder {
    fn supported_formats(&self) -> &[FileFormat] {
        &[FileFormat::Csv, FileFormat::Spreadsheet]
    }

    fn can_decode(&self, format: FileFormat) -> bool {
        self.find_decoder(format).is_some()
    }

    fn decode(&self, data: &[u8], format: FileFormat) -> TransformResult<RawTable> {
        let decoder = self
            .find_decoder(format)
            .ok_or_else(|| TransformError::UnsupportedFormat(format.to_string()))?;

        decoder.decode(data, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_filename() {
        assert_eq!(FileFormat::from_filename("report.csv").unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::from_filename("Report.XLSX").unwrap(), FileFormat::Spreadsheet);
        assert_eq!(FileFormat::from_filename("legacy.xls").unwrap(), FileFormat::Spreadsheet);
        assert!(matches!(
            FileFormat::from_filename("notes.pdf"),
            Err(TransformError::UnsupportedFormat(_))
        ));
        assert!(FileFormat::from_filename("README").is_err());
    }

    #[test]
    fn test_csv_decoder_blank_cells_and_ragged_rows() {
        let data = b"Order ID,Product Id,Order Qty\nORD1,PROD1,\nORD2 , PROD2\n";
        let table = CsvDecoder::new().decode(data, FileFormat::Csv).unwrap();

        assert_eq!(table.headers, vec!["Order ID", "Product Id", "Order Qty"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][2], FieldValue::Null);
        assert_eq!(table.rows[1][0], FieldValue::Text("ORD2".into()));
        assert_eq!(table.rows[1].len(), 2);
    }

    #[test]
    fn test_csv_decoder_rejects_invalid_utf8() {
        let data = b"order_id,product_id\n\xff\xfe\xfd,PROD\n";
        let result = CsvDecoder::new().decode(data, FileFormat::Csv);
        assert!(matches!(result, Err(TransformError::Malformed { .. })));
    }

    #[test]
    fn test_spreadsheet_decoder_rejects_garbage() {
        let result =
            SpreadsheetDecoder::new().decode(b"definitely not a workbook", FileFormat::Spreadsheet);
        assert!(matches!(result, Err(TransformError::Malformed { .. })));
    }

    fn sales_workbook() -> Vec<u8> {
        use rust_xlsxwriter::{Format, Workbook};

        let mut workbook = Workbook::new();
        let date = Format::new().set_num_format("yyyy-mm-dd");
        let sheet = workbook.add_worksheet();
        let headers = [
            "Order ID",
            "Product ID",
            "Customer ID",
            "Order Qty",
            "Delivery Qty",
            "Delivery Date",
            "On Time",
            "In Full",
        ];
        for (col, header) in (0u16..).zip(headers) {
            sheet.write_string(0, col, header).unwrap();
        }
        sheet.write_string(1, 0, "ORD001").unwrap();
        sheet.write_string(1, 1, "PROD_A").unwrap();
        sheet.write_string(1, 2, "CUST_X").unwrap();
        sheet.write_number(1, 3, 100).unwrap();
        sheet.write_number(1, 4, 98).unwrap();
        sheet.write_number_with_format(1, 5, 45944, &date).unwrap();
        sheet.write_number(1, 6, 1).unwrap();
        sheet.write_number(1, 7, 0).unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_spreadsheet_decoder_reads_header_and_date_cells() {
        let table = SpreadsheetDecoder::new()
            .decode(&sales_workbook(), FileFormat::Spreadsheet)
            .unwrap();

        assert_eq!(table.headers[0], "Order ID");
        assert_eq!(table.headers[5], "Delivery Date");
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][0], FieldValue::Text("ORD001".into()));
        assert_eq!(table.rows[0][3].as_int(), Some(100));
        assert_eq!(
            table.rows[0][5],
            FieldValue::Date(NaiveDate::from_ymd_opt(2025, 10, 14).unwrap())
        );
    }

    #[test]
    fn test_serial_dates() {
        assert_eq!(serial_to_date(45944.0), NaiveDate::from_ymd_opt(2025, 10, 14));
        assert_eq!(serial_to_date(45944.75), NaiveDate::from_ymd_opt(2025, 10, 14));
        assert_eq!(serial_to_date(f64::NAN), None);
    }

    #[test]
    fn test_composite_routes_by_format() {
        let composite = CompositeDecoder::new().with_decoder(Box::new(CsvDecoder::new()));
        assert!(composite.can_decode(FileFormat::Csv));
        assert!(!composite.can_decode(FileFormat::Spreadsheet));
        assert!(matches!(
            composite.decode(b"", FileFormat::Spreadsheet),
            Err(TransformError::UnsupportedFormat(_))
        ));
    }
}
