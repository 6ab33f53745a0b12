use crate::core::overlay::SheetLayout;
use crate::domain::model::{Row, SheetDataMap, SheetEntry};
use crate::domain::ports::WorkbookCodec;
use crate::utils::error::{EngineError, Result};
use serde::Serialize;
use serde_json::Value;
use std::io::{Cursor, Read, Write};
use zip::write::{FileOptions, ZipWriter};
use zip::ZipArchive;

pub const LAYOUT_MANIFEST: &str = "_layout.json";
const CSV_EXTENSION: &str = ".csv";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Serialize)]
struct LayoutManifest<'a> {
    generated_at: String,
    sheets: &'a [SheetLayout],
}

/// 以 zip 包裝的 CSV 活頁簿：每張工作表一個 `<sheet>.csv`
///
/// 匯出時另外寫入 `_layout.json`，記錄合併後的欄位指示（寬度、顏色、鎖定、隱藏），
/// CSV 本身無法表達這些樣式。匯入時只讀 CSV，其餘檔案略過。
#[derive(Debug, Clone, Default)]
pub struct ZipCsvWorkbook;

impl ZipCsvWorkbook {
    pub fn new() -> Self {
        Self
    }

    fn write_sheet(layout: &SheetLayout) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let columns: Vec<&str> = layout.column_names().collect();
        writer.write_record(&columns)?;

        for row in &layout.rows {
            let record: Vec<String> = columns
                .iter()
                .map(|column| row.get(*column).map(cell_text).unwrap_or_default())
                .collect();
            writer.write_record(&record)?;
        }

        writer.into_inner().map_err(|e| EngineError::WorkbookError {
            message: format!("Failed to flush sheet '{}': {}", layout.sheet_name, e),
        })
    }

    fn read_sheet(sheet_name: &str, bytes: &[u8]) -> Result<Vec<SheetEntry>> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
        let headers = reader.headers()?.clone();

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row = Row::new();
            for (header, cell) in headers.iter().zip(record.iter()) {
                // 空白儲存格視為不存在，而不是空字串
                if !cell.is_empty() {
                    row.insert(header.to_string(), Value::String(cell.to_string()));
                }
            }
            if row.is_empty() {
                continue;
            }
            entries.push(SheetEntry::Data(row));
        }

        tracing::debug!("📄 Decoded sheet '{}' ({} rows)", sheet_name, entries.len());
        Ok(entries)
    }
}

/// 儲存格文字；字串不加引號，巢狀結構以 JSON 表示
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

impl WorkbookCodec for ZipCsvWorkbook {
    fn decode(&self, bytes: &[u8]) -> Result<SheetDataMap> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut map = SheetDataMap::new();

        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            let name = file.name().to_string();
            if file.is_dir() {
                continue;
            }
            let Some(sheet_name) = name.strip_suffix(CSV_EXTENSION) else {
                tracing::debug!("⏭️ Skipping non-CSV entry '{}'", name);
                continue;
            };

            let mut buffer = Vec::new();
            file.read_to_end(&mut buffer)?;
            let entries = Self::read_sheet(sheet_name, &buffer)?;
            map.insert(sheet_name, entries);
        }

        if map.is_empty() {
            return Err(EngineError::WorkbookError {
                message: "Workbook does not contain any CSV sheet".to_string(),
            });
        }

        tracing::info!("📥 Decoded workbook with {} sheet(s)", map.len());
        Ok(map)
    }

    fn encode(&self, layouts: &[SheetLayout]) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        for layout in layouts {
            let csv_data = Self::write_sheet(layout)?;
            zip.start_file::<_, ()>(format!("{}{}", layout.sheet_name, CSV_EXTENSION), FileOptions::default())?;
            zip.write_all(&csv_data)?;
        }

        let manifest = LayoutManifest {
            generated_at: chrono::Utc::now().to_rfc3339(),
            sheets: layouts,
        };
        zip.start_file::<_, ()>(LAYOUT_MANIFEST, FileOptions::default())?;
        zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;

        let cursor = zip.finish()?;
        let bytes = cursor.into_inner();
        tracing::debug!("📦 Encoded {} sheet(s) into {} bytes", layouts.len(), bytes.len());
        Ok(bytes)
    }
}
