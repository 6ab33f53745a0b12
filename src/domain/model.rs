use crate::utils::error::{EngineError, Result};
use indexmap::IndexMap;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// 一列資料：欄位名稱 -> 純量或巢狀值（保留欄位順序）
pub type Row = Map<String, Value>;

/// 元數據項目的標記欄位
pub const METADATA_MARKER: &str = "isMetadata";

/// 單一欄位的樣式/版面指示
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDirective {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, alias = "is_locked", skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, alias = "order_number", skip_serializing_if = "Option::is_none")]
    pub order_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
}

impl ColumnDirective {
    /// 逐欄位覆寫：`overlay` 有設定的欄位勝出，未設定的保留原值
    pub fn merged_with(&self, overlay: &ColumnDirective) -> ColumnDirective {
        ColumnDirective {
            color: overlay.color.clone().or_else(|| self.color.clone()),
            is_locked: overlay.is_locked.or(self.is_locked),
            width: overlay.width.or(self.width),
            order_number: overlay.order_number.or(self.order_number),
            hidden: overlay.hidden.or(self.hidden),
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden.unwrap_or(false)
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked.unwrap_or(false)
    }
}

/// 欄位名稱 -> 欄位指示，依插入順序
pub type ColumnDirectives = IndexMap<String, ColumnDirective>;

/// 工作表的第一個項目，描述欄位樣式而非資料
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataEntry {
    pub columns: ColumnDirectives,
}

impl MetadataEntry {
    pub fn new(columns: ColumnDirectives) -> Self {
        Self { columns }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SheetEntry {
    Metadata(MetadataEntry),
    Data(Row),
}

impl SheetEntry {
    pub fn is_metadata(&self) -> bool {
        matches!(self, SheetEntry::Metadata(_))
    }

    pub fn as_row(&self) -> Option<&Row> {
        match self {
            SheetEntry::Data(row) => Some(row),
            SheetEntry::Metadata(_) => None,
        }
    }
}

impl From<Row> for SheetEntry {
    fn from(row: Row) -> Self {
        SheetEntry::Data(row)
    }
}

impl From<MetadataEntry> for SheetEntry {
    fn from(metadata: MetadataEntry) -> Self {
        SheetEntry::Metadata(metadata)
    }
}

impl TryFrom<Value> for SheetEntry {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        let mut obj = match value {
            Value::Object(obj) => obj,
            other => return Err(format!("sheet entry must be a JSON object, got {}", other)),
        };

        if obj.get(METADATA_MARKER) != Some(&Value::Bool(true)) {
            return Ok(SheetEntry::Data(obj));
        }

        obj.remove(METADATA_MARKER);
        let mut columns = ColumnDirectives::new();
        for (column, directive) in obj {
            let directive: ColumnDirective = serde_json::from_value(directive)
                .map_err(|e| format!("invalid directive for column '{}': {}", column, e))?;
            columns.insert(column, directive);
        }
        Ok(SheetEntry::Metadata(MetadataEntry { columns }))
    }
}

impl Serialize for SheetEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            SheetEntry::Data(row) => row.serialize(serializer),
            SheetEntry::Metadata(metadata) => {
                let mut map = serializer.serialize_map(Some(metadata.columns.len() + 1))?;
                map.serialize_entry(METADATA_MARKER, &true)?;
                for (column, directive) in &metadata.columns {
                    map.serialize_entry(column, directive)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for SheetEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        SheetEntry::try_from(value).map_err(D::Error::custom)
    }
}

/// 檢查工作表項目：至多一個元數據項目，且只能位於第一個位置
pub fn validate_entries(sheet: &str, entries: &[SheetEntry]) -> Result<()> {
    if let Some(position) = entries.iter().skip(1).position(SheetEntry::is_metadata) {
        return Err(EngineError::InvalidSheetData {
            sheet: sheet.to_string(),
            reason: format!(
                "metadata entry found at position {}, only position 0 is allowed",
                position + 1
            ),
        });
    }
    Ok(())
}

/// 工作表名稱 -> 項目序列；順序決定輸出工作表的順序
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetDataMap(IndexMap<String, Vec<SheetEntry>>);

impl SheetDataMap {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// 由單一工作表的資料列建立
    pub fn from_rows(sheet: impl Into<String>, rows: Vec<Row>) -> Self {
        let mut map = Self::new();
        map.insert(sheet, rows.into_iter().map(SheetEntry::Data).collect());
        map
    }

    /// 依給定順序合併各工作表結果，產生新的 map
    pub fn from_sheets<I>(sheets: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<SheetEntry>)>,
    {
        Self(sheets.into_iter().collect())
    }

    pub fn insert(&mut self, sheet: impl Into<String>, entries: Vec<SheetEntry>) -> Option<Vec<SheetEntry>> {
        self.0.insert(sheet.into(), entries)
    }

    pub fn get(&self, sheet: &str) -> Option<&[SheetEntry]> {
        self.0.get(sheet).map(Vec::as_slice)
    }

    pub fn contains_sheet(&self, sheet: &str) -> bool {
        self.0.contains_key(sheet)
    }

    /// 移除並回傳指定工作表，其餘工作表維持原順序
    pub fn take_sheet(&mut self, sheet: &str) -> Option<Vec<SheetEntry>> {
        self.0.shift_remove(sheet)
    }

    /// 只含單一工作表的切片；輸入中沒有該工作表時視為空序列
    pub fn slice(&self, sheet: &str) -> SheetDataMap {
        let entries = self.0.get(sheet).cloned().unwrap_or_default();
        let mut slice = SheetDataMap::new();
        slice.insert(sheet, entries);
        slice
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[SheetEntry])> {
        self.0.iter().map(|(name, entries)| (name.as_str(), entries.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        for (sheet, entries) in &self.0 {
            validate_entries(sheet, entries)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, Vec<SheetEntry>)> for SheetDataMap {
    fn from_iter<T: IntoIterator<Item = (String, Vec<SheetEntry>)>>(iter: T) -> Self {
        Self::from_sheets(iter)
    }
}

impl IntoIterator for SheetDataMap {
    type Item = (String, Vec<SheetEntry>);
    type IntoIter = indexmap::map::IntoIter<String, Vec<SheetEntry>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// 深度合併 JSON：物件逐鍵遞迴，其餘型別直接覆寫
pub fn merge_json(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

/// 請求層級的共享上下文，傳給每個轉換單元
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateContext {
    pub execution_id: String,
    #[serde(default)]
    pub shared_data: Map<String, Value>,
}

impl TemplateContext {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            shared_data: Map::new(),
        }
    }

    /// 以時間戳產生 execution id
    pub fn generated() -> Self {
        Self::new(format!(
            "run-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S%3f")
        ))
    }

    pub fn with_shared_data(mut self, shared_data: Map<String, Value>) -> Self {
        self.shared_data = shared_data;
        self
    }

    pub fn add_shared_data(&mut self, key: impl Into<String>, value: Value) {
        self.shared_data.insert(key.into(), value);
    }

    pub fn get_shared_data(&self, key: &str) -> Option<&Value> {
        self.shared_data.get(key)
    }

    /// 套用欄位映射寫入的 context patch，產生工作表專屬的上下文
    pub fn with_patch(&self, patch: &Map<String, Value>) -> Self {
        let mut shared = Value::Object(self.shared_data.clone());
        merge_json(&mut shared, Value::Object(patch.clone()));
        let shared_data = match shared {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            execution_id: self.execution_id.clone(),
            shared_data,
        }
    }
}
