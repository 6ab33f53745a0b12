use crate::domain::model::{merge_json, Row, SheetEntry, TemplateContext};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

const CONTEXT_ROOT: &str = "$context";
const ROW_ROOT: &str = "$row";

/// 寫入陣列時最多可越過尾端補上的 null 數量
pub const MAX_WRITE_GAP: usize = 64;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("path '{path}': {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: String,
}

impl PathError {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// 路徑的命名空間：資料列本身或共享上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot {
    Row,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(i64),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "key '{}'", key),
            PathSegment::Index(index) => write!(f, "index [{}]", index),
        }
    }
}

/// 階層式欄位路徑，例如 `employees[0].name`、`$context.tenant.id`、`["Full.Name"]`
///
/// 讀取時負索引從尾端算起（`items[-1]` 為最後一個）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    raw: String,
    root: PathRoot,
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PathError::new(raw, "path cannot be empty"));
        }

        let mut segments = Vec::new();
        let mut buffer = String::new();
        let mut after_bracket = false;
        let mut chars = trimmed.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if buffer.is_empty() && !after_bracket {
                        return Err(PathError::new(raw, "empty path segment"));
                    }
                    if !buffer.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut buffer)));
                    }
                    after_bracket = false;
                    if chars.peek().is_none() {
                        return Err(PathError::new(raw, "path cannot end with '.'"));
                    }
                }
                '[' => {
                    if !buffer.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut buffer)));
                    }
                    segments.push(Self::parse_bracket(raw, &mut chars)?);
                    after_bracket = true;
                }
                ']' => return Err(PathError::new(raw, "unbalanced ']'")),
                _ => {
                    if after_bracket {
                        return Err(PathError::new(raw, "expected '.' or '[' after ']'"));
                    }
                    buffer.push(c);
                }
            }
        }
        if !buffer.is_empty() {
            segments.push(PathSegment::Key(buffer));
        }

        let root = match segments.first() {
            Some(PathSegment::Key(key)) if key == CONTEXT_ROOT => {
                segments.remove(0);
                PathRoot::Context
            }
            Some(PathSegment::Key(key)) if key == ROW_ROOT => {
                segments.remove(0);
                PathRoot::Row
            }
            _ => PathRoot::Row,
        };

        Ok(Self {
            raw: trimmed.to_string(),
            root,
            segments,
        })
    }

    fn parse_bracket(
        raw: &str,
        chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    ) -> Result<PathSegment, PathError> {
        // 引號包住的鍵，允許鍵名含有 '.'
        if let Some(&quote) = chars.peek().filter(|c| **c == '"' || **c == '\'') {
            chars.next();
            let mut key = String::new();
            loop {
                match chars.next() {
                    Some(c) if c == quote => break,
                    Some(c) => key.push(c),
                    None => return Err(PathError::new(raw, "unterminated quoted key")),
                }
            }
            return match chars.next() {
                Some(']') => Ok(PathSegment::Key(key)),
                _ => Err(PathError::new(raw, "expected ']' after quoted key")),
            };
        }

        let mut digits = String::new();
        loop {
            match chars.next() {
                Some(']') => break,
                Some(c) => digits.push(c),
                None => return Err(PathError::new(raw, "unterminated '['")),
            }
        }
        digits
            .trim()
            .parse::<i64>()
            .map(PathSegment::Index)
            .map_err(|_| PathError::new(raw, format!("invalid array index '{}'", digits)))
    }

    pub fn root(&self) -> PathRoot {
        self.root
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// `self` 與 `other` 指向同一槽位或位於其下層；只比較命名空間與各段，
    /// 所以 `name` 與 `$row.name` 視為相同
    pub fn is_within(&self, other: &FieldPath) -> bool {
        self.root == other.root && self.segments.starts_with(&other.segments)
    }

    /// 讀取路徑上的值；任何一段不存在都回傳 None
    pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| match segment {
                PathSegment::Key(key) => current.as_object()?.get(key),
                PathSegment::Index(index) => {
                    let items = current.as_array()?;
                    items.get(existing_position(*index, items.len())?)
                }
            })
    }

    /// 寫入路徑，必要時建立中間的物件或陣列
    pub fn assign(&self, target: &mut Value, value: Value) -> Result<(), PathError> {
        if self.segments.is_empty() {
            return Err(PathError::new(&self.raw, "cannot overwrite the whole namespace"));
        }

        let mut current = target;
        for segment in &self.segments {
            current = self.child_mut(current, segment)?;
        }
        *current = value;
        Ok(())
    }

    fn child_mut<'a>(&self, current: &'a mut Value, segment: &PathSegment) -> Result<&'a mut Value, PathError> {
        if current.is_null() {
            *current = match segment {
                PathSegment::Key(_) => Value::Object(Map::new()),
                PathSegment::Index(_) => Value::Array(Vec::new()),
            };
        }

        match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => Ok(map.entry(key.clone()).or_insert(Value::Null)),
            (PathSegment::Index(index), Value::Array(items)) => {
                let out_of_range = || PathError::new(&self.raw, format!("index {} out of range for write", index));
                let position = if *index < 0 {
                    existing_position(*index, items.len()).ok_or_else(out_of_range)?
                } else {
                    let position = usize::try_from(*index).map_err(|_| out_of_range())?;
                    if position.saturating_sub(items.len()) > MAX_WRITE_GAP {
                        return Err(out_of_range());
                    }
                    position
                };
                if position >= items.len() {
                    items.resize(position + 1, Value::Null);
                }
                items.get_mut(position).ok_or_else(out_of_range)
            }
            (segment, other) => Err(PathError::new(
                &self.raw,
                format!("cannot write {} into {}", segment, json_kind(other)),
            )),
        }
    }

    /// 移除路徑上的值（若存在）
    pub fn remove(&self, target: &mut Value) -> Option<Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = target;
        for segment in parents {
            current = match segment {
                PathSegment::Key(key) => current.as_object_mut()?.get_mut(key)?,
                PathSegment::Index(index) => {
                    let items = current.as_array_mut()?;
                    let position = existing_position(*index, items.len())?;
                    items.get_mut(position)?
                }
            };
        }
        match last {
            PathSegment::Key(key) => current.as_object_mut()?.shift_remove(key),
            PathSegment::Index(index) => {
                let items = current.as_array_mut()?;
                let position = existing_position(*index, items.len())?;
                Some(items.remove(position))
            }
        }
    }
}

/// 既有元素的位置；負數從尾端數回來
fn existing_position(index: i64, len: usize) -> Option<usize> {
    let position = if index < 0 {
        len.checked_sub(usize::try_from(index.unsigned_abs()).ok()?)?
    } else {
        usize::try_from(index).ok()?
    };
    (position < len).then_some(position)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = PathError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        FieldPath::parse(&raw)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.raw
    }
}

/// 宣告式欄位映射：從 `in_path` 讀取，寫到 `out_path`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub in_path: FieldPath,
    pub out_path: FieldPath,
    /// 複製成功後刪除來源欄位（改名）
    #[serde(default)]
    pub remove_source: bool,
}

impl FieldMapping {
    pub fn new(in_path: &str, out_path: &str) -> Result<Self, PathError> {
        Ok(Self {
            in_path: FieldPath::parse(in_path)?,
            out_path: FieldPath::parse(out_path)?,
            remove_source: false,
        })
    }

    pub fn renaming(mut self) -> Self {
        self.remove_source = true;
        self
    }

    pub fn writes_context(&self) -> bool {
        self.out_path.root() == PathRoot::Context
    }
}

/// 單列套用映射後的結果
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRow {
    pub row: Row,
    pub context_patch: Map<String, Value>,
}

/// 依宣告順序逐一套用映射；後面的映射看得到前面寫入的值
///
/// 來源不存在時該映射略過，不視為錯誤。
pub fn apply(row: &Row, mappings: &[FieldMapping], context: &Value) -> Result<MappedRow, PathError> {
    let mut working = Value::Object(row.clone());
    let mut context_view: Option<Value> = None;
    let mut patch = Value::Object(Map::new());

    for mapping in mappings {
        let source = match mapping.in_path.root() {
            PathRoot::Row => mapping.in_path.lookup(&working),
            PathRoot::Context => mapping.in_path.lookup(context_view.as_ref().unwrap_or(context)),
        };
        let Some(value) = source.cloned() else {
            tracing::trace!("⏭️ Mapping source '{}' not supplied", mapping.in_path);
            continue;
        };

        match mapping.out_path.root() {
            PathRoot::Row => mapping.out_path.assign(&mut working, value)?,
            PathRoot::Context => {
                let view = context_view.get_or_insert_with(|| context.clone());
                mapping.out_path.assign(view, value.clone())?;
                mapping.out_path.assign(&mut patch, value)?;
            }
        }

        // 目標落在來源之內時刪除來源會連同剛寫入的值一起刪掉
        if mapping.remove_source
            && mapping.in_path.root() == PathRoot::Row
            && !mapping.out_path.is_within(&mapping.in_path)
        {
            mapping.in_path.remove(&mut working);
        }
    }

    let row = match working {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let context_patch = match patch {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Ok(MappedRow { row, context_patch })
}

/// 對工作表的每筆資料列套用映射，開頭的元數據項目原樣保留
///
/// 回傳新的項目序列與整張工作表累積的 context patch。
pub fn map_sheet_entries(
    entries: Vec<SheetEntry>,
    mappings: &[FieldMapping],
    context: &TemplateContext,
) -> Result<(Vec<SheetEntry>, Map<String, Value>), PathError> {
    if mappings.is_empty() {
        return Ok((entries, Map::new()));
    }

    let mut context_value = Value::Object(context.shared_data.clone());
    let mut sheet_patch = Value::Object(Map::new());
    let mut mapped = Vec::with_capacity(entries.len());

    for entry in entries {
        match entry {
            SheetEntry::Metadata(metadata) => mapped.push(SheetEntry::Metadata(metadata)),
            SheetEntry::Data(row) => {
                let result = apply(&row, mappings, &context_value)?;
                if !result.context_patch.is_empty() {
                    merge_json(&mut context_value, Value::Object(result.context_patch.clone()));
                    merge_json(&mut sheet_patch, Value::Object(result.context_patch));
                }
                mapped.push(SheetEntry::Data(result.row));
            }
        }
    }

    let patch = match sheet_patch {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Ok((mapped, patch))
}
