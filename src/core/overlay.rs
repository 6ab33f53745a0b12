use crate::domain::model::{ColumnDirective, ColumnDirectives, Row, SheetEntry};
use serde::Serialize;

/// 拆出開頭的元數據項目與其後的資料列
///
/// 沒有元數據項目時回傳 `(None, entries)`，這是預設情況而非錯誤。
pub fn split(entries: &[SheetEntry]) -> (Option<&ColumnDirectives>, &[SheetEntry]) {
    match entries.first() {
        Some(SheetEntry::Metadata(metadata)) => (Some(&metadata.columns), &entries[1..]),
        _ => (None, entries),
    }
}

/// `split` 的擁有權版本，直接取出資料列
pub fn split_owned(entries: Vec<SheetEntry>) -> (Option<ColumnDirectives>, Vec<Row>) {
    let mut metadata = None;
    let mut rows = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        match entry {
            SheetEntry::Metadata(meta) if index == 0 => metadata = Some(meta.columns),
            SheetEntry::Metadata(_) => {
                tracing::warn!("🔶 Ignoring metadata entry at position {}", index);
            }
            SheetEntry::Data(row) => rows.push(row),
        }
    }

    (metadata, rows)
}

fn order_key(directive: &ColumnDirective) -> (u8, i64) {
    // 未指定 orderNumber 的欄位排在所有明確數值之後
    match directive.order_number {
        Some(order) => (0, order),
        None => (1, 0),
    }
}

/// 依 orderNumber 穩定排序；同值依最先出現的順序
pub fn sort_columns(columns: &mut ColumnDirectives) {
    columns.sort_by(|_, a, _, b| order_key(a).cmp(&order_key(b)));
}

/// 將覆寫指示合併到基礎設定
///
/// 兩邊都有的欄位逐欄位合併（覆寫勝出），只在基礎出現的保留，
/// 只在覆寫出現的視為新欄位。結果依 orderNumber 排序。
pub fn reconcile(base: &ColumnDirectives, overlay: &ColumnDirectives) -> ColumnDirectives {
    let mut merged = base.clone();

    for (column, directive) in overlay {
        match merged.get_mut(column) {
            Some(existing) => *existing = existing.merged_with(directive),
            None => {
                tracing::debug!("➕ Overlay introduces new column '{}'", column);
                merged.insert(column.clone(), directive.clone());
            }
        }
    }

    sort_columns(&mut merged);
    merged
}

/// 輸出工作表所需的一切：排序後的欄位指示與資料列
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetLayout {
    pub sheet_name: String,
    pub columns: ColumnDirectives,
    #[serde(skip)]
    pub rows: Vec<Row>,
}

impl SheetLayout {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn visible_columns(&self) -> impl Iterator<Item = (&str, &ColumnDirective)> {
        self.columns
            .iter()
            .filter(|(_, directive)| !directive.is_hidden())
            .map(|(name, directive)| (name.as_str(), directive))
    }
}

/// 合併基礎設定與工作表自身的元數據，並補上資料中出現但沒有指示的欄位
pub fn build_layout(sheet_name: &str, base: &ColumnDirectives, entries: &[SheetEntry]) -> SheetLayout {
    let (overlay, data) = split(entries);
    let mut columns = match overlay {
        Some(overlay) => reconcile(base, overlay),
        None => {
            let mut columns = base.clone();
            sort_columns(&mut columns);
            columns
        }
    };

    let rows: Vec<Row> = data.iter().filter_map(|entry| entry.as_row().cloned()).collect();
    for row in &rows {
        for column in row.keys() {
            if !columns.contains_key(column) {
                columns.insert(column.clone(), ColumnDirective::default());
            }
        }
    }

    SheetLayout {
        sheet_name: sheet_name.to_string(),
        columns,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::MetadataEntry;
    use serde_json::json;

    fn directives(value: serde_json::Value) -> ColumnDirectives {
        serde_json::from_value(value).unwrap()
    }

    fn data(value: serde_json::Value) -> SheetEntry {
        SheetEntry::Data(value.as_object().cloned().unwrap())
    }

    fn names(columns: &ColumnDirectives) -> Vec<&str> {
        columns.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_split_without_metadata_returns_all_rows() {
        let entries = vec![data(json!({"a": 1})), data(json!({"a": 2}))];
        let (metadata, rows) = split(&entries);
        assert!(metadata.is_none());
        assert_eq!(rows, &entries[..]);

        // 對輸出再 split 一次結果不變
        let (again_meta, again_rows) = split(rows);
        assert!(again_meta.is_none());
        assert_eq!(again_rows, rows);
    }

    #[test]
    fn test_split_with_metadata() {
        let entries = vec![
            SheetEntry::Metadata(MetadataEntry::new(directives(json!({"a": {"width": 10}})))),
            data(json!({"a": 1})),
        ];
        let (metadata, rows) = split(&entries);
        assert_eq!(metadata.unwrap()["a"].width, Some(10.0));
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_metadata());
    }

    #[test]
    fn test_split_empty() {
        let (metadata, rows) = split(&[]);
        assert!(metadata.is_none());
        assert!(rows.is_empty());
    }

    #[test]
    fn test_reconcile_merges_field_wise() {
        let base = directives(json!({"A": {"width": 100}}));
        let overlay = directives(json!({"A": {"color": "#FFFFFF"}}));

        let merged = reconcile(&base, &overlay);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["A"].width, Some(100.0));
        assert_eq!(merged["A"].color.as_deref(), Some("#FFFFFF"));
    }

    #[test]
    fn test_reconcile_introduces_new_column() {
        let base = directives(json!({"A": {"width": 100}}));
        let overlay = directives(json!({"B": {"orderNumber": 1}}));

        let merged = reconcile(&base, &overlay);
        assert_eq!(names(&merged), vec!["B", "A"]);
        assert_eq!(merged["B"], ColumnDirective {
            order_number: Some(1),
            ..Default::default()
        });
        assert_eq!(merged["A"].width, Some(100.0));
    }

    #[test]
    fn test_column_ordering_unspecified_last() {
        let base = directives(json!({"A": {"orderNumber": 5}, "B": {"orderNumber": 1}, "C": {}}));
        let merged = reconcile(&base, &ColumnDirectives::new());
        assert_eq!(names(&merged), vec!["B", "A", "C"]);
    }

    #[test]
    fn test_ties_resolved_by_first_seen_base_before_overlay() {
        let base = directives(json!({"X": {"orderNumber": 2}, "Y": {}}));
        let overlay = directives(json!({"Z": {"orderNumber": 2}, "W": {}}));

        let merged = reconcile(&base, &overlay);
        assert_eq!(names(&merged), vec!["X", "Z", "Y", "W"]);

        // 重複呼叫結果一致
        assert_eq!(names(&reconcile(&base, &overlay)), names(&merged));
    }

    #[test]
    fn test_negative_order_numbers_on_signed_line() {
        let base = directives(json!({"A": {"orderNumber": 0}, "B": {"orderNumber": 3}}));
        let overlay = directives(json!({"C": {"orderNumber": -2}, "B": {"orderNumber": -5}}));

        let merged = reconcile(&base, &overlay);
        assert_eq!(names(&merged), vec!["B", "C", "A"]);
    }

    #[test]
    fn test_build_layout_appends_data_only_columns() {
        let base = directives(json!({"name": {"orderNumber": 1, "width": 30}}));
        let entries = vec![
            SheetEntry::Metadata(MetadataEntry::new(directives(
                json!({"status": {"orderNumber": 0, "color": "#FFC7CE"}}),
            ))),
            data(json!({"name": "Alice", "department": "HR"})),
            data(json!({"name": "Bob", "extra": true})),
        ];

        let layout = build_layout("Employees", &base, &entries);
        assert_eq!(layout.sheet_name, "Employees");
        assert_eq!(
            layout.column_names().collect::<Vec<_>>(),
            vec!["status", "name", "department", "extra"]
        );
        assert_eq!(layout.rows.len(), 2);
    }

    #[test]
    fn test_visible_columns_skip_hidden() {
        let base = directives(json!({"id": {"hidden": true}, "name": {}}));
        let layout = build_layout("Employees", &base, &[]);
        let visible: Vec<&str> = layout.visible_columns().map(|(name, _)| name).collect();
        assert_eq!(visible, vec!["name"]);
    }
}
