use crate::core::overlay::split_owned;
use crate::domain::model::{ColumnDirective, ColumnDirectives, MetadataEntry, Row, SheetDataMap, SheetEntry, TemplateContext};
use crate::domain::ports::{GenerationUnit, ProcessingUnit, UnitResult};
use crate::utils::error::{UnitError, ValidationIssue};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

pub const EMPLOYEE_SHEET: &str = "Employees";
pub const STATUS_COLUMN: &str = "status";
pub const ERROR_COLOR: &str = "#FFC7CE";

const REQUIRED_COLUMNS: [&str; 2] = ["name", "department"];

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"))
}

fn directive(order_number: i64, width: f64) -> ColumnDirective {
    ColumnDirective {
        order_number: Some(order_number),
        width: Some(width),
        ..Default::default()
    }
}

/// 員工名單的匯入處理
///
/// 清理字串前後空白、檢查必填欄位與 email 格式，並在每列寫入 `status`。
/// 有問題的欄位會在元數據中標成紅底；`shared_data.strict = true` 時改為整批失敗。
#[derive(Debug, Clone, Default)]
pub struct EmployeeSheetProcessor;

impl EmployeeSheetProcessor {
    pub fn new() -> Self {
        Self
    }

    fn check_row(index: usize, row: &mut Row) -> Vec<ValidationIssue> {
        for value in row.values_mut() {
            if let Value::String(text) = value {
                let trimmed = text.trim();
                if trimmed.len() != text.len() {
                    *text = trimmed.to_string();
                }
            }
        }

        let mut issues = Vec::new();
        for column in REQUIRED_COLUMNS {
            let missing = match row.get(column) {
                None | Some(Value::Null) => true,
                Some(Value::String(text)) => text.is_empty(),
                Some(_) => false,
            };
            if missing {
                issues.push(ValidationIssue {
                    row: index,
                    column: column.to_string(),
                    message: format!("{} is required", column),
                });
            }
        }

        if let Some(Value::String(email)) = row.get("email") {
            if !email.is_empty() && !email_pattern().is_match(email) {
                issues.push(ValidationIssue {
                    row: index,
                    column: "email".to_string(),
                    message: format!("'{}' is not a valid email address", email),
                });
            }
        }

        let status = if issues.is_empty() {
            "OK".to_string()
        } else {
            let messages: Vec<&str> = issues.iter().map(|i| i.message.as_str()).collect();
            format!("ERROR: {}", messages.join("; "))
        };
        row.insert(STATUS_COLUMN.to_string(), Value::String(status));

        issues
    }

    fn process_entries(entries: Vec<SheetEntry>) -> (Vec<SheetEntry>, Vec<ValidationIssue>) {
        let (existing, rows) = split_owned(entries);
        let mut columns = existing.unwrap_or_default();
        let mut issues = Vec::new();
        let mut output = Vec::with_capacity(rows.len() + 1);

        for (index, mut row) in rows.into_iter().enumerate() {
            issues.extend(Self::check_row(index, &mut row));
            output.push(SheetEntry::Data(row));
        }

        let status = columns.entry(STATUS_COLUMN.to_string()).or_default();
        status.is_locked = Some(true);

        for issue in &issues {
            let column = columns.entry(issue.column.clone()).or_default();
            column.color = Some(ERROR_COLOR.to_string());
        }
        if !issues.is_empty() {
            if let Some(status) = columns.get_mut(STATUS_COLUMN) {
                status.color = Some(ERROR_COLOR.to_string());
            }
        }

        output.insert(0, SheetEntry::Metadata(MetadataEntry::new(columns)));
        (output, issues)
    }
}

#[async_trait::async_trait]
impl ProcessingUnit for EmployeeSheetProcessor {
    async fn process(&self, sheet: SheetDataMap, context: &TemplateContext) -> UnitResult {
        let strict = matches!(context.get_shared_data("strict"), Some(Value::Bool(true)));
        let mut output = SheetDataMap::new();
        let mut all_issues = Vec::new();

        for (sheet_name, entries) in sheet {
            let (entries, issues) = Self::process_entries(entries);
            tracing::debug!(
                "🧮 {}: {} row(s), {} issue(s)",
                sheet_name,
                entries.len().saturating_sub(1),
                issues.len()
            );
            all_issues.extend(issues);
            output.insert(sheet_name, entries);
        }

        if strict && !all_issues.is_empty() {
            return Err(UnitError::Validation {
                message: format!("{} employee field(s) failed validation", all_issues.len()),
                issues: all_issues,
            });
        }

        Ok(output)
    }
}

/// 員工名單的下載樣板：欄位樣式加一列範例資料
#[derive(Debug, Clone)]
pub struct EmployeeSheetGenerator {
    sheet_name: String,
}

impl Default for EmployeeSheetGenerator {
    fn default() -> Self {
        Self::new(EMPLOYEE_SHEET)
    }
}

impl EmployeeSheetGenerator {
    pub fn new(sheet_name: impl Into<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
        }
    }

    fn columns() -> ColumnDirectives {
        let mut columns = ColumnDirectives::new();
        columns.insert("name".to_string(), directive(1, 30.0));
        columns.insert("department".to_string(), directive(2, 20.0));
        columns.insert("email".to_string(), directive(3, 35.0));
        columns.insert(
            STATUS_COLUMN.to_string(),
            ColumnDirective {
                is_locked: Some(true),
                hidden: Some(true),
                ..directive(4, 15.0)
            },
        );
        columns
    }
}

#[async_trait::async_trait]
impl GenerationUnit for EmployeeSheetGenerator {
    async fn generate(&self, context: &TemplateContext) -> UnitResult {
        let department = context
            .get_shared_data("department")
            .and_then(Value::as_str)
            .unwrap_or("Engineering");

        let sample = json!({
            "name": "Jane Doe",
            "department": department,
            "email": "jane.doe@example.com",
        });
        let sample = SheetEntry::try_from(sample).map_err(UnitError::failed)?;

        let mut output = SheetDataMap::new();
        output.insert(
            self.sheet_name.clone(),
            vec![SheetEntry::Metadata(MetadataEntry::new(Self::columns())), sample],
        );
        Ok(output)
    }
}
