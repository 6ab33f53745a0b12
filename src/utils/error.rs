use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// 轉換單元種類，用於錯誤訊息與註冊表查詢
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnitKind {
    Processor,
    Generator,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Processor => write!(f, "processing unit"),
            UnitKind::Generator => write!(f, "generation unit"),
        }
    }
}

/// 單一儲存格的驗證問題
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub row: usize,
    pub column: String,
    pub message: String,
}

/// 處理/產生單元回報的領域錯誤，引擎原封不動地往上傳遞
#[derive(Error, Debug)]
pub enum UnitError {
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("{message}")]
    Failed { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UnitError {
    pub fn failed(message: impl Into<String>) -> Self {
        UnitError::Failed {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Template '{template_id}' not found")]
    TemplateNotFound { template_id: String },

    #[error("No {kind} registered under the name '{name}'")]
    UnitNotFound { kind: UnitKind, name: String },

    #[error("A {kind} named '{name}' is already registered")]
    DuplicateUnit { kind: UnitKind, name: String },

    #[error("Template '{template_id}', sheet '{sheet}': unit '{unit}' failed: {source}")]
    UnitFailure {
        template_id: String,
        sheet: String,
        unit: String,
        #[source]
        source: UnitError,
    },

    #[error("Sheet '{sheet}': field mapping '{path}' failed: {reason}")]
    MappingFailure {
        sheet: String,
        path: String,
        reason: String,
    },

    #[error("Sheet '{sheet}': unit '{unit}' returned invalid output: {reason}")]
    InvalidUnitOutput {
        sheet: String,
        unit: String,
        reason: String,
    },

    #[error("Sheet '{sheet}' has invalid entries: {reason}")]
    InvalidSheetData { sheet: String, reason: String },

    #[error("Request for template '{template_id}' was cancelled")]
    Cancelled { template_id: String },

    #[error("Request for template '{template_id}' timed out after {seconds}s")]
    Timeout { template_id: String, seconds: u64 },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration '{field}'")]
    MissingConfigError { field: String },

    #[error("Workbook error: {message}")]
    WorkbookError { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ClientInput,
    Configuration,
    Unit,
    Mapping,
    Cancellation,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::TemplateNotFound { .. } | EngineError::InvalidSheetData { .. } => {
                ErrorCategory::ClientInput
            }
            EngineError::UnitNotFound { .. }
            | EngineError::DuplicateUnit { .. }
            | EngineError::ConfigValidationError { .. }
            | EngineError::InvalidConfigValueError { .. }
            | EngineError::MissingConfigError { .. } => ErrorCategory::Configuration,
            EngineError::UnitFailure { .. } | EngineError::InvalidUnitOutput { .. } => {
                ErrorCategory::Unit
            }
            EngineError::MappingFailure { .. } => ErrorCategory::Mapping,
            EngineError::Cancelled { .. } | EngineError::Timeout { .. } => {
                ErrorCategory::Cancellation
            }
            EngineError::WorkbookError { .. }
            | EngineError::IoError(_)
            | EngineError::SerializationError(_)
            | EngineError::CsvError(_)
            | EngineError::ZipError(_) => ErrorCategory::Io,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Cancellation => ErrorSeverity::Medium,
            ErrorCategory::ClientInput | ErrorCategory::Unit | ErrorCategory::Mapping => {
                ErrorSeverity::High
            }
            ErrorCategory::Configuration | ErrorCategory::Io => ErrorSeverity::Critical,
        }
    }

    /// 引擎本身從不重試；只有逾時由呼叫端決定是否再送一次
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            EngineError::TemplateNotFound { .. } => "Check the template identifier against the configured templates",
            EngineError::UnitNotFound { .. } => "Register the unit at startup or fix the unit name in the sheet descriptor",
            EngineError::DuplicateUnit { .. } => "Give each unit a unique name",
            EngineError::UnitFailure { .. } => "Inspect the unit error detail and correct the input rows",
            EngineError::MappingFailure { .. } => "Fix the out_path so it does not collide with an existing value",
            EngineError::InvalidUnitOutput { .. } => "The unit must return its own sheet with metadata only at index 0",
            EngineError::InvalidSheetData { .. } => "Place at most one metadata entry at the start of each sheet",
            EngineError::Cancelled { .. } => "Resubmit the request if it is still needed",
            EngineError::Timeout { .. } => "Retry later or raise engine.request_timeout_seconds",
            EngineError::ConfigValidationError { .. }
            | EngineError::InvalidConfigValueError { .. }
            | EngineError::MissingConfigError { .. } => "Correct the configuration file and restart",
            EngineError::WorkbookError { .. } | EngineError::CsvError(_) | EngineError::ZipError(_) => {
                "Make sure the workbook is a zip archive of CSV sheets"
            }
            EngineError::IoError(_) => "Check file paths and permissions",
            EngineError::SerializationError(_) => "Check that the JSON input is well formed",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EngineError::TemplateNotFound { template_id } => {
                format!("Unknown template: {}", template_id)
            }
            EngineError::UnitFailure {
                sheet, source, ..
            } => format!("Sheet '{}' could not be processed: {}", sheet, source),
            EngineError::Cancelled { .. } => "The request was cancelled".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
