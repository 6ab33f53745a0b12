use crate::core::manager::EngineSettings;
use crate::core::template::TemplateDescriptor;
use crate::domain::model::ColumnDirectives;
use crate::domain::ports::ConfigSource;
use crate::utils::error::{EngineError, Result};
use crate::utils::validation::{
    validate_hex_color, validate_positive_number, validate_range, validate_unique_names, Validate,
};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 欄位的基礎設定（管理端維護的預設樣式）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub columns: ColumnDirectives,
}

/// 樣板設定檔
///
/// ```toml
/// [engine]
/// max_concurrent_sheets = 4
///
/// [schemas.employee.columns.name]
/// width = 30
/// order_number = 1
///
/// [[templates]]
/// template_id = "HRBulkUpload"
///
/// [[templates.sheets]]
/// sheet_name = "Employees"
/// schema_name = "employee"
/// processing_unit = "EmployeeSheetProcessor"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub templates: Vec<TemplateDescriptor>,
    #[serde(default)]
    pub schemas: IndexMap<String, SchemaConfig>,
}

impl TemplateConfig {
    /// 從 TOML 檔案載入設定
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::MissingConfigError {
                field: path.display().to_string(),
            });
        }
        tracing::debug!("📖 Loading template configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// 從 TOML 字串解析設定（尚未驗證）
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EngineError::ConfigValidationError {
            field: "template_toml_parsing".to_string(),
            message: format!("Template TOML parsing error: {}", e),
        })
    }

    /// 載入並驗證
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::from_file(path)?;
        config.validate()?;
        tracing::info!(
            "📋 Loaded {} template(s) and {} schema(s)",
            config.templates.len(),
            config.schemas.len()
        );
        Ok(config)
    }

    /// 替換 `${VAR}`；未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| EngineError::ConfigValidationError {
            field: "env_substitution".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate(&self) -> Result<()> {
        validate_positive_number("engine.max_concurrent_sheets", self.engine.max_concurrent_sheets, 1)?;
        if let Some(seconds) = self.engine.request_timeout_seconds {
            validate_positive_number("engine.request_timeout_seconds", seconds as usize, 1)?;
        }

        validate_unique_names(
            "templates.template_id",
            self.templates.iter().map(|t| t.template_id.as_str()),
        )?;

        for template in &self.templates {
            template.validate()?;

            for sheet in &template.sheets {
                if !self.schemas.contains_key(&sheet.schema_name) {
                    tracing::warn!(
                        "🔶 Sheet '{}' references unknown schema '{}'; no base directives will apply",
                        sheet.sheet_name,
                        sheet.schema_name
                    );
                }
            }
        }

        for (schema_name, schema) in &self.schemas {
            for (column, directive) in &schema.columns {
                let field = format!("schemas.{}.columns.{}", schema_name, column);
                if let Some(color) = &directive.color {
                    validate_hex_color(&format!("{}.color", field), color)?;
                }
                if let Some(width) = directive.width {
                    validate_range(&format!("{}.width", field), width, 0.0, 255.0)?;
                }
            }
        }

        Ok(())
    }

    pub fn get_template(&self, template_id: &str) -> Option<&TemplateDescriptor> {
        self.templates.iter().find(|t| t.template_id == template_id)
    }
}

impl ConfigSource for TemplateConfig {
    fn template_descriptor(&self, template_id: &str) -> Option<TemplateDescriptor> {
        self.get_template(template_id).cloned()
    }

    fn base_column_directives(&self, schema_name: &str) -> ColumnDirectives {
        self.schemas
            .get(schema_name)
            .map(|schema| schema.columns.clone())
            .unwrap_or_default()
    }

    fn template_ids(&self) -> Vec<String> {
        self.templates.iter().map(|t| t.template_id.clone()).collect()
    }
}

impl Validate for TemplateConfig {
    fn validate(&self) -> Result<()> {
        self.validate()
    }
}
