use crate::core::field_mapper::FieldMapping;
use crate::domain::ports::ConfigSource;
use crate::utils::error::{EngineError, Result};
use crate::utils::validation::{validate_non_empty_string, validate_unique_names};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 欄位映射在處理單元之前或之後執行
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStage {
    #[default]
    BeforeUnit,
    AfterUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetDescriptor {
    pub sheet_name: String,
    pub schema_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub mapping_stage: MappingStage,
}

impl SheetDescriptor {
    pub fn new(sheet_name: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            schema_name: schema_name.into(),
            processing_unit: None,
            generation_unit: None,
            field_mappings: Vec::new(),
            mapping_stage: MappingStage::default(),
        }
    }

    pub fn with_processing_unit(mut self, name: impl Into<String>) -> Self {
        self.processing_unit = Some(name.into());
        self
    }

    pub fn with_generation_unit(mut self, name: impl Into<String>) -> Self {
        self.generation_unit = Some(name.into());
        self
    }

    pub fn with_field_mappings(mut self, mappings: Vec<FieldMapping>) -> Self {
        self.field_mappings = mappings;
        self
    }

    pub fn with_mapping_stage(mut self, stage: MappingStage) -> Self {
        self.mapping_stage = stage;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    pub template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsing_identifier: Option<String>,
    #[serde(default)]
    pub sheets: Vec<SheetDescriptor>,
}

impl TemplateDescriptor {
    pub fn new(template_id: impl Into<String>, sheets: Vec<SheetDescriptor>) -> Self {
        Self {
            template_id: template_id.into(),
            parsing_identifier: None,
            sheets,
        }
    }

    pub fn sheet(&self, sheet_name: &str) -> Option<&SheetDescriptor> {
        self.sheets.iter().find(|s| s.sheet_name == sheet_name)
    }

    /// 驗證樣板本身的結構
    pub fn validate(&self) -> Result<()> {
        validate_non_empty_string("templates.template_id", &self.template_id)?;
        validate_unique_names(
            &format!("templates.{}.sheets", self.template_id),
            self.sheets.iter().map(|s| s.sheet_name.as_str()),
        )?;

        for sheet in &self.sheets {
            let field = format!("templates.{}.sheets.{}", self.template_id, sheet.sheet_name);
            validate_non_empty_string(&format!("{}.sheet_name", field), &sheet.sheet_name)?;

            if sheet.processing_unit.is_none() && sheet.generation_unit.is_none() {
                tracing::warn!(
                    "🔶 Sheet '{}' in template '{}' has no unit and will be skipped in every flow",
                    sheet.sheet_name,
                    self.template_id
                );
            }

            // 處理單元執行後才映射時，已無法再影響上下文
            if sheet.mapping_stage == MappingStage::AfterUnit {
                if let Some(mapping) = sheet.field_mappings.iter().find(|m| m.writes_context()) {
                    return Err(EngineError::ConfigValidationError {
                        field: format!("{}.field_mappings", field),
                        message: format!(
                            "out_path '{}' writes the context, which is not allowed with mapping_stage = \"after_unit\"",
                            mapping.out_path
                        ),
                    });
                }
            }

            if !sheet.field_mappings.is_empty() && sheet.processing_unit.is_none() {
                tracing::warn!(
                    "🔶 Sheet '{}' declares field mappings but no processing unit; they will never run",
                    sheet.sheet_name
                );
            }
        }

        Ok(())
    }
}

/// 依樣板識別碼查詢描述
#[derive(Clone)]
pub struct TemplateResolver {
    source: Arc<dyn ConfigSource>,
}

impl TemplateResolver {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self { source }
    }

    pub fn find(&self, template_id: &str) -> Result<TemplateDescriptor> {
        self.source
            .template_descriptor(template_id)
            .ok_or_else(|| EngineError::TemplateNotFound {
                template_id: template_id.to_string(),
            })
    }

    pub fn source(&self) -> &Arc<dyn ConfigSource> {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ColumnDirectives;

    struct StaticSource {
        templates: Vec<TemplateDescriptor>,
    }

    impl ConfigSource for StaticSource {
        fn template_descriptor(&self, template_id: &str) -> Option<TemplateDescriptor> {
            self.templates.iter().find(|t| t.template_id == template_id).cloned()
        }

        fn base_column_directives(&self, _schema_name: &str) -> ColumnDirectives {
            ColumnDirectives::new()
        }

        fn template_ids(&self) -> Vec<String> {
            self.templates.iter().map(|t| t.template_id.clone()).collect()
        }
    }

    fn resolver() -> TemplateResolver {
        let template = TemplateDescriptor::new(
            "HRBulkUpload",
            vec![SheetDescriptor::new("Employees", "employee").with_processing_unit("EmployeeSheetProcessor")],
        );
        TemplateResolver::new(Arc::new(StaticSource {
            templates: vec![template],
        }))
    }

    #[test]
    fn test_find_existing_template() {
        let template = resolver().find("HRBulkUpload").unwrap();
        assert_eq!(template.sheets.len(), 1);
        assert_eq!(
            template.sheet("Employees").unwrap().processing_unit.as_deref(),
            Some("EmployeeSheetProcessor")
        );
    }

    #[test]
    fn test_unknown_template_is_template_not_found() {
        let err = resolver().find("Unknown").unwrap_err();
        assert!(matches!(err, EngineError::TemplateNotFound { template_id } if template_id == "Unknown"));
    }

    #[test]
    fn test_validate_rejects_duplicate_sheet_names() {
        let template = TemplateDescriptor::new(
            "Dup",
            vec![SheetDescriptor::new("A", "a"), SheetDescriptor::new("A", "b")],
        );
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_context_write_after_unit() {
        let sheet = SheetDescriptor::new("A", "a")
            .with_processing_unit("P")
            .with_mapping_stage(MappingStage::AfterUnit)
            .with_field_mappings(vec![FieldMapping::new("id", "$context.last_id").unwrap()]);
        let template = TemplateDescriptor::new("T", vec![sheet]);

        let err = template.validate().unwrap_err();
        assert!(matches!(err, EngineError::ConfigValidationError { .. }));
    }
}
