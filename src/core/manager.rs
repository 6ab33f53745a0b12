use crate::core::field_mapper::{map_sheet_entries, PathError};
use crate::core::overlay::{build_layout, SheetLayout};
use crate::core::registry::UnitRegistry;
use crate::core::template::{MappingStage, SheetDescriptor, TemplateResolver};
use crate::domain::model::{validate_entries, SheetDataMap, SheetEntry, TemplateContext};
use crate::domain::ports::{ConfigSource, GenerationUnit, ProcessingUnit};
use crate::utils::error::{EngineError, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn default_max_concurrent_sheets() -> usize {
    4
}

/// 引擎層級設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// 單一請求內同時執行的工作表數量上限
    #[serde(default = "default_max_concurrent_sheets")]
    pub max_concurrent_sheets: usize,
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_sheets: default_max_concurrent_sheets(),
            request_timeout_seconds: None,
        }
    }
}

type SheetOutput = (usize, String, Vec<SheetEntry>);

/// 樣板管理器：依樣板把每張工作表派送給對應單元，並依設定順序合併結果
///
/// 任何一張工作表失敗都會中止整個請求，其餘執行中的工作表一併丟棄，
/// 不會回傳部分結果。
pub struct TemplateManager {
    resolver: TemplateResolver,
    registry: Arc<UnitRegistry>,
    settings: EngineSettings,
}

impl TemplateManager {
    pub fn new(source: Arc<dyn ConfigSource>, registry: Arc<UnitRegistry>) -> Self {
        Self {
            resolver: TemplateResolver::new(source),
            registry,
            settings: EngineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    /// 匯入流程
    pub async fn run_processing(
        &self,
        template_id: &str,
        input: &SheetDataMap,
        context: &TemplateContext,
    ) -> Result<SheetDataMap> {
        self.run_processing_until(template_id, input, context, futures::future::pending())
            .await
    }

    /// 匯入流程；`cancel` 先完成時中止所有工作表並回傳 `Cancelled`
    pub async fn run_processing_until<C>(
        &self,
        template_id: &str,
        input: &SheetDataMap,
        context: &TemplateContext,
        cancel: C,
    ) -> Result<SheetDataMap>
    where
        C: Future<Output = ()>,
    {
        let work = self.process_all(template_id, input, context);
        self.guard(template_id, work, cancel).await
    }

    /// 匯出流程
    pub async fn run_generation(&self, template_id: &str, context: &TemplateContext) -> Result<SheetDataMap> {
        self.run_generation_until(template_id, context, futures::future::pending())
            .await
    }

    pub async fn run_generation_until<C>(
        &self,
        template_id: &str,
        context: &TemplateContext,
        cancel: C,
    ) -> Result<SheetDataMap>
    where
        C: Future<Output = ()>,
    {
        let work = self.generate_all(template_id, context);
        self.guard(template_id, work, cancel).await
    }

    /// 為每張工作表合併基礎欄位設定與單元輸出的元數據
    pub fn sheet_layouts(&self, template_id: &str, data: &SheetDataMap) -> Result<Vec<SheetLayout>> {
        let template = self.resolver.find(template_id)?;
        let source = self.resolver.source();

        Ok(data
            .iter()
            .map(|(sheet_name, entries)| {
                let base = template
                    .sheet(sheet_name)
                    .map(|sheet| source.base_column_directives(&sheet.schema_name))
                    .unwrap_or_default();
                build_layout(sheet_name, &base, entries)
            })
            .collect())
    }

    /// 啟動時檢查：所有樣板引用的單元都已註冊
    pub fn verify_units(&self) -> Result<()> {
        for template_id in self.resolver.source().template_ids() {
            let template = self.resolver.find(&template_id)?;
            for sheet in &template.sheets {
                if let Some(name) = &sheet.processing_unit {
                    self.registry.processor(name)?;
                }
                if let Some(name) = &sheet.generation_unit {
                    self.registry.generator(name)?;
                }
            }
        }
        Ok(())
    }

    async fn guard<F, C>(&self, template_id: &str, work: F, cancel: C) -> Result<SheetDataMap>
    where
        F: Future<Output = Result<SheetDataMap>>,
        C: Future<Output = ()>,
    {
        let timed = async {
            match self.settings.request_timeout_seconds {
                Some(seconds) => match tokio::time::timeout(Duration::from_secs(seconds), work).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!("⏰ {}: Request exceeded {}s, dropping in-flight sheets", template_id, seconds);
                        Err(EngineError::Timeout {
                            template_id: template_id.to_string(),
                            seconds,
                        })
                    }
                },
                None => work.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel => {
                tracing::warn!("🛑 {}: Request cancelled, dropping in-flight sheets", template_id);
                Err(EngineError::Cancelled {
                    template_id: template_id.to_string(),
                })
            }
            result = timed => result,
        }
    }

    async fn process_all(
        &self,
        template_id: &str,
        input: &SheetDataMap,
        context: &TemplateContext,
    ) -> Result<SheetDataMap> {
        let start_time = Instant::now();
        let template = self.resolver.find(template_id)?;
        input.validate()?;

        for sheet_name in input.sheet_names() {
            if template.sheet(sheet_name).is_none() {
                tracing::debug!("⏭️ {}: Input sheet '{}' is not part of the template", template_id, sheet_name);
            }
        }

        // 先解析所有單元，設定錯誤在派送任何工作表之前就回報
        let mut jobs = Vec::new();
        for sheet in &template.sheets {
            let Some(unit_name) = sheet.processing_unit.as_deref() else {
                tracing::debug!("⏭️ {}: Sheet '{}' has no processing unit", template_id, sheet.sheet_name);
                continue;
            };
            let unit = self.registry.processor(unit_name)?;
            jobs.push((sheet, unit_name, unit));
        }

        tracing::info!("📥 {}: Processing {} sheet(s)", template_id, jobs.len());

        let outputs = stream::iter(jobs.into_iter().enumerate().map(|(index, (sheet, unit_name, unit))| {
            self.process_sheet(index, template_id, sheet, unit_name, unit, input, context)
        }))
        .buffer_unordered(self.settings.max_concurrent_sheets.max(1))
        .try_collect::<Vec<_>>()
        .await?;

        let result = merge_outputs(outputs);
        tracing::info!(
            "✅ {}: Processing complete (sheets: {}, duration: {:?})",
            template_id,
            result.len(),
            start_time.elapsed()
        );
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_sheet(
        &self,
        index: usize,
        template_id: &str,
        sheet: &SheetDescriptor,
        unit_name: &str,
        unit: Arc<dyn ProcessingUnit>,
        input: &SheetDataMap,
        context: &TemplateContext,
    ) -> Result<SheetOutput> {
        let sheet_name = sheet.sheet_name.as_str();
        let mut slice = input.slice(sheet_name);
        let mut sheet_context = Cow::Borrowed(context);

        if sheet.mapping_stage == MappingStage::BeforeUnit && !sheet.field_mappings.is_empty() {
            let entries = slice.take_sheet(sheet_name).unwrap_or_default();
            let (mapped, patch) = map_sheet_entries(entries, &sheet.field_mappings, context)
                .map_err(|e| mapping_failure(sheet_name, e))?;
            slice.insert(sheet_name, mapped);
            if !patch.is_empty() {
                sheet_context = Cow::Owned(context.with_patch(&patch));
            }
            tracing::debug!(
                "🔀 {}: Applied {} field mapping(s) to sheet '{}'",
                template_id,
                sheet.field_mappings.len(),
                sheet_name
            );
        }

        tracing::debug!("🔄 {}: Sheet '{}' -> {}", template_id, sheet_name, unit_name);
        let output = unit.process(slice, &sheet_context).await.map_err(|source| {
            tracing::error!("❌ {}: Unit '{}' failed on sheet '{}': {}", template_id, unit_name, sheet_name, source);
            EngineError::UnitFailure {
                template_id: template_id.to_string(),
                sheet: sheet_name.to_string(),
                unit: unit_name.to_string(),
                source,
            }
        })?;

        let mut entries = take_unit_output(sheet_name, unit_name, output)?;

        if sheet.mapping_stage == MappingStage::AfterUnit && !sheet.field_mappings.is_empty() {
            let (mapped, _) = map_sheet_entries(entries, &sheet.field_mappings, context)
                .map_err(|e| mapping_failure(sheet_name, e))?;
            entries = mapped;
        }

        Ok((index, sheet_name.to_string(), entries))
    }

    async fn generate_all(&self, template_id: &str, context: &TemplateContext) -> Result<SheetDataMap> {
        let start_time = Instant::now();
        let template = self.resolver.find(template_id)?;

        let mut jobs = Vec::new();
        for sheet in &template.sheets {
            let Some(unit_name) = sheet.generation_unit.as_deref() else {
                tracing::debug!("⏭️ {}: Sheet '{}' has no generation unit", template_id, sheet.sheet_name);
                continue;
            };
            if !sheet.field_mappings.is_empty() {
                tracing::debug!(
                    "⏭️ {}: Field mappings of sheet '{}' are not used for generation",
                    template_id,
                    sheet.sheet_name
                );
            }
            let unit = self.registry.generator(unit_name)?;
            jobs.push((sheet, unit_name, unit));
        }

        tracing::info!("📤 {}: Generating {} sheet(s)", template_id, jobs.len());

        let outputs = stream::iter(jobs.into_iter().enumerate().map(|(index, (sheet, unit_name, unit))| {
            self.generate_sheet(index, template_id, sheet, unit_name, unit, context)
        }))
        .buffer_unordered(self.settings.max_concurrent_sheets.max(1))
        .try_collect::<Vec<_>>()
        .await?;

        let result = merge_outputs(outputs);
        tracing::info!(
            "✅ {}: Generation complete (sheets: {}, duration: {:?})",
            template_id,
            result.len(),
            start_time.elapsed()
        );
        Ok(result)
    }

    async fn generate_sheet(
        &self,
        index: usize,
        template_id: &str,
        sheet: &SheetDescriptor,
        unit_name: &str,
        unit: Arc<dyn GenerationUnit>,
        context: &TemplateContext,
    ) -> Result<SheetOutput> {
        let sheet_name = sheet.sheet_name.as_str();
        tracing::debug!("🔄 {}: Sheet '{}' -> {}", template_id, sheet_name, unit_name);

        let output = unit.generate(context).await.map_err(|source| {
            tracing::error!("❌ {}: Unit '{}' failed on sheet '{}': {}", template_id, unit_name, sheet_name, source);
            EngineError::UnitFailure {
                template_id: template_id.to_string(),
                sheet: sheet_name.to_string(),
                unit: unit_name.to_string(),
                source,
            }
        })?;

        let entries = take_unit_output(sheet_name, unit_name, output)?;
        Ok((index, sheet_name.to_string(), entries))
    }
}

fn mapping_failure(sheet: &str, error: PathError) -> EngineError {
    EngineError::MappingFailure {
        sheet: sheet.to_string(),
        path: error.path,
        reason: error.reason,
    }
}

/// 取出單元輸出中屬於該工作表的項目並檢查元數據位置
fn take_unit_output(sheet: &str, unit: &str, mut output: SheetDataMap) -> Result<Vec<SheetEntry>> {
    let entries = output
        .take_sheet(sheet)
        .ok_or_else(|| EngineError::InvalidUnitOutput {
            sheet: sheet.to_string(),
            unit: unit.to_string(),
            reason: format!("output does not contain sheet '{}'", sheet),
        })?;

    if !output.is_empty() {
        tracing::warn!(
            "🔶 Unit '{}' returned extra sheets {:?}; only '{}' is kept",
            unit,
            output.sheet_names().collect::<Vec<_>>(),
            sheet
        );
    }

    validate_entries(sheet, &entries).map_err(|e| EngineError::InvalidUnitOutput {
        sheet: sheet.to_string(),
        unit: unit.to_string(),
        reason: match e {
            EngineError::InvalidSheetData { reason, .. } => reason,
            other => other.to_string(),
        },
    })?;

    Ok(entries)
}

/// 依樣板宣告順序合併，與完成順序無關
fn merge_outputs(mut outputs: Vec<SheetOutput>) -> SheetDataMap {
    outputs.sort_by_key(|(index, _, _)| *index);
    SheetDataMap::from_sheets(outputs.into_iter().map(|(_, name, entries)| (name, entries)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field_mapper::FieldMapping;
    use crate::core::template::TemplateDescriptor;
    use crate::domain::model::{ColumnDirectives, MetadataEntry, Row};
    use crate::domain::ports::UnitResult;
    use crate::utils::error::UnitError;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockSource {
        templates: Vec<TemplateDescriptor>,
        base: ColumnDirectives,
    }

    impl ConfigSource for MockSource {
        fn template_descriptor(&self, template_id: &str) -> Option<TemplateDescriptor> {
            self.templates.iter().find(|t| t.template_id == template_id).cloned()
        }

        fn base_column_directives(&self, schema_name: &str) -> ColumnDirectives {
            if schema_name == "employee" {
                self.base.clone()
            } else {
                ColumnDirectives::new()
            }
        }

        fn template_ids(&self) -> Vec<String> {
            self.templates.iter().map(|t| t.template_id.clone()).collect()
        }
    }

    /// 延遲後回傳輸入，並在每列加上 `seen_by`
    struct DelayedProcessor {
        name: &'static str,
        delay_ms: u64,
        finished: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl ProcessingUnit for DelayedProcessor {
        async fn process(&self, mut sheet: SheetDataMap, context: &TemplateContext) -> UnitResult {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.finished.store(true, Ordering::SeqCst);

            let names: Vec<String> = sheet.sheet_names().map(str::to_string).collect();
            let mut out = SheetDataMap::new();
            for name in names {
                let entries = sheet.take_sheet(&name).unwrap_or_default();
                let entries = entries
                    .into_iter()
                    .map(|entry| match entry {
                        SheetEntry::Data(mut row) => {
                            row.insert("seen_by".to_string(), json!(self.name));
                            if let Some(tenant) = context.get_shared_data("tenant") {
                                row.insert("tenant".to_string(), tenant.clone());
                            }
                            SheetEntry::Data(row)
                        }
                        other => other,
                    })
                    .collect();
                out.insert(name, entries);
            }
            Ok(out)
        }
    }

    struct FailingProcessor;

    #[async_trait::async_trait]
    impl ProcessingUnit for FailingProcessor {
        async fn process(&self, _sheet: SheetDataMap, _context: &TemplateContext) -> UnitResult {
            Err(UnitError::Validation {
                message: "name is required".to_string(),
                issues: Vec::new(),
            })
        }
    }

    struct WrongSheetProcessor;

    #[async_trait::async_trait]
    impl ProcessingUnit for WrongSheetProcessor {
        async fn process(&self, _sheet: SheetDataMap, _context: &TemplateContext) -> UnitResult {
            Ok(SheetDataMap::from_rows("Elsewhere", Vec::new()))
        }
    }

    struct CountingGenerator {
        sheet: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl GenerationUnit for CountingGenerator {
        async fn generate(&self, _context: &TemplateContext) -> UnitResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut columns = ColumnDirectives::new();
            columns.insert("name".to_string(), Default::default());
            let mut map = SheetDataMap::new();
            map.insert(
                self.sheet,
                vec![
                    SheetEntry::Metadata(MetadataEntry::new(columns)),
                    SheetEntry::Data(row(json!({"name": "Sample"}))),
                ],
            );
            Ok(map)
        }
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn manager(templates: Vec<TemplateDescriptor>, registry: UnitRegistry) -> TemplateManager {
        let source = MockSource {
            templates,
            base: serde_json::from_value(json!({"name": {"width": 30, "orderNumber": 1}})).unwrap(),
        };
        TemplateManager::new(Arc::new(source), Arc::new(registry))
    }

    fn delayed(registry: &mut UnitRegistry, name: &'static str, delay_ms: u64) -> Arc<AtomicBool> {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        registry
            .register_processor(name, move || DelayedProcessor {
                name,
                delay_ms,
                finished: flag.clone(),
            })
            .unwrap();
        finished
    }

    #[tokio::test]
    async fn test_concurrent_sheets_merge_in_declared_order() {
        let mut registry = UnitRegistry::new();
        delayed(&mut registry, "Slow", 80);
        delayed(&mut registry, "Fast", 1);

        let template = TemplateDescriptor::new(
            "Book",
            vec![
                SheetDescriptor::new("First", "a").with_processing_unit("Slow"),
                SheetDescriptor::new("Second", "b").with_processing_unit("Fast"),
            ],
        );
        let manager = manager(vec![template], registry);

        let mut input = SheetDataMap::new();
        input.insert("Second", vec![SheetEntry::Data(row(json!({"v": 2})))]);
        input.insert("First", vec![SheetEntry::Data(row(json!({"v": 1})))]);

        let result = manager
            .run_processing("Book", &input, &TemplateContext::new("t"))
            .await
            .unwrap();

        assert_eq!(result.sheet_names().collect::<Vec<_>>(), vec!["First", "Second"]);
        assert_eq!(result.get("First").unwrap()[0].as_row().unwrap()["seen_by"], json!("Slow"));
        assert_eq!(result.get("Second").unwrap()[0].as_row().unwrap()["seen_by"], json!("Fast"));
    }

    #[tokio::test]
    async fn test_missing_input_sheet_is_empty_and_unitless_sheet_skipped() {
        let mut registry = UnitRegistry::new();
        delayed(&mut registry, "Echo", 0);

        let template = TemplateDescriptor::new(
            "Book",
            vec![
                SheetDescriptor::new("Lookup", "lookup"),
                SheetDescriptor::new("Employees", "employee").with_processing_unit("Echo"),
            ],
        );
        let manager = manager(vec![template], registry);

        let result = manager
            .run_processing("Book", &SheetDataMap::new(), &TemplateContext::new("t"))
            .await
            .unwrap();

        assert_eq!(result.sheet_names().collect::<Vec<_>>(), vec!["Employees"]);
        assert!(result.get("Employees").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unit_failure_aborts_other_sheets() {
        let mut registry = UnitRegistry::new();
        let slow_finished = delayed(&mut registry, "Slow", 200);
        registry.register_processor("Failing", || FailingProcessor).unwrap();

        let template = TemplateDescriptor::new(
            "Book",
            vec![
                SheetDescriptor::new("A", "a").with_processing_unit("Slow"),
                SheetDescriptor::new("B", "b").with_processing_unit("Failing"),
            ],
        );
        let manager = manager(vec![template], registry);

        let started = Instant::now();
        let err = manager
            .run_processing("Book", &SheetDataMap::new(), &TemplateContext::new("t"))
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_millis(200));
        match err {
            EngineError::UnitFailure { sheet, unit, source, .. } => {
                assert_eq!(sheet, "B");
                assert_eq!(unit, "Failing");
                assert!(matches!(source, UnitError::Validation { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!slow_finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unknown_template_and_unit() {
        let template = TemplateDescriptor::new(
            "Book",
            vec![SheetDescriptor::new("A", "a").with_processing_unit("NotRegistered")],
        );
        let manager = manager(vec![template], UnitRegistry::new());
        let context = TemplateContext::new("t");

        let err = manager
            .run_processing("Unknown", &SheetDataMap::new(), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TemplateNotFound { .. }));

        let err = manager
            .run_processing("Book", &SheetDataMap::new(), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnitNotFound { name, .. } if name == "NotRegistered"));
        assert!(manager.verify_units().is_err());
    }

    #[tokio::test]
    async fn test_unit_output_without_its_sheet_is_rejected() {
        let mut registry = UnitRegistry::new();
        registry.register_processor("Wrong", || WrongSheetProcessor).unwrap();
        let template = TemplateDescriptor::new(
            "Book",
            vec![SheetDescriptor::new("A", "a").with_processing_unit("Wrong")],
        );
        let manager = manager(vec![template], registry);

        let err = manager
            .run_processing("Book", &SheetDataMap::new(), &TemplateContext::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidUnitOutput { .. }));
    }

    #[tokio::test]
    async fn test_mappings_feed_unit_and_sheet_local_context() {
        let mut registry = UnitRegistry::new();
        delayed(&mut registry, "Echo", 0);

        let sheet = SheetDescriptor::new("Employees", "employee")
            .with_processing_unit("Echo")
            .with_field_mappings(vec![
                FieldMapping::new("Full Name", "name").unwrap().renaming(),
                FieldMapping::new("org.tenant", "$context.tenant").unwrap(),
            ]);
        let manager = manager(vec![TemplateDescriptor::new("Book", vec![sheet])], registry);

        let input = SheetDataMap::from_rows(
            "Employees",
            vec![row(json!({"Full Name": "Alice", "org": {"tenant": "acme"}}))],
        );
        let context = TemplateContext::new("t");

        let result = manager.run_processing("Book", &input, &context).await.unwrap();
        let first = result.get("Employees").unwrap()[0].as_row().unwrap();

        assert_eq!(first["name"], json!("Alice"));
        assert!(!first.contains_key("Full Name"));
        assert_eq!(first["tenant"], json!("acme"));
        // 呼叫端的上下文不被修改
        assert!(context.get_shared_data("tenant").is_none());
    }

    #[tokio::test]
    async fn test_mapping_conflict_is_mapping_failure() {
        let mut registry = UnitRegistry::new();
        delayed(&mut registry, "Echo", 0);

        let sheet = SheetDescriptor::new("Employees", "employee")
            .with_processing_unit("Echo")
            .with_field_mappings(vec![FieldMapping::new("name", "department.lead").unwrap()]);
        let manager = manager(vec![TemplateDescriptor::new("Book", vec![sheet])], registry);
        let input = SheetDataMap::from_rows("Employees", vec![row(json!({"name": "A", "department": "HR"}))]);

        let err = manager
            .run_processing("Book", &input, &TemplateContext::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MappingFailure { sheet, .. } if sheet == "Employees"));
    }

    #[tokio::test]
    async fn test_generation_ignores_mappings_and_processing_units() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = UnitRegistry::new();
        let counter = calls.clone();
        registry
            .register_generator("Gen", move || CountingGenerator {
                sheet: "Employees",
                calls: counter.clone(),
            })
            .unwrap();

        let sheet = SheetDescriptor::new("Employees", "employee")
            .with_processing_unit("NotRegistered")
            .with_generation_unit("Gen")
            .with_field_mappings(vec![FieldMapping::new("name", "renamed").unwrap()]);
        let manager = manager(vec![TemplateDescriptor::new("Book", vec![sheet])], registry);

        let result = manager
            .run_generation("Book", &TemplateContext::new("t"))
            .await
            .unwrap();

        let entries = result.get("Employees").unwrap();
        assert!(entries[0].is_metadata());
        let sample = entries[1].as_row().unwrap();
        assert!(sample.contains_key("name"));
        assert!(!sample.contains_key("renamed"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let layouts = manager.sheet_layouts("Book", &result).unwrap();
        assert_eq!(layouts[0].columns["name"].width, Some(30.0));
    }

    #[tokio::test]
    async fn test_cancellation_returns_no_partial_result() {
        let mut registry = UnitRegistry::new();
        let finished = delayed(&mut registry, "Slow", 100);
        let template = TemplateDescriptor::new(
            "Book",
            vec![SheetDescriptor::new("A", "a").with_processing_unit("Slow")],
        );
        let manager = manager(vec![template], registry);

        let err = manager
            .run_processing_until(
                "Book",
                &SheetDataMap::new(),
                &TemplateContext::new("t"),
                tokio::time::sleep(Duration::from_millis(10)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Cancelled { .. }));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let mut registry = UnitRegistry::new();
        delayed(&mut registry, "Slow", 3_000);
        let template = TemplateDescriptor::new(
            "Book",
            vec![SheetDescriptor::new("A", "a").with_processing_unit("Slow")],
        );
        let manager = manager(vec![template], registry).with_settings(EngineSettings {
            max_concurrent_sheets: 1,
            request_timeout_seconds: Some(1),
        });
        assert_eq!(manager.settings().request_timeout_seconds, Some(1));

        let err = manager
            .run_processing("Book", &SheetDataMap::new(), &TemplateContext::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout { seconds: 1, .. }));
        assert!(err.is_retryable());
    }
}
