use crate::domain::ports::{GenerationUnit, ProcessingUnit};
use crate::utils::error::{EngineError, Result, UnitKind};
use std::collections::HashMap;
use std::sync::Arc;

pub type ProcessorFactory = Arc<dyn Fn() -> Arc<dyn ProcessingUnit> + Send + Sync>;
pub type GeneratorFactory = Arc<dyn Fn() -> Arc<dyn GenerationUnit> + Send + Sync>;

/// 單元註冊表：名稱 -> 建構函式
///
/// 啟動時填入，之後唯讀；以 `Arc` 共享給所有請求。
#[derive(Default, Clone)]
pub struct UnitRegistry {
    processors: HashMap<String, ProcessorFactory>,
    generators: HashMap<String, GeneratorFactory>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 註冊處理單元；同名重複註冊會被拒絕
    pub fn register_processor<F, U>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> U + Send + Sync + 'static,
        U: ProcessingUnit + 'static,
    {
        let name = name.into();
        if self.processors.contains_key(&name) {
            return Err(EngineError::DuplicateUnit {
                kind: UnitKind::Processor,
                name,
            });
        }
        tracing::debug!("🧩 Registered processing unit: {}", name);
        self.processors
            .insert(name, Arc::new(move || Arc::new(factory()) as Arc<dyn ProcessingUnit>));
        Ok(())
    }

    /// 註冊產生單元；同名重複註冊會被拒絕
    pub fn register_generator<F, U>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> U + Send + Sync + 'static,
        U: GenerationUnit + 'static,
    {
        let name = name.into();
        if self.generators.contains_key(&name) {
            return Err(EngineError::DuplicateUnit {
                kind: UnitKind::Generator,
                name,
            });
        }
        tracing::debug!("🧩 Registered generation unit: {}", name);
        self.generators
            .insert(name, Arc::new(move || Arc::new(factory()) as Arc<dyn GenerationUnit>));
        Ok(())
    }

    pub fn processor(&self, name: &str) -> Result<Arc<dyn ProcessingUnit>> {
        self.processors
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| EngineError::UnitNotFound {
                kind: UnitKind::Processor,
                name: name.to_string(),
            })
    }

    pub fn generator(&self, name: &str) -> Result<Arc<dyn GenerationUnit>> {
        self.generators
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| EngineError::UnitNotFound {
                kind: UnitKind::Generator,
                name: name.to_string(),
            })
    }

    pub fn contains_processor(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    pub fn contains_generator(&self, name: &str) -> bool {
        self.generators.contains_key(name)
    }

    /// 已註冊的處理單元名稱（排序後）
    pub fn processor_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn generator_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.generators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
