pub mod field_mapper;
pub mod manager;
pub mod overlay;
pub mod registry;
pub mod template;

pub use crate::domain::model::{SheetDataMap, SheetEntry, TemplateContext};
pub use crate::domain::ports::{ConfigSource, GenerationUnit, ProcessingUnit, Storage, WorkbookCodec};
pub use crate::utils::error::Result;
pub use manager::{EngineSettings, TemplateManager};
pub use registry::UnitRegistry;
