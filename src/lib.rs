pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::ZipCsvWorkbook;
pub use app::units::{builtin_registry, register_builtin_units};
pub use config::{cli::LocalStorage, template_config::TemplateConfig};
pub use core::{EngineSettings, TemplateManager, UnitRegistry};
pub use domain::model::{SheetDataMap, SheetEntry, TemplateContext};
pub use utils::error::{EngineError, Result, UnitError};

#[cfg(feature = "cli")]
pub use config::CliArgs;
