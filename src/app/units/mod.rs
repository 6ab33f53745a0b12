pub mod employee;
pub mod passthrough;

use crate::core::registry::UnitRegistry;
use crate::utils::error::Result;

pub use employee::{EmployeeSheetGenerator, EmployeeSheetProcessor};
pub use passthrough::PassthroughProcessor;

/// 註冊內建單元
pub fn register_builtin_units(registry: &mut UnitRegistry) -> Result<()> {
    registry.register_processor("EmployeeSheetProcessor", EmployeeSheetProcessor::new)?;
    registry.register_processor("PassthroughProcessor", || PassthroughProcessor)?;
    registry.register_generator("EmployeeSheetGenerator", EmployeeSheetGenerator::default)?;
    Ok(())
}

/// 已註冊內建單元的註冊表
pub fn builtin_registry() -> Result<UnitRegistry> {
    let mut registry = UnitRegistry::new();
    register_builtin_units(&mut registry)?;
    Ok(registry)
}
