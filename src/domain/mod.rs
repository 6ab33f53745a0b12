// Domain layer: document model and ports (interfaces) shared by the engine, adapters and units.

pub mod model;
pub mod ports;
