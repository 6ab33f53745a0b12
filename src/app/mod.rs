// Application layer: the concrete units shipped with the engine.

pub mod units;
