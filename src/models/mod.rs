pub mod fleet;
pub mod operators;
pub mod views;
