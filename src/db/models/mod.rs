pub mod actions;
pub mod deliveries;
pub mod sources;
