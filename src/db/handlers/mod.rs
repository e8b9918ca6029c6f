//! Repositories over `&mut PgConnection`. Constructed per operation; all
//! writes go through these.

pub mod actions;
pub mod deliveries;
pub mod sources;

pub use actions::Actions;
pub use deliveries::Deliveries;
pub use sources::Sources;
