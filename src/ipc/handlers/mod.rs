pub mod backup;
pub mod core;
pub mod rankings;
pub mod results;
pub mod setup;
pub mod term;
pub mod workflow;
