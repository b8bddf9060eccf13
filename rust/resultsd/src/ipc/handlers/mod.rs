pub mod attendance;
pub mod cases;
pub mod classes;
pub mod core;
pub mod reports;
pub mod result_sets;
pub mod results;
pub mod scores;
pub mod setup;
pub mod students;
pub mod workflow;
