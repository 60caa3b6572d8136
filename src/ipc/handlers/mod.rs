pub mod core;
pub mod records;
pub mod session;
pub mod setup;
pub mod students;
