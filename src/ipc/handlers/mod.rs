pub mod core;
pub mod grading;
pub mod leave;
pub mod papers;
pub mod questions;
pub mod session;
pub mod setup;
