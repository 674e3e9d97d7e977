//! Test modules for the shared crate

mod time_tests;
mod utils_tests;
