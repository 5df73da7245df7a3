//! Step definitions and fixtures for lifecycle scenarios.

mod bdd_steps;
mod scenarios;
mod test_helpers;
