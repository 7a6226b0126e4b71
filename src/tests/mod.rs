//! tests/mod.rs
//! Pruebas del motor contra SQLite en memoria y colaboradores falsos.

pub mod support;

mod sweeper_tests;
mod tracking_tests;
mod training_tests;
