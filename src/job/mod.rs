//! Job lifecycle wiring

pub mod runner;

pub use runner::{BatchJobRunner, JobReport};
