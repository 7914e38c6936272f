//! Validar - statistical output and performance validation for external
//! analysis programs
//!
//! This library runs a catalog of analysis jobs in parallel while sampling
//! each job's memory footprint, merges the per-job result archives by sample
//! label, and compares the fresh run against a reference run: histogram
//! distributions via a weighted chi-square, memory and runtime via linear
//! fits over the pooled memory curves. Everything ends in one validation
//! report with a single overall verdict.

pub mod archive;
pub mod cli;
pub mod compare;
pub mod config;
pub mod report;
pub mod sampler;
pub mod scheduler;
pub mod summary;
