//! Codestyle core library exports

pub mod repository;
