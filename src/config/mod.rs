// src/config/mod.rs
//! Runtime configuration: decision policy (TOML) and enrichment provider (JSON).

pub mod ai;
pub mod policy;

pub use ai::EnrichmentConfig;
pub use policy::PolicyConfig;
