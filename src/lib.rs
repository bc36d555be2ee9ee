//! # R0N Rule Engine
//!
//! Phase-ordered rule execution for the R0N gateway's web application
//! firewall.
//!
//! ## Features
//!
//! - Rule registry with per-site and per-location contexts
//! - Chained rules, list-valued targets and transformation pipelines
//! - Buffered and streaming phases driven by host state changes
//! - Ownership and injection hooks for cooperating modules
//! - Per-transaction execution log
//!
//! ## Architecture
//!
//! The engine lives in [`modules::rule_engine`]. It is exposed to the
//! gateway control plane through [`modules::rule_engine::RuleEngineHandler`],
//! which implements [`module::ModuleContract`]. Configuration is TOML,
//! loaded through [`config::ConfigLoader`].

pub mod config;
pub mod module;
pub mod modules;
