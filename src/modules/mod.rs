//! # Gateway Modules
//!
//! Modules implement the [`ModuleContract`](crate::module::ModuleContract)
//! trait for uniform lifecycle management.
//!
//! ## Available Modules
//!
//! - [`rule_engine`] - Phase-ordered WAF rule execution

pub mod rule_engine;
