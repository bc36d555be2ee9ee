#![allow(missing_docs, dead_code)]
//! Shared benchmark support: request data and rule set generators.

pub mod generators;
