//! R0N Rule Engine binary entry point.
//!
//! Loads and validates a rule engine configuration, then prints the phase
//! table the engine runs on.

use r0n_rule_engine::config::{ConfigLoader, LimitsValidator};
use r0n_rule_engine::modules::rule_engine::{RuleEngine, PHASE_TABLE};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("R0N Rule Engine v{}", env!("CARGO_PKG_VERSION"));

    let loader = ConfigLoader::new().with_validator(LimitsValidator::new());
    let config = match std::env::args().nth(1) {
        Some(path) => loader.load(&path),
        None => Ok(Default::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        },
    };

    let engine = match RuleEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        },
    };
    let config = engine.config();
    println!(
        "debug level {}, list limit {}, chain limit {}",
        config.debug_log_level, config.list_recursion_limit, config.chain_recursion_limit
    );

    println!("{:<4} {:<24} {:<7} {}", "num", "name", "stream", "description");
    for meta in PHASE_TABLE.iter() {
        println!(
            "{:<4} {:<24} {:<7} {}",
            meta.phase.index(),
            meta.name.unwrap_or("-"),
            meta.is_stream,
            meta.description
        );
    }
    ExitCode::SUCCESS
}
