//! Streaming phase execution.
//!
//! Stream rules see each header pair or body chunk as it arrives; they never
//! chain and never transform.

use super::error::EngineResult;
use super::exec::ExecutionContext;
use super::field::Field;
use super::phase::{Phase, PhaseMeta};
use super::runner::{build_phase_rules, rule_allow};
use super::tx::HeaderPair;
use tracing::{debug, error};

/// One unit of streamed input.
#[derive(Debug, Clone, Copy)]
pub enum StreamUnit<'d> {
    /// A chunk of body data.
    Data(&'d [u8]),
    /// A batch of header pairs.
    Headers(&'d [HeaderPair]),
}

impl StreamUnit<'_> {
    fn fields(&self) -> Vec<Field> {
        match self {
            StreamUnit::Data(data) => vec![Field::bytes("txdata", data.to_vec())],
            StreamUnit::Headers(pairs) => pairs
                .iter()
                .map(|pair| Field::bytes(pair.name.clone(), pair.value.clone()))
                .collect(),
        }
    }
}

fn reset_stream(exec: &mut ExecutionContext<'_>) {
    let state = exec.state_mut();
    state.phase = Phase::None;
    state.is_stream = false;
}

/// Runs the stream rules of `meta` against one unit of input.
pub(crate) fn run_stream_rules(
    exec: &mut ExecutionContext<'_>,
    meta: &'static PhaseMeta,
    unit: StreamUnit<'_>,
) -> EngineResult<()> {
    let engine = exec.engine();
    let phase = meta.phase;

    if rule_allow(exec.tx(), meta, false) {
        return Ok(());
    }
    engine.stats().record_phase();

    {
        let state = exec.state_mut();
        state.phase = phase;
        state.is_stream = true;
        state.phase_rules.clear();
    }
    let ruleset = engine.registry().ruleset(exec.tx().context())?;
    let rules = build_phase_rules(exec, phase, ruleset.rules(phase))?;
    exec.state_mut().phase_rules = rules.clone();
    if rules.is_empty() {
        reset_stream(exec);
        return Ok(());
    }

    let fields = unit.fields();
    let mut failed = None;
    for r in rules {
        if rule_allow(exec.tx(), meta, false) {
            break;
        }
        let rule = engine.registry().rule(r)?;
        exec.push_rule(r)?;
        engine.stats().record_rule();

        for field in &fields {
            if let Err(e) = exec.execute_stream_operator(rule, field.clone()) {
                if e.is_resource() {
                    exec.pop_rule()?;
                    reset_stream(exec);
                    return Err(e);
                }
                error!(
                    tx_id = exec.tx().id(),
                    phase = %phase,
                    rule_id = rule.id(),
                    "Error executing stream rule: {}",
                    e
                );
                engine.stats().record_error();
                failed.get_or_insert(e);
            }
        }
        exec.pop_rule()?;
    }

    let blocked = if exec.tx().flags.block_phase {
        exec.block()
    } else {
        Ok(())
    };
    reset_stream(exec);
    blocked?;
    failed.map_or(Ok(()), Err)
}

/// Runs header stream rules over `pairs`.
pub(crate) fn stream_headers(
    exec: &mut ExecutionContext<'_>,
    meta: &'static PhaseMeta,
    pairs: &[HeaderPair],
) -> EngineResult<()> {
    exec.tx_mut().flags.allow_phase = false;
    let status = run_stream_rules(exec, meta, StreamUnit::Headers(pairs));
    exec.tx_mut().flags.allow_phase = false;
    status
}

/// Runs body stream rules over one data chunk.
pub(crate) fn stream_txdata(exec: &mut ExecutionContext<'_>, meta: &'static PhaseMeta, data: &[u8]) -> EngineResult<()> {
    exec.tx_mut().flags.allow_phase = false;
    let status = run_stream_rules(exec, meta, StreamUnit::Data(data));
    exec.tx_mut().flags.allow_phase = false;
    status
}

/// Runs request header stream rules over the request line and headers.
pub(crate) fn stream_tx(exec: &mut ExecutionContext<'_>, meta: &'static PhaseMeta) -> EngineResult<()> {
    let tx = exec.tx();
    let mut pairs = Vec::with_capacity(tx.request_headers.len() + 3);
    if let Some(line) = &tx.request_line {
        let parts = [
            ("method", &line.method),
            ("uri", &line.uri),
            ("protocol", &line.protocol),
        ];
        for (name, value) in parts {
            if let Some(value) = value {
                pairs.push(HeaderPair::new(name, value.clone().into_bytes()));
            }
        }
    }
    pairs.extend(tx.request_headers.iter().cloned());
    if pairs.is_empty() {
        debug!(tx_id = tx.id(), "No request line or headers to stream");
    }
    stream_headers(exec, meta, &pairs)
}
