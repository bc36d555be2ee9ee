//! Test data generators for benchmarks.
//!
//! Provides request arguments, headers, body chunks and ready-to-run rule
//! sets for the rule engine benchmarks.

use r0n_rule_engine::modules::rule_engine::{
    ActionList, ContextId, ContextKind, EnableDirective, Field, HeaderPair, MemoryVarStore, Phase,
    RuleEngine, RuleEngineConfig, RuleMatcher, RuleRegistry, Target, Transaction,
};

// ---------------------------------------------------------------------------
// Payload generators
// ---------------------------------------------------------------------------

/// Argument values that the generated rules match.
pub fn attack_payloads() -> Vec<String> {
    vec![
        "' OR '1'='1".into(),
        "1; DROP TABLE users--".into(),
        "' UNION SELECT * FROM passwords--".into(),
        "<script>alert('xss')</script>".into(),
        "<img src=x onerror=alert(1)>".into(),
        "../../../etc/passwd".into(),
        "%2e%2e%2f%2e%2e%2fetc%2fpasswd".into(),
        "javascript:alert(document.cookie)".into(),
    ]
}

/// Argument values no generated rule matches.
pub fn benign_payloads() -> Vec<String> {
    vec![
        "Hello, world!".into(),
        "The quick brown fox jumps over the lazy dog".into(),
        "{\"name\": \"John\", \"age\": 30}".into(),
        "SELECT your favorite color from the dropdown".into(),
        "O'Brien's restaurant serves great food".into(),
        "/api/v1/users/123/profile".into(),
        "https://example.com/page?query=search+term".into(),
        "user@example.com".into(),
    ]
}

/// Request headers of a typical browser request.
pub fn request_headers(count: usize) -> Vec<HeaderPair> {
    let names = [
        ("Host", "example.com"),
        ("User-Agent", "Mozilla/5.0 (X11; Linux x86_64)"),
        ("Accept", "text/html,application/xhtml+xml"),
        ("Accept-Language", "en-US,en;q=0.9"),
        ("Accept-Encoding", "gzip, deflate, br"),
        ("Cookie", "session=abc123; theme=dark"),
        ("Referer", "https://example.com/index.html"),
        ("X-Request-Id", "5f2b7c1e"),
    ];
    (0..count)
        .map(|i| {
            let (name, value) = names[i % names.len()];
            HeaderPair::new(name, value)
        })
        .collect()
}

/// Body chunks of `size` bytes with a repeating printable pattern.
pub fn body_chunks(count: usize, size: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            (0..size)
                .map(|j| b'a' + ((i + j) % 26) as u8)
                .collect()
        })
        .collect()
}

/// Variables for a request carrying `args` as `ARGS` elements.
pub fn request_vars(args: &[String]) -> MemoryVarStore {
    let mut vars = MemoryVarStore::new();
    for (i, value) in args.iter().enumerate() {
        vars.push_to_list("ARGS", Field::string(format!("arg{i}"), value.as_str()));
    }
    vars
}

// ---------------------------------------------------------------------------
// Rule set generators
// ---------------------------------------------------------------------------

const PATTERNS: [&str; 6] = [
    r"(?i)union\s+select",
    r"(?i)drop\s+table",
    r"(?i)<script",
    r"(?i)onerror\s*=",
    r"\.\./",
    r"(?i)javascript:",
];

fn add_rule(
    engine: &mut RuleEngine,
    site: ContextId,
    id: &str,
    phase: Phase,
    pattern: &str,
    chained: bool,
) -> r0n_rule_engine::modules::rule_engine::EngineResult<()> {
    let (registry, services) = engine.parts_mut();
    let r = registry.create_rule(site, false, Some("bench.conf"), 0)?;
    if !registry.rule(r)?.flags.chain_child {
        registry.set_id(r, id)?;
        registry.set_phase(r, phase)?;
    }
    registry.set_operator(r, services.operator("rx", Some(pattern), false)?)?;
    let mut target = Target::new("ARGS", Vec::new())?;
    RuleRegistry::target_add_tfn(services, &mut target, "urlDecode", None)?;
    RuleRegistry::target_add_tfn(services, &mut target, "lowercase", None)?;
    registry.add_target(r, target)?;
    registry.add_action(r, services.action("block", Some("phase"))?, ActionList::True)?;
    if chained {
        registry.set_chain(r)?;
    }
    registry.register(site, r)
}

/// An engine with `count` regex rules in the request phase and the location
/// context they are enabled in.
pub fn rule_engine(count: usize, chain_every: usize) -> (RuleEngine, ContextId) {
    let mut engine = RuleEngine::new(RuleEngineConfig::default()).unwrap();
    let site = engine
        .registry_mut()
        .open_context("bench", ContextKind::Site, ContextId::MAIN, Some("bench"))
        .unwrap();
    for i in 0..count {
        let chained = chain_every > 0 && i % chain_every == 0 && i + 1 < count;
        add_rule(
            &mut engine,
            site,
            &format!("bench-{i}"),
            Phase::Request,
            PATTERNS[i % PATTERNS.len()],
            chained,
        )
        .unwrap();
    }
    engine
        .registry_mut()
        .enable(site, EnableDirective::enable(RuleMatcher::All))
        .unwrap();
    let loc = engine
        .registry_mut()
        .open_context("bench-loc", ContextKind::Location, site, None)
        .unwrap();
    engine.close_context(loc).unwrap();
    (engine, loc)
}

/// A started transaction bound to `ctx`.
pub fn transaction(engine: &RuleEngine, ctx: ContextId, args: &[String]) -> Transaction {
    let mut tx = Transaction::new("bench")
        .with_context(ctx)
        .with_vars(request_vars(args));
    tx.flags.req_started = true;
    tx.flags.req_has_data = true;
    engine.tx_started(&mut tx).unwrap();
    tx
}
