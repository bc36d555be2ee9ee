//! Inspection phases and their static metadata.
//!
//! Every phase number from [`Phase::None`] up to (but excluding)
//! [`Phase::COUNT`] has exactly one metadata entry per stream-ness that
//! makes sense for it; [`Phase::Invalid`] is the sentinel returned by
//! failed lookups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rule phase number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Generic phase; a rule that has not been assigned one yet.
    None = 0,
    /// Request header available.
    RequestHeader,
    /// Post request header processing.
    RequestHeaderProcess,
    /// Request body available.
    Request,
    /// Post request body processing.
    RequestProcess,
    /// Response header available.
    ResponseHeader,
    /// Post response header processing.
    ResponseHeaderProcess,
    /// Response body available.
    Response,
    /// Post response body processing.
    ResponseProcess,
    /// Post transaction processing; always runs.
    Postprocess,
    /// Logging; always runs.
    Logging,
    /// Request line and headers, one pair at a time.
    RequestHeaderStream,
    /// Request body chunks.
    RequestBodyStream,
    /// Response headers, one pair at a time.
    ResponseHeaderStream,
    /// Response body chunks.
    ResponseBodyStream,
    /// Lookup failure sentinel.
    Invalid,
}

impl Phase {
    /// Number of real phases (excludes [`Phase::Invalid`]).
    pub const COUNT: usize = 15;

    /// All real phases indexed by their number.
    pub const ALL: [Phase; Phase::COUNT] = [
        Phase::None,
        Phase::RequestHeader,
        Phase::RequestHeaderProcess,
        Phase::Request,
        Phase::RequestProcess,
        Phase::ResponseHeader,
        Phase::ResponseHeaderProcess,
        Phase::Response,
        Phase::ResponseProcess,
        Phase::Postprocess,
        Phase::Logging,
        Phase::RequestHeaderStream,
        Phase::RequestBodyStream,
        Phase::ResponseHeaderStream,
        Phase::ResponseBodyStream,
    ];

    /// Phase number as an index.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Phase for a number; [`Phase::Invalid`] when out of range.
    pub fn from_index(index: usize) -> Phase {
        Self::ALL.get(index).copied().unwrap_or(Phase::Invalid)
    }

    /// `true` for `None <= phase < COUNT`.
    pub fn is_valid_num(self) -> bool {
        self.index() < Self::COUNT
    }

    /// Canonical upper-case name; `"NONE"`/`"INVALID"` for the specials.
    pub fn name(self) -> &'static str {
        match find_phase_meta(self.index() >= Phase::RequestHeaderStream.index(), self)
            .and_then(|meta| meta.name)
        {
            Some(name) => name,
            None if self == Phase::None => "NONE",
            None => "INVALID",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the host delivers a phase event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// A bare transaction state change.
    Tx,
    /// A chunk of body data.
    TxData,
    /// A batch of parsed header pairs.
    Header,
}

/// Host states the engine subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostState {
    /// Request headers finished.
    RequestHeader,
    /// Request finished.
    Request,
    /// Response headers finished.
    ResponseHeader,
    /// Response finished.
    Response,
    /// Post processing.
    Postprocess,
    /// Logging.
    Logging,
    /// Transaction context selected; request line and headers known.
    ContextTx,
    /// Request body data arrived.
    RequestBodyData,
    /// Response header data arrived.
    ResponseHeaderData,
    /// Response body data arrived.
    ResponseBodyData,
}

/// Named phase capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseCapabilities {
    /// Rules may be assigned this phase.
    pub valid: bool,
    /// Streaming phase.
    pub stream: bool,
    /// Rules may chain.
    pub allow_chain: bool,
    /// Rules may carry transformations.
    pub allow_tfns: bool,
    /// Runs even when the transaction is blocked or allowed.
    pub force: bool,
    /// Part of the request.
    pub request: bool,
    /// Part of the response.
    pub response: bool,
    /// Post processing phase.
    pub postprocess: bool,
    /// Logging phase.
    pub logging: bool,
}

const GENERIC: PhaseCapabilities = PhaseCapabilities {
    valid: false,
    stream: false,
    allow_chain: true,
    allow_tfns: true,
    force: false,
    request: false,
    response: false,
    postprocess: false,
    logging: false,
};

const BUFFERED: PhaseCapabilities = PhaseCapabilities {
    valid: true,
    ..GENERIC
};

const BUFFERED_REQUEST: PhaseCapabilities = PhaseCapabilities {
    request: true,
    ..BUFFERED
};

const BUFFERED_RESPONSE: PhaseCapabilities = PhaseCapabilities {
    response: true,
    ..BUFFERED
};

const STREAM_GENERIC: PhaseCapabilities = PhaseCapabilities {
    stream: true,
    allow_chain: false,
    allow_tfns: false,
    ..GENERIC
};

const STREAM_REQUEST: PhaseCapabilities = PhaseCapabilities {
    valid: true,
    request: true,
    ..STREAM_GENERIC
};

const STREAM_RESPONSE: PhaseCapabilities = PhaseCapabilities {
    valid: true,
    response: true,
    ..STREAM_GENERIC
};

/// Static description of one phase.
#[derive(Debug, Clone, Copy)]
pub struct PhaseMeta {
    /// Streaming phase.
    pub is_stream: bool,
    /// Phase number.
    pub phase: Phase,
    /// Event delivery kind; `None` for the generic phase.
    pub hook: Option<HookKind>,
    /// Capability set.
    pub caps: PhaseCapabilities,
    /// Configuration name; `None` for the generic phase.
    pub name: Option<&'static str>,
    /// Human readable description.
    pub description: &'static str,
    /// Host state that triggers the phase.
    pub state: Option<HostState>,
}

const fn buffered(
    phase: Phase,
    caps: PhaseCapabilities,
    name: &'static str,
    description: &'static str,
    state: HostState,
) -> PhaseMeta {
    PhaseMeta {
        is_stream: false,
        phase,
        hook: Some(HookKind::Tx),
        caps,
        name: Some(name),
        description,
        state: Some(state),
    }
}

const fn stream(
    phase: Phase,
    hook: HookKind,
    caps: PhaseCapabilities,
    name: &'static str,
    description: &'static str,
    state: HostState,
) -> PhaseMeta {
    PhaseMeta {
        is_stream: true,
        phase,
        hook: Some(hook),
        caps,
        name: Some(name),
        description,
        state: Some(state),
    }
}

/// Metadata for every (stream-ness, phase) pair.
pub static PHASE_TABLE: [PhaseMeta; 16] = [
    PhaseMeta {
        is_stream: false,
        phase: Phase::None,
        hook: None,
        caps: GENERIC,
        name: None,
        description: "Generic 'Phase' Rule",
        state: None,
    },
    buffered(
        Phase::RequestHeader,
        BUFFERED_REQUEST,
        "REQUEST_HEADER",
        "Request Header",
        HostState::RequestHeader,
    ),
    buffered(
        Phase::RequestHeaderProcess,
        BUFFERED_REQUEST,
        "REQUEST_HEADER_PROCESS",
        "Request Header Process",
        HostState::RequestHeader,
    ),
    buffered(
        Phase::Request,
        BUFFERED_REQUEST,
        "REQUEST",
        "Request",
        HostState::Request,
    ),
    buffered(
        Phase::RequestProcess,
        BUFFERED_REQUEST,
        "REQUEST_PROCESS",
        "Request Process",
        HostState::Request,
    ),
    buffered(
        Phase::ResponseHeader,
        BUFFERED_RESPONSE,
        "RESPONSE_HEADER",
        "Response Header",
        HostState::ResponseHeader,
    ),
    buffered(
        Phase::ResponseHeaderProcess,
        BUFFERED_RESPONSE,
        "RESPONSE_HEADER_PROCESS",
        "Response Header Process",
        HostState::ResponseHeader,
    ),
    buffered(
        Phase::Response,
        BUFFERED_RESPONSE,
        "RESPONSE",
        "Response",
        HostState::Response,
    ),
    buffered(
        Phase::ResponseProcess,
        BUFFERED_RESPONSE,
        "RESPONSE_PROCESS",
        "Response Process",
        HostState::Response,
    ),
    buffered(
        Phase::Postprocess,
        PhaseCapabilities {
            force: true,
            postprocess: true,
            ..BUFFERED
        },
        "POSTPROCESS",
        "Post Process",
        HostState::Postprocess,
    ),
    buffered(
        Phase::Logging,
        PhaseCapabilities {
            force: true,
            logging: true,
            ..BUFFERED
        },
        "LOGGING",
        "Logging",
        HostState::Logging,
    ),
    PhaseMeta {
        is_stream: true,
        phase: Phase::None,
        hook: None,
        caps: STREAM_GENERIC,
        name: None,
        description: "Generic 'Stream Inspection' Rule",
        state: None,
    },
    stream(
        Phase::RequestHeaderStream,
        HookKind::Tx,
        STREAM_REQUEST,
        "REQUEST_HEADER_STREAM",
        "Request Header Stream",
        HostState::ContextTx,
    ),
    stream(
        Phase::RequestBodyStream,
        HookKind::TxData,
        STREAM_REQUEST,
        "REQUEST_BODY_STREAM",
        "Request Body Stream",
        HostState::RequestBodyData,
    ),
    stream(
        Phase::ResponseHeaderStream,
        HookKind::Header,
        STREAM_RESPONSE,
        "RESPONSE_HEADER_STREAM",
        "Response Header Stream",
        HostState::ResponseHeaderData,
    ),
    stream(
        Phase::ResponseBodyStream,
        HookKind::TxData,
        STREAM_RESPONSE,
        "RESPONSE_BODY_STREAM",
        "Response Body Stream",
        HostState::ResponseBodyData,
    ),
];

/// Finds the metadata for a phase with the given stream-ness.
pub fn find_phase_meta(is_stream: bool, phase: Phase) -> Option<&'static PhaseMeta> {
    PHASE_TABLE
        .iter()
        .find(|meta| meta.is_stream == is_stream && meta.phase == phase)
}

/// Case-insensitive lookup of a phase by configuration name.
///
/// Returns [`Phase::Invalid`] for unknown names and for names whose
/// stream-ness differs from `is_stream`.
pub fn lookup_phase(name: &str, is_stream: bool) -> Phase {
    PHASE_TABLE
        .iter()
        .find(|meta| {
            meta.name
                .is_some_and(|phase_name| phase_name.eq_ignore_ascii_case(name))
        })
        .filter(|meta| meta.is_stream == is_stream)
        .map_or(Phase::Invalid, |meta| meta.phase)
}

/// All metadata entries the host state triggers, in table order.
pub fn metas_for_state(state: HostState) -> impl Iterator<Item = &'static PhaseMeta> {
    PHASE_TABLE
        .iter()
        .filter(move |meta| meta.state == Some(state))
}
