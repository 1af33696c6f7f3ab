use std::time::Duration;

pub const EVENT_CAP: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

pub struct Completion {
    pub id: RequestId,
    pub latency: Duration,
    pub outcome: Outcome,
}

pub enum Outcome {
    Transport(TransportFailure),
    Response { status: u16, body: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    ConnectionRefused,
    HostNotFound,
    Timeout,
    Other,
}

impl TransportErrorKind {
    pub fn forces_disconnect(self) -> bool {
        matches!(
            self,
            TransportErrorKind::ConnectionRefused
                | TransportErrorKind::HostNotFound
                | TransportErrorKind::Timeout
        )
    }
}

#[derive(Debug, Clone)]
pub struct TransportFailure {
    pub kind: TransportErrorKind,
    pub message: String,
}

pub use gamma_protocol::{
    ClientEvent, Connectivity, ErrorCategory, JsonObject, RequestTag, WorkflowRunOptions,
    UNKNOWN_LATENCY_MS,
};
