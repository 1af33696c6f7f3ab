mod client;
mod config;
mod dispatch;
mod mock;
mod net;
mod protocol;
mod sla;
mod transport;

pub use crate::client::{
    ApiClient, DEFAULT_DPI, DEFAULT_PAGE_NUMBER, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TOP_K,
    DEFAULT_TOP_K_IMAGES, DEFAULT_TOP_K_LAYOUTS, DEFAULT_TOP_K_TEXTS, MIN_POLL_INTERVAL,
};
pub use crate::config::{
    validate_url, ConfigError, GammaConfig, DEFAULT_BASE_URL, ENV_API_KEY, ENV_BASE_URL,
};
pub use crate::connection_test::{
    test_connection, ConnectionTestError, ConnectionTestOutcome, CONNECTION_TEST_TIMEOUT,
};
pub use crate::dispatch::build_url;
pub use crate::mock::MockBackend;
pub use crate::net::{NetError, NetworkThread};
pub use crate::protocol::{
    ClientEvent, Completion, Connectivity, ErrorCategory, JsonObject, Outcome, RequestId,
    RequestTag, TransportErrorKind, TransportFailure, WorkflowRunOptions, EVENT_CAP,
    UNKNOWN_LATENCY_MS,
};
pub use crate::sla::{sla_from_import, save_sla_in, save_temp_sla, SavedSla, SlaError};
pub use crate::transport::{FilePart, HttpMethod, HttpRequest, RequestBody, Transport};
