use crate::config::GammaConfig;
use crate::dispatch::{self, build_url};
use crate::mock::MockBackend;
use crate::net::{NetError, NetworkThread};
use crate::protocol::{
    ClientEvent, Completion, Connectivity, ErrorCategory, JsonObject, Outcome, RequestId,
    RequestTag, WorkflowRunOptions, EVENT_CAP,
};
use crate::transport::{FilePart, HttpMethod, HttpRequest, RequestBody, Transport};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use gamma_protocol::{
    FigmaFrameImportBody, ImagesForTextBody, PipelineControlBody, RagLlmContextBody,
    SuggestPairsBody, TextsForImageBody,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

pub const DEFAULT_TOP_K_LAYOUTS: u32 = 3;
pub const DEFAULT_TOP_K_TEXTS: u32 = 5;
pub const DEFAULT_TOP_K_IMAGES: u32 = 3;
pub const DEFAULT_TOP_K: u32 = 5;
pub const DEFAULT_DPI: u32 = 300;
pub const DEFAULT_PAGE_NUMBER: u32 = 1;

const BUNDLE_FIELD: &str = "bundle";
const OPTIONS_FIELD: &str = "options_json";

struct PollState {
    active: bool,
    interval: Duration,
    next_due: Option<Instant>,
}

pub struct ApiClient {
    config: GammaConfig,
    transport: Box<dyn Transport>,
    completions: Receiver<Completion>,
    events: Sender<ClientEvent>,

    pending: HashMap<RequestId, RequestTag>,
    next_id: u64,
    connectivity: Connectivity,
    poll: PollState,
}

impl ApiClient {
    pub fn new(
        config: GammaConfig,
        transport: Box<dyn Transport>,
        completions: Receiver<Completion>,
        events: Sender<ClientEvent>,
    ) -> Self {
        Self {
            config,
            transport,
            completions,
            events,
            pending: HashMap::new(),
            next_id: 1,
            connectivity: Connectivity::disconnected(),
            poll: PollState {
                active: false,
                interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
                next_due: None,
            },
        }
    }

    pub fn connect(config: GammaConfig) -> Result<(Self, Receiver<ClientEvent>), NetError> {
        let (completion_tx, completion_rx) = unbounded();
        let (event_tx, event_rx) = bounded(EVENT_CAP);
        let net = NetworkThread::spawn(completion_tx)?;
        Ok((
            Self::new(config, Box::new(net), completion_rx, event_tx),
            event_rx,
        ))
    }

    pub fn mock(config: GammaConfig) -> (Self, Receiver<ClientEvent>) {
        let (completion_tx, completion_rx) = unbounded();
        let (event_tx, event_rx) = bounded(EVENT_CAP);
        let backend = MockBackend::new(completion_tx);
        (
            Self::new(config, Box::new(backend), completion_rx, event_tx),
            event_rx,
        )
    }

    // --- configuration ---

    pub fn set_base_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        if self.config.base_url != url {
            self.config.base_url = url;
            self.set_connectivity(Connectivity::disconnected());
        }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn set_api_key(&mut self, key: impl Into<String>) {
        self.config.api_key = Some(key.into());
    }

    pub fn api_key(&self) -> Option<&str> {
        self.config.api_key()
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity.connected
    }

    pub fn latency_ms(&self) -> i64 {
        self.connectivity.latency_ms
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    // --- requests ---

    pub fn request_status(&mut self) -> Option<RequestId> {
        Some(self.send_get("/api/status", RequestTag::Status))
    }

    pub fn request_pipeline(&mut self, pipeline_id: Option<&str>) -> Option<RequestId> {
        let endpoint = match pipeline_id.filter(|id| !id.is_empty()) {
            Some(id) => format!("/api/pipeline/{id}"),
            None => "/api/pipeline".to_string(),
        };
        Some(self.send_get(&endpoint, RequestTag::Pipeline))
    }

    pub fn request_assets(&mut self) -> Option<RequestId> {
        Some(self.send_get("/api/assets", RequestTag::Assets))
    }

    pub fn request_layout_audit(&mut self) -> Option<RequestId> {
        Some(self.send_get("/api/layout/audit", RequestTag::LayoutAudit))
    }

    pub fn start_pipeline(&mut self, pipeline_id: &str) -> Option<RequestId> {
        self.pipeline_control(pipeline_id, "start", RequestTag::PipelineStart)
    }

    pub fn stop_pipeline(&mut self, pipeline_id: &str) -> Option<RequestId> {
        self.pipeline_control(pipeline_id, "stop", RequestTag::PipelineStop)
    }

    fn pipeline_control(
        &mut self,
        pipeline_id: &str,
        action: &str,
        tag: RequestTag,
    ) -> Option<RequestId> {
        if pipeline_id.is_empty() {
            self.emit_error(ErrorCategory::Precondition, "Pipeline ID is required", 400);
            return None;
        }
        let body = PipelineControlBody {
            pipeline_id: pipeline_id.to_string(),
        };
        self.send_json(&format!("/api/pipeline/{pipeline_id}/{action}"), &body, tag)
    }

    pub fn request_rag_llm_context(
        &mut self,
        prompt: &str,
        top_k_layouts: u32,
        top_k_texts: u32,
        top_k_images: u32,
    ) -> Option<RequestId> {
        let body = RagLlmContextBody {
            prompt: prompt.to_string(),
            top_k_layouts,
            top_k_texts,
            top_k_images,
        };
        self.send_json(
            "/api/rag/llm-context",
            &body,
            RequestTag::RagLlmContext {
                prompt: prompt.to_string(),
            },
        )
    }

    pub fn request_images_for_text(&mut self, text: &str, top_k: u32) -> Option<RequestId> {
        let body = ImagesForTextBody {
            text: text.to_string(),
            top_k,
        };
        self.send_json("/api/rag/images/for-text", &body, RequestTag::RagImagesForText)
    }

    pub fn request_texts_for_image(&mut self, image_path: &str, top_k: u32) -> Option<RequestId> {
        let body = TextsForImageBody {
            image_path: image_path.to_string(),
            top_k,
        };
        self.send_json("/api/rag/texts/for-image", &body, RequestTag::RagTextsForImage)
    }

    pub fn request_suggest_pairs(&mut self, layout_json: JsonObject) -> Option<RequestId> {
        let body = SuggestPairsBody { layout_json };
        self.send_json("/api/rag/suggest-pairs", &body, RequestTag::RagSuggestPairs)
    }

    pub fn request_figma_files(&mut self) -> Option<RequestId> {
        Some(self.send_get("/api/figma/files", RequestTag::FigmaFiles))
    }

    pub fn request_figma_frames(&mut self, file_key: &str) -> Option<RequestId> {
        Some(self.send_get(
            &format!("/api/figma/files/{file_key}/frames"),
            RequestTag::FigmaFrames {
                file_key: file_key.to_string(),
            },
        ))
    }

    pub fn request_figma_frame_import(
        &mut self,
        file_key: &str,
        frame_id: &str,
        dpi: u32,
        page_number: u32,
    ) -> Option<RequestId> {
        let body = FigmaFrameImportBody {
            file_key: file_key.to_string(),
            frame_id: frame_id.to_string(),
            dpi,
            page_number,
        };
        self.send_json("/api/figma/frames/import", &body, RequestTag::FigmaFrameImport)
    }

    /// `None` or an empty object sends the default options.
    pub fn request_workflow_run(
        &mut self,
        bundle_path: &Path,
        options: Option<JsonObject>,
    ) -> Option<RequestId> {
        let bytes = match read_bundle(bundle_path) {
            Ok(b) => b,
            Err(msg) => {
                self.emit_error(ErrorCategory::Precondition, msg, 400);
                return None;
            }
        };

        let options = options
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| WorkflowRunOptions::default().to_json_object());
        let file_name = bundle_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bundle.zip".to_string());

        let body = RequestBody::Multipart {
            fields: vec![(OPTIONS_FIELD.to_string(), Value::Object(options).to_string())],
            file: FilePart {
                field: BUNDLE_FIELD.to_string(),
                file_name,
                content_type: "application/zip".to_string(),
                bytes,
            },
        };
        Some(self.send(HttpMethod::Post, "/v1/workflow/run", body, RequestTag::WorkflowRun))
    }

    // --- polling ---

    pub fn start_polling(&mut self, interval_ms: u64) {
        self.poll.interval = Duration::from_millis(interval_ms).max(MIN_POLL_INTERVAL);
        if !self.poll.active {
            self.poll.active = true;
            self.poll.next_due = Some(Instant::now() + self.poll.interval);
            self.request_status();
        }
    }

    pub fn stop_polling(&mut self) {
        self.poll.active = false;
        self.poll.next_due = None;
    }

    pub fn is_polling(&self) -> bool {
        self.poll.active
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll.interval
    }

    // --- event loop ---

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn pump(&mut self, max_wait: Duration) {
        let now = Instant::now();
        let wait = match self.poll.next_due {
            Some(due) if self.poll.active => max_wait.min(due.saturating_duration_since(now)),
            _ => max_wait,
        };
        match self.completions.recv_timeout(wait) {
            Ok(c) => self.handle_completion(c),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
        self.tick();
    }

    pub(crate) fn tick_at(&mut self, now: Instant) {
        loop {
            match self.completions.try_recv() {
                Ok(c) => self.handle_completion(c),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }

        if self.poll.active && self.poll.next_due.is_some_and(|due| now >= due) {
            // Missed ticks are dropped, not replayed.
            self.poll.next_due = Some(now + self.poll.interval);
            self.request_status();
        }
    }

    pub(crate) fn handle_completion(&mut self, completion: Completion) {
        let Completion {
            id,
            latency,
            outcome,
        } = completion;
        let tag = self.pending.remove(&id).unwrap_or(RequestTag::Untagged);
        debug!(request = id.0, tag = %tag, "completion");

        let (status, body) = match outcome {
            Outcome::Transport(failure) => {
                warn!(request = id.0, tag = %tag, kind = ?failure.kind, "transport failure: {}", failure.message);
                if failure.kind.forces_disconnect() {
                    self.set_connectivity(Connectivity::disconnected());
                }
                self.emit_error(ErrorCategory::Transport, failure.message, 0);
                return;
            }
            Outcome::Response { status, body } => (status, body),
        };

        if !(200..300).contains(&status) {
            warn!(request = id.0, tag = %tag, status, "http error");
            self.emit_error(
                ErrorCategory::Http,
                String::from_utf8_lossy(&body).into_owned(),
                status,
            );
            if status == 401 {
                self.set_connectivity(Connectivity::disconnected());
            }
            return;
        }

        let doc = match dispatch::parse_document(&body) {
            Ok(doc) => doc,
            Err(msg) => {
                self.emit_error(ErrorCategory::Payload, msg, 0);
                return;
            }
        };

        match tag {
            RequestTag::Status => {
                if let Value::Object(obj) = doc {
                    self.set_connectivity(dispatch::status_connectivity(&obj));
                    self.emit(ClientEvent::StatusReceived { data: obj });
                }
                // Round-trip success wins over the body's claim.
                let latency_ms = i64::try_from(latency.as_millis()).unwrap_or(i64::MAX);
                self.set_connectivity(Connectivity::connected(latency_ms));
            }
            RequestTag::Untagged => {
                debug!(request = id.0, "no handler for untagged response");
            }
            tag => {
                if let Some(event) = dispatch::route(tag, doc) {
                    self.emit(event);
                }
            }
        }
    }

    fn set_connectivity(&mut self, next: Connectivity) {
        if self.connectivity == next {
            return;
        }
        self.connectivity = next;
        info!(
            connected = next.connected,
            latency_ms = next.latency_ms,
            "connection status changed"
        );
        self.emit(ClientEvent::ConnectionStatusChanged {
            connected: next.connected,
            latency_ms: next.latency_ms,
        });
    }

    // --- plumbing ---

    fn send_get(&mut self, endpoint: &str, tag: RequestTag) -> RequestId {
        self.send(HttpMethod::Get, endpoint, RequestBody::Empty, tag)
    }

    fn send_json<B: Serialize>(
        &mut self,
        endpoint: &str,
        body: &B,
        tag: RequestTag,
    ) -> Option<RequestId> {
        match serde_json::to_vec(body) {
            Ok(bytes) => Some(self.send(HttpMethod::Post, endpoint, RequestBody::Json(bytes), tag)),
            Err(e) => {
                self.emit_error(ErrorCategory::Precondition, format!("invalid request body: {e}"), 400);
                None
            }
        }
    }

    fn send(
        &mut self,
        method: HttpMethod,
        endpoint: &str,
        body: RequestBody,
        tag: RequestTag,
    ) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;

        let mut headers = Vec::new();
        if !matches!(body, RequestBody::Multipart { .. }) {
            headers.push(("Content-Type", "application/json".to_string()));
        }
        if let Some(key) = self.config.api_key() {
            headers.push(("X-API-Key", key.to_string()));
            headers.push(("Authorization", format!("Bearer {key}")));
        }

        let request = HttpRequest {
            method,
            url: build_url(&self.config.base_url, endpoint),
            headers,
            body,
        };
        debug!(request = id.0, tag = %tag, url = %request.url, "dispatch");

        self.pending.insert(id, tag);
        self.transport.dispatch(id, request);
        id
    }

    fn emit_error(&mut self, category: ErrorCategory, message: impl Into<String>, status: u16) {
        self.emit(ClientEvent::Error {
            message: message.into(),
            status,
            category,
        });
    }

    fn emit(&mut self, event: ClientEvent) {
        if self.events.try_send(event).is_err() {
            warn!("event channel full or closed; dropping event");
        }
    }
}

fn read_bundle(path: &Path) -> Result<Vec<u8>, String> {
    let is_file = std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false);
    if !is_file {
        return Err(format!("Workflow bundle not found: {}", path.display()));
    }
    std::fs::read(path)
        .map_err(|e| format!("Could not open workflow bundle {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{TransportErrorKind, TransportFailure};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Sent = Rc<RefCell<Vec<(RequestId, HttpRequest)>>>;

    struct RecordingTransport {
        sent: Sent,
    }

    impl Transport for RecordingTransport {
        fn dispatch(&self, id: RequestId, request: HttpRequest) {
            self.sent.borrow_mut().push((id, request));
        }
    }

    struct Harness {
        client: ApiClient,
        sent: Sent,
        completions: Sender<Completion>,
        events: Receiver<ClientEvent>,
    }

    impl Harness {
        fn new(config: GammaConfig) -> Self {
            let sent: Sent = Rc::new(RefCell::new(Vec::new()));
            let (completion_tx, completion_rx) = unbounded();
            let (event_tx, event_rx) = bounded(EVENT_CAP);
            let client = ApiClient::new(
                config,
                Box::new(RecordingTransport {
                    sent: Rc::clone(&sent),
                }),
                completion_rx,
                event_tx,
            );
            Self {
                client,
                sent,
                completions: completion_tx,
                events: event_rx,
            }
        }

        fn respond(&mut self, id: RequestId, status: u16, body: Value) {
            self.respond_raw(id, status, body.to_string().into_bytes());
        }

        fn respond_raw(&mut self, id: RequestId, status: u16, body: Vec<u8>) {
            self.completions
                .send(Completion {
                    id,
                    latency: Duration::from_millis(17),
                    outcome: Outcome::Response { status, body },
                })
                .unwrap();
            self.client.tick();
        }

        fn fail(&mut self, id: RequestId, kind: TransportErrorKind) {
            self.completions
                .send(Completion {
                    id,
                    latency: Duration::ZERO,
                    outcome: Outcome::Transport(TransportFailure {
                        kind,
                        message: "boom".to_string(),
                    }),
                })
                .unwrap();
            self.client.tick();
        }

        fn drain(&self) -> Vec<ClientEvent> {
            self.events.try_iter().collect()
        }

        fn sent_count(&self) -> usize {
            self.sent.borrow().len()
        }

        fn last_sent(&self) -> HttpRequest {
            self.sent.borrow().last().unwrap().1.clone()
        }

        fn connect(&mut self) {
            let id = self.client.request_status().unwrap();
            self.respond(id, 200, json!({"status": "ok"}));
            assert!(self.client.is_connected());
            self.drain();
        }
    }

    fn harness() -> Harness {
        Harness::new(GammaConfig::new("http://backend:8000"))
    }

    fn errors(events: &[ClientEvent]) -> Vec<(u16, ErrorCategory)> {
        events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Error {
                    status, category, ..
                } => Some((*status, *category)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn changing_base_url_resets_connectivity_once() {
        let mut h = harness();
        h.connect();

        h.client.set_base_url("http://other:9000");
        assert_eq!(
            h.drain(),
            vec![ClientEvent::ConnectionStatusChanged {
                connected: false,
                latency_ms: -1
            }]
        );

        h.client.set_base_url("http://other:9000");
        assert!(h.drain().is_empty());
    }

    #[test]
    fn base_url_change_while_disconnected_is_silent() {
        let mut h = harness();
        h.client.set_base_url("http://elsewhere");
        assert_eq!(h.client.base_url(), "http://elsewhere");
        assert!(h.drain().is_empty());
    }

    #[test]
    fn api_key_adds_both_auth_headers() {
        let mut h = harness();
        h.client.request_assets();
        let req = h.last_sent();
        assert_eq!(req.header("Content-Type"), Some("application/json"));
        assert_eq!(req.header("X-API-Key"), None);
        assert_eq!(req.header("Authorization"), None);

        h.client.set_api_key("k-123");
        h.client.request_assets();
        let req = h.last_sent();
        assert_eq!(req.url, "http://backend:8000/api/assets");
        assert_eq!(req.header("X-API-Key"), Some("k-123"));
        assert_eq!(req.header("Authorization"), Some("Bearer k-123"));
        assert!(h.drain().is_empty());
    }

    #[test]
    fn polling_clamps_interval_and_probes_once() {
        let mut h = harness();
        h.client.start_polling(10);
        assert!(h.client.is_polling());
        assert_eq!(h.client.poll_interval(), MIN_POLL_INTERVAL);
        assert_eq!(h.sent_count(), 1);

        h.client.start_polling(10);
        assert_eq!(h.sent_count(), 1);
        assert_eq!(h.client.pending_requests(), 1);
    }

    #[test]
    fn poll_ticks_probe_even_with_probe_in_flight() {
        let mut h = harness();
        let start = Instant::now();
        h.client.start_polling(100);
        assert_eq!(h.sent_count(), 1);

        h.client.tick_at(start + Duration::from_millis(10));
        assert_eq!(h.sent_count(), 1);

        h.client.tick_at(start + Duration::from_millis(150));
        assert_eq!(h.sent_count(), 2);

        // Long stall: one probe, not a backlog.
        h.client.tick_at(start + Duration::from_secs(5));
        assert_eq!(h.sent_count(), 3);
        assert_eq!(h.client.pending_requests(), 3);

        h.client.stop_polling();
        h.client.tick_at(start + Duration::from_secs(60));
        assert_eq!(h.sent_count(), 3);
        assert!(!h.client.is_polling());
    }

    #[test]
    fn successful_status_overrides_body_claim() {
        let mut h = harness();
        let id = h.client.request_status().unwrap();
        h.respond(id, 200, json!({"status": "degraded", "latency_ms": 42}));

        let events = h.drain();
        assert_eq!(
            events,
            vec![
                ClientEvent::ConnectionStatusChanged {
                    connected: false,
                    latency_ms: 42
                },
                ClientEvent::StatusReceived {
                    data: json!({"status": "degraded", "latency_ms": 42})
                        .as_object()
                        .unwrap()
                        .clone()
                },
                ClientEvent::ConnectionStatusChanged {
                    connected: true,
                    latency_ms: 17
                },
            ]
        );
        assert_eq!(h.client.connectivity(), Connectivity::connected(17));
        assert_eq!(h.client.pending_requests(), 0);
    }

    #[test]
    fn unknown_handle_is_handled_untagged() {
        let mut h = harness();
        h.respond(RequestId(999), 200, json!({"status": "ok"}));
        assert!(h.drain().is_empty());
        assert!(!h.client.is_connected());
    }

    #[test]
    fn consumed_handle_is_not_routed_twice() {
        let mut h = harness();
        let id = h.client.request_assets().unwrap();
        h.respond(id, 200, json!({"total_assets": 3}));
        assert_eq!(h.drain().len(), 1);

        h.respond(id, 200, json!({"total_assets": 3}));
        assert!(h.drain().is_empty());
    }

    #[test]
    fn empty_pipeline_id_is_rejected_locally() {
        let mut h = harness();
        assert!(h.client.start_pipeline("").is_none());
        assert!(h.client.stop_pipeline("").is_none());
        assert_eq!(h.sent_count(), 0);
        assert_eq!(
            errors(&h.drain()),
            vec![
                (400, ErrorCategory::Precondition),
                (400, ErrorCategory::Precondition)
            ]
        );
    }

    #[test]
    fn start_pipeline_posts_id() {
        let mut h = harness();
        let id = h.client.start_pipeline("p-7").unwrap();
        let req = h.last_sent();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "http://backend:8000/api/pipeline/p-7/start");
        let RequestBody::Json(bytes) = &req.body else {
            panic!("expected json body");
        };
        let body: Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(body, json!({"pipeline_id": "p-7"}));

        h.respond(id, 200, json!({"success": true}));
        assert_eq!(
            h.drain(),
            vec![ClientEvent::PipelineStartResult {
                success: true,
                message: "Pipeline started".to_string()
            }]
        );
    }

    #[test]
    fn workflow_run_requires_regular_file() {
        let mut h = harness();
        let dir = tempfile::tempdir().unwrap();

        assert!(h
            .client
            .request_workflow_run(&dir.path().join("missing.zip"), None)
            .is_none());
        assert!(h.client.request_workflow_run(dir.path(), None).is_none());

        assert_eq!(h.sent_count(), 0);
        assert_eq!(
            errors(&h.drain()),
            vec![
                (400, ErrorCategory::Precondition),
                (400, ErrorCategory::Precondition)
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn workflow_run_rejects_unreadable_bundle() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked.zip");
        std::fs::write(&locked, b"zip").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Root reads through mode 000; /proc/self/mem is a regular file whose read fails.
        let bundle = if std::fs::File::open(&locked).is_err() {
            locked
        } else {
            std::path::PathBuf::from("/proc/self/mem")
        };
        if !bundle.is_file() || std::fs::read(&bundle).is_ok() {
            return;
        }

        let mut h = harness();
        assert!(h.client.request_workflow_run(&bundle, None).is_none());
        assert_eq!(h.sent_count(), 0);
        let events = h.drain();
        assert_eq!(errors(&events), vec![(400, ErrorCategory::Precondition)]);
        let ClientEvent::Error { message, .. } = &events[0] else {
            panic!("expected error event");
        };
        assert!(message.starts_with("Could not open workflow bundle"), "{message}");
    }

    #[test]
    fn workflow_run_sends_default_options_and_bundle() {
        let mut h = harness();
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("job.zip");
        std::fs::write(&bundle, b"PK\x03\x04fake").unwrap();

        h.client.set_api_key("k");
        let id = h.client.request_workflow_run(&bundle, None).unwrap();
        let req = h.last_sent();
        assert_eq!(req.url, "http://backend:8000/v1/workflow/run");
        assert_eq!(req.header("Content-Type"), None);
        assert_eq!(req.header("X-API-Key"), Some("k"));

        let RequestBody::Multipart { fields, file } = &req.body else {
            panic!("expected multipart body");
        };
        assert_eq!(fields[0].0, "options_json");
        let opts: Value = serde_json::from_str(&fields[0].1).unwrap();
        assert_eq!(opts, Value::Object(WorkflowRunOptions::default().to_json_object()));
        assert_eq!(file.field, "bundle");
        assert_eq!(file.file_name, "job.zip");
        assert_eq!(file.bytes, b"PK\x03\x04fake");

        h.respond(id, 201, json!({"job_id": "j1", "status": "queued"}));
        assert_eq!(
            h.drain(),
            vec![ClientEvent::WorkflowJobCreated {
                job: json!({"job_id": "j1", "status": "queued"})
                    .as_object()
                    .unwrap()
                    .clone()
            }]
        );
    }

    #[test]
    fn caller_workflow_options_are_sent_verbatim() {
        let mut h = harness();
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("job.zip");
        std::fs::write(&bundle, b"zip").unwrap();

        let opts = json!({"force": true}).as_object().unwrap().clone();
        h.client.request_workflow_run(&bundle, Some(opts));
        let RequestBody::Multipart { fields, .. } = h.last_sent().body else {
            panic!("expected multipart body");
        };
        assert_eq!(fields[0].1, r#"{"force":true}"#);
    }

    #[test]
    fn unauthorized_forces_disconnect_on_any_tag() {
        let mut h = harness();
        h.connect();

        let id = h.client.request_layout_audit().unwrap();
        h.respond_raw(id, 401, b"Invalid or missing API key".to_vec());
        assert_eq!(
            h.drain(),
            vec![
                ClientEvent::Error {
                    message: "Invalid or missing API key".to_string(),
                    status: 401,
                    category: ErrorCategory::Http
                },
                ClientEvent::ConnectionStatusChanged {
                    connected: false,
                    latency_ms: -1
                },
            ]
        );
    }

    #[test]
    fn server_error_keeps_connectivity() {
        let mut h = harness();
        h.connect();
        let id = h.client.request_assets().unwrap();
        h.respond_raw(id, 500, b"boom".to_vec());
        assert_eq!(errors(&h.drain()), vec![(500, ErrorCategory::Http)]);
        assert!(h.client.is_connected());
    }

    #[test]
    fn refused_connection_disconnects_but_other_failures_do_not() {
        let mut h = harness();
        h.connect();

        let id = h.client.request_assets().unwrap();
        h.fail(id, TransportErrorKind::Other);
        assert_eq!(errors(&h.drain()), vec![(0, ErrorCategory::Transport)]);
        assert!(h.client.is_connected());

        let id = h.client.request_assets().unwrap();
        h.fail(id, TransportErrorKind::ConnectionRefused);
        let events = h.drain();
        assert!(events.contains(&ClientEvent::ConnectionStatusChanged {
            connected: false,
            latency_ms: -1
        }));
        assert_eq!(errors(&events), vec![(0, ErrorCategory::Transport)]);
    }

    #[test]
    fn unresolvable_host_and_timeout_disconnect() {
        for kind in [TransportErrorKind::HostNotFound, TransportErrorKind::Timeout] {
            let mut h = harness();
            h.connect();

            let id = h.client.request_pipeline(None).unwrap();
            h.fail(id, kind);
            assert_eq!(
                h.drain(),
                vec![
                    ClientEvent::ConnectionStatusChanged {
                        connected: false,
                        latency_ms: -1
                    },
                    ClientEvent::Error {
                        message: "boom".to_string(),
                        status: 0,
                        category: ErrorCategory::Transport
                    },
                ],
                "{kind:?}"
            );
            assert!(!h.client.is_connected());
        }
    }

    #[test]
    fn malformed_bodies_become_payload_errors() {
        let mut h = harness();
        let id = h.client.request_assets().unwrap();
        h.respond_raw(id, 200, b"<html>".to_vec());
        let id = h.client.request_assets().unwrap();
        h.respond_raw(id, 200, b"true".to_vec());
        assert_eq!(
            errors(&h.drain()),
            vec![(0, ErrorCategory::Payload), (0, ErrorCategory::Payload)]
        );
    }

    #[test]
    fn figma_and_rag_responses_carry_request_context() {
        let mut h = harness();
        let frames = h.client.request_figma_frames("FILE1").unwrap();
        assert_eq!(
            h.last_sent().url,
            "http://backend:8000/api/figma/files/FILE1/frames"
        );
        let ctx = h
            .client
            .request_rag_llm_context("a spread about owls", 3, 5, 3)
            .unwrap();

        // Out of order on purpose.
        h.respond(ctx, 200, json!({"context": "...", "sources": []}));
        h.respond(frames, 200, json!({"frames": [{"id": "0:1"}]}));

        assert_eq!(
            h.drain(),
            vec![
                ClientEvent::RagLlmContextReceived {
                    prompt: "a spread about owls".to_string(),
                    context: json!({"context": "...", "sources": []})
                        .as_object()
                        .unwrap()
                        .clone()
                },
                ClientEvent::FigmaFramesReceived {
                    file_key: "FILE1".to_string(),
                    frames: vec![json!({"id": "0:1"})]
                },
            ]
        );
    }

    #[test]
    fn request_pipeline_optional_id() {
        let mut h = harness();
        h.client.request_pipeline(None);
        assert_eq!(h.last_sent().url, "http://backend:8000/api/pipeline");
        h.client.request_pipeline(Some("abc"));
        assert_eq!(h.last_sent().url, "http://backend:8000/api/pipeline/abc");
    }

    #[test]
    fn request_ids_are_unique() {
        let mut h = harness();
        let a = h.client.request_status().unwrap();
        let b = h.client.request_status().unwrap();
        assert_ne!(a, b);
        assert_eq!(h.client.pending_requests(), 2);
    }
}
