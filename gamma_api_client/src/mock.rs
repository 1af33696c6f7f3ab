use crate::protocol::{Completion, Outcome, RequestId};
use crate::transport::{HttpRequest, Transport};
use crossbeam_channel::Sender;
use rand::Rng;
use serde_json::{json, Value};
use std::cell::Cell;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;
use url::Url;

const TOTAL_ASSETS: u64 = 150;

/// Synthetic dashboard data; any other path gets a 503.
pub struct MockBackend {
    completions: Sender<Completion>,
    progress: Cell<u64>,
    validated: Cell<u64>,
}

impl MockBackend {
    pub fn new(completions: Sender<Completion>) -> Self {
        Self {
            completions,
            progress: Cell::new(0),
            validated: Cell::new(100),
        }
    }

    fn answer(&self, path: &str) -> (u16, Value, Duration) {
        let mut rng = rand::thread_rng();
        let latency_ms: u64 = rng.gen_range(30..50);
        let latency = Duration::from_millis(latency_ms);

        let body = match path.trim_end_matches('/') {
            "/api/status" => json!({
                "status": "connected",
                "latency_ms": latency_ms,
                "version": "1.0.0",
                "timestamp": unix_now(),
            }),
            "/api/pipeline" => {
                let progress = (self.progress.get() + 2) % 101;
                self.progress.set(progress);
                let current_step = match progress {
                    0..=49 => "validation",
                    50..=79 => "rendering",
                    _ => "finalization",
                };
                let status = if progress < 100 { "running" } else { "completed" };
                json!({
                    "pipelines": [{
                        "id": "pipeline-001",
                        "name": "Default Pipeline",
                        "status": status,
                        "progress": progress,
                        "current_step": current_step,
                    }]
                })
            }
            "/api/assets" => {
                let validated = (self.validated.get() + 1).min(TOTAL_ASSETS);
                self.validated.set(validated);
                json!({
                    "total_assets": TOTAL_ASSETS,
                    "validated_assets": validated,
                    "progress_percent": validated * 100 / TOTAL_ASSETS,
                    "text_fit_progress": rng.gen_range(15..20),
                })
            }
            "/api/layout/audit" => {
                let low_res: u32 = rng.gen_range(0..5);
                let (low_res_status, low_res_message) = if low_res == 0 {
                    ("passed", "All images have sufficient resolution".to_string())
                } else {
                    ("warning", format!("{low_res} low-resolution images detected"))
                };
                json!({
                    "z_order_guard": {"status": "passed", "message": "Z-order validation successful"},
                    "overlaps": {"status": "passed", "count": 0, "message": "No overlaps detected"},
                    "low_res_images": {
                        "status": low_res_status,
                        "count": low_res,
                        "message": low_res_message,
                    },
                    "font_issues": {"status": "passed", "count": 0},
                })
            }
            other => {
                return (
                    503,
                    Value::String(format!("mock backend does not serve {other}")),
                    latency,
                )
            }
        };
        (200, body, latency)
    }
}

impl Transport for MockBackend {
    fn dispatch(&self, id: RequestId, request: HttpRequest) {
        let path = Url::parse(&request.url)
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        let (status, body, latency) = self.answer(&path);
        debug!(request = id.0, path = %path, status, "mock answer");

        let body = match body {
            Value::String(text) => text.into_bytes(),
            other => other.to_string().into_bytes(),
        };
        let _ = self.completions.send(Completion {
            id,
            latency,
            outcome: Outcome::Response { status, body },
        });
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiClient;
    use crate::config::GammaConfig;
    use crate::protocol::{ClientEvent, ErrorCategory};

    #[test]
    fn status_connects_with_mock_latency() {
        let (mut client, events) = ApiClient::mock(GammaConfig::default());
        client.request_status();
        client.tick();

        let events: Vec<_> = events.try_iter().collect();
        let Some(ClientEvent::StatusReceived { data }) = events
            .iter()
            .find(|e| matches!(e, ClientEvent::StatusReceived { .. }))
        else {
            panic!("no status event in {events:?}");
        };
        assert_eq!(data["status"], "connected");
        assert_eq!(data["version"], "1.0.0");
        assert!(client.is_connected());
        let latency = client.latency_ms();
        assert!((30..50).contains(&latency), "latency {latency}");
    }

    #[test]
    fn pipeline_progress_advances() {
        let (mut client, events) = ApiClient::mock(GammaConfig::default());
        client.request_pipeline(None);
        client.request_pipeline(None);
        client.tick();

        let progress: Vec<u64> = events
            .try_iter()
            .filter_map(|e| match e {
                ClientEvent::PipelineReceived { data } => {
                    data["pipelines"][0]["progress"].as_u64()
                }
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![2, 4]);
    }

    #[test]
    fn validated_assets_saturate_at_total() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let backend = MockBackend::new(tx);
        for _ in 0..60 {
            backend.answer("/api/assets");
        }
        let (status, body, _) = backend.answer("/api/assets");
        assert_eq!(status, 200);
        assert_eq!(body["validated_assets"], 150);
        assert_eq!(body["progress_percent"], 100);
        drop(rx);
    }

    #[test]
    fn unknown_paths_are_unavailable() {
        let (mut client, events) = ApiClient::mock(GammaConfig::default());
        client.request_figma_files();
        client.tick();
        let events: Vec<_> = events.try_iter().collect();
        assert!(matches!(
            events.as_slice(),
            [ClientEvent::Error {
                status: 503,
                category: ErrorCategory::Http,
                ..
            }]
        ));
    }
}
