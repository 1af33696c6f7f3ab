use crate::protocol::{Completion, Outcome, RequestId, TransportErrorKind, TransportFailure};
use crate::transport::{HttpMethod, HttpRequest, RequestBody, Transport};
use crossbeam_channel::Sender;
use std::error::Error as StdError;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum NetError {
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

struct Job {
    id: RequestId,
    request: HttpRequest,
}

pub struct NetworkThread {
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    completions: Sender<Completion>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkThread {
    pub fn spawn(completions: Sender<Completion>) -> Result<Self, NetError> {
        let http = reqwest::Client::builder().build()?;
        Self::with_client(completions, http)
    }

    pub fn with_client(
        completions: Sender<Completion>,
        http: reqwest::Client,
    ) -> Result<Self, NetError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (job_tx, job_rx) = mpsc::unbounded_channel();

        let completions_for_thread = completions.clone();
        let join_handle = thread::Builder::new()
            .name("gamma-net".to_string())
            .spawn(move || run_jobs(runtime, http, job_rx, completions_for_thread))?;

        Ok(Self {
            jobs: Mutex::new(Some(job_tx)),
            completions,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    pub fn shutdown(&self) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.take();
        }
        if let Ok(mut h) = self.join_handle.lock() {
            if let Some(h) = h.take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for NetworkThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Transport for NetworkThread {
    fn dispatch(&self, id: RequestId, request: HttpRequest) {
        let sent = self
            .jobs
            .lock()
            .ok()
            .and_then(|jobs| jobs.as_ref().map(|tx| tx.send(Job { id, request }).is_ok()))
            .unwrap_or(false);

        if !sent {
            warn!(request = id.0, "network thread stopped; failing request");
            let _ = self.completions.send(Completion {
                id,
                latency: Duration::ZERO,
                outcome: Outcome::Transport(TransportFailure {
                    kind: TransportErrorKind::Other,
                    message: "network thread stopped".to_string(),
                }),
            });
        }
    }
}

fn run_jobs(
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    completions: Sender<Completion>,
) {
    runtime.block_on(async move {
        while let Some(Job { id, request }) = jobs.recv().await {
            let http = http.clone();
            let completions = completions.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let outcome = execute(&http, request).await;
                let latency = started.elapsed();
                debug!(request = id.0, latency_ms = latency.as_millis() as u64, "request finished");
                let _ = completions.send(Completion {
                    id,
                    latency,
                    outcome,
                });
            });
        }
    });
}

async fn execute(http: &reqwest::Client, request: HttpRequest) -> Outcome {
    let method = match request.method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
    };

    let mut builder = http.request(method, request.url.as_str());
    for (name, value) in &request.headers {
        builder = builder.header(*name, value.as_str());
    }

    builder = match request.body {
        RequestBody::Empty => builder,
        RequestBody::Json(bytes) => builder.body(bytes),
        RequestBody::Multipart { fields, file } => {
            let mut form = reqwest::multipart::Form::new();
            for (name, value) in fields {
                form = form.text(name, value);
            }
            let part = match reqwest::multipart::Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(&file.content_type)
            {
                Ok(p) => p,
                Err(e) => return Outcome::Transport(classify(&e)),
            };
            builder.multipart(form.part(file.field, part))
        }
    };

    let resp = match builder.send().await {
        Ok(r) => r,
        Err(e) => return Outcome::Transport(classify(&e)),
    };
    let status = resp.status().as_u16();
    match resp.bytes().await {
        Ok(body) => Outcome::Response {
            status,
            body: body.to_vec(),
        },
        Err(e) => Outcome::Transport(classify(&e)),
    }
}

fn classify(err: &reqwest::Error) -> TransportFailure {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        connect_failure_kind(err)
    } else {
        TransportErrorKind::Other
    };
    TransportFailure {
        kind,
        message: chain_message(err),
    }
}

// reqwest's own text omits the cause; append each source that adds something new.
fn chain_message(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(e) = source {
        let text = e.to_string();
        if !text.is_empty() && !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = e.source();
    }
    message
}

fn connect_failure_kind(err: &reqwest::Error) -> TransportErrorKind {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    return TransportErrorKind::ConnectionRefused
                }
                std::io::ErrorKind::TimedOut => return TransportErrorKind::Timeout,
                _ => {}
            }
        }
        let text = e.to_string().to_ascii_lowercase();
        if text.contains("connection refused") {
            return TransportErrorKind::ConnectionRefused;
        }
        if text.contains("dns")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
            || text.contains("no such host")
        {
            return TransportErrorKind::HostNotFound;
        }
        source = e.source();
    }
    TransportErrorKind::Other
}
