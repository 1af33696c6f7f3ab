use anyhow::Context;
use clap::{Parser, Subcommand};
use gamma_api_client::{
    save_temp_sla, sla_from_import, test_connection, validate_url, ApiClient, ClientEvent,
    ConnectionTestOutcome, GammaConfig, JsonObject, DEFAULT_DPI, DEFAULT_PAGE_NUMBER,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_TOP_K, DEFAULT_TOP_K_IMAGES, DEFAULT_TOP_K_LAYOUTS,
    DEFAULT_TOP_K_TEXTS,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const PUMP_SLICE: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "gamma_cli")]
struct Args {
    /// Backend base URL (overrides GAMMA_BASE_URL).
    #[arg(long)]
    base_url: Option<String>,

    /// API key (overrides GAMMA_API_KEY).
    #[arg(long)]
    api_key: Option<String>,

    /// Answer dashboard requests from synthetic data instead of the network.
    #[arg(long, default_value_t = false)]
    mock: bool,

    /// How long to wait for outstanding responses.
    #[arg(long, default_value_t = 10)]
    wait_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Status,
    /// Status, pipelines, assets and layout audit in one go.
    Dashboard,
    Pipeline {
        #[arg(long)]
        id: Option<String>,
    },
    Assets,
    Audit,
    Start {
        pipeline_id: String,
    },
    Stop {
        pipeline_id: String,
    },
    RagContext {
        prompt: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K_LAYOUTS)]
        layouts: u32,
        #[arg(long, default_value_t = DEFAULT_TOP_K_TEXTS)]
        texts: u32,
        #[arg(long, default_value_t = DEFAULT_TOP_K_IMAGES)]
        images: u32,
    },
    ImagesForText {
        text: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: u32,
    },
    TextsForImage {
        image_path: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: u32,
    },
    SuggestPairs {
        #[arg(value_name = "LAYOUT_JSON")]
        layout: PathBuf,
    },
    FigmaFiles,
    FigmaFrames {
        file_key: String,
    },
    FigmaImport {
        file_key: String,
        frame_id: String,
        #[arg(long, default_value_t = DEFAULT_DPI)]
        dpi: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_NUMBER)]
        page: u32,
        /// Write the returned page XML to a temp .sla file.
        #[arg(long, default_value_t = false)]
        save_sla: bool,
    },
    WorkflowRun {
        bundle: PathBuf,
        /// JSON object with workflow options; defaults are used when omitted.
        #[arg(long, value_name = "PATH")]
        options: Option<PathBuf>,
    },
    /// Poll /api/status and print every answer.
    Watch {
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
        interval_ms: u64,
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
    TestConnection {
        #[arg(long, default_value_t = 5)]
        timeout_secs: u64,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = resolve_config(&args);
    debug!(base_url = %config.base_url, mock = args.mock, "resolved config");

    if let Command::TestConnection { timeout_secs } = args.command {
        return run_connection_test(&config, Duration::from_secs(timeout_secs));
    }

    let (mut client, events) = if args.mock {
        ApiClient::mock(config)
    } else {
        validate_url(&config.base_url)?;
        ApiClient::connect(config)?
    };

    let mut save_sla = false;
    let mut watch_count = None;
    match args.command {
        Command::Status => {
            client.request_status();
        }
        Command::Dashboard => {
            client.request_status();
            client.request_pipeline(None);
            client.request_assets();
            client.request_layout_audit();
        }
        Command::Pipeline { id } => {
            client.request_pipeline(id.as_deref());
        }
        Command::Assets => {
            client.request_assets();
        }
        Command::Audit => {
            client.request_layout_audit();
        }
        Command::Start { pipeline_id } => {
            client.start_pipeline(&pipeline_id);
        }
        Command::Stop { pipeline_id } => {
            client.stop_pipeline(&pipeline_id);
        }
        Command::RagContext {
            prompt,
            layouts,
            texts,
            images,
        } => {
            client.request_rag_llm_context(&prompt, layouts, texts, images);
        }
        Command::ImagesForText { text, top_k } => {
            client.request_images_for_text(&text, top_k);
        }
        Command::TextsForImage { image_path, top_k } => {
            client.request_texts_for_image(&image_path, top_k);
        }
        Command::SuggestPairs { layout } => {
            client.request_suggest_pairs(read_json_object(&layout)?);
        }
        Command::FigmaFiles => {
            client.request_figma_files();
        }
        Command::FigmaFrames { file_key } => {
            client.request_figma_frames(&file_key);
        }
        Command::FigmaImport {
            file_key,
            frame_id,
            dpi,
            page,
            save_sla: save,
        } => {
            save_sla = save;
            client.request_figma_frame_import(&file_key, &frame_id, dpi, page);
        }
        Command::WorkflowRun { bundle, options } => {
            let options = options.as_deref().map(read_json_object).transpose()?;
            client.request_workflow_run(&bundle, options);
        }
        Command::Watch { interval_ms, count } => {
            watch_count = Some(count);
            client.start_polling(interval_ms);
        }
        // Handled before the client is built.
        Command::TestConnection { .. } => {}
    }

    let deadline = match watch_count {
        Some(_) => None,
        None => Some(Instant::now() + Duration::from_secs(args.wait_secs)),
    };

    let mut failures = 0usize;
    let mut probes_answered = 0usize;
    loop {
        for event in events.try_iter() {
            if event.is_error() {
                failures += 1;
            }
            if matches!(
                event,
                ClientEvent::StatusReceived { .. } | ClientEvent::Error { .. }
            ) {
                probes_answered += 1;
            }
            println!("{}", serde_json::to_string(&event)?);

            if save_sla {
                if let ClientEvent::FigmaFrameImportReceived { result } = &event {
                    let xml = sla_from_import(result)?;
                    let saved = save_temp_sla(&xml)?;
                    eprintln!("{}", saved.message());
                }
            }
        }

        let done = match watch_count {
            Some(count) => probes_answered >= count,
            None => client.pending_requests() == 0,
        };
        if done {
            break;
        }

        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    anyhow::bail!(
                        "timed out with {} request(s) outstanding",
                        client.pending_requests()
                    );
                }
                PUMP_SLICE.min(deadline - now)
            }
            None => PUMP_SLICE,
        };
        client.pump(wait);
    }
    client.stop_polling();

    if failures > 0 {
        anyhow::bail!("{failures} request(s) failed");
    }
    Ok(())
}

fn resolve_config(args: &Args) -> GammaConfig {
    let mut config = GammaConfig::from_env();
    if let Some(url) = args.base_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        config.base_url = url.to_string();
    }
    if let Some(key) = args.api_key.as_deref() {
        config.api_key = Some(key.trim().to_string());
    }
    config
}

fn run_connection_test(config: &GammaConfig, timeout: Duration) -> anyhow::Result<()> {
    let outcome = test_connection(config, timeout)?;
    println!("{}", serde_json::to_string(&outcome)?);
    match outcome {
        ConnectionTestOutcome::Connected { latency_ms } => {
            info!(latency_ms, "backend reachable");
            Ok(())
        }
        other => Err(anyhow::anyhow!("connection test failed: {other:?}")),
    }
}

fn read_json_object(path: &Path) -> anyhow::Result<JsonObject> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    match value {
        serde_json::Value::Object(obj) => Ok(obj),
        _ => Err(anyhow::anyhow!("{} must contain a JSON object", path.display())),
    }
}
