mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use snapsolve_channels::{ConnectionManager, HostConfig, WebSocketConnector};
use snapsolve_core::{
    event_channel, ClipboardSink, ConsumerLoop, EventSender, HostState, NoClipboard,
    SystemClipboard,
};
use snapsolve_observability::{
    default_logs_dir, emit_event, init_process_logging, redact_text, ObservabilityEvent,
    ProcessKind,
};
use snapsolve_providers::{OpenAIVisionProvider, S3ObjectStore};
use snapsolve_types::ConnectionState;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use console::ConsolePresenter;

const LOG_RETENTION_DAYS: u64 = 14;

#[derive(Parser, Debug)]
#[command(name = "snapsolve-host")]
#[command(about = "Listens for image work requests and delivers multiple-choice answers")]
struct Cli {
    /// Extra dotenv file, loaded before `.env` in the working directory.
    #[arg(long, env = "SNAPSOLVE_ENV_FILE", global = true)]
    env_file: Option<PathBuf>,
    #[arg(long, env = "SNAPSOLVE_LOGS_DIR", global = true)]
    logs_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the host until `quit` or Ctrl-C.
    Run {
        #[arg(long, default_value_t = false)]
        auto_connect: bool,
        #[arg(long)]
        wss_url: Option<String>,
        #[arg(long)]
        bucket: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = false)]
        no_clipboard: bool,
        #[arg(long, default_value_t = false)]
        skip_verify: bool,
        #[arg(long, short, default_value_t = false)]
        verbose: bool,
    },
    /// Validate configuration and check the inference credentials.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    load_env_files(cli.env_file.as_deref());

    let logs_dir = cli.logs_dir.clone().unwrap_or_else(default_logs_dir);
    let process = match cli.command {
        Command::Run { .. } => ProcessKind::Host,
        Command::Check => ProcessKind::Check,
    };
    let (_log_guard, log_info) = init_process_logging(process, &logs_dir, LOG_RETENTION_DAYS)?;
    emit_event(
        tracing::Level::INFO,
        process,
        ObservabilityEvent {
            event: "logging.initialized",
            component: "host.main",
            status: Some("ok"),
            detail: Some("jsonl logging initialized"),
            ..Default::default()
        },
    );
    info!("logging initialized: {:?}", log_info);

    let mut config = HostConfig::from_env().context("loading configuration")?;

    match cli.command {
        Command::Check => run_check(&config).await,
        Command::Run {
            auto_connect,
            wss_url,
            bucket,
            model,
            no_clipboard,
            skip_verify,
            verbose,
        } => {
            if wss_url.is_some() {
                config.endpoint_url = wss_url;
            }
            if bucket.is_some() {
                config.default_bucket = bucket;
            }
            if let Some(model) = model {
                config.openai.model = model;
            }
            run_host(
                config,
                RunOptions {
                    auto_connect,
                    no_clipboard,
                    skip_verify,
                    verbose,
                },
            )
            .await
        }
    }
}

struct RunOptions {
    auto_connect: bool,
    no_clipboard: bool,
    skip_verify: bool,
    verbose: bool,
}

fn load_env_files(extra: Option<&std::path::Path>) {
    if let Some(path) = extra {
        if let Err(e) = dotenvy::from_path(path) {
            eprintln!("could not load {}: {e}", path.display());
        }
    }
    dotenvy::dotenv().ok();
    if let Some(exe_env) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
    {
        if exe_env.is_file() {
            dotenvy::from_path(&exe_env).ok();
        }
    }
}

async fn run_check(config: &HostConfig) -> anyhow::Result<()> {
    log_config_summary(config);
    config.validate().context("configuration is incomplete")?;
    if !config.s3.has_credentials() {
        println!("warning: AWS credentials are not set; S3 fetches will fail");
    }
    let provider = OpenAIVisionProvider::new(config.openai.clone())?;
    provider
        .verify()
        .await
        .context("inference credentials were rejected")?;
    println!("configuration ok, model `{}` reachable", config.openai.model);
    Ok(())
}

async fn run_host(config: HostConfig, options: RunOptions) -> anyhow::Result<()> {
    log_config_summary(&config);
    let (events, rx) = event_channel();

    let config_ready = match config.validate() {
        Ok(()) => true,
        Err(e) => {
            events.error(format!("Configuration error: {e}"));
            false
        }
    };
    if !config.s3.has_credentials() {
        events.warn("AWS credentials are not set; S3 fetches will fail.");
    }

    let store = Arc::new(S3ObjectStore::new(config.s3.clone())?);
    let provider = Arc::new(OpenAIVisionProvider::new(config.openai.clone())?);
    if config_ready && !options.skip_verify {
        tokio::spawn(verify_inference(provider.clone(), events.clone()));
    }

    let grace = config.shutdown_grace;
    let manager = ConnectionManager::new(
        config,
        Arc::new(WebSocketConnector::new()),
        store,
        provider,
        events.clone(),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(read_commands(
        manager.clone(),
        events.clone(),
        shutdown.clone(),
    ));
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    events.info("Host ready. Commands: connect, disconnect, status, quit.");
    if options.auto_connect && config_ready {
        manager.request_open();
    }

    let clipboard: Box<dyn ClipboardSink> = if options.no_clipboard {
        Box::new(NoClipboard)
    } else {
        Box::new(SystemClipboard::new())
    };
    let consumer = ConsumerLoop::new(
        rx,
        HostState::new(config_ready),
        clipboard,
        Box::new(ConsolePresenter::stdout(options.verbose)),
    );
    let consumer_stop = CancellationToken::new();

    let stop_flow = {
        let consumer_stop = consumer_stop.clone();
        let events = events.clone();
        let manager = manager.clone();
        async move {
            shutdown.cancelled().await;
            events.info("Shutting down...");
            manager.shutdown(grace).await;
            wait_for_disconnect(&manager, grace).await;
            consumer_stop.cancel();
        }
    };

    let (state, ()) = tokio::join!(consumer.run(consumer_stop), stop_flow);

    emit_event(
        tracing::Level::INFO,
        ProcessKind::Host,
        ObservabilityEvent {
            event: "host.stopped",
            component: "host.main",
            connection_state: Some(manager.state().as_str()),
            status: Some(state.status.as_str()),
            ..Default::default()
        },
    );
    Ok(())
}

async fn verify_inference(provider: Arc<OpenAIVisionProvider>, events: EventSender) {
    match provider.verify().await {
        Ok(()) => events.info("OpenAI client initialized."),
        Err(e) => {
            events.error(format!("OpenAI verification failed: {e}"));
            events.status("OpenAI Init Failed!");
        }
    }
}

async fn read_commands(manager: ConnectionManager, events: EventSender, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                events.warn(format!("stdin closed: {e}"));
                return;
            }
        };
        match line.trim().to_ascii_lowercase().as_str() {
            "" => {}
            "connect" | "c" => {
                manager.request_open();
            }
            "disconnect" | "d" => manager.request_close(),
            "status" | "s" => events.info(format!(
                "Connection: {}, task in flight: {}",
                manager.state(),
                manager.is_busy()
            )),
            "quit" | "q" | "exit" => {
                shutdown.cancel();
                return;
            }
            other => events.warn(format!("Unknown command `{other}`.")),
        }
    }
}

/// The transport reports the close asynchronously; give it a moment so the
/// final status reaches the consumer.
async fn wait_for_disconnect(manager: &ConnectionManager, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    while manager.state() != ConnectionState::Disconnected
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn log_config_summary(config: &HostConfig) {
    info!(
        endpoint = config.endpoint_url.as_deref().unwrap_or("<unset>"),
        secret = %config
            .shared_secret
            .as_deref()
            .map(redact_text)
            .unwrap_or_else(|| "<unset>".to_string()),
        bucket = config.default_bucket.as_deref().unwrap_or("<unset>"),
        model = config.openai.model.as_str(),
        ping_interval_secs = config.ping_interval.as_secs(),
        ping_timeout_secs = config.ping_timeout.as_secs(),
        "host configuration"
    );
}
