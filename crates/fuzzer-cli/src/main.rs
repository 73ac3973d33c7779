use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fuzzer_client::{ClientOptions, ReqwestClient};
use fuzzer_core::{
    Engine, Filters, FuzzConfig, FuzzError, StopReason, TunnelTransform, parse_unique_numbers,
};

#[derive(Parser, Debug)]
#[command(name = "fuzzer", version, about = "Fast HTTP content discovery")]
struct Cli {
    /// Target URL; the FUZZ placeholder is replaced by each word
    #[arg(short, long, env = "FUZZER_URL")]
    url: String,

    /// Path to the word list
    #[arg(short, long, env = "FUZZER_WORDLIST")]
    wordlist: PathBuf,

    /// Output file (JSON lines, appended)
    #[arg(short, long, env = "FUZZER_OUT", default_value = "tmp/out.json")]
    out: PathBuf,

    /// HTTP method
    #[arg(short = 'X', long, env = "FUZZER_METHOD", default_value = "GET")]
    method: String,

    /// Maximum run time in seconds
    #[arg(long, env = "FUZZER_MAX_TIME", default_value_t = 3600)]
    max_time: u64,

    /// Maximum requests per second (0 = unlimited)
    #[arg(long, env = "FUZZER_MAX_REQ_SEC", default_value_t = 0)]
    max_req_sec: u32,

    /// Filter out these status codes (comma separated)
    #[arg(long = "fc", env = "FUZZER_FILTER_CODES", default_value = "")]
    filter_codes: String,

    /// Filter out responses with these line counts
    #[arg(long = "fl", env = "FUZZER_FILTER_LINES", default_value = "")]
    filter_lines: String,

    /// Filter out responses with these word counts
    #[arg(long = "fw", env = "FUZZER_FILTER_WORDS", default_value = "")]
    filter_words: String,

    /// Filter out responses with these body sizes
    #[arg(long = "fs", env = "FUZZER_FILTER_SIZE", default_value = "")]
    filter_size: String,

    /// Proxy URL (http, https or socks5)
    #[arg(short, long, env = "FUZZER_PROXY")]
    proxy: Option<String>,

    /// Send every request to the proxy with the real URL in a `Target` header
    #[arg(long, env = "FUZZER_TUNNEL", default_value_t = false)]
    tunnel: bool,

    /// Suppress periodic stats output
    #[arg(long, env = "FUZZER_SILENT", default_value_t = false)]
    silent: bool,

    /// Skip TLS certificate verification
    #[arg(long, env = "FUZZER_INSECURE", default_value_t = false)]
    insecure: bool,

    /// User-Agent header value
    #[arg(long, env = "FUZZER_USER_AGENT")]
    user_agent: Option<String>,

    /// Make the User-Agent unique per request
    #[arg(long, env = "FUZZER_RANDOM_AGENT", default_value_t = false)]
    random_agent: bool,

    /// Worker count (defaults to four per core, at least 32)
    #[arg(long, env = "FUZZER_WORKERS")]
    workers: Option<usize>,
}

impl Cli {
    fn filters(&self) -> Filters {
        Filters::new()
            .with_status_codes(parse_unique_numbers::<u16>(&self.filter_codes, ","))
            .with_lines(parse_unique_numbers::<usize>(&self.filter_lines, ","))
            .with_words(parse_unique_numbers::<usize>(&self.filter_words, ","))
            .with_size(parse_unique_numbers::<usize>(&self.filter_size, ","))
    }

    fn into_config(self) -> FuzzConfig {
        let mut config = FuzzConfig::new(self.url.clone(), self.wordlist.clone())
            .with_out_file(self.out.clone())
            .with_method(self.method.clone())
            .with_max_time(Duration::from_secs(self.max_time))
            .with_max_req_sec(self.max_req_sec)
            .with_filters(self.filters());

        if let Some(proxy) = self.proxy.filter(|p| !p.trim().is_empty()) {
            config = config.with_proxy(proxy);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if self.silent {
            config = config.silent();
        }
        config.user_agent = self.user_agent;
        config.pseudo_random_user_agent = self.random_agent;
        config.insecure = self.insecure;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fuzzer=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let tunnel = cli.tunnel;
    let config = cli.into_config().validate().context("Invalid configuration")?;

    let mut options = ClientOptions::from_config(&config);
    if tunnel {
        options = options.without_proxy();
    }
    let client = ReqwestClient::new(options).context("Failed to create HTTP client")?;

    let mut engine = Engine::new(config, client).context("Invalid configuration")?;
    if tunnel {
        engine = engine.with_transform(TunnelTransform);
    }

    if let Some(mut events) = engine.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                tracing::debug!(%event, "Event");
            }
        });
    }

    engine.start().await.context("Failed to start fuzzer")?;

    let outcome = tokio::select! {
        result = engine.wait() => result,
        () = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
            engine.stop().await
        }
    };

    let stats = engine.stats();
    let reason = engine.stop_reason().unwrap_or(StopReason::Completed);
    match outcome {
        Ok(()) | Err(FuzzError::MaxRuntimeExceeded) => {
            tracing::info!(
                %reason,
                processed = stats.processed,
                saved = stats.saved,
                errors = stats.errors,
                out = %engine.config().out_file.display(),
                "Done"
            );
            Ok(())
        }
        Err(e) => Err(e).context("Fuzzer stopped on a fatal error"),
    }
}

/// Resolves on Ctrl+C, or SIGTERM/SIGQUIT on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = termination_signals();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Installs the SIGTERM and SIGQUIT handlers right away; the returned future
/// resolves on the first of them.
#[cfg(unix)]
fn termination_signals() -> impl std::future::Future<Output = ()> {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    let install = |kind: SignalKind, name: &'static str| match signal(kind) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::warn!(error = %e, signal = name, "Failed to install signal handler");
            None
        }
    };
    let sigterm = install(SignalKind::terminate(), "SIGTERM");
    let sigquit = install(SignalKind::quit(), "SIGQUIT");

    async fn recv(stream: Option<Signal>) {
        match stream {
            Some(mut stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    async move {
        tokio::select! {
            () = recv(sigterm) => {}
            () = recv(sigquit) => {}
        }
    }
}
