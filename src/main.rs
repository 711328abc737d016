use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gopilot::camera::{CameraClientBuilder, CameraMode, CommandMap, ResilientCameraClient};
use gopilot::infrastructure::AuditEntry;
use gopilot::session::{JsonLinesReadiness, ReadinessSource};
use gopilot::{GopilotConfig, VloggerOrchestrator};
use std::path::PathBuf;
use tokio::io::BufReader;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "gopilot")]
#[command(about = "Resilient GoPro control and auto-vlogger sessions")]
#[command(version)]
#[command(long_about = "Controls a Hero7-class action camera over its local HTTP API with \
retries and a circuit breaker, and runs auto-vlogger sessions that turn readiness scores \
into audited capture actions.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "gopilot.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show camera mode, capture state and settings
    Status,
    /// Switch camera mode (photo, video, timelapse)
    Mode { mode: String },
    /// Start or stop the shutter
    Shutter {
        #[arg(value_enum)]
        action: ShutterAction,
    },
    /// Set a camera setting by name or id
    Setting { key: String, value: u32 },
    /// Apply a configured profile
    Profile { name: String },
    /// Browse and download media
    Media {
        #[command(subcommand)]
        command: MediaCommand,
    },
    /// Show the endpoint template of a logical operation
    Endpoint { operation: String },
    /// Run an auto-vlogger session
    Session {
        /// What to shoot
        prompt: String,
        /// Force a camera mode instead of inferring it from the prompt
        #[arg(long)]
        mode: Option<String>,
        /// Readiness feed (JSON lines); defaults to stdin
        #[arg(long, value_name = "FILE")]
        scores: Option<PathBuf>,
        /// Enable keyboard controls (c: confirm, s: stop capture, q: stop session)
        #[arg(long)]
        keyboard: bool,
        /// Apply a profile before the session starts
        #[arg(long)]
        profile: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum MediaCommand {
    /// List one page of media
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Download a media file (<dir>/<file>) to a local path
    Download { id: String, dest: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ShutterAction {
    Start,
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting gopilot v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match GopilotConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate().context("Invalid configuration")?;

    let Some(command) = args.command else {
        eprintln!("No command given, see --help");
        std::process::exit(2);
    };

    match command {
        Command::Session {
            prompt,
            mode,
            scores,
            keyboard,
            profile,
        } => {
            let exit_code = run_session(config, &prompt, mode, scores, keyboard, profile).await?;
            std::process::exit(exit_code);
        }
        Command::Endpoint { operation } => {
            let (kind, template) = CommandMap::template_for(&operation)?;
            println!("{}: {}", kind, template);
        }
        command => {
            let client = CameraClientBuilder::new().config(config.clone()).build()?;
            run_camera_command(&client, &config, command).await?;
        }
    }

    Ok(())
}

async fn run_camera_command(
    client: &ResilientCameraClient,
    config: &GopilotConfig,
    command: Command,
) -> Result<()> {
    match command {
        Command::Status => {
            let status = client.get_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Mode { mode } => {
            let mode = client.set_mode_named(&mode).await?;
            println!("Mode set to {}", mode);
        }
        Command::Shutter { action } => {
            match action {
                ShutterAction::Start => client.start_capture().await?,
                ShutterAction::Stop => client.stop_capture().await?,
            }
            println!("Shutter {:?}", action);
        }
        Command::Setting { key, value } => {
            let setting = client.set_setting(&key, value).await?;
            println!("{} set to {}", setting, value);
        }
        Command::Profile { name } => {
            let profile = config
                .profile(&name)
                .with_context(|| format!("Unknown profile '{}'", name))?;
            client.apply_profile(profile).await?;
            println!("Profile '{}' applied", name);
        }
        Command::Media {
            command: MediaCommand::List { limit, cursor },
        } => {
            let page = client.list_media(limit, cursor.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Command::Media {
            command: MediaCommand::Download { id, dest },
        } => {
            let receipt = client.download_media(&id, &dest).await?;
            println!(
                "Downloaded {} ({} bytes) to {}",
                receipt.media_id,
                receipt.bytes_written,
                receipt.destination.display()
            );
        }
        other => return Err(anyhow!("{:?} is not a camera command", other)),
    }
    Ok(())
}

async fn run_session(
    config: GopilotConfig,
    prompt: &str,
    mode: Option<String>,
    scores: Option<PathBuf>,
    keyboard: bool,
    profile: Option<String>,
) -> Result<i32> {
    let mode = mode.map(|m| m.parse::<CameraMode>()).transpose()?;

    let mut orchestrator = VloggerOrchestrator::new(config).await.map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;
    orchestrator.set_keyboard_enabled(keyboard);

    let printer = tokio::spawn(print_entries(orchestrator.event_bus().subscribe()));

    orchestrator.start(profile.as_deref()).await?;

    let mut source: Box<dyn ReadinessSource> = match scores {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open readiness feed {}", path.display()))?;
            Box::new(JsonLinesReadiness::new(BufReader::new(file)))
        }
        None => Box::new(JsonLinesReadiness::new(BufReader::new(tokio::io::stdin()))),
    };

    let result = orchestrator
        .run_session(prompt, mode, source.as_mut())
        .await;
    let exit_code = orchestrator.shutdown().await?;
    printer.abort();

    let summary = result?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(exit_code)
}

/// Print session transitions as they happen
async fn print_entries(mut receiver: broadcast::Receiver<AuditEntry>) {
    loop {
        match receiver.recv().await {
            Ok(entry) => println!(
                "[{}] {:<22} {} -> {}",
                entry.timestamp.format("%H:%M:%S%.3f"),
                entry.event_kind.as_str(),
                entry.from_state,
                entry.to_state
            ),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gopilot={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .with_writer(std::io::stderr)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "gopilot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# gopilot configuration file");
    println!("# Every value can be overridden with GOPILOT__<SECTION>__<KEY>");
    println!();
    println!("{}", toml::to_string_pretty(&GopilotConfig::default())?);
    Ok(())
}
