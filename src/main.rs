use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "guanxin")]
#[command(
    version,
    about = "Journaling backend with chunked upload and streaming AI analysis"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        #[arg(long, env = "GUANXIN_ADDR", help = "Listen address (overrides server.bind_addr)")]
        addr: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Remove stale upload sessions
    Clean {
        #[arg(long, help = "Maximum session age in seconds (default: upload.session_ttl_secs)")]
        max_age_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            help = "Output format: toml, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Write ./guanxin.toml with default values
    Init {
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mguanxin encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "guanxin=debug,tower_http=debug"
    } else if cli.quiet {
        "error"
    } else {
        "guanxin=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve { addr } => {
            let rt = Runtime::new()?;
            rt.block_on(guanxin::cli::commands::serve::run(addr))?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { format } => {
                guanxin::cli::commands::config::show(&format)?;
            }
            ConfigAction::Path => {
                guanxin::cli::commands::config::path()?;
            }
            ConfigAction::Init { force } => {
                guanxin::cli::commands::config::init(force)?;
            }
        },
        Commands::Clean { max_age_secs } => {
            let rt = Runtime::new()?;
            rt.block_on(guanxin::cli::commands::clean::run(max_age_secs))?;
        }
    }

    Ok(())
}
