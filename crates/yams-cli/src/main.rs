mod commands;
mod settings;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{
    sync::SyncArgs, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_REMOTE_ERROR, EXIT_STORE_ERROR,
};
use std::path::PathBuf;
use std::process::ExitCode;
use yams_core::engine::{DEFAULT_LIMIT, DEFAULT_TOLERANCE};
use yams_core::install_signal_handler;

#[derive(Debug, Parser)]
#[command(
    name = "yams-sync",
    version,
    about = "One-way image synchronizer to a YAMS object storage bucket"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Retry previously failed images, then upload list entries newer than the watermark.
    Sync {
        /// Image list file: one `<timestamp> <image name>` entry per line.
        image_list: PathBuf,
        /// Maximum number of images the forward pass dispatches.
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
        /// Worker threads (defaults to YAMS_MAX_CONCURRENCY).
        #[arg(long)]
        threads: Option<usize>,
        /// Images that failed more often than this are no longer retried.
        #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
        tolerance: u32,
        /// Drop the newest watermark entry before syncing.
        #[arg(long, default_value_t = false)]
        reset_watermark: bool,
    },
    /// List the objects stored in the bucket.
    List,
    /// Delete one object from the bucket.
    Delete {
        /// Object name.
        name: String,
        /// Request a soft delete instead of immediate removal.
        #[arg(long, default_value_t = false)]
        soft: bool,
    },
    /// Delete every object in the bucket.
    DeleteAll {
        /// Skip the confirmation prompt.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Remove the newest watermark entry.
    ResetWatermark,
    /// Show the watermark history, newest first.
    Watermark,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("YAMS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let json_output = cli.json;
    let result = match cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        command => commands::load_settings().and_then(|settings| match command {
            Commands::Sync {
                image_list,
                limit,
                threads,
                tolerance,
                reset_watermark,
            } => commands::sync::run(
                &settings,
                &SyncArgs {
                    image_list,
                    limit,
                    threads,
                    tolerance,
                    reset_watermark,
                },
                json_output,
            ),
            Commands::List => commands::list::run(&settings, json_output),
            Commands::Delete { name, soft } => {
                commands::delete::run(&settings, &name, soft, json_output)
            }
            Commands::DeleteAll { yes } => commands::delete_all::run(&settings, yes, json_output),
            Commands::ResetWatermark => commands::reset_watermark::run(&settings, json_output),
            Commands::Watermark => commands::watermark::run(&settings, json_output),
            Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        }),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("config error:") {
                EXIT_CONFIG_ERROR
            } else if msg.starts_with("store error:") {
                EXIT_STORE_ERROR
            } else if msg.starts_with("remote error:") {
                EXIT_REMOTE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
