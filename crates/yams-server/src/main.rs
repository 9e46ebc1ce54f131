use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use yams_server::{Bucket, ServerConfig};

#[derive(Parser)]
#[command(name = "yams-server", about = "Reference YAMS object server")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8321)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, default_value = "tenant")]
    tenant: String,

    #[arg(long, default_value = "domain")]
    domain: String,

    #[arg(long, default_value = "bucket")]
    bucket: String,

    /// Only accept this AccessKeyId.
    #[arg(long)]
    access_key_id: Option<String>,

    /// PEM public key; when given, request tokens are verified as RS512.
    #[arg(long)]
    public_key: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ServerConfig::new(&cli.tenant, &cli.domain, &cli.bucket);
    if let Some(access_key_id) = &cli.access_key_id {
        config = config.with_access_key(access_key_id);
    }
    if let Some(path) = &cli.public_key {
        match std::fs::read(path) {
            Ok(pem) => config = config.with_public_key(&pem),
            Err(e) => {
                error!("cannot read public key {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        }
    }

    let addr = format!("{}:{}", cli.bind, cli.port);
    info!(
        "starting yams-server on {addr}, bucket /tenants/{}/domains/{}/buckets/{}",
        cli.tenant, cli.domain, cli.bucket
    );
    let result = Bucket::new(config).and_then(|bucket| yams_server::run_server(&bucket, &addr));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
