use super::{
    colorize_count, core_error, json_pretty, load_remote_config, remote_client, spin_fail,
    spin_ok, spinner, store_error, LocalState, EXIT_SUCCESS,
};
use crate::settings::Settings;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use yams_core::{PassReport, RunLock, ShutdownStack, SyncEngine, SyncOptions};
use yams_store::Watermark;

pub struct SyncArgs {
    pub image_list: PathBuf,
    pub limit: usize,
    /// Falls back to `YAMS_MAX_CONCURRENCY`.
    pub threads: Option<usize>,
    pub tolerance: u32,
    pub reset_watermark: bool,
}

pub fn run(settings: &Settings, args: &SyncArgs, json: bool) -> Result<u8, String> {
    let config = load_remote_config()?;
    let _lock = RunLock::for_database(&settings.db_path).map_err(|e| core_error(&e))?;
    let mut stack = ShutdownStack::new();
    let state = LocalState::open(settings, &mut stack)?;

    if args.reset_watermark {
        state.watermark.reset().map_err(|e| store_error(&e))?;
    }

    let options = SyncOptions {
        limit: args.limit,
        threads: args.threads.unwrap_or(config.max_concurrency),
        tolerance: args.tolerance,
        max_retry_pages: settings.max_retry_pages,
        cache_ttl: settings.cache_ttl,
    };
    let (client, images) = remote_client(settings, config)?;
    let engine = SyncEngine::new(
        Arc::new(client),
        images,
        Arc::clone(&state.error_log) as _,
        Arc::clone(&state.watermark) as _,
        state.cache(settings),
        options,
    );

    let pb = (!json).then(|| spinner(&format!("syncing {}", args.image_list.display())));
    let report = match engine.run(&args.image_list) {
        Ok(report) => report,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "sync failed");
            }
            error!("sync failed: {e}");
            return Err(core_error(&e));
        }
    };
    if let Some(pb) = &pb {
        spin_ok(pb, "sync complete");
    }

    stack.close_all().map_err(|e| core_error(&e))?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!("retry pass:   {}", summary(&report.retry));
        println!("forward pass: {}", summary(&report.forward));
        println!(
            "watermark:    {} -> {}",
            report.watermark_before, report.watermark_after
        );
    }
    Ok(EXIT_SUCCESS)
}

fn summary(pass: &PassReport) -> String {
    let s = &pass.stats;
    format!(
        "{} dispatched, {} sent, {} recovered, {} skipped, {} duplicated, {} re-upload, {} failed, {} missing, {} unreadable",
        pass.dispatched,
        colorize_count(s.sent, false),
        colorize_count(s.recovered, false),
        colorize_count(s.skipped, false),
        colorize_count(s.duplicated, false),
        colorize_count(s.reupload_scheduled, false),
        colorize_count(s.failed_upload, true),
        colorize_count(s.not_found, true),
        colorize_count(s.read_failed, true),
    )
}
