use super::{core_error, json_pretty, store_error, LocalState, EXIT_SUCCESS};
use crate::settings::Settings;
use yams_core::{RunLock, ShutdownStack};
use yams_store::{format_timestamp, Watermark};

pub fn run(settings: &Settings, json: bool) -> Result<u8, String> {
    let _lock = RunLock::for_database(&settings.db_path).map_err(|e| core_error(&e))?;
    let mut stack = ShutdownStack::new();
    let state = LocalState::open(settings, &mut stack)?;

    let previous = state.watermark.current().map_err(|e| store_error(&e))?;
    state.watermark.reset().map_err(|e| store_error(&e))?;
    let current = state.watermark.current().map_err(|e| store_error(&e))?;
    stack.close_all().map_err(|e| core_error(&e))?;

    let (previous, current) = (format_timestamp(&previous), format_timestamp(&current));
    if json {
        let payload = serde_json::json!({
            "previous": previous,
            "current": current,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("watermark reset: {previous} -> {current}");
    }
    Ok(EXIT_SUCCESS)
}
