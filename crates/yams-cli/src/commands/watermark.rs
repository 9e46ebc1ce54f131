use super::{core_error, json_pretty, store_error, LocalState, EXIT_SUCCESS};
use crate::settings::Settings;
use yams_core::ShutdownStack;
use yams_store::{format_timestamp, Watermark};

pub fn run(settings: &Settings, json: bool) -> Result<u8, String> {
    let mut stack = ShutdownStack::new();
    let state = LocalState::open(settings, &mut stack)?;
    let current = state.watermark.current().map_err(|e| store_error(&e))?;
    let history = state.watermark.history().map_err(|e| store_error(&e))?;
    stack.close_all().map_err(|e| core_error(&e))?;

    let current = format_timestamp(&current);
    if json {
        let payload = serde_json::json!({
            "current": current,
            "history": history,
        });
        println!("{}", json_pretty(&payload)?);
    } else if history.is_empty() {
        println!("no watermark recorded (default {current})");
    } else {
        for entry in &history {
            println!("{entry}");
        }
    }
    Ok(EXIT_SUCCESS)
}
