use super::{core_error, json_pretty, load_remote_config, remote_client, EXIT_SUCCESS};
use crate::settings::Settings;
use yams_core::delete_object;

pub fn run(settings: &Settings, name: &str, soft: bool, json: bool) -> Result<u8, String> {
    let (client, _) = remote_client(settings, load_remote_config()?)?;
    let force = !soft;
    delete_object(&client, name, force).map_err(|e| core_error(&e))?;
    if json {
        let payload = serde_json::json!({
            "deleted": name,
            "force": force,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("deleted '{name}'");
    }
    Ok(EXIT_SUCCESS)
}
