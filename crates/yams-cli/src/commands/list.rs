use super::{core_error, json_pretty, load_remote_config, remote_client, EXIT_SUCCESS};
use crate::settings::Settings;
use yams_core::list_remote;

pub fn run(settings: &Settings, json: bool) -> Result<u8, String> {
    let (client, _) = remote_client(settings, load_remote_config()?)?;
    let objects = list_remote(&client).map_err(|e| core_error(&e))?;
    if json {
        println!("{}", json_pretty(&objects)?);
    } else if objects.is_empty() {
        println!("no objects in bucket");
    } else {
        println!("{:<40} {:<34} {:>12} LAST_MODIFIED", "NAME", "MD5", "SIZE");
        for object in &objects {
            println!(
                "{:<40} {:<34} {:>12} {}",
                object.id, object.md5, object.size, object.last_modified
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
