use super::{
    core_error, json_pretty, load_remote_config, remote_client, spin_fail, spin_ok, spinner,
    EXIT_FAILURE, EXIT_SUCCESS,
};
use crate::settings::Settings;
use dialoguer::Confirm;
use std::io::{stderr, stdin, IsTerminal};
use yams_core::delete_all;

fn confirm(bucket: &str, yes: bool, is_tty: bool) -> Result<(), String> {
    if yes {
        return Ok(());
    }
    if !is_tty {
        return Err(format!(
            "refusing to delete every object in bucket '{bucket}' without a terminal (pass --yes)"
        ));
    }
    let proceed = Confirm::new()
        .with_prompt(format!("delete every object in bucket '{bucket}'?"))
        .default(false)
        .interact()
        .map_err(|e| format!("prompt failed: {e}"))?;
    if proceed {
        Ok(())
    } else {
        Err("aborted".to_owned())
    }
}

pub fn run(settings: &Settings, yes: bool, json: bool) -> Result<u8, String> {
    let config = load_remote_config()?;
    let is_tty = stdin().is_terminal() && stderr().is_terminal();
    confirm(&config.bucket_id, yes, is_tty)?;

    let threads = config.max_concurrency;
    let (client, _) = remote_client(settings, config)?;
    let pb = (!json).then(|| spinner("deleting remote objects"));
    let report = match delete_all(&client, threads) {
        Ok(report) => report,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "delete-all failed");
            }
            return Err(core_error(&e));
        }
    };
    if let Some(pb) = &pb {
        spin_ok(pb, &format!("deleted {} object(s)", report.deleted));
    }

    if json {
        println!("{}", json_pretty(&report)?);
    } else if !report.failed.is_empty() {
        println!("failed to delete {} object(s):", report.failed.len());
        for name in &report.failed {
            println!("  {name}");
        }
    }
    Ok(if report.failed.is_empty() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
