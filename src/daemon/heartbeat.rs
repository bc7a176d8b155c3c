//! Dead-man's-switch heartbeat.
//!
//! A clean cycle pings the configured monitor; a missed ping for long
//! enough is the alert.

use std::time::Duration;

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

pub fn report_ok(snitch_id: &str) -> reqwest::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(HEARTBEAT_TIMEOUT)
        .build()?;
    client
        .get(format!("https://nosnch.in/{snitch_id}"))
        .send()?
        .error_for_status()?;
    Ok(())
}
