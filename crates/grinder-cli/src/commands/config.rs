use anyhow::{Context, Result};
use grinder_config::GrinderConfig;
use tracing::info;

pub fn check() -> Result<()> {
    let cfg = GrinderConfig::from_env()?;
    let fingerprint = cfg.fingerprint()?;
    info!(fingerprint = %fingerprint, can_execute = cfg.can_execute(), "config loaded");

    println!("config_ok=true");
    println!("config_fingerprint={fingerprint}");
    println!("can_execute={}", cfg.can_execute());
    println!(
        "{}",
        serde_json::to_string_pretty(&cfg).context("render config failed")?
    );
    Ok(())
}
