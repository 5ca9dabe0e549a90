//! `rgap listener` — run the listener daemon against a config file.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use rgap_core::config::ListenerConfig;

use crate::listener::Listener;

fn parse_args(args: &[String]) -> Result<PathBuf> {
    let mut path = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                i += 1;
                path = Some(PathBuf::from(args.get(i).context("-c requires a value")?));
            }
            other => bail!("unknown listener option: {other}"),
        }
        i += 1;
    }
    Ok(path.unwrap_or_else(ListenerConfig::default_path))
}

pub async fn run(args: &[String]) -> Result<()> {
    let path = parse_args(args)?;
    let config = ListenerConfig::load(&path).with_context(|| format!("loading config from {}", path.display()))?;
    tracing::info!(path = %path.display(), groups = config.groups.len(), "loaded listener config");

    let listener = Listener::build(&config)?;
    listener.run().await
}
