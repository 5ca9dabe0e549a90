//! `rgap agent` — periodically (or once) announce this host into a group.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::signal;

use rgap_core::config::AgentConfig;
use rgap_core::crypto::Psk;
use rgap_net::Agent;

const DEFAULT_DESTINATION: &str = "239.82.71.65:8271";

struct Args {
    group: u64,
    address: Option<String>,
    psk: Option<String>,
    interval: Option<String>,
    destinations: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut group = None;
    let mut address = None;
    let mut psk = None;
    let mut interval = None;
    let mut destinations = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-g" | "--group" => {
                i += 1;
                group = Some(args.get(i).context("-g requires a value")?.parse().context("-g must be a number")?);
            }
            "-a" | "--address" => {
                i += 1;
                address = Some(args.get(i).context("-a requires a value")?.clone());
            }
            "-k" | "--psk" => {
                i += 1;
                psk = Some(args.get(i).context("-k requires a value")?.clone());
            }
            "-i" | "--interval" => {
                i += 1;
                interval = Some(args.get(i).context("-i requires a value")?.clone());
            }
            "-d" | "--destination" => {
                i += 1;
                destinations.push(args.get(i).context("-d requires a value")?.clone());
            }
            other => bail!("unknown agent option: {other}"),
        }
        i += 1;
    }

    Ok(Args {
        group: group.context("-g/--group is required")?,
        address,
        psk,
        interval,
        destinations,
    })
}

pub async fn run(args: &[String]) -> Result<()> {
    let parsed = parse_args(args)?;

    let address_str = parsed
        .address
        .or_else(|| std::env::var("RGAP_ADDRESS").ok())
        .context("address required: pass -a or set RGAP_ADDRESS")?;
    let address = address_str.parse().with_context(|| format!("invalid address '{address_str}'"))?;

    let psk_str = parsed
        .psk
        .or_else(|| std::env::var("RGAP_PSK").ok())
        .context("psk required: pass -k or set RGAP_PSK")?;
    let psk = Psk::from_hex(&psk_str).context("invalid PSK")?;

    let (interval, one_shot) = match parsed.interval {
        Some(raw) => {
            let interval = humantime::parse_duration(&raw).with_context(|| format!("invalid interval '{raw}'"))?;
            (interval, interval.is_zero())
        }
        None => (Duration::ZERO, true),
    };

    let destinations = if parsed.destinations.is_empty() {
        vec![DEFAULT_DESTINATION.to_string()]
    } else {
        parsed.destinations
    };

    let config = AgentConfig {
        group: parsed.group,
        address,
        psk,
        interval,
        one_shot,
        destinations,
    };

    let agent = Agent::new(config);
    let cancel = agent.cancellation_token();

    if one_shot {
        agent.run().await.map_err(anyhow::Error::from)?;
        return Ok(());
    }

    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        cancel.cancel();
    });

    agent.run().await.map_err(anyhow::Error::from)
}
