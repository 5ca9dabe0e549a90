//! rgap — Redundancy Group Announcement Protocol agent and listener.

mod cmd;
mod listener;

use anyhow::Result;

fn print_usage() {
    println!("Usage: rgap [--log-prefix <prefix>] <command> [options]");
    println!();
    println!("Commands:");
    println!("  genpsk                                  Print a freshly generated pre-shared key");
    println!("  agent -g <group> [-a <addr>] [-k <psk>] [-i <interval>] [-d <dest>]...");
    println!("                                           Announce this host into a group");
    println!("  listener [-c <path>]                    Run the listener daemon (default: rgap.yaml)");
    println!();
    println!("Agent address and psk may also come from RGAP_ADDRESS / RGAP_PSK.");
    println!("The log prefix may also come from RGAP_LOG_PREFIX.");
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut log_prefix = std::env::var("RGAP_LOG_PREFIX").ok();
    let mut remaining: Vec<String> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--log-prefix" {
            i += 1;
            log_prefix = Some(
                args.get(i)
                    .ok_or_else(|| anyhow::anyhow!("--log-prefix requires a value"))?
                    .clone(),
            );
        } else {
            remaining.push(args[i].clone());
        }
        i += 1;
    }

    init_tracing();
    let _prefix_span = log_prefix.as_deref().map(|prefix| tracing::info_span!("rgap", prefix = %prefix).entered());

    let remaining_refs: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();

    match remaining_refs.first() {
        Some(&"genpsk") => cmd::genpsk::run(),
        Some(&"agent") => cmd::agent::run(&remaining[1..]).await,
        Some(&"listener") => cmd::listener::run(&remaining[1..]).await,
        Some(&"help") | Some(&"--help") | Some(&"-h") => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
        None => {
            print_usage();
            std::process::exit(1);
        }
    }
}
