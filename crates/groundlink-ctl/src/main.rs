//! groundlink-ctl — command-line interface for the groundlink daemon.

use anyhow::{Context, Result};

mod cmd;

use cmd::{status, transfers};

const DEFAULT_PORT: u16 = 9101;

fn print_usage() {
    println!("Usage: groundlink-ctl [--port N] <command>");
    println!();
    println!("Commands:");
    println!("  status                           Node, peers and queue sizes");
    println!("  outgoing                         List outgoing transfers");
    println!("  incoming                         List incoming transfers");
    println!("  load                             Rescan every outgoing directory");
    println!("  enable <peer> [file]             Enable one file (disabling the rest) or all");
    println!("  waittime <peer> <in|out|both> <secs>");
    println!("                                   Set the retry interval for a peer");
    println!("  packet-size <n>                  Set the DATA payload size in bytes");
    println!("  shutdown                         Stop the daemon");
    println!();
    println!("Default port: {}", DEFAULT_PORT);
}

/// Split `--port N` out of the argument list.
fn parse_args(args: &[String]) -> Result<(u16, Vec<&str>)> {
    let mut port = DEFAULT_PORT;
    let mut remaining = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(args[i].as_str());
        }
        i += 1;
    }
    Ok((port, remaining))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (port, remaining) = parse_args(&args)?;

    match remaining.as_slice() {
        ["status"] | []                     => status::cmd_status(port).await,
        ["outgoing"]                        => transfers::cmd_outgoing(port).await,
        ["incoming"]                        => transfers::cmd_incoming(port).await,
        ["load"]                            => transfers::cmd_load(port).await,
        ["enable", peer]                    => transfers::cmd_enable(port, peer, None).await,
        ["enable", peer, file]              => transfers::cmd_enable(port, peer, Some(*file)).await,
        ["waittime", peer, direction, secs] => {
            transfers::cmd_waittime(port, peer, direction, secs).await
        }
        ["packet-size", size]               => transfers::cmd_packet_size(port, size).await,
        ["shutdown"]                        => status::cmd_shutdown(port).await,
        ["help"] | ["--help"] | ["-h"]      => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
