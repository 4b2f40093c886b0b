//! gondola-ctl — ground tool for the gondola camera payload.

use anyhow::{Context, Result};

mod cmd;

const DEFAULT_PORT: u16 = 9090;

fn print_usage() {
    eprintln!("Usage: gondola-ctl [--port N] <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status                              Unit state from gondolad's /status");
    eprintln!("  commands                            Command history of the unit");
    eprintln!("  list                                Known science commands");
    eprintln!("  command <name> [key=value ...]      Build and send a science command");
    eprintln!("          [--dest all|widefield|narrowfield|lidar|super|N]");
    eprintln!("          [--seq N] [--link los1|los2|tdrss|iridium]");
    eprintln!("          [--to host:port] [--sip]");
    eprintln!("  receive [--listen PORT] [--out DIR] [--unstuff] [--raw]");
    eprintln!("                                      Reassemble downlinked files and status");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args.get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | []                 => cmd::status::cmd_status(port).await,
        ["commands"]                    => cmd::status::cmd_commands(port).await,
        ["list"]                        => cmd::list::cmd_list(),
        ["command", rest @ ..]          => cmd::command::cmd_command(rest).await,
        ["receive", rest @ ..]          => cmd::receive::cmd_receive(rest).await,
        ["help"] | ["--help"] | ["-h"]  => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
