/*!
 * respprobe Main Entry Point
 *
 * With no command arguments, runs the smoke plan against the server and
 * exits non-zero if any step got the wrong reply. With arguments, sends them
 * as a single command and prints the reply.
 */

use anyhow::*;
use clap::Parser;
use respprobe::{smoke, Client, ClientConfig, Reply};
use std::time::Duration;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "respprobe")]
#[command(about = "Smoke-test a RESP key-value server, or send it a single command")]
struct Args {
    /// Server host
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, env = "PORT", default_value_t = 6380)]
    port: u16,

    /// Connect, read and write timeout in milliseconds (0 disables)
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Print replies as the escaped bytes the server sent instead of formatted values
    #[arg(long)]
    raw: bool,

    /// Command to send, e.g. `SET key value`; omit to run the smoke plan
    command: Vec<String>,
}

fn main() -> Result<()> {
    // Respects RUST_LOG, e.g. RUST_LOG=debug respprobe
    env_logger::init();

    let args = Args::parse();
    let timeout = match args.timeout_ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };
    let cfg = ClientConfig::from_host_port(&args.host, args.port)
        .connect_timeout(timeout)
        .io_timeout(timeout);

    let mut client = Client::connect(&cfg).with_context(|| format!("connecting to {}", cfg.addr))?;

    if args.command.is_empty() {
        run_smoke(&mut client, args.raw)
    } else {
        // Arguments go out exactly as typed
        let reply = client.call_args(&args.command)?;
        println!("{}", render(&reply, client.last_reply_bytes(), args.raw));
        if reply.is_error() {
            std::process::exit(1);
        }
        Ok(())
    }
}

fn run_smoke(client: &mut Client, raw: bool) -> Result<()> {
    let plan = smoke::default_plan();
    let report = smoke::run(client, &plan)?;

    for outcome in &report.outcomes {
        let mark = if outcome.passed() { "ok" } else { "FAIL" };
        println!("{:<4} {:<12} {}", mark, outcome.step.to_string(), render(&outcome.reply, &outcome.wire, raw));
    }

    if !report.passed() {
        let failed = report.failures().count();
        bail!("{} of {} smoke steps failed against {}", failed, plan.len(), client.peer_addr());
    }
    Ok(())
}

fn render(reply: &Reply, wire: &[u8], raw: bool) -> String {
    if raw {
        wire.escape_ascii().to_string()
    } else {
        reply.to_string()
    }
}
