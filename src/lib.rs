// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod history;
pub mod logging;
pub mod report;
pub mod types;

use std::path::Path;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_or_default};
use crate::exec::{
    ChannelFactory, Command, HostEvent, ProcessChannelFactory, ProcessRegistry,
    RemoteChannelFactory,
};
use crate::history::{HistoryBuffer, HistoryCaps, SharedHistory};
use crate::types::ChannelKind;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the process registry and Ctrl-C handling
/// - the channel factory for the selected transport
/// - printing every received frame on stdout
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_or_default(args.config.as_deref().map(Path::new))?;
    let kind = if args.remote {
        ChannelKind::Remote
    } else {
        cfg.config.channel
    };

    if args.ping {
        return ping(&cfg).await;
    }

    let line = args.command_line();
    if args.dry_run {
        print_dry_run(&cfg, kind, &line);
        return Ok(());
    }

    let history = SharedHistory::new(HistoryBuffer::new(HistoryCaps::from(&cfg.history)));
    let registry = ProcessRegistry::new();
    let _ctrl_c = registry.spawn_ctrl_c_handler();

    let factory: Box<dyn ChannelFactory> = match kind {
        ChannelKind::Process => Box::new(
            ProcessChannelFactory::new(cfg.process.clone(), registry.clone())
                .with_history(history.clone()),
        ),
        ChannelKind::Remote => Box::new(
            RemoteChannelFactory::new(&cfg.remote)?.with_history(history.clone()),
        ),
    };

    let mut channel = factory.create(Command::new(line));
    channel
        .reports()
        .on_frame(|frame| println!("{}", frame.raw_payload))
        .on_error(|report| {
            error!(
                tag = %report.tag,
                code = ?report.data.code_str(),
                "{}",
                report.data.message
            );
        });

    let result = channel.run().await;

    // Anything still alive (a child that outlived its end-of-stream report)
    // goes down with us.
    registry.handle_host_event(HostEvent::Quit);

    let report = result?;
    info!(
        outcome = ?report.outcome,
        exit_code = ?report.exit_code,
        frames = report.frames,
        errors = report.errors.len(),
        "command finished"
    );
    if tracing::enabled!(tracing::Level::DEBUG) {
        let snapshot = serde_json::to_string(&history.with(|h| h.snapshot()))?;
        debug!(history = %snapshot, "command history");
    }
    Ok(())
}

async fn ping(cfg: &ConfigFile) -> Result<()> {
    let factory = RemoteChannelFactory::new(&cfg.remote)?;
    let endpoint = factory.endpoint();
    let result = endpoint.ping().await;
    println!("{} {:?}", endpoint.info_url(), result);
    Ok(())
}

/// Simple dry-run output: print the resolved settings and the command.
fn print_dry_run(cfg: &ConfigFile, kind: ChannelKind, line: &str) {
    println!("cmdstream dry-run");
    println!("  channel = {kind:?}");
    println!("  command = {line:?}");
    println!();

    match kind {
        ChannelKind::Process => {
            let p = &cfg.process;
            if let Some(ref exe) = p.executable {
                println!("  process.executable = {exe}");
            }
            println!("  process.delimiter = {:?}", p.delimiter);
            println!("  process.exit_grace_ms = {}", p.exit_grace_ms);
            println!("  process.accept_unterminated = {}", p.accept_unterminated);
            println!("  process.log_stderr = {}", p.log_stderr);
            for (key, value) in &p.env {
                println!("  process.env.{key} = {value:?}");
            }
        }
        ChannelKind::Remote => {
            let r = &cfg.remote;
            println!("  remote.host = {}", r.host);
            println!(
                "  remote.ports = {}..{}",
                r.start_port,
                r.start_port.saturating_add(r.max_port_attempts)
            );
            if let Some(ref owner) = r.owner {
                println!("  remote.owner = {owner}");
            }
            if let Some(ref version) = r.version {
                println!("  remote.version = {version}");
            }
            println!("  remote.marker = {:?}", r.marker);
        }
    }

    debug!("dry-run complete (no execution)");
}
