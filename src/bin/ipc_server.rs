use std::{error::Error, path::PathBuf, time::Duration};

use clap::Parser;
use log::info;
use namedipc::{Ipc, ProcessName, ServerConfig, SocketDir};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Name of the process to serve
    name: ProcessName,
    /// Send every message back to its sender
    #[arg(long)]
    echo: bool,
    /// Stop after this many messages
    #[arg(long)]
    max: Option<usize>,
    /// Stop after this long without activity
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Directory holding the process sockets
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Heartbeat interval for idle connections
    #[arg(long, default_value_t = 1000)]
    heartbeat_ms: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let ipc = cli.dir.map(SocketDir::new).map(Ipc::new).unwrap_or_default();

    let mut config = ServerConfig::default().with_heartbeat(Duration::from_millis(cli.heartbeat_ms));
    if let Some(timeout) = cli.timeout_ms {
        config = config.with_timeout(Duration::from_millis(timeout));
    }

    let server = ipc.listen(&cli.name, config);
    let seen = server.listen(0usize, |message, continuation| {
        let seen = continuation.carry() + 1;
        match message.text() {
            Some(text) => println!("{}: {text}", message.media_type()),
            None => println!("{}: {} bytes", message.media_type(), message.content().len()),
        }

        let continuation = match cli.max {
            Some(max) if seen >= max => return Ok(continuation.stop(seen)),
            _ => continuation.continue_with(seen),
        };
        if cli.echo {
            Ok(continuation.respond(message))
        } else {
            Ok(continuation)
        }
    })?;

    info!("served {seen} message(s)");
    Ok(())
}
