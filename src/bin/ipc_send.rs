use std::{
    error::Error,
    io::{self, BufRead},
    path::PathBuf,
};

use clap::Parser;
use namedipc::{ClientConfig, Ipc, Message, ProcessName, SocketDir};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Name we introduce ourselves with
    from: ProcessName,
    /// Process to send to
    to: ProcessName,
    /// Messages to send, read line by line from stdin when empty
    messages: Vec<String>,
    /// Media type of every message
    #[arg(long, default_value = "text/plain")]
    media_type: String,
    /// Directory holding the process sockets
    #[arg(long)]
    dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let ipc = cli.dir.map(SocketDir::new).map(Ipc::new).unwrap_or_default();
    let mut sender = ipc.sender(cli.from, &cli.to, ClientConfig::default());

    let messages = if cli.messages.is_empty() {
        io::stdin().lock().lines().collect::<io::Result<Vec<_>>>()?
    } else {
        cli.messages
    };

    for content in messages {
        sender.send(&Message::generic(&cli.media_type, content)?)?;
    }

    sender.close()?;
    for response in sender.responses() {
        match response.text() {
            Some(text) => println!("{text}"),
            None => println!("{}: {} bytes", response.media_type(), response.content().len()),
        }
    }

    Ok(())
}
