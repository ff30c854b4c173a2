// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! BlueChat terminal application.

mod cli;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bluechat::bluetooth::{
    ChatEvent, Coordinator, MemoryTransport, PeerAddr, RfcommTransport, Transport,
};
use bluechat::config::Config;
use bluechat::events::EventPrinter;
use cli::{Cli, Command, Input};

/// Address the loopback echo peer dials from.
fn loopback_peer() -> PeerAddr {
    PeerAddr::new([0x00, 0x00, 0x00, 0x00, 0x00, 0x01])
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("bluechat={}", cli.log_level).parse()?),
        )
        .init();

    info!("Starting BlueChat v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!("Configuration loaded");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ChatEvent>();

    let transport: Arc<dyn Transport> = if cli.loopback {
        let memory = MemoryTransport::new();
        start_echo_peer(&memory, &cli.command, &config);
        Arc::new(memory)
    } else {
        let rfcomm = RfcommTransport::new(&config.bluetooth).await?;
        if let Command::Devices = cli.command {
            for device in rfcomm.paired_devices().await? {
                println!("{}  {}", device.address, device.name);
            }
            return Ok(());
        }
        info!("Local address: {}", rfcomm.address().await?);
        Arc::new(rfcomm)
    };

    let coordinator = Coordinator::new(transport, config.coordinator_options(), event_tx);

    // Print events as they arrive
    tokio::spawn(async move {
        let mut printer = EventPrinter::new(std::io::stdout());
        while let Some(event) = event_rx.recv().await {
            if let Err(e) = printer.process_event(&event) {
                error!("Error printing event: {}", e);
            }
        }
    });

    match cli.command {
        Command::Listen => coordinator.start_listening(),
        Command::Connect { address } => coordinator.connect_to(address),
        Command::Devices => {
            warn!("No paired devices on the loopback transport");
            return Ok(());
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match Input::parse(&line) {
                    Input::Quit => break,
                    Input::Listen => coordinator.start_listening(),
                    Input::Connect(peer) => coordinator.connect_to(peer),
                    Input::Status => {
                        let peer = coordinator
                            .peer()
                            .map(|peer| format!(" with {}", peer))
                            .unwrap_or_default();
                        println!("* {}{} ({})", coordinator.state(), peer, coordinator.service());
                    }
                    Input::Message(text) => {
                        let mut bytes = text.into_bytes();
                        bytes.push(b'\n');
                        if let Err(e) = coordinator.send(&bytes).await {
                            println!("! {}", e);
                        }
                    }
                    Input::Invalid(reason) => println!("! {}", reason),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    coordinator.shutdown();
    info!("BlueChat stopped");
    Ok(())
}

/// Play the remote side on the loopback transport: echo every chunk back.
fn start_echo_peer(memory: &MemoryTransport, command: &Command, config: &Config) {
    match command {
        Command::Listen => {
            let memory = memory.clone();
            let service = config.bluetooth.service.record();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                match memory.dial(loopback_peer(), &service) {
                    Ok(stream) => echo(stream).await,
                    Err(e) => warn!("Loopback peer could not dial: {}", e),
                }
            });
        }
        Command::Connect { address } => {
            let mut inbox = memory.add_peer(*address);
            tokio::spawn(async move {
                while let Some(stream) = inbox.recv().await {
                    tokio::spawn(echo(stream));
                }
            });
        }
        Command::Devices => {}
    }
}

async fn echo(mut stream: DuplexStream) {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if stream.write_all(b"echo: ").await.is_err()
                    || stream.write_all(&buf[..n]).await.is_err()
                {
                    break;
                }
            }
        }
    }
}
