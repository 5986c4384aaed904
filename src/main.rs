//! Demo binary serving or pinging `fabriclink` links.

mod cli;

use std::{process::ExitCode, time::Duration};

use clap::Parser;
use cli::{Cli, Command};
use fabriclink::{
    ConnectRequest,
    config::ServerOptions,
    server::{LinkServer, ServerError},
};
use tokio::sync::mpsc;
use tracing::{error, info};

const PING: i16 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let options = ServerOptions::default()
        .magic(cli.magic)
        .version(cli.protocol_version);
    let result = match cli.command {
        Command::Serve { listen, workers } => {
            serve(options.listen_addr(listen).worker_count(workers)).await
        }
        Command::Ping {
            addr,
            rank,
            retries,
        } => ping(options, addr, rank, retries).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fabriclink failed");
            ExitCode::FAILURE
        }
    }
}

async fn serve(options: ServerOptions) -> Result<(), ServerError> {
    let mut server = LinkServer::new(options)
        .on_new_link(|request, link| {
            info!(link_id = %link.id(), rank = request.rank_id, "peer connected");
            Ok(())
        })
        .on_request(PING, |request| {
            if let Err(e) = request.reply(0, request.body()) {
                error!(link_id = %request.link().id(), error = %e, "reply failed");
            }
        })
        .on_link_broken(|link| info!(link_id = %link.id(), "peer disconnected"));
    server.start().await?;
    info!(addr = ?server.local_addr(), "serving; press Ctrl+C to stop");
    let _ = tokio::signal::ctrl_c().await;
    server.stop().await
}

async fn ping(
    options: ServerOptions,
    addr: std::net::SocketAddr,
    rank: u64,
    retries: u32,
) -> Result<(), ServerError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let magic = options.magic;
    let version = options.version;
    let mut client = LinkServer::new(options.enable_listener(false).worker_count(1))
        .on_request(PING, move |reply| {
            let _ = tx.send((reply.header().result, reply.body().to_vec()));
        });
    client.start().await?;
    let request = ConnectRequest {
        magic,
        version,
        rank_id: rank,
    };
    let link = client.connect_to_peer(addr, request, retries).await?;
    link.send(PING, 1, b"PING")?;
    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some((result, body))) => {
            info!(result, body = %String::from_utf8_lossy(&body), "pong");
        }
        _ => error!("no reply within 5s"),
    }
    link.uninitialize();
    client.stop().await
}
