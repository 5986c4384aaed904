//! Command line interface for the `fabriclink` demo binary.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};

/// Command line arguments for the `fabriclink` binary.
#[derive(Debug, Parser)]
#[command(name = "fabriclink", version, about = "Control-plane link demo")]
pub struct Cli {
    /// Handshake magic both peers must share.
    #[arg(long, default_value_t = 0xACC1)]
    pub magic: u16,

    /// Protocol version both peers must share.
    #[arg(long, default_value_t = 1)]
    pub protocol_version: u16,

    #[command(subcommand)]
    pub command: Command,
}

/// Demo modes.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept links and echo every request of type 1.
    Serve {
        /// Address to listen on.
        #[arg(short, long, default_value = "127.0.0.1:7700")]
        listen: SocketAddr,
        /// Worker threads.
        #[arg(short, long, default_value_t = 2)]
        workers: usize,
    },
    /// Connect to a server and send one `PING`.
    Ping {
        /// Server address.
        addr: SocketAddr,
        /// Rank announced in the handshake.
        #[arg(long, default_value_t = 0)]
        rank: u64,
        /// Connection retries.
        #[arg(long, default_value_t = 3)]
        retries: u32,
    },
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn parses_serve() {
        let cli = Cli::parse_from(["fabriclink", "serve", "--workers", "4"]);
        assert!(matches!(cli.command, Command::Serve { workers: 4, .. }));
        assert_eq!(cli.magic, 0xACC1);
    }

    #[test]
    fn parses_ping() {
        let cli = Cli::parse_from(["fabriclink", "--magic", "7", "ping", "127.0.0.1:9000", "--rank", "3"]);
        assert!(matches!(cli.command, Command::Ping { rank: 3, retries: 3, .. }));
        assert_eq!(cli.magic, 7);
    }
}
