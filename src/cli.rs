use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server, accepting client connections.
    Serve(ServeArgs),
    /// Connect to a relay server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind, overriding HOST/PORT from the environment.
    /// Use port 0 for an ephemeral port.
    #[arg(long)]
    pub listen: Option<SocketAddr>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Display name announced when entering the room.
    #[arg(long)]
    pub name: String,

    /// Address of the relay server to connect to.
    #[arg(long, default_value = "127.0.0.1:3000")]
    pub server: SocketAddr,
}
