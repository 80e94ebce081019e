use std::net::{IpAddr, SocketAddr};

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_HOST, DEFAULT_PORT, HandshakeMode, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat relay, accepting TCP connections.
    Serve(ServeArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Interface the relay should bind to.
    #[arg(long, env = "CHAT_RELAY_HOST", default_value_t = DEFAULT_HOST)]
    pub host: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, env = "CHAT_RELAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Whether new peers are prompted for their username.
    #[arg(long, value_enum, default_value_t = HandshakeMode::Prompt)]
    pub handshake: HandshakeMode,
}

impl ServeArgs {
    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            addr: SocketAddr::new(self.host, self.port),
            handshake: self.handshake,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Username announced to the other peers.
    #[arg(long)]
    pub username: String,

    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:5555")]
    pub server: SocketAddr,

    /// Send the username right away instead of waiting for the prompt.
    #[arg(long)]
    pub no_prompt: bool,
}
