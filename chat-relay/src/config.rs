use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::ValueEnum;

pub const DEFAULT_PORT: u16 = 5555;
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// How a new session learns its peer's username.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum HandshakeMode {
    /// Send `USERNAME` and wait for the reply line.
    #[default]
    Prompt,
    /// Treat the first line the peer sends as its username.
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub handshake: HandshakeMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(DEFAULT_HOST, DEFAULT_PORT),
            handshake: HandshakeMode::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_all_interfaces_on_5555() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.to_string(), "0.0.0.0:5555");
        assert_eq!(config.handshake, HandshakeMode::Prompt);
    }
}
