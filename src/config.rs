//! Startup configuration: the three positional arguments from spec plus
//! an optional listening-port override.

use clap::Parser;

/// Default TCP port the server listens on (spec.md §6).
pub const DEFAULT_PORT: u16 = 12345;

#[derive(Parser, Debug)]
#[command(name = "kvd-server", about = "Concurrent sharded key-value server")]
pub struct Cli {
    /// Maximum number of concurrent client sessions.
    pub max_clients: usize,

    /// Number of data shards.
    pub database_shards: usize,

    /// Number of user shards.
    pub user_shards: usize,

    /// Listening port (ambient override; defaults to the documented 12345).
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

/// Immutable server configuration, fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_clients: usize,
    pub database_shards: usize,
    pub user_shards: usize,
    pub port: u16,
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        Self {
            max_clients: cli.max_clients,
            database_shards: cli.database_shards,
            user_shards: cli.user_shards,
            port: cli.port,
        }
    }
}

impl ServerConfig {
    pub fn parse() -> Self {
        Cli::parse().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_positionals() {
        let cli = Cli::parse_from(["kvd-server", "10", "4", "2"]);
        let cfg: ServerConfig = cli.into();
        assert_eq!(cfg.max_clients, 10);
        assert_eq!(cfg.database_shards, 4);
        assert_eq!(cfg.user_shards, 2);
        assert_eq!(cfg.port, DEFAULT_PORT);
    }

    #[test]
    fn rejects_missing_arguments() {
        let result = Cli::try_parse_from(["kvd-server", "10"]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_non_integer_arguments() {
        let result = Cli::try_parse_from(["kvd-server", "x", "4", "2"]);
        assert!(result.is_err());
    }

    #[test]
    fn accepts_port_override() {
        let cli = Cli::parse_from(["kvd-server", "10", "4", "2", "--port", "9000"]);
        let cfg: ServerConfig = cli.into();
        assert_eq!(cfg.port, 9000);
    }
}
