//! API server command — `forge serve`.

use anyhow::Result;
use forge::forge_config::ForgeConfig;
use forge::runtime::Forge;
use forge::server::{ServerConfig, start_server};

pub async fn cmd_serve(config: ForgeConfig, port: Option<u16>, dev: bool) -> Result<()> {
    let server = &config.toml.server;
    let server_config = ServerConfig {
        host: server.host.clone(),
        port: port.unwrap_or(server.port),
        dev_mode: dev || server.dev_mode,
    };

    let forge = Forge::build(&config).await?;
    start_server(server_config, forge).await
}
