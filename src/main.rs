#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use bridge_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    simple_logger::init_with_level(config.log.level.as_level())?;

    if config.auth.token.is_none() && !config.server.listen.ip().is_loopback() {
        log::warn!(
            "The gateway is bound beyond loopback without an auth token, any process that can reach it owns your objects."
        );
    }

    bridge_server::startup(config).await
}
