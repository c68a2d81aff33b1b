pub mod config;
pub mod pool;
pub mod server;

use std::sync::Arc;

use service::{Gateway, GatewayOptions, objects::ObjectRef, reflect::ClassRegistry};

use self::{
    config::Config,
    pool::{CallbackClient, CallbackOptions},
};

#[rustfmt::skip]
static SOFTWARE: &str = concat!(
    "bridge-server.",
    env!("CARGO_PKG_VERSION")
);

/// The embedding surface: the gateway plus, when a callback endpoint is
/// configured, the pooled client host code uses to call the peer from
/// outside any inbound command.
pub struct Bridge {
    pub gateway: Arc<Gateway<ClassRegistry>>,
    pub peer: Option<Arc<CallbackClient<ClassRegistry>>>,
}

/// Builds a gateway (and its peer client) from a configuration. The
/// entry point, when given, is reachable by the peer under the well
/// known id `t`.
pub fn new_gateway(
    config: &Config,
    reflection: ClassRegistry,
    entry_point: Option<ObjectRef>,
) -> Bridge {
    let gateway = Arc::new(Gateway::new(GatewayOptions {
        reflection,
        entry_point,
    }));

    let peer = config.callback.as_ref().map(|callback| {
        Arc::new(CallbackClient::new(
            gateway.clone(),
            CallbackOptions {
                endpoint: callback.endpoint,
                pool_size: callback.pool_size,
                auth_token: config.auth.token.clone(),
                reply_timeout: config.server.reply_timeout_duration(),
            },
        ))
    });

    Bridge { gateway, peer }
}

/// In order to let the integration tests use the bridge-server crate
/// and start the server, a function is opened to replace the main
/// function to directly start the server.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    let bridge = new_gateway(&config, ClassRegistry::with_builtins(), None);
    bridge.gateway.startup();

    server::start(&config, &bridge.gateway).await?;
    log::info!("gateway started: software={SOFTWARE}");

    // The server is non-blocking after it runs and needs to be kept
    // from exiting immediately.
    std::future::pending::<()>().await;

    Ok(())
}
