use crate::cli::Args;
use crate::core::flow::collaborators::{Outbox, ReqwestHttpTransport};
use crate::core::flow::{
    EffectDispatcher, FileGraphCatalog, FileRunStore, FlowEngine, HttpTransport,
};
use crate::core::{ConfigLoader, ConfigValidator, EngineConfig};
use crate::Result;
use anyhow::anyhow;
use std::sync::Arc;

/// File-backed engine wired for one CLI invocation.
pub struct CliContext {
    pub config: EngineConfig,
    pub engine: Arc<FlowEngine>,
    pub outbox: Arc<Outbox>,
}

pub fn build(args: &Args) -> Result<CliContext> {
    let state_dir = args.state_dir.as_path();
    let config = ConfigLoader::load_from_state_dir(state_dir)?;
    ConfigValidator::validate(&config)?;

    let outbox = Arc::new(Outbox::new(state_dir));
    let http: Arc<dyn HttpTransport> = if args.live_http || config.http.live {
        let transport = ReqwestHttpTransport::new(&config.http.user_agent, config.effect_timeout())
            .map_err(|err| anyhow!("failed to build HTTP transport: {}", err))?;
        Arc::new(transport)
    } else {
        outbox.clone()
    };
    let dispatcher = EffectDispatcher::new(outbox.clone(), outbox.clone(), http, outbox.clone());

    let engine = FlowEngine::new(
        Arc::new(FileGraphCatalog::new(state_dir)),
        Arc::new(FileRunStore::new(state_dir)),
        dispatcher,
        config.clone(),
    );
    tracing::debug!(state_dir = %state_dir.display(), live_http = args.live_http || config.http.live, "engine ready");

    Ok(CliContext {
        config,
        engine: Arc::new(engine),
        outbox,
    })
}
