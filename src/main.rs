use anyhow::{anyhow, Result};
use clap::Parser;
use convocoach::{cli, config::Config, gateway::ModelGateway, logging, session::Session, Args};
use std::sync::Arc;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    args.apply_overrides(&mut cfg);

    logging::init_logging(&cfg.logging.level, cfg.logging.json);

    if let Err(errors) = cfg.validate() {
        for err in &errors {
            eprintln!("Config error {}", err);
        }
        return Err(anyhow!(
            "Configuration has {} validation error(s)",
            errors.len()
        ));
    }

    // A missing key is not fatal; the session reports it on first use
    if let Err(e) = cfg.gateway.resolve_api_key() {
        tracing::warn!(error = %e, "no API key available");
    }

    tracing::debug!(
        chat_model = %cfg.gateway.chat_model,
        feedback_model = %cfg.gateway.feedback_model,
        base_url = %cfg.gateway.base_url,
        "starting"
    );

    let gateway = Arc::new(ModelGateway::from_config(&cfg.gateway));
    let session = Arc::new(Session::new(gateway).with_temperature(cfg.gateway.temperature));
    cli::run_repl(session, &args)
}
