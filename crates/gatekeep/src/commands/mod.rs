//! Command handlers and the bus helpers they share.

pub mod config_cmd;
pub mod door;
pub mod light;
pub mod peripheral;
pub mod run;
pub mod schedule;
pub mod table;

use std::sync::Arc;
use std::time::Duration;

use gatekeep_api::{BusEvent, BusHandle, ReconnectConfig};
use gatekeep_config::Config;
use gatekeep_core::{BusSettings, CoreError, Outbound, TopicMap};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Time left for the event loop to write a queued publish before disconnect.
const FLUSH_GRACE: Duration = Duration::from_millis(500);

/// Load the config file plus environment, then apply CLI overrides.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut cfg = gatekeep_config::load_config(global.config.as_deref())?;
    if let Some(ref broker) = global.broker {
        match broker.rsplit_once(':') {
            Some((host, port)) => {
                cfg.bus.host = host.to_owned();
                cfg.bus.port = port.parse().map_err(|_| CliError::Validation {
                    field: "--broker".into(),
                    reason: format!("invalid port in '{broker}'"),
                })?;
            }
            None => cfg.bus.host.clone_from(broker),
        }
    }
    Ok(cfg)
}

/// Bus settings and topic names for a one-shot command.
pub fn bus_target(global: &GlobalOpts) -> Result<(BusSettings, TopicMap), CliError> {
    let cfg = load_config(global)?;
    let bus = gatekeep_config::to_bus_settings(&cfg)?;
    Ok((bus, TopicMap::with_prefix(&cfg.topics.prefix)))
}

/// Connect, hand `send` an `Outbound` over the live bus, then disconnect.
pub async fn send_once(
    settings: &BusSettings,
    topics: TopicMap,
    send: impl FnOnce(&Outbound) -> Result<(), CoreError>,
) -> Result<(), CliError> {
    let mut bus_config = settings.to_bus_config(Vec::new());
    bus_config.client_id = format!("{}-cli-{}", settings.client_id, std::process::id());
    let reconnect = ReconnectConfig {
        max_retries: Some(1),
        ..settings.reconnect.clone()
    };

    let (bus, mut events) = BusHandle::spawn(bus_config, reconnect, CancellationToken::new());
    let wait = settings.connect_timeout + Duration::from_secs(1);
    let connected = tokio::time::timeout(wait, async {
        while let Some(event) = events.recv().await {
            match event {
                BusEvent::Connected => return true,
                BusEvent::Exhausted { .. } => return false,
                other => debug!(event = ?other, "waiting for broker"),
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !connected {
        bus.shutdown();
        return Err(CliError::BrokerUnreachable {
            host: settings.host.clone(),
            port: settings.port,
        });
    }

    let outbound = Outbound::new(Arc::new(bus.clone()), topics);
    let sent = send(&outbound);
    if sent.is_ok() {
        debug!("published");
        tokio::time::sleep(FLUSH_GRACE).await;
    }
    bus.shutdown();
    sent.map_err(CliError::from)
}
