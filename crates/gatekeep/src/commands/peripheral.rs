//! `gatekeep peripheral`: bench stand-in for the door/display unit.

use std::sync::Arc;
use std::time::Duration;

use gatekeep_core::peripheral::{BrokerLink, run_peripheral};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{GlobalOpts, PeripheralArgs};
use crate::error::CliError;

pub async fn handle(args: PeripheralArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = super::load_config(global)?;
    let mut settings = gatekeep_config::to_peripheral_settings(&cfg)?;
    if let Some(secs) = args.proximity_every {
        settings.proximity_every = Some(Duration::from_secs(secs.max(1)));
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "could not listen for Ctrl-C");
        }
        on_interrupt.cancel();
    });

    info!(host = %settings.bus.host, "peripheral starting");
    let panel = run_peripheral(settings, Arc::new(BrokerLink), cancel).await;
    info!(door = ?panel.door, light = panel.light, display = %panel.display, "peripheral stopped");
    Ok(())
}
