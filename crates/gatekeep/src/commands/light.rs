//! `gatekeep light on|off`: the auxiliary light on the peripheral.

use crate::cli::{GlobalOpts, LightAction};
use crate::error::CliError;
use crate::output;

pub async fn handle(action: LightAction, global: &GlobalOpts) -> Result<(), CliError> {
    let (bus, topics) = super::bus_target(global)?;
    let topic = topics.light.clone();

    let on = matches!(action, LightAction::On);
    super::send_once(&bus, topics, |out| out.light(on)).await?;
    let state = if on { "ON" } else { "OFF" };
    output::print_output(&format!("{state} sent to {topic}"), global.quiet);
    Ok(())
}
