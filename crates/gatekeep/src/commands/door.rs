//! `gatekeep door open|close`.

use gatekeep_core::DoorCommand;

use crate::cli::{DoorAction, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub async fn handle(action: DoorAction, global: &GlobalOpts) -> Result<(), CliError> {
    let (bus, topics) = super::bus_target(global)?;
    let topic = topics.door.clone();

    let command = match action {
        DoorAction::Open => DoorCommand::Open,
        DoorAction::Close => DoorCommand::Close,
    };
    super::send_once(&bus, topics, |out| out.door(command)).await?;
    output::print_output(&format!("{command} sent to {topic}"), global.quiet);
    Ok(())
}
