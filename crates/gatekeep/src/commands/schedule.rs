//! `gatekeep schedule set|clear`: publish schedule updates to the bus.

use gatekeep_core::{ScheduleUpdate, ScheduleWindow};

use crate::cli::{GlobalOpts, ScheduleArgs, ScheduleCommand};
use crate::error::CliError;
use crate::output;

/// Translate CLI arguments into the update the orchestrator will apply.
pub fn build_update(command: ScheduleCommand) -> Result<ScheduleUpdate, CliError> {
    Ok(match command {
        ScheduleCommand::Set {
            course,
            identity,
            start,
            end,
        } => {
            let window = ScheduleWindow::parse(&start, &end)?;
            match (identity, course) {
                (Some(identity), _) => ScheduleUpdate::SetIdentity { identity, window },
                (None, Some(course)) => ScheduleUpdate::SetCourse { course, window },
                (None, None) => {
                    return Err(CliError::Validation {
                        field: "--course".into(),
                        reason: "either --course or --identity is required".into(),
                    });
                }
            }
        }
        ScheduleCommand::Clear {
            identities: false, ..
        } => ScheduleUpdate::ClearCourse,
        ScheduleCommand::Clear {
            identities: true,
            name,
        } => ScheduleUpdate::ClearIdentity { identity: name },
    })
}

pub async fn handle(args: ScheduleArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let update = build_update(args.command)?;
    let (bus, topics) = super::bus_target(global)?;

    super::send_once(&bus, topics, |out| out.schedule(&update)).await?;
    output::print_output(&update.to_payload(), global.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identity_flag_wins_over_course() {
        let update = build_update(ScheduleCommand::Set {
            course: None,
            identity: Some("alice".into()),
            start: "2024-01-01 09:00:00".into(),
            end: "2024-01-01 10:00:00".into(),
        })
        .unwrap();
        assert!(matches!(update, ScheduleUpdate::SetIdentity { ref identity, .. } if identity == "alice"));
    }

    #[test]
    fn inverted_window_is_a_usage_error() {
        let err = build_update(ScheduleCommand::Set {
            course: Some("Fisika".into()),
            identity: None,
            start: "2024-01-01 10:00:00".into(),
            end: "2024-01-01 09:00:00".into(),
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), crate::error::exit_code::USAGE);
    }

    #[test]
    fn clear_variants_round_trip_through_the_payload() {
        let course = build_update(ScheduleCommand::Clear {
            identities: false,
            name: None,
        })
        .unwrap();
        assert_eq!(ScheduleUpdate::parse(&course.to_payload()).unwrap(), course);

        let one = build_update(ScheduleCommand::Clear {
            identities: true,
            name: Some("bob".into()),
        })
        .unwrap();
        assert_eq!(
            one,
            ScheduleUpdate::ClearIdentity {
                identity: Some("bob".into())
            }
        );
    }
}
