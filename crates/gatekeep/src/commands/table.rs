//! `gatekeep table`: print the persisted attendance table.

use gatekeep_core::{AttendanceRow, CsvTable, Presence};
use owo_colors::OwoColorize;
use tabled::Tabled;

use crate::cli::{GlobalOpts, TableArgs};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Nama")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Waktu")]
    time: String,
    #[tabled(rename = "Mata Kuliah")]
    course: String,
}

fn to_row(row: &AttendanceRow, color: bool) -> Row {
    let present = row.status == Presence::Present.to_string();
    let status = match (color, present) {
        (false, _) => row.status.clone(),
        (true, true) => row.status.green().to_string(),
        (true, false) => row.status.dimmed().to_string(),
    };
    Row {
        name: row.name.clone(),
        status,
        time: row.time.clone(),
        course: row.course.clone(),
    }
}

pub fn handle(args: TableArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = match args.path {
        Some(path) => path,
        None => super::load_config(global)?.storage.table_path,
    };
    if !path.exists() {
        return Err(CliError::TableNotFound {
            path: path.display().to_string(),
        });
    }

    let mut rows = CsvTable::new(path).load()?;
    if let Some(ref course) = args.course {
        rows.retain(|r| &r.course == course);
    }

    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &rows,
        |r| to_row(r, color),
        |r| r.name.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
