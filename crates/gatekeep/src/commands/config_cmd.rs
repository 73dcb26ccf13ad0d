//! Config subcommand handlers.

use gatekeep_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(gatekeep_config::config_path);

    match args.command {
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            gatekeep_config::save_config(&Config::default(), &path)?;
            output::print_output(
                &format!("Configuration written to {}", path.display()),
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = super::load_config(global)?;
            let out = match global.output {
                OutputFormat::Json => serde_json::to_string_pretty(&gatekeep_config::redacted(&cfg))?,
                OutputFormat::JsonCompact => {
                    serde_json::to_string(&gatekeep_config::redacted(&cfg))?
                }
                OutputFormat::Table | OutputFormat::Plain => {
                    gatekeep_config::render_redacted(&cfg)?
                }
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }
    }
}
