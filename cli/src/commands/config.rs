//! `hoist config`: inspect the defaults file.

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::app::AppContext;
use crate::application::ports::ConfigStore;

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,
    /// Print the configuration file path
    Path,
}

/// Run the config command.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be parsed, or the home
/// directory cannot be determined.
pub fn run(app: &AppContext, cmd: &ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(app),
        ConfigCommand::Path => {
            let path = app.config_store.path()?;
            if app.is_json() {
                crate::output::json::print(&serde_json::json!({ "path": path }))
            } else {
                println!("{}", path.display());
                Ok(())
            }
        }
    }
}

fn show(app: &AppContext) -> Result<()> {
    let config = app.load_config()?;
    if app.is_json() {
        return crate::output::json::print(&config);
    }
    let yaml = serde_yaml::to_string(&config).context("cannot render configuration")?;
    print!("{yaml}");
    Ok(())
}
