//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::LookasideResult;
use crate::ui::{self, UiContext};

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> LookasideResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force, yes }) => init_config(manager, force, yes).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> LookasideResult<()> {
    let toml = toml::to_string_pretty(config)?;
    println!("{}", toml);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool, yes: bool) -> LookasideResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let path = manager.path();

    if path.exists() && !force {
        let overwrite = ui::confirm(
            &ctx,
            &format!("Overwrite {}?", path.display()),
            false,
        )
        .await?;
        if !overwrite {
            ui::step_warn_hint(
                &ctx,
                &format!("Config already exists at {}", path.display()),
                "Use --force to overwrite",
            );
            return Ok(());
        }
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());

    Ok(())
}
