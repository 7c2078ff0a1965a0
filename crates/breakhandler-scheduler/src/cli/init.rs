/*
[INPUT]:  Interactive user input via CLI
[OUTPUT]: Generated YAML configuration file
[POS]:    CLI initialization layer
[UPDATE]: When BreakHandlerConfig schema changes
*/

use anyhow::{Context, Result, bail};
use console::style;
use dialoguer::{Confirm, Input, Password, Select, theme::ColorfulTheme};
use std::path::PathBuf;

use breakhandler_scheduler::config::{
    AccountSelectionConfig, AutomationConfig, BreakHandlerConfig, TaskConfig,
};
use breakhandler_scheduler::interval::RandomInterval;

pub fn run_init(output: PathBuf) -> Result<()> {
    println!("{}", style("Welcome to Break Handler Init").bold().cyan());
    println!(
        "{}",
        style("This will guide you through creating a break handler configuration.").dim()
    );

    let theme = ColorfulTheme::default();
    let mut tasks = Vec::new();

    loop {
        println!("\n{}", style("--- Task ---").bold());
        tasks.push(prompt_task(&theme)?);

        let another = Confirm::with_theme(&theme)
            .with_prompt("Add another task?")
            .default(false)
            .interact()?;
        if !another {
            break;
        }
    }

    println!("\n{}", style("--- Account ---").bold());
    let account = prompt_account(&theme)?;

    let config = BreakHandlerConfig {
        tasks,
        account,
        automation: AutomationConfig::default(),
    };

    let yaml = serde_yaml::to_string(&config).context("failed to serialize config to YAML")?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .context(format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&output, yaml)
        .context(format!("failed to write config to {}", output.display()))?;

    println!("\n{}", style("SUCCESS!").bold().green());
    println!(
        "Configuration written to: {}",
        style(output.display()).cyan()
    );

    Ok(())
}

fn prompt_task(theme: &ColorfulTheme) -> Result<TaskConfig> {
    let name: String = Input::with_theme(theme)
        .with_prompt("Task name (e.g., Miner)")
        .default("Miner".to_string())
        .interact_text()?;

    let (threshold_from, threshold_to) =
        prompt_bounds(theme, "Minutes until a break", "60", "120")?;
    let (break_from, break_to) = prompt_bounds(theme, "Break length in minutes", "5", "15")?;

    let modes = ["idle in game", "log out"];
    let mode = Select::with_theme(theme)
        .with_prompt("During breaks")
        .items(&modes)
        .default(0)
        .interact()?;

    Ok(TaskConfig {
        name,
        enabled: true,
        logout: mode == 1,
        threshold_from,
        threshold_to,
        break_from,
        break_to,
    })
}

fn prompt_bounds(
    theme: &ColorfulTheme,
    label: &str,
    default_from: &str,
    default_to: &str,
) -> Result<(String, String)> {
    let from: String = Input::with_theme(theme)
        .with_prompt(format!("{label} (from)"))
        .default(default_from.to_string())
        .validate_with(|value: &String| validate_minutes(value))
        .interact_text()?;
    let to: String = Input::with_theme(theme)
        .with_prompt(format!("{label} (to)"))
        .default(default_to.to_string())
        .validate_with(|value: &String| validate_minutes(value))
        .interact_text()?;

    let (lo, hi) = (parse_minutes(&from)?, parse_minutes(&to)?);
    if RandomInterval::new(lo, hi).is_none() {
        bail!("{label}: lower bound {lo} exceeds upper bound {hi}");
    }
    Ok((from, to))
}

fn prompt_account(theme: &ColorfulTheme) -> Result<AccountSelectionConfig> {
    let sources = ["profile from credentials file", "manual username/password"];
    let source = Select::with_theme(theme)
        .with_prompt("Re-login credentials")
        .items(&sources)
        .default(0)
        .interact()?;

    if source == 1 {
        let username: String = Input::with_theme(theme)
            .with_prompt("Username")
            .interact_text()?;
        let password = Password::with_theme(theme)
            .with_prompt("Password")
            .interact()?;
        return Ok(AccountSelectionConfig {
            manual: true,
            username,
            password,
            ..AccountSelectionConfig::default()
        });
    }

    let profile: String = Input::with_theme(theme)
        .with_prompt("Profile label")
        .interact_text()?;
    let profiles_file: String = Input::with_theme(theme)
        .with_prompt("Credentials file (label:username:password per line)")
        .interact_text()?;

    Ok(AccountSelectionConfig {
        profile,
        profiles_file: Some(PathBuf::from(profiles_file)),
        ..AccountSelectionConfig::default()
    })
}

fn parse_minutes(value: &str) -> Result<i64> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|minutes| *minutes >= 0)
        .context(format!("'{value}' is not a whole number of minutes"))
}

fn validate_minutes(value: &str) -> std::result::Result<(), String> {
    parse_minutes(value).map(|_| ()).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0", Some(0))]
    #[case(" 15 ", Some(15))]
    #[case("-1", None)]
    #[case("1.5", None)]
    #[case("", None)]
    fn minutes_parsing(#[case] input: &str, #[case] expected: Option<i64>) {
        assert_eq!(parse_minutes(input).ok(), expected);
    }
}
