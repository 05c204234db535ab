use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use rollsafe_core::{normalize_identifier, ComponentSelection, UpdateRequest};
use rollsafe_updater::{current_unix_timestamp, Janitor};
use serde::Serialize;

use crate::config::{RollsafeConfig, DEFAULT_CONFIG_FILE};
use crate::render::{
    current_output_style, format_batch_lines, format_preflight_lines, format_status_lines,
    render_status_line, BatchProgress,
};
use crate::{server, Cli, Commands};

pub const DEFAULT_SWEEP_AGE_SECS: u64 = 3_600;

pub fn run_cli(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?.with_root_override(cli.root);
    let style = current_output_style();

    match cli.command {
        Commands::Status { json } => {
            let statuses = config.build_orchestrator()?.status()?;
            if json {
                print_json(&statuses)?;
            } else {
                print_lines(&format_status_lines(&statuses, style));
            }
        }
        Commands::Plan { components, json } => {
            let mut request = UpdateRequest::new(selection_from_args(components, true)?);
            request.dry_run = true;
            let response = config.build_orchestrator()?.run_batch(&request)?;
            if json {
                print_json(&response)?;
            } else {
                print_lines(&format_batch_lines(&response, style));
            }
        }
        Commands::Update {
            components,
            all,
            dry_run,
            idempotency_key,
            no_health_check,
            no_reactivate,
            deactivate_during_swap,
            timeout_secs,
            json,
        } => {
            let selection = if all {
                ComponentSelection::All
            } else {
                selection_from_args(components, false)?
            };
            let request = UpdateRequest {
                idempotency_key,
                dry_run,
                health_check: !no_health_check,
                reactivate_after: !no_reactivate,
                deactivate_during_swap,
                timeout_secs,
                ..UpdateRequest::new(selection)
            };

            let orchestrator = config.build_orchestrator()?;
            let response = if json {
                orchestrator.run_batch(&request)?
            } else {
                let mut progress = BatchProgress::new(style);
                let outcome =
                    orchestrator.run_batch_with_progress(&request, |event| progress.handle(event));
                let printed = progress.finish();
                let response = outcome?;
                if printed {
                    if let Some(summary) = format_batch_lines(&response, style).last() {
                        println!("{summary}");
                    }
                } else {
                    print_lines(&format_batch_lines(&response, style));
                }
                response
            };
            if json {
                print_json(&response)?;
            }
            if !response.ok {
                bail!("update batch finished with failures");
            }
        }
        Commands::Preflight { json } => {
            let report = config.build_orchestrator()?.preflight();
            if json {
                print_json(&report)?;
            } else {
                print_lines(&format_preflight_lines(&report, style));
            }
            if !report.ok {
                bail!("preflight failed: {}", report.why.join("; "));
            }
        }
        Commands::Rescue { component } => {
            let component_id = normalize_identifier(&component)
                .ok_or_else(|| anyhow!("invalid component identifier: '{component}'"))?;
            if config.build_orchestrator()?.rescue(&component_id)? {
                println!(
                    "{}",
                    render_status_line(style, "ok", &format!("rescued {component_id}"))
                );
            } else {
                bail!("no rescue candidate found for '{component_id}'");
            }
        }
        Commands::Prune { max_age_secs } => {
            let max_age = max_age_secs.unwrap_or(config.backups.max_age_secs);
            let report =
                Janitor::new(config.layout()).prune_backups(max_age, current_unix_timestamp()?);
            for path in &report.removed {
                println!(
                    "{}",
                    render_status_line(style, "ok", &format!("removed {}", path.display()))
                );
            }
            for (path, error) in &report.failed {
                println!(
                    "{}",
                    render_status_line(
                        style,
                        "warn",
                        &format!("failed to remove {}: {error}", path.display())
                    )
                );
            }
            println!("pruned {} backup(s)", report.removed.len());
        }
        Commands::Sweep { max_age_secs } => {
            let removed = Janitor::new(config.layout())
                .sweep_workspaces(max_age_secs, current_unix_timestamp()?);
            for path in &removed {
                println!(
                    "{}",
                    render_status_line(style, "ok", &format!("removed {}", path.display()))
                );
            }
            println!("swept {} workspace(s)", removed.len());
        }
        Commands::Serve { listen } => {
            let mut config = config;
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            config
                .layout()
                .ensure_base_dirs()
                .context("failed to prepare host directories")?;
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(server::serve(config))?;
        }
    }

    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<RollsafeConfig> {
    match explicit {
        Some(path) => RollsafeConfig::load(path, true),
        None => RollsafeConfig::load(&PathBuf::from(DEFAULT_CONFIG_FILE), false),
    }
}

/// Empty `components` means every installed component when `empty_means_all`
/// is set; otherwise the caller must name something.
pub(crate) fn selection_from_args(
    components: Vec<String>,
    empty_means_all: bool,
) -> Result<ComponentSelection> {
    if components.is_empty() {
        if empty_means_all {
            return Ok(ComponentSelection::All);
        }
        bail!("name one or more components, or pass --all");
    }
    if components
        .iter()
        .any(|component| component.trim().eq_ignore_ascii_case("all"))
    {
        return Ok(ComponentSelection::All);
    }
    Ok(ComponentSelection::Ids(components))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed serializing output")?
    );
    Ok(())
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}
