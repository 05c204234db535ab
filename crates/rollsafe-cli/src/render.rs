use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use rollsafe_core::{
    BatchResponse, ComponentStatus, PlanAction, PlanEntry, PreflightReport, UpdateResult,
    UpdateState,
};
use rollsafe_updater::ProgressEvent;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

pub fn current_output_style() -> OutputStyle {
    if std::env::var_os("NO_COLOR").is_some() || !std::io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

pub fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let (badge, badge_style) = match status {
                "ok" => ("[OK]", ok_style()),
                "warn" => ("[WARN]", warn_style()),
                "error" => ("[ERR]", error_style()),
                "plan" => ("[PLAN]", section_style()),
                _ => ("[..]", Style::new()),
            };
            format!("{} {message}", colorize(badge_style, badge))
        }
    }
}

pub fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(colorize(section_style(), &format!("== {title} =="))),
    }
}

pub fn format_batch_lines(response: &BatchResponse, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(header) = render_section_header(
        style,
        if response.dry_run { "plan" } else { "update" },
    ) {
        lines.push(header);
    }

    if response.dry_run {
        for entry in response.plan.values() {
            lines.push(format_plan_line(entry, style));
        }
    } else {
        for result in response.results.values() {
            lines.extend(format_result_lines(result, style));
        }
    }

    let summary = if response.dry_run {
        let pending = response
            .plan
            .values()
            .filter(|entry| entry.action == PlanAction::WouldUpdate)
            .count();
        format!("{pending} of {} component(s) would update", response.plan.len())
    } else {
        format!(
            "{} of {} component(s) updated ({})",
            response.updated.len(),
            response.results.len(),
            response.mode.as_str()
        )
    };
    lines.push(render_status_line(
        style,
        if response.ok { "ok" } else { "warn" },
        &summary,
    ));
    lines
}

fn format_plan_line(entry: &PlanEntry, style: OutputStyle) -> String {
    let message = match (entry.action, &entry.from_version, &entry.to_version) {
        (PlanAction::WouldUpdate, Some(from), Some(to)) => {
            let source = entry.source.as_deref().unwrap_or("unknown");
            format!("{} {from} -> {to} (source: {source})", entry.component_id)
        }
        (PlanAction::UpToDate, Some(from), _) => {
            format!("{} {from} is up to date", entry.component_id)
        }
        _ => format!("{} {}", entry.component_id, entry.action.as_str()),
    };
    let status = match entry.action {
        PlanAction::WouldUpdate => "plan",
        PlanAction::UpToDate => "ok",
        PlanAction::NotFound => "warn",
    };
    render_status_line(style, status, &message)
}

pub fn format_result_lines(result: &UpdateResult, style: OutputStyle) -> Vec<String> {
    let versions = match (&result.from_version, &result.to_version) {
        (Some(from), Some(to)) if from != to => format!(" {from} -> {to}"),
        (Some(from), _) => format!(" {from}"),
        _ => String::new(),
    };
    let status = if result.ok {
        "ok"
    } else if result.final_state == UpdateState::RolledBack {
        "warn"
    } else {
        "error"
    };
    let mut lines = vec![render_status_line(
        style,
        status,
        &format!(
            "{}{versions}: {} [{}]",
            result.component_id, result.action, result.final_state
        ),
    )];
    if result.requires_intervention {
        lines.push(render_status_line(
            style,
            "error",
            &format!(
                "{} requires manual intervention; backup kept at {}",
                result.component_id,
                result.backup_path.as_deref().unwrap_or("(none)")
            ),
        ));
    }
    for message in &result.messages {
        lines.push(format!("    {message}"));
    }
    lines
}

pub fn format_preflight_lines(report: &PreflightReport, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(header) = render_section_header(style, "preflight") {
        lines.push(header);
    }
    for (label, dir) in &report.dirs {
        let status = if dir.writable { "ok" } else { "error" };
        lines.push(render_status_line(
            style,
            status,
            &format!(
                "{label}: {} (exists={}, writable={})",
                dir.path.display(),
                dir.exists,
                dir.writable
            ),
        ));
    }
    let free = report
        .free_bytes
        .map(|bytes| HumanBytes(bytes).to_string())
        .unwrap_or_else(|| "unknown".to_string());
    lines.push(format!(
        "free space: {free} (minimum {})",
        HumanBytes(report.min_free_bytes)
    ));
    if !report.external_decoders.is_empty() {
        lines.push(format!(
            "external decoders: {}",
            report.external_decoders.join(", ")
        ));
    }
    for reason in &report.why {
        lines.push(render_status_line(style, "error", reason));
    }
    lines.push(render_status_line(
        style,
        if report.ok { "ok" } else { "error" },
        if report.ok {
            "preflight passed"
        } else {
            "preflight failed"
        },
    ));
    lines
}

pub fn format_status_lines(statuses: &[ComponentStatus], style: OutputStyle) -> Vec<String> {
    if statuses.is_empty() {
        return vec!["No components installed".to_string()];
    }
    statuses
        .iter()
        .map(|status| {
            let active = if status.active { "active" } else { "inactive" };
            match (&status.available_version, status.has_update) {
                (Some(available), true) => render_status_line(
                    style,
                    "plan",
                    &format!(
                        "{} {} ({active}) -> {available} available",
                        status.component_id, status.installed_version
                    ),
                ),
                _ => render_status_line(
                    style,
                    "ok",
                    &format!(
                        "{} {} ({active})",
                        status.component_id, status.installed_version
                    ),
                ),
            }
        })
        .collect()
}

/// Spinner plus per-component bar for an interactive `update` run.
pub struct BatchProgress {
    style: OutputStyle,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl BatchProgress {
    pub fn new(style: OutputStyle) -> Self {
        Self {
            style,
            progress_bar: None,
            started_at: Instant::now(),
        }
    }

    pub fn handle(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::BatchStarted {
                components,
                dry_run,
            } => {
                if self.style == OutputStyle::Plain || dry_run {
                    return;
                }
                let progress_bar = ProgressBar::new(components.len().max(1) as u64);
                if let Ok(style) = ProgressStyle::with_template(
                    "{spinner:.cyan.bold} {msg:<28} [{bar:20.cyan/blue}] {pos:>3}/{len:3} {elapsed_precise}",
                ) {
                    progress_bar.set_style(style.tick_chars("<^>v ").progress_chars("=>-"));
                }
                progress_bar.enable_steady_tick(Duration::from_millis(80));
                self.progress_bar = Some(progress_bar);
            }
            ProgressEvent::StateChanged {
                component_id,
                state,
            } => {
                if let Some(progress_bar) = &self.progress_bar {
                    progress_bar.set_message(format!("{component_id}: {state}"));
                }
            }
            ProgressEvent::ComponentFinished { result } => {
                if let Some(progress_bar) = &self.progress_bar {
                    progress_bar.inc(1);
                    for line in format_result_lines(&result, self.style) {
                        progress_bar.println(line);
                    }
                }
            }
        }
    }

    /// Clears the bar. Returns true when results were already printed.
    pub fn finish(mut self) -> bool {
        let Some(progress_bar) = self.progress_bar.take() else {
            return false;
        };
        progress_bar.finish_and_clear();
        println!(
            "{}",
            colorize(
                progress_label_style(),
                &format!("batch complete in {}", format_elapsed(self.started_at.elapsed()))
            )
        );
        true
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn ok_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightGreen.into()))
        .effects(Effects::BOLD)
}

fn warn_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightYellow.into()))
        .effects(Effects::BOLD)
}

fn error_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightRed.into()))
        .effects(Effects::BOLD)
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
