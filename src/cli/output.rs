//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::planner::{ActionType, DiffDetail, ExecutionResult, Plan, RefreshResult};
use crate::state::{ResourceRecord, StackState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Action result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Result")]
    result: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::from(plan)),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required, infrastructure matches the manifest.\n",
                "✓".green()
            );
        }

        let mut output = String::new();

        let _ = writeln!(output, "\nPlan");
        let _ = write!(output, "   Manifest hash: {}\n\n", short(&plan.manifest_hash));

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                resource: a.address(),
                reason: Self::truncate(&a.reason, 50),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for action in plan.actions.iter().filter(|a| !a.changes.is_empty()) {
                let _ = writeln!(output, "\n   {}:", action.address());
                for change in &action.changes {
                    let _ = writeln!(output, "     {}", Self::format_change(change));
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete\n",
            plan.count(ActionType::Create).to_string().green(),
            plan.count(ActionType::Update).to_string().yellow(),
            plan.count(ActionType::Replace).to_string().magenta(),
            plan.count(ActionType::Delete).to_string().red()
        );

        output
    }

    /// Formats the result of applying a plan.
    #[must_use]
    pub fn format_execution(&self, result: &ExecutionResult) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ExecutionJson::from(result)),
            OutputFormat::Text => {
                let mut output = String::new();
                if !result.results.is_empty() {
                    let rows: Vec<ResultRow> = result
                        .results
                        .iter()
                        .map(|r| ResultRow {
                            index: r.index + 1,
                            action: Self::format_action_type(r.action.action_type),
                            resource: r.action.address(),
                            result: r.error.as_ref().map_or_else(
                                || "ok".green().to_string(),
                                |e| Self::truncate(e, 60).red().to_string(),
                            ),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                let status = if result.all_successful() {
                    "✓".green()
                } else {
                    "✗".red()
                };
                let _ = writeln!(output, "\n{status} {result}");
                output
            }
        }
    }

    /// Formats the result of a refresh.
    #[must_use]
    pub fn format_refresh(&self, result: &RefreshResult) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "refreshed": result.refreshed,
                "vanished": result.vanished,
                "errors": result
                    .errors
                    .iter()
                    .map(|(address, error)| serde_json::json!({"address": address, "error": error}))
                    .collect::<Vec<_>>(),
            })),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Refreshed {} resources\n",
                    "✓".green(),
                    result.refreshed.len()
                );
                for address in &result.vanished {
                    let _ = writeln!(output, "   {} {address} no longer exists", "-".red());
                }
                for (address, error) in &result.errors {
                    let _ = writeln!(output, "   {} {address}: {error}", "✗".red());
                }
                output
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
            })),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Manifest is valid\n", "✓".green())
                } else {
                    format!("{} Manifest has {} errors:\n", "✗".red(), result.error_count())
                };
                for error in &result.errors {
                    let _ = writeln!(output, "   - {error}");
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats a state summary.
    #[must_use]
    pub fn format_state(&self, state: &StackState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::from("\nState\n\n");

                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Manifest hash: {}", short(&state.manifest_hash));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.resources.len());

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats the recorded resources in creation order.
    #[must_use]
    pub fn format_resources(&self, state: &StackState) -> String {
        let records: Vec<&ResourceRecord> = state
            .addresses_in_creation_order()
            .into_iter()
            .filter_map(|address| state.get(address))
            .collect();

        match self.format {
            OutputFormat::Json => to_json(&records),
            OutputFormat::Text => {
                if records.is_empty() {
                    return String::from("No resources in state.\n");
                }
                let rows: Vec<ResourceRow> = records
                    .iter()
                    .map(|r| ResourceRow {
                        address: r.address(),
                        id: r.id.clone(),
                        updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats one recorded resource with its fields.
    #[must_use]
    pub fn format_record(&self, record: &ResourceRecord) -> String {
        match self.format {
            OutputFormat::Json => to_json(record),
            OutputFormat::Text => {
                let mut output = format!("{}\n   id: {}\n", record.address().bold(), record.id);
                if let Value::Object(fields) = &record.fields {
                    for (key, value) in fields {
                        let _ = writeln!(output, "   {key}: {}", display_value(value));
                    }
                }
                output
            }
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Replace => "-/+replace".magenta().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
        }
    }

    /// Formats a single field change.
    fn format_change(change: &DiffDetail) -> String {
        let old = change.old_value.as_ref().map_or_else(|| String::from("(unset)"), display_value);
        let new = change
            .new_value
            .as_ref()
            .map_or_else(|| String::from("(known after apply)"), display_value);
        let marker = if change.force_new {
            " (forces replacement)".red().to_string()
        } else {
            String::new()
        };
        format!("{}: {old} -> {new}{marker}", change.field)
    }

    /// Truncates a string to a maximum length in characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

/// Shortens a hash for display.
fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{s:?}"),
        other => other.to_string(),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    manifest_hash: String,
    action_count: usize,
    creates: usize,
    updates: usize,
    replaces: usize,
    deletes: usize,
    actions: Vec<ActionJson>,
}

#[derive(Serialize)]
struct ActionJson {
    action_type: String,
    resource: String,
    reason: String,
    changes: Vec<ChangeJson>,
}

#[derive(Serialize)]
struct ChangeJson {
    field: String,
    old: Option<Value>,
    new: Option<Value>,
    force_new: bool,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        Self {
            manifest_hash: plan.manifest_hash.clone(),
            action_count: plan.action_count(),
            creates: plan.count(ActionType::Create),
            updates: plan.count(ActionType::Update),
            replaces: plan.count(ActionType::Replace),
            deletes: plan.count(ActionType::Delete),
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    action_type: a.action_type.to_string(),
                    resource: a.address(),
                    reason: a.reason.clone(),
                    changes: a
                        .changes
                        .iter()
                        .map(|c| ChangeJson {
                            field: c.field.clone(),
                            old: c.old_value.clone(),
                            new: c.new_value.clone(),
                            force_new: c.force_new,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct ExecutionJson {
    success: bool,
    executed: usize,
    successful: usize,
    failed: usize,
    skipped: usize,
    results: Vec<ResultJson>,
}

#[derive(Serialize)]
struct ResultJson {
    action_type: String,
    resource: String,
    success: bool,
    id: Option<String>,
    error: Option<String>,
}

impl From<&ExecutionResult> for ExecutionJson {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            success: result.all_successful(),
            executed: result.total_executed,
            successful: result.successful,
            failed: result.failed,
            skipped: result.skipped,
            results: result
                .results
                .iter()
                .map(|r| ResultJson {
                    action_type: r.action.action_type.to_string(),
                    resource: r.action.address(),
                    success: r.success,
                    id: r.id.clone(),
                    error: r.error.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{DiffResult, DiffType, ResourceDiff};
    use serde_json::json;

    fn sample_plan() -> Plan {
        let diff = DiffResult {
            diffs: vec![ResourceDiff {
                address: String::from("network.web"),
                resource_type: String::from("network"),
                name: String::from("web"),
                diff_type: DiffType::Replace,
                details: vec![DiffDetail {
                    field: String::from("zone_name"),
                    old_value: Some(json!("zone-a")),
                    new_value: Some(json!("zone-b")),
                    force_new: true,
                }],
            }],
            ..DiffResult::default()
        };
        Plan::from_diff(&diff, "0123456789abcdef")
    }

    #[test]
    fn test_plan_json_lists_changes() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let parsed: Value = serde_json::from_str(&formatter.format_plan(&sample_plan(), false)).unwrap();

        assert_eq!(parsed["replaces"], json!(1));
        assert_eq!(parsed["actions"][0]["resource"], json!("network.web"));
        assert_eq!(parsed["actions"][0]["changes"][0]["new"], json!("zone-b"));
    }

    #[test]
    fn test_plan_text_shows_detail_on_request() {
        colored::control::set_override(false);
        let formatter = OutputFormatter::new(OutputFormat::Text);

        let brief = formatter.format_plan(&sample_plan(), false);
        assert!(brief.contains("01234567"));
        assert!(!brief.contains("forces replacement"));

        let detailed = formatter.format_plan(&sample_plan(), true);
        assert!(detailed.contains(r#"zone_name: "zone-a" -> "zone-b" (forces replacement)"#));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("ééééééééééé", 6), "ééé...");
    }
}
