//! Text and JSON output for plans and apply results.

use std::fmt::Write;

use serde::Serialize;
use serde_json::Value;

use poolwright_provisioner::plan::{Cause, Change, Plan, Step};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    Json,
}

pub fn json<T: Serialize + ?Sized>(data: &T) -> eyre::Result<String> {
    Ok(serde_json::to_string_pretty(data)?)
}

fn symbol(plan: &Plan) -> &'static str {
    if plan.steps.contains(&Step::Delete) {
        "-"
    } else if plan.destructive {
        "-/+"
    } else if plan.steps.contains(&Step::Create) {
        "+"
    } else {
        "~"
    }
}

fn verb(plan: &Plan) -> &'static str {
    match plan.cause {
        Cause::Vanished => return "will be created again (tracked pool no longer exists)",
        Cause::Degraded => return "is missing members, apply will wait for them",
        _ => {}
    }
    match symbol(plan) {
        "-/+" => "will be replaced",
        "+" => "will be created",
        "-" => "will be destroyed",
        _ => "will be updated in place",
    }
}

fn value(v: &Value) -> String {
    match v {
        Value::Null => "(none)".to_string(),
        Value::String(s) if s.is_empty() => "\"\"".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => "[]".to_string(),
        other => other.to_string(),
    }
}

/// Render plans the way `plan` prints them.
pub fn plans(plans: &[Plan]) -> String {
    let mut out = String::new();
    let changed: Vec<&Plan> = plans.iter().filter(|p| p.needs_apply()).collect();
    if changed.is_empty() {
        out.push_str("No changes. Instance pools match the manifest.\n");
        return out;
    }

    for plan in &changed {
        let _ = write!(out, "{} {} {}", symbol(plan), plan.addr, verb(plan));
        if let Some(id) = &plan.pool_id {
            let _ = write!(out, " (id {id})");
        }
        out.push('\n');

        for field in plan.changed_fields() {
            let marker = match field.change {
                Change::Replace => "  # forces replacement",
                Change::Update | Change::Unchanged => "",
            };
            let _ = writeln!(
                out,
                "    {}: {} -> {}{marker}",
                field.field.label(),
                value(&field.actual),
                value(&field.expected)
            );
        }
        for step in &plan.steps {
            if let Step::Scale { from, to } = step {
                let _ = writeln!(out, "    scale {from} -> {to} instances");
            }
        }
    }

    let count = |s: &str| changed.iter().filter(|p| symbol(p) == s).count();
    let _ = writeln!(
        out,
        "\nPlan: {} to add, {} to change, {} to replace, {} to destroy.",
        count("+"),
        count("~"),
        count("-/+"),
        count("-")
    );
    out
}
