use crate::engine::CorrectionEngine;
use crate::error::LineageError;
use crate::session::CorrectionSession;
use itertools::Itertools;
use lineage_protocol::{Batch, CellId, OpResult, Operation, StepNum};
use serde_json::{Value, json};
use std::{fmt::Display, fs, str::FromStr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Help,
    Capabilities,
    Summary,
    Step { step: StepNum },
    Next,
    Previous,
    Cells,
    Select { cell_id: CellId },
    Isolate { on: bool },
    Overlay,
    Rename { old_id: CellId, new_id: CellId },
    Reparent { cell_id: CellId, new_parent_id: CellId },
    Edit { new_id: CellId, new_parent_id: CellId },
    Validate,
    Log,
    Op { payload: String },
    Batch { payload: String },
    Save { path: String },
}

#[derive(Debug, Clone)]
pub struct ShellRunResult {
    pub state_changed: bool,
    pub output: Value,
}

impl ShellCommand {
    pub fn preview(&self) -> String {
        match self {
            Self::Help => "show shell command help".to_string(),
            Self::Capabilities => "inspect engine capabilities".to_string(),
            Self::Summary => "show session summary".to_string(),
            Self::Step { step } => format!("go to step {step}"),
            Self::Next => "go to the next step".to_string(),
            Self::Previous => "go to the previous step".to_string(),
            Self::Cells => "list cells at the current step".to_string(),
            Self::Select { cell_id } => format!("select cell {cell_id}"),
            Self::Isolate { on } => format!("turn isolate {}", if *on { "on" } else { "off" }),
            Self::Overlay => "show overlay labels for the current step".to_string(),
            Self::Rename { old_id, new_id } => {
                format!("rename cell {old_id} to {new_id} from the current step on")
            }
            Self::Reparent {
                cell_id,
                new_parent_id,
            } => format!("set parent of cell {cell_id} to {new_parent_id} from the current step on"),
            Self::Edit {
                new_id,
                new_parent_id,
            } => format!("change selected cell to id {new_id}, parent {new_parent_id}"),
            Self::Validate => "check parent references".to_string(),
            Self::Log => "show applied operations".to_string(),
            Self::Op { .. } => "apply one engine operation from JSON".to_string(),
            Self::Batch { .. } => "apply an operation batch from JSON".to_string(),
            Self::Save { path } => format!("save corrected table to '{path}'"),
        }
    }

    pub fn is_state_mutating(&self) -> bool {
        matches!(
            self,
            Self::Rename { .. }
                | Self::Reparent { .. }
                | Self::Edit { .. }
                | Self::Op { .. }
                | Self::Batch { .. }
        )
    }
}

pub fn shell_help_text() -> &'static str {
    "Cell lineage shell commands:\n\
help\n\
capabilities\n\
summary\n\
step N\n\
next | prev\n\
cells\n\
select CELL_ID\n\
isolate on|off\n\
overlay\n\
rename OLD_ID NEW_ID\n\
reparent CELL_ID PARENT_ID\n\
edit NEW_ID NEW_PARENT_ID\n\
validate\n\
log\n\
op <operation-json-or-@file>\n\
batch <batch-json-or-@file>\n\
save OUTPUT.csv\n\
Corrections apply from the current step onward; parent 0 means no parent"
}

/// Joins the arguments of `op`/`batch` back into one JSON text or `@path` reference.
fn payload_argument(tokens: &[String], what: &str) -> Result<String, String> {
    let payload = tokens[1..].join(" ");
    match payload.trim() {
        "" => Err(format!("Missing {what} JSON")),
        trimmed => Ok(trimmed.to_string()),
    }
}

fn load_payload(payload: &str, what: &str) -> Result<String, String> {
    match payload.strip_prefix('@') {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| format!("Could not read {what} file '{path}': {e}")),
        None => Ok(payload.to_string()),
    }
}

fn parse_number<T>(token: &str, what: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: Display,
{
    token
        .trim()
        .parse::<T>()
        .map_err(|e| format!("Invalid {what} '{token}': {e}"))
}

fn engine_error(e: LineageError) -> String {
    format!("{:?}: {e}", e.code())
}

/// Checks the word count against a usage line such as `"rename OLD_ID NEW_ID"`.
fn expect_args(tokens: &[String], usage: &str) -> Result<(), String> {
    if tokens.len() == usage.split_whitespace().count() {
        Ok(())
    } else {
        Err(format!("Usage: {usage}"))
    }
}

pub fn parse_shell_tokens(tokens: &[String]) -> Result<ShellCommand, String> {
    let Some(cmd) = tokens.first() else {
        return Err("Missing shell command".to_string());
    };
    let command = match cmd.as_str() {
        "help" | "-h" | "--help" => ShellCommand::Help,
        "capabilities" => {
            expect_args(tokens, "capabilities")?;
            ShellCommand::Capabilities
        }
        "summary" | "state-summary" => {
            expect_args(tokens, "summary")?;
            ShellCommand::Summary
        }
        "step" => {
            expect_args(tokens, "step N")?;
            ShellCommand::Step {
                step: parse_number(&tokens[1], "step")?,
            }
        }
        "next" => {
            expect_args(tokens, "next")?;
            ShellCommand::Next
        }
        "prev" | "previous" => {
            expect_args(tokens, "prev")?;
            ShellCommand::Previous
        }
        "cells" => {
            expect_args(tokens, "cells")?;
            ShellCommand::Cells
        }
        "select" => {
            expect_args(tokens, "select CELL_ID")?;
            ShellCommand::Select {
                cell_id: parse_number(&tokens[1], "cell id")?,
            }
        }
        "isolate" => {
            expect_args(tokens, "isolate on|off")?;
            let on = match tokens[1].as_str() {
                "on" | "true" | "1" => true,
                "off" | "false" | "0" => false,
                other => {
                    return Err(format!(
                        "Unknown isolate mode '{other}', expected 'on' or 'off'"
                    ));
                }
            };
            ShellCommand::Isolate { on }
        }
        "overlay" => {
            expect_args(tokens, "overlay")?;
            ShellCommand::Overlay
        }
        "rename" => {
            expect_args(tokens, "rename OLD_ID NEW_ID")?;
            ShellCommand::Rename {
                old_id: parse_number(&tokens[1], "cell id")?,
                new_id: parse_number(&tokens[2], "cell id")?,
            }
        }
        "reparent" => {
            expect_args(tokens, "reparent CELL_ID PARENT_ID")?;
            ShellCommand::Reparent {
                cell_id: parse_number(&tokens[1], "cell id")?,
                new_parent_id: parse_number(&tokens[2], "parent id")?,
            }
        }
        "edit" | "change" => {
            expect_args(tokens, "edit NEW_ID NEW_PARENT_ID")?;
            ShellCommand::Edit {
                new_id: parse_number(&tokens[1], "cell id")?,
                new_parent_id: parse_number(&tokens[2], "parent id")?,
            }
        }
        "validate" => {
            expect_args(tokens, "validate")?;
            ShellCommand::Validate
        }
        "log" => {
            expect_args(tokens, "log")?;
            ShellCommand::Log
        }
        "op" => ShellCommand::Op {
            payload: payload_argument(tokens, "operation")?,
        },
        "batch" => ShellCommand::Batch {
            payload: payload_argument(tokens, "batch")?,
        },
        "save" => {
            expect_args(tokens, "save OUTPUT.csv")?;
            ShellCommand::Save {
                path: tokens[1].clone(),
            }
        }
        other => return Err(format!("Unknown shell command '{other}'. Try: help")),
    };
    Ok(command)
}

pub fn parse_shell_line(line: &str) -> Result<ShellCommand, String> {
    let tokens = split_shell_words(line)?;
    parse_shell_tokens(&tokens)
}

/// Splits a command line into words. Quotes group characters into one word
/// (`''` is an empty word); a backslash takes the next character literally
/// except inside single quotes.
pub fn split_shell_words(line: &str) -> Result<Vec<String>, String> {
    let mut words = vec![];
    let mut word: Option<String> = None;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some('\''), c) => word.get_or_insert_with(String::new).push(c),
            (_, '\\') => {
                let escaped = chars
                    .next()
                    .ok_or("Trailing backslash in shell command")?;
                word.get_or_insert_with(String::new).push(escaped);
            }
            (Some(_), c) => word.get_or_insert_with(String::new).push(c),
            (None, '\'' | '"') => {
                quote = Some(ch);
                word.get_or_insert_with(String::new);
            }
            (None, c) if c.is_whitespace() => words.extend(word.take()),
            (None, c) => word.get_or_insert_with(String::new).push(c),
        }
    }
    if let Some(q) = quote {
        return Err(format!("Missing closing {q} in shell command"));
    }
    words.extend(word);
    if words.is_empty() {
        return Err("Empty shell command".to_string());
    }
    Ok(words)
}

fn position_output(session: &CorrectionSession) -> Value {
    json!({
        "step": session.current_step(),
        "label": session.step_label(),
        "image": session.current_image().map(|p| p.display().to_string()),
        "selected": session.selected(),
        "selected_parent": session.selected_parent(),
    })
}

fn correction_output(session: &CorrectionSession, op_result: OpResult) -> ShellRunResult {
    ShellRunResult {
        state_changed: op_result.changed_cells > 0,
        output: json!({ "result": op_result, "selected": session.selected() }),
    }
}

pub fn execute_shell_command(
    session: &mut CorrectionSession,
    command: &ShellCommand,
) -> Result<ShellRunResult, String> {
    let unchanged = |output: Value| ShellRunResult {
        state_changed: false,
        output,
    };
    let result = match command {
        ShellCommand::Help => unchanged(json!({ "help": shell_help_text() })),
        ShellCommand::Capabilities => unchanged(
            serde_json::to_value(CorrectionEngine::capabilities())
                .map_err(|e| format!("Could not serialize capabilities: {e}"))?,
        ),
        ShellCommand::Summary => unchanged(
            serde_json::to_value(session.summary())
                .map_err(|e| format!("Could not serialize session summary: {e}"))?,
        ),
        ShellCommand::Step { step } => {
            session.go_to_step(*step).map_err(engine_error)?;
            unchanged(position_output(session))
        }
        ShellCommand::Next => {
            session.next_step();
            unchanged(position_output(session))
        }
        ShellCommand::Previous => {
            session.previous_step();
            unchanged(position_output(session))
        }
        ShellCommand::Cells => {
            let cells = session.cell_choices();
            unchanged(json!({
                "step": session.current_step(),
                "cells": cells,
                "text": format!("{}: {}", session.step_label(), cells.iter().join(", ")),
            }))
        }
        ShellCommand::Select { cell_id } => {
            session.select_cell(*cell_id).map_err(engine_error)?;
            unchanged(position_output(session))
        }
        ShellCommand::Isolate { on } => {
            session.set_isolate(*on);
            unchanged(json!({ "isolate": on }))
        }
        ShellCommand::Overlay => unchanged(json!({
            "step": session.current_step(),
            "isolate": session.isolate(),
            "labels": session.overlay(),
        })),
        ShellCommand::Rename { old_id, new_id } => {
            let op_result = session.rename(*old_id, *new_id).map_err(engine_error)?;
            correction_output(session, op_result)
        }
        ShellCommand::Reparent {
            cell_id,
            new_parent_id,
        } => {
            let op_result = session
                .reparent(*cell_id, *new_parent_id)
                .map_err(engine_error)?;
            correction_output(session, op_result)
        }
        ShellCommand::Edit {
            new_id,
            new_parent_id,
        } => {
            let op_result = session
                .change_selected(*new_id, *new_parent_id)
                .map_err(engine_error)?;
            correction_output(session, op_result)
        }
        ShellCommand::Validate => {
            let dangling = session.index().dangling_parents();
            unchanged(json!({ "valid": dangling.is_empty(), "dangling": dangling }))
        }
        ShellCommand::Log => unchanged(json!({ "operations": session.engine().operation_log() })),
        ShellCommand::Op { payload } => {
            let json_text = load_payload(payload, "operation")?;
            let op: Operation = serde_json::from_str(&json_text)
                .map_err(|e| format!("Invalid operation JSON: {e}"))?;
            let op_result = session.apply(op).map_err(engine_error)?;
            correction_output(session, op_result)
        }
        ShellCommand::Batch { payload } => {
            let json_text = load_payload(payload, "batch")?;
            let batch: Batch = serde_json::from_str(&json_text)
                .map_err(|e| format!("Invalid batch JSON: {e}"))?;
            let results = session.apply_batch(batch).map_err(engine_error)?;
            ShellRunResult {
                state_changed: results.iter().any(|r| r.changed_cells > 0),
                output: json!({ "results": results, "selected": session.selected() }),
            }
        }
        ShellCommand::Save { path } => {
            let summary = session.save(path).map_err(engine_error)?;
            let mut message = format!("Saved {} rows to '{path}'", summary.rows);
            if summary.rows_unindexed > 0 {
                message.push_str(&format!(
                    "; {} merged-over row(s) kept their original values",
                    summary.rows_unindexed
                ));
            }
            unchanged(json!({ "message": message, "summary": summary }))
        }
    };
    Ok(result)
}
