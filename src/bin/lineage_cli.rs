//! Command line entry point over a headless correction session.

use anyhow::{Context, anyhow, bail};
use cell_lineage::{
    about,
    config::SessionConfig,
    protocol::CollisionPolicy,
    session::CorrectionSession,
    shell::{
        ShellCommand, execute_shell_command, parse_shell_line, parse_shell_tokens,
        shell_help_text,
    },
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde::Serialize;
use std::{env, fs};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct CliArgs {
    show_help: bool,
    show_version: bool,
    config_path: Option<String>,
    um_per_pixel: Option<f64>,
    merge: bool,
    strict: bool,
    images: Option<String>,
    table: Option<String>,
    command: Vec<String>,
}

fn usage() {
    eprintln!(
        "Usage:\n  \
  lineage_cli --version\n  \
  lineage_cli [OPTIONS] --images DIR --table TRACKS.csv <command...>\n  \
  lineage_cli [OPTIONS] --images DIR --table TRACKS.csv shell\n  \
  lineage_cli [OPTIONS] --images DIR --table TRACKS.csv run-script FILE\n\n  \
  Options:\n  \
  --config PATH        JSON session config\n  \
  --um-per-pixel X     micrometers per pixel (default 0.144)\n  \
  --merge              let renames overwrite an existing cell id\n  \
  --strict             reject dangling parent references\n\n  \
  Set RUST_LOG=debug to trace propagation.\n\n{}",
        shell_help_text()
    );
}

fn option_value<'a>(args: &'a [String], idx: usize, name: &str) -> anyhow::Result<&'a String> {
    args.get(idx + 1)
        .ok_or_else(|| anyhow!("Missing value after {name}"))
}

fn parse_cli_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "--help" | "-h" => {
                parsed.show_help = true;
                idx += 1;
            }
            "--version" | "-V" => {
                parsed.show_version = true;
                idx += 1;
            }
            "--merge" => {
                parsed.merge = true;
                idx += 1;
            }
            "--strict" => {
                parsed.strict = true;
                idx += 1;
            }
            "--config" => {
                parsed.config_path = Some(option_value(args, idx, "--config")?.clone());
                idx += 2;
            }
            "--images" => {
                parsed.images = Some(option_value(args, idx, "--images")?.clone());
                idx += 2;
            }
            "--table" => {
                parsed.table = Some(option_value(args, idx, "--table")?.clone());
                idx += 2;
            }
            "--um-per-pixel" => {
                let raw = option_value(args, idx, "--um-per-pixel")?;
                parsed.um_per_pixel = Some(
                    raw.parse()
                        .with_context(|| format!("Invalid --um-per-pixel value '{raw}'"))?,
                );
                idx += 2;
            }
            arg if arg.starts_with("--") => bail!("Unknown option '{arg}'"),
            _ => {
                parsed.command = args[idx..].to_vec();
                break;
            }
        }
    }
    Ok(parsed)
}

fn build_config(cli: &CliArgs) -> anyhow::Result<SessionConfig> {
    let mut config = match &cli.config_path {
        Some(path) => SessionConfig::load_from_path(path)?,
        None => SessionConfig::default(),
    };
    if let Some(scale) = cli.um_per_pixel {
        config.um_per_pixel = scale;
    }
    if cli.merge {
        config.collision_policy = CollisionPolicy::Merge;
    }
    if cli.strict {
        config.strict_parents = true;
    }
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text =
        serde_json::to_string_pretty(value).context("Could not serialize JSON output")?;
    println!("{text}");
    Ok(())
}

fn run_command(session: &mut CorrectionSession, command: &ShellCommand) -> anyhow::Result<()> {
    tracing::debug!(command = %command.preview(), "executing");
    let result = execute_shell_command(session, command).map_err(|e| anyhow!(e))?;
    print_json(&result.output)
}

fn run_script(session: &mut CorrectionSession, path: &str) -> anyhow::Result<()> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Could not read script '{path}'"))?;
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let command = parse_shell_line(line)
            .map_err(|e| anyhow!("{path}:{}: {e}", line_no + 1))?;
        run_command(session, &command)
            .with_context(|| format!("{path}:{}: '{line}' failed", line_no + 1))?;
    }
    Ok(())
}

fn run_interactive(session: &mut CorrectionSession) -> anyhow::Result<()> {
    let mut rl = DefaultEditor::new()?;
    let mut unsaved = false;
    loop {
        let prompt = format!("lineage [{}]> ", session.step_label());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "exit" || line == "quit" {
                    break;
                }
                rl.add_history_entry(line)?;
                let command = match parse_shell_line(line) {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("{e}");
                        continue;
                    }
                };
                match execute_shell_command(session, &command) {
                    Ok(result) => {
                        if result.state_changed {
                            unsaved = true;
                        }
                        if matches!(command, ShellCommand::Save { .. }) {
                            unsaved = false;
                        }
                        print_json(&result.output)?;
                    }
                    Err(e) => eprintln!("{e}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }
    if unsaved {
        tracing::warn!("leaving shell with unsaved corrections");
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = parse_cli_args(&args).inspect_err(|_| usage())?;
    if cli.show_version {
        println!("{}", about::version_cli_text());
        return Ok(());
    }
    if cli.show_help || cli.command.is_empty() {
        usage();
        if cli.show_help {
            return Ok(());
        }
        bail!("Missing command");
    }

    let config = build_config(&cli)?;
    let (Some(images), Some(table)) = (&cli.images, &cli.table) else {
        usage();
        bail!("Both --images and --table are required");
    };
    let mut session = CorrectionSession::open(images, table, &config)
        .with_context(|| format!("Could not open '{table}' with images from '{images}'"))?;

    match cli.command[0].as_str() {
        "shell" => run_interactive(&mut session),
        "run-script" => {
            if cli.command.len() != 2 {
                usage();
                bail!("run-script requires exactly one FILE");
            }
            run_script(&mut session, &cli.command[1])
        }
        _ => {
            let command = parse_shell_tokens(&cli.command).map_err(|e| anyhow!(e))?;
            if command.is_state_mutating() {
                tracing::warn!(
                    "'{}' is not saved in one-shot mode; use run-script or shell",
                    command.preview()
                );
            }
            run_command(&mut session, &command)
        }
    }
}
