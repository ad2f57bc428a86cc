//! Command-line front end standing in for the editor integration.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;

use crate::app::dispatch::{DispatchReport, Dispatcher, Notifier};
use crate::app::strip;
use crate::domain::model::Buffer;
use crate::infra::config::{Config, ConfigStore};
use crate::infra::transport::{RecordedSend, RecordingTransport, TcpTransport};

#[derive(Debug, Parser)]
#[command(
    name = "mayasend",
    author,
    version,
    about = "Send Python and MEL source to Maya command ports"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Extra configuration file applied on top of the global and workspace files.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send a selection, a file, or a file's whole package to Maya.
    Send(SendArgs),
    /// Print the effective configuration.
    Config {
        #[arg(long)]
        json: bool,
    },
    /// Print shell completions.
    Completions { shell: Shell },
}

#[derive(Debug, clap::Args)]
struct SendArgs {
    /// Source file. Sent whole unless `--lines` or `--stdin` select part of it.
    path: Option<PathBuf>,
    /// Syntax name; defaults to one derived from the file extension.
    #[arg(long)]
    syntax: Option<String>,
    /// Send only these 1-based inclusive line ranges, e.g. `--lines 3:10`.
    #[arg(long, value_name = "START:END", value_parser = parse_line_range)]
    lines: Vec<(usize, usize)>,
    /// Read the selection text from stdin.
    #[arg(long, conflicts_with = "lines")]
    stdin: bool,
    /// Send every sibling source file first, then this file.
    #[arg(long)]
    package: bool,
    /// The editor buffer has unsaved changes.
    #[arg(long)]
    unsaved: bool,
    /// Keep comment-only lines in selections.
    #[arg(long)]
    keep_comments: bool,
    #[arg(long)]
    host: Option<String>,
    /// Port for this send, whichever language is resolved.
    #[arg(long)]
    port: Option<u16>,
    /// Print the commands instead of connecting.
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    json: bool,
}

/// Writes user-facing messages to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn error(&self, message: &str) {
        eprintln!("error: {message}");
    }

    fn note(&self, message: &str) {
        eprintln!("{message}");
    }
}

/// Parse arguments from the process and run.
pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    crate::init(cli.verbose);
    execute(cli)
}

pub fn execute(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Send(args) => {
            let store = ConfigStore::open(cli.config)?;
            send(&store.snapshot(), args)
        }
        Commands::Config { json } => {
            let store = ConfigStore::open(cli.config)?;
            print_config(&store.snapshot(), json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "mayasend", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn send(config: &Config, args: SendArgs) -> Result<ExitCode> {
    let mut config = config.clone().with_endpoint(args.host.clone(), args.port);
    if args.keep_comments {
        config.strip_sending_comments = false;
    }
    let buffer = buffer_from_args(&args)?;

    if args.dry_run {
        let recorder = RecordingTransport::new();
        let dispatcher = Dispatcher::new(&recorder, StderrNotifier);
        if dispatcher.send(&config, &buffer, args.package).is_err() {
            return Ok(ExitCode::FAILURE);
        }
        print_recorded(&recorder.into_sent(), args.json)?;
        return Ok(ExitCode::SUCCESS);
    }

    let dispatcher = Dispatcher::new(TcpTransport::new(), StderrNotifier);
    match dispatcher.send(&config, &buffer, args.package) {
        Ok(report) => {
            print_report(&report, args.json)?;
            Ok(ExitCode::SUCCESS)
        }
        // Already shown through the notifier.
        Err(err) => {
            tracing::debug!(error = %err, "send failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn buffer_from_args(args: &SendArgs) -> Result<Buffer> {
    let syntax = match (&args.syntax, &args.path) {
        (Some(syntax), _) => syntax.clone(),
        (None, Some(path)) => syntax_from_extension(path),
        (None, None) => bail!("either a file path or --syntax is required"),
    };

    let mut buffer = Buffer::new(syntax).dirty(args.unsaved);
    if let Some(path) = &args.path {
        buffer = buffer.with_file(absolute(path)?);
    }

    if args.stdin {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("failed to read selection from stdin")?;
        buffer = buffer.with_selection(text).selecting(true);
    } else if !args.lines.is_empty() {
        let path = args
            .path
            .as_deref()
            .ok_or_else(|| anyhow!("--lines requires a file path"))?;
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        for &range in &args.lines {
            let text = slice_lines(&contents, range)
                .with_context(|| format!("invalid --lines for {}", path.display()))?;
            buffer = buffer.with_selection(text);
        }
        buffer = buffer.selecting(true);
    }

    Ok(buffer)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("unable to determine working directory")?;
    Ok(cwd.join(path))
}

/// Map a file extension to a syntax name the resolver understands.
fn syntax_from_extension(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "py" | "pyw" => "python".to_owned(),
        "mel" => "mel".to_owned(),
        _ => ext,
    }
}

fn parse_line_range(raw: &str) -> Result<(usize, usize), String> {
    let (start, end) = match raw.split_once(':') {
        Some((start, end)) => (start, end),
        None => (raw, raw),
    };
    let start: usize = start
        .trim()
        .parse()
        .map_err(|_| format!("invalid start line in '{raw}'"))?;
    let end: usize = end
        .trim()
        .parse()
        .map_err(|_| format!("invalid end line in '{raw}'"))?;
    if start == 0 || end < start {
        return Err(format!("line range '{raw}' must be 1-based with START <= END"));
    }
    Ok((start, end))
}

/// Lines `start..=end` of `contents`. A range running past the last line is cut short; one
/// starting after it is an error.
fn slice_lines(contents: &str, (start, end): (usize, usize)) -> Result<String> {
    let lines = strip::split_lines(contents);
    if start > lines.len() {
        bail!("line {start} is past the end of the file ({} lines)", lines.len());
    }
    let end = end.min(lines.len());
    Ok(lines[start - 1..end].join("\n"))
}

#[derive(Serialize)]
struct DryRunCommand<'a> {
    address: String,
    language: &'a str,
    wire_text: &'a str,
}

fn print_recorded(sent: &[RecordedSend], json: bool) -> Result<()> {
    let mut out = io::stdout().lock();
    if json {
        let commands: Vec<_> = sent
            .iter()
            .map(|send| DryRunCommand {
                address: send.target.address(),
                language: send.target.language.as_str(),
                wire_text: send.command.as_str(),
            })
            .collect();
        serde_json::to_writer_pretty(&mut out, &commands).context("failed to encode commands")?;
        writeln!(out)?;
        return Ok(());
    }

    for send in sent {
        writeln!(out, "# {} -> {}", send.target.language, send.target.address())?;
        // MEL joins lines with carriage returns; show them as line breaks.
        writeln!(out, "{}", send.command.as_str().replace('\r', "\n"))?;
    }
    Ok(())
}

fn print_report(report: &DispatchReport, json: bool) -> Result<()> {
    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, report).context("failed to encode report")?;
        writeln!(out)?;
        return Ok(());
    }

    if report.is_noop() {
        writeln!(out, "nothing to send")?;
        return Ok(());
    }
    for sent in &report.sent {
        let what = sent
            .path
            .as_ref()
            .map_or_else(|| "selection".to_owned(), |path| path.display().to_string());
        writeln!(
            out,
            "sent {what} ({} bytes) to {}",
            sent.bytes,
            report.target.address()
        )?;
    }
    Ok(())
}

fn print_config(config: &Config, json: bool) -> Result<()> {
    let rendered = if json {
        serde_json::to_string_pretty(config).context("failed to encode config")?
    } else {
        toml::to_string_pretty(config).context("failed to encode config")?
    };
    println!("{}", rendered.trim_end());
    Ok(())
}
