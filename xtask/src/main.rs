use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::net::TcpListener;
use std::process::Command;

#[derive(Parser)]
#[command(author, version, about = "Project automation commands", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run cargo nextest with default configuration
    Nextest {
        #[arg(long)]
        profile: Option<String>,
        #[arg(long)]
        release: bool,
    },
    /// Stand in for a Maya command port and print every payload received
    Listen {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 7002)]
        port: u16,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Nextest { profile, release } => run_nextest(profile, release)?,
        Commands::Listen { host, port } => listen(&host, port)?,
    }
    Ok(())
}

fn run_nextest(profile: Option<String>, release: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("nextest").arg("run").arg("-p").arg("mayasend");
    if let Some(profile) = profile {
        cmd.arg("--profile").arg(profile);
    }
    if release {
        cmd.arg("--release");
    }
    let status = cmd.status()?;
    if !status.success() {
        anyhow::bail!("cargo nextest run failed");
    }
    Ok(())
}

fn listen(host: &str, port: u16) -> Result<()> {
    let listener = TcpListener::bind((host, port))
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    println!("listening on {host}:{port}");
    for stream in listener.incoming() {
        let mut stream = stream.context("failed to accept connection")?;
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".into());
        let mut payload = Vec::new();
        stream
            .read_to_end(&mut payload)
            .with_context(|| format!("failed to read from {peer}"))?;
        let text = String::from_utf8_lossy(&payload).replace('\r', "\n");
        println!("--- {peer} ({} bytes)\n{text}", payload.len());
    }
    Ok(())
}
