//! Thin CLI front-end for `ragserverd`. Most subcommands are `reqwest`
//! calls against the running daemon; `start`/`stop`/`restart` manage a
//! child process directly, and `doctor`/`reset` are local filesystem
//! checks. Grounded on the clap derive style in the pack's
//! `neurlang::src::bin::assembler`.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ragcore::config::RagConfig;

#[derive(Parser)]
#[command(name = "ragctl")]
#[command(about = "Control and query the hybrid RAG service")]
struct Cli {
    /// Base URL of the running ragserverd
    #[arg(long, default_value = "http://127.0.0.1:8787")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Spawn ragserverd as a background process
    Start,
    /// Stop the background ragserverd process
    Stop,
    /// Stop then start ragserverd
    Restart,
    /// Ask a one-shot question
    Query {
        question: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Ask a question as part of a named chat session (keeps history)
    Chat {
        session: String,
        question: String,
    },
    /// Ingest one or more files
    Ingest { files: Vec<PathBuf> },
    /// Print index/document counts
    Stats,
    /// Read-only health checks against the data directory and daemon
    Doctor,
    /// Delete the data directory
    Reset {
        #[arg(long)]
        yes: bool,
    },
    /// Switch the active chat and/or embedding model
    Model {
        #[arg(long)]
        chat: Option<String>,
        #[arg(long)]
        embed: Option<String>,
    },
    /// Run the retrieval-only debug path for a question
    Debug { question: String },
    /// Fetch one chunk by id
    Chunk { id: i64 },
}

fn pid_file(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("ragserverd.pid")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RagConfig::default();

    match cli.command {
        Commands::Start => start(&config)?,
        Commands::Stop => stop(&config)?,
        Commands::Restart => {
            stop(&config).ok();
            start(&config)?;
        }
        Commands::Query { question, session } => run_async(query(&cli.server, &question, session))?,
        Commands::Chat { session, question } => run_async(query(&cli.server, &question, Some(session)))?,
        Commands::Ingest { files } => run_async(ingest(&cli.server, &files))?,
        Commands::Stats => run_async(stats(&cli.server))?,
        Commands::Doctor => run_async(doctor(&cli.server, &config))?,
        Commands::Reset { yes } => reset(&config, yes)?,
        Commands::Model { chat, embed } => run_async(set_model(&cli.server, chat, embed))?,
        Commands::Debug { question } => run_async(debug(&cli.server, &question))?,
        Commands::Chunk { id } => run_async(chunk(&cli.server, id))?,
    }
    Ok(())
}

fn run_async<F: std::future::Future<Output = Result<()>>>(f: F) -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?
        .block_on(f)
}

fn start(config: &RagConfig) -> Result<()> {
    let pid_path = pid_file(&config.data_dir);
    if pid_path.exists() {
        bail!("ragserverd already appears to be running (pid file at {})", pid_path.display());
    }
    std::fs::create_dir_all(&config.data_dir)?;

    let exe = std::env::current_exe()?;
    let ragserverd = exe.with_file_name("ragserverd");
    let child = Command::new(ragserverd).spawn().context("failed to spawn ragserverd")?;

    let mut file = std::fs::File::create(&pid_path)?;
    write!(file, "{}", child.id())?;
    println!("started ragserverd (pid {})", child.id());
    Ok(())
}

fn stop(config: &RagConfig) -> Result<()> {
    let pid_path = pid_file(&config.data_dir);
    let pid: u32 = std::fs::read_to_string(&pid_path)
        .context("no pid file found, is ragserverd running?")?
        .trim()
        .parse()
        .context("pid file did not contain a valid pid")?;

    #[cfg(unix)]
    {
        Command::new("kill").arg(pid.to_string()).status().context("failed to signal ragserverd")?;
    }
    #[cfg(not(unix))]
    {
        Command::new("taskkill").args(["/PID", &pid.to_string(), "/F"]).status()?;
    }

    std::fs::remove_file(&pid_path).ok();
    println!("stopped ragserverd (pid {pid})");
    Ok(())
}

async fn query(server: &str, question: &str, session: Option<String>) -> Result<()> {
    let client = reqwest::Client::new();
    let body = serde_json::json!({ "session_id": session, "query": question });
    let resp: serde_json::Value = client
        .post(format!("{server}/query"))
        .json(&body)
        .send()
        .await?
        .json()
        .await?;
    println!("{}", resp["answer"].as_str().unwrap_or(""));
    if let Some(sources) = resp["sources"].as_array() {
        for s in sources {
            println!("  [cid:{}] {} (chunk {})", s["chunk_id"], s["filename"], s["chunk_index"]);
        }
    }
    Ok(())
}

async fn ingest(server: &str, files: &[PathBuf]) -> Result<()> {
    let progress = indicatif::ProgressBar::new(files.len() as u64);
    progress.set_style(
        indicatif::ProgressStyle::with_template("{bar:40} {pos}/{len} reading files")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar()),
    );

    let client = reqwest::Client::new();
    let mut form = reqwest::multipart::Form::new();
    for path in files {
        let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("upload.bin").to_string();
        form = form.part("files", reqwest::multipart::Part::bytes(bytes).file_name(filename));
        progress.inc(1);
    }
    progress.finish_and_clear();

    let resp: serde_json::Value = client.post(format!("{server}/ingest")).multipart(form).send().await?.json().await?;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}

async fn stats(server: &str) -> Result<()> {
    let resp: serde_json::Value = reqwest::get(format!("{server}/stats")).await?.json().await?;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}

async fn doctor(server: &str, config: &RagConfig) -> Result<()> {
    println!("data directory: {}", config.data_dir.display());
    println!("  exists: {}", config.data_dir.exists());
    println!("  chunks.sqlite3: {}", config.data_dir.join("chunks.sqlite3").exists());
    println!("  lexical/: {}", config.data_dir.join("lexical").exists());
    println!("  vectors/: {}", config.data_dir.join("vectors").exists());

    match reqwest::get(format!("{server}/health")).await {
        Ok(resp) if resp.status().is_success() => println!("ragserverd: reachable at {server}"),
        Ok(resp) => println!("ragserverd: responded with {}", resp.status()),
        Err(e) => println!("ragserverd: unreachable ({e})"),
    }
    Ok(())
}

fn reset(config: &RagConfig, yes: bool) -> Result<()> {
    if !yes {
        print!("delete {}? [y/N] ", config.data_dir.display());
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("aborted");
            return Ok(());
        }
    }
    if config.data_dir.exists() {
        std::fs::remove_dir_all(&config.data_dir)?;
    }
    println!("removed {}", config.data_dir.display());
    Ok(())
}

async fn set_model(server: &str, chat: Option<String>, embed: Option<String>) -> Result<()> {
    if chat.is_none() && embed.is_none() {
        bail!("pass --chat and/or --embed");
    }
    let client = reqwest::Client::new();
    let body = serde_json::json!({ "chat_model": chat, "embed_model": embed });
    let resp: serde_json::Value = client.post(format!("{server}/models")).json(&body).send().await?.json().await?;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}

async fn debug(server: &str, question: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let body = serde_json::json!({ "session_id": null, "query": question });
    let resp: serde_json::Value = client
        .post(format!("{server}/debug/retrieval"))
        .json(&body)
        .send()
        .await?
        .json()
        .await?;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}

async fn chunk(server: &str, id: i64) -> Result<()> {
    let resp: serde_json::Value = reqwest::get(format!("{server}/chunks/{id}")).await?.json().await?;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}
