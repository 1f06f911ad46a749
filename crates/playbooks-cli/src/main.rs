//! `playbooks` -- run a compiled playbook program from the terminal.
//!
//! Streams agent `Say` output to stdout as it is generated and bridges
//! stdin lines to the main agent as messages from the default human.

mod output;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use playbooks_checkpoint::SessionMap;
use playbooks_runtime::{OpenAiChunkSource, Program, RuntimeConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "playbooks", about = "Run compiled playbook programs", version)]
struct Cli {
    /// Compiled program files (.pbasm).
    #[arg(required = true)]
    programs: Vec<String>,

    /// Resume the previous session for these programs.
    #[arg(long)]
    resume: bool,

    /// Use an explicit session id.
    #[arg(long)]
    session_id: Option<String>,

    /// Config file path.
    #[arg(long, default_value = "playbooks.toml")]
    config: String,

    /// Verbose logging (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    let filter = match cli.verbose {
        0 => "warn,playbooks_runtime=info",
        1 => "info,playbooks_runtime=debug",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).expect("static filter"))
        .with_writer(std::io::stderr)
        .init();

    let config = RuntimeConfig::load(&cli.config).context("loading config")?;

    let session_id = if let Some(session_id) = cli.session_id {
        Some(session_id)
    } else if cli.resume {
        let map = SessionMap::new(&config.durability.storage_path);
        let previous = map
            .get_last_session(&cli.programs)
            .await
            .context("reading session map")?;
        if previous.is_none() {
            anyhow::bail!("no previous session recorded for these programs");
        }
        previous
    } else {
        None
    };

    let api_key = std::env::var(&config.llm.api_key_env).ok();
    let llm = Arc::new(OpenAiChunkSource::new(config.llm.api_base.clone(), api_key));

    let resume = cli.resume;
    let (program, mut agents) =
        Program::create_run(&cli.programs, config, llm, session_id)
            .await
            .context("creating run")?;

    if resume {
        let (restored, total) = program.restore(&mut agents).await.context("restoring")?;
        if restored == 0 && total > 0 {
            anyhow::bail!("restore failed: 0 of {total} agents restored");
        }
        eprintln!("resumed session {} ({restored}/{total} agents)", program.session_id());
    }

    program
        .observe_human_streams(Arc::new(output::TerminalObserver::new()))
        .context("attaching output observer")?;

    // Bridge stdin lines to the first AI agent as human messages.
    let stdin_program = Arc::clone(&program);
    let main_agent_id = agents
        .first()
        .map(|a| a.id().to_string())
        .context("program has no AI agent")?;
    tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;

        let stdin = tokio::io::stdin();
        let mut reader = tokio::io::BufReader::new(stdin);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let content = line.trim_end();
                    if content.is_empty() {
                        continue;
                    }
                    if let Err(error) = stdin_program
                        .route_message("human", &main_agent_id, content, None)
                        .await
                    {
                        tracing::error!(%error, "failed to route stdin message");
                    }
                }
            }
        }
    });

    program.begin(agents).await.context("running program")?;
    Ok(())
}
