//! CLI interface for arianna

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::{self, Config};
use crate::engine::Engine;
use crate::health::HealthReport;
use crate::lifecycle::heartbeat::Heartbeat;

#[derive(Parser)]
#[command(name = "arianna")]
#[command(about = "Self-retraining character n-gram organism", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// State directory, overriding the config file
    #[arg(short, long, global = true, env = "ARIANNA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message, or start an interactive session when none is given
    Chat {
        message: Option<String>,
    },
    /// Train a fresh model from a file, or from the whole corpus
    Train {
        /// Text file to train on
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// N-gram order (default: adaptive)
        #[arg(short)]
        n: Option<usize>,
    },
    /// Generate text from the current model
    Generate {
        #[arg(short, long, default_value = "80")]
        length: usize,
        /// Seed text; its tail picks the starting context
        #[arg(short, long)]
        seed: Option<String>,
    },
    /// Run one reproduction cycle
    Reproduce,
    /// Poll for changes and dream on a schedule until Ctrl+C
    Watch {
        /// Poll once and exit
        #[arg(long)]
        once: bool,
    },
    /// Dream if idle long enough
    Dream {
        /// Ignore the idle threshold
        #[arg(short, long)]
        force: bool,
    },
    /// Force log rotation checks
    Rotate,
    /// Search the interaction log and its archives
    Search {
        needle: String,
    },
    /// Show the most frequent patterns
    Patterns {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Score the novelty of a text against pattern memory
    Novelty {
        text: String,
    },
    /// Print the health report as JSON
    Status,
    /// Start the HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Do not run the background heartbeat
        #[arg(long)]
        no_heartbeat: bool,
    },
    /// Show configuration
    Config {
        /// Print the config file path only
        #[arg(long)]
        path: bool,
        /// Print the built-in defaults
        #[arg(long)]
        defaults: bool,
    },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = &cli.data_dir {
        config.paths.data_dir = Some(dir.clone());
    }
    Ok(config)
}

fn open_engine(config: Config) -> Result<Arc<Engine>> {
    let layout = config.layout()?;
    let root = layout.root.clone();
    let engine = Engine::open(config, layout)
        .with_context(|| format!("Failed to open state in {}", root.display()))?;
    Ok(Arc::new(engine))
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        None => chat_session(open_engine(config)?).await?,
        Some(Commands::Chat { message }) => {
            let engine = open_engine(config)?;
            match message {
                Some(message) => println!("{}", engine.chat(&message).await),
                None => chat_session(engine).await?,
            }
        }
        Some(Commands::Train { file, n }) => {
            let engine = open_engine(config)?;
            let model = match file {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    engine.train(&text, n)?
                }
                None => engine.train_from_corpus(n)?,
            };
            println!(
                "Trained n={} model with {} contexts -> {}",
                model.n(),
                model.context_count(),
                engine.layout().model_file.display()
            );
        }
        Some(Commands::Generate { length, seed }) => {
            let engine = open_engine(config)?;
            println!("{}", engine.generate(length, seed.as_deref())?);
        }
        Some(Commands::Reproduce) => {
            let engine = open_engine(config)?;
            let report = engine.reproduce()?;
            println!("{}", report);
        }
        Some(Commands::Watch { once }) => {
            let heartbeat_config = config.heartbeat.clone();
            let engine = open_engine(config)?;
            if once {
                let reproduced = engine.check_for_changes()?;
                println!(
                    "{}",
                    if reproduced { "Change detected; reproduced" } else { "No changes" }
                );
            } else {
                let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
                let mut heartbeat = Heartbeat::new(heartbeat_config, engine);
                let handle = tokio::spawn(async move { heartbeat.run(shutdown_rx).await });
                println!("Watching. Press Ctrl+C to stop.");
                tokio::signal::ctrl_c().await?;
                let _ = shutdown_tx.send(());
                handle.await?;
            }
        }
        Some(Commands::Dream { force }) => {
            let threshold = if force {
                Duration::ZERO
            } else {
                config.dream.threshold()
            };
            let engine = open_engine(config)?;
            match engine.dream(threshold)? {
                Some(text) => println!("{}", text),
                None => println!("Not dreaming (recent activity or no model)"),
            }
        }
        Some(Commands::Rotate) => {
            let engine = open_engine(config)?;
            let archived = engine.rotate_logs()?;
            if archived.is_empty() {
                println!("Nothing to rotate");
            }
            for path in archived {
                println!("Archived {}", path.display());
            }
        }
        Some(Commands::Search { needle }) => {
            let engine = open_engine(config)?;
            let hits = engine.search_logs(&needle)?;
            if hits.is_empty() {
                println!("No matches for {:?}", needle);
            }
            for line in hits {
                println!("{}", line);
            }
        }
        Some(Commands::Patterns { limit }) => {
            let engine = open_engine(config)?;
            for (pattern, count) in engine.patterns().top(limit)? {
                println!("{:>8}  {:?}", count, pattern);
            }
        }
        Some(Commands::Novelty { text }) => {
            let engine = open_engine(config)?;
            println!("{:.3}", engine.novelty(&text)?);
        }
        Some(Commands::Status) => {
            let engine = open_engine(config)?;
            let report = HealthReport::collect(&engine);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(Commands::Serve { host, port, no_heartbeat }) => {
            let mut server = config.server.clone();
            if let Some(host) = host {
                server.host = host;
            }
            if let Some(port) = port {
                server.port = port;
            }
            let heartbeat = (!no_heartbeat).then(|| config.heartbeat.clone());
            let engine = open_engine(config)?;
            crate::server::start(engine, &server, heartbeat).await?;
        }
        Some(Commands::Config { path, defaults }) => {
            if defaults {
                print!("{}", config::default_config_toml());
            } else if path {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => config::config_path()?,
                };
                println!("{}", path.display());
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
                println!("# state directory: {}", config.data_dir()?.display());
            }
        }
    }

    Ok(())
}

async fn chat_session(engine: Arc<Engine>) -> Result<()> {
    let rl_config = rustyline::Config::builder()
        .edit_mode(rustyline::EditMode::Emacs)
        .auto_add_history(true)
        .build();
    let mut rl = rustyline::DefaultEditor::with_config(rl_config)?;
    let history = history_path(&engine.layout().root);
    let _ = rl.load_history(&history);

    println!("arianna {} (exit or Ctrl+D to leave)", crate::VERSION);

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input == "exit" || input == "quit" {
                    break;
                }
                println!("{}", engine.chat(input).await);
            }
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    if let Err(e) = rl.save_history(&history) {
        tracing::debug!("Failed to save chat history: {}", e);
    }
    Ok(())
}

fn history_path(root: &Path) -> PathBuf {
    root.join("chat_history.txt")
}
