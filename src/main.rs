// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! RPA4YOU: personal assistant with a local chat model and a
//! people-aware photo sorter.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::signal;
use tracing::{info, warn};

use rpa4you::config::AppConfig;
use rpa4you::detection::DetectionMethod;
use rpa4you::ollama::OllamaClient;
use rpa4you::sort::SortJob;
use rpa4you::tabs::chat::{render_entry, render_status, render_typing, ChatController, ChatTab};
use rpa4you::tabs::placeholder::{render_placeholder, PlaceholderTab};
use rpa4you::tabs::sort::{render_method, SortController, SortTab, INTRO};
use rpa4you::tabs::{render_tab_bar, Tab, APP_TITLE};
use rpa4you::task::POLL_INTERVAL;
use rpa4you::AssistantError;

/// RPA4YOU CLI - local chat assistant and photo sorter
#[derive(Parser, Debug)]
#[command(name = "rpa4you")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Personal assistant: local AI chat and people-detection photo sorting", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chat with the local language model
    Chat {
        /// Model to chat with (overrides config)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Copy pictures into folders with and without people
    Sort {
        /// Folder with the pictures to sort
        #[arg(short, long)]
        input: PathBuf,

        /// Destination for pictures with people
        #[arg(long)]
        with_people: PathBuf,

        /// Destination for pictures without people
        #[arg(long)]
        without_people: PathBuf,

        /// Detection method (overrides config)
        #[arg(short, long, value_enum)]
        method: Option<DetectionMethod>,
    },

    /// Show the placeholder tab
    Placeholder,

    /// Show AI engine and detector status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Initialize a new RPA4YOU folder
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !cli.quiet {
        info!("{} v{}", APP_TITLE, env!("CARGO_PKG_VERSION"));
    }

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

    match cli.command {
        Some(Commands::Chat { model }) => run_chat(config, model).await,
        Some(Commands::Sort { input, with_people, without_people, method }) => {
            let job = SortJob {
                input,
                with_people,
                without_people,
                method: method.unwrap_or(config.sort.method),
            };
            run_sort(config, job, &cli.format).await
        }
        Some(Commands::Placeholder) => {
            println!("{}", render_tab_bar(Tab::Placeholder));
            for line in render_placeholder(&PlaceholderTab) {
                println!("{}", line);
            }
            Ok(())
        }
        Some(Commands::Status) => run_status(config).await,
        Some(Commands::Config { action }) => run_config_command(config, action, &cli.config),
        Some(Commands::Init { dir, force }) => run_init(dir, force),
        None => run_chat(config, None).await,
    }
}

fn print_new_entries(chat: &mut ChatController) {
    for entry in chat.tab_mut().take_unrendered() {
        println!("{}\n", render_entry(entry));
    }
}

/// Interactive chat loop
async fn run_chat(config: AppConfig, model: Option<String>) -> Result<()> {
    let model = model.unwrap_or_else(|| config.ai_engine.models.chat.clone());
    let client = OllamaClient::new(
        &config.ai_engine.url,
        Duration::from_secs(config.ai_engine.timeout_secs),
    )?;

    let mut chat = ChatController::new(ChatTab::new(config.chat.clone()), client, &model, Handle::current());

    println!("{}\n", render_tab_bar(Tab::Chat));
    chat.load_model();
    print_new_entries(&mut chat);
    let mut shown_status = chat.tab().status().clone();
    println!("{}", render_status(&shown_status));
    println!("Type a message and press Enter. /clear resets the chat, /quit exits.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if chat.poll() {
                    if chat.tab().status() != &shown_status {
                        shown_status = chat.tab().status().clone();
                        println!("{}", render_status(&shown_status));
                    }
                    print_new_entries(&mut chat);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" | "/exit" => break,
                    "/clear" => {
                        if !chat.clear() {
                            println!("(Clear is disabled while the assistant is typing)");
                        }
                    }
                    text => {
                        if chat.send(text) {
                            println!("{}", render_typing());
                        }
                    }
                }
                print_new_entries(&mut chat);
            }
        }
    }

    if chat.is_busy() {
        warn!("Leaving while a model request is still running");
    }
    Ok(())
}

/// Run one batch with a live log
async fn run_sort(config: AppConfig, job: SortJob, format: &str) -> Result<()> {
    println!("{}\n", render_tab_bar(Tab::Sort));
    println!("{}\n", INTRO);
    println!("{}\n", render_method(job.method));

    let mut sorter = SortController::new(SortTab::new(job.method), config, Handle::current());
    if let Err(e) = sorter.start(job) {
        if let AssistantError::Validation(reason) = &e {
            println!("Warning: {}", reason);
            return Ok(());
        }
        return Err(e.into());
    }

    if let Some(token) = sorter.cancel_token() {
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Received Ctrl+C, stopping after the current picture...");
                token.cancel();
            }
        });
    }

    loop {
        let done = sorter.tick();
        for line in sorter.tab_mut().take_unrendered() {
            println!("{}", line);
        }
        if done {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let Some(report) = sorter.tab().last_report() else {
        bail!("Picture sorting could not start");
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(report)?);
    }

    if let Some(reason) = &report.fatal {
        bail!("Picture sorting aborted: {}", reason);
    }
    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            println!("Configuration at {:?} is valid", config_path);
            println!("  Chat model: {}", config.ai_engine.models.chat);
            println!("  Vision model: {}", config.ai_engine.models.vision);
            println!("  Detection method: {}", config.sort.method);
            println!("  Cascade: {}", config.sort.cascade.path);
        }
    }

    Ok(())
}

/// Run status check
async fn run_status(config: AppConfig) -> Result<()> {
    let client = OllamaClient::new(
        &config.ai_engine.url,
        Duration::from_secs(config.ai_engine.timeout_secs),
    )?;
    let wanted = [&config.ai_engine.models.chat, &config.ai_engine.models.vision];

    println!("RPA4YOU v{} Status", env!("CARGO_PKG_VERSION"));
    println!("======================");

    match client.health_check().await {
        Ok(()) => println!("Ollama: Running at {}", client.base_url()),
        Err(e) => println!("Ollama: Error - {}", e),
    }

    match client.list_models().await {
        Ok(models) => {
            println!("\nAvailable models:");
            for m in &models {
                let marker = if wanted.iter().any(|w| m == *w || m.starts_with(&format!("{}:", w))) {
                    "→"
                } else {
                    " "
                };
                println!("  {} {}", marker, m);
            }
        }
        Err(e) => println!("  Error listing models: {}", e),
    }

    let cascade = Path::new(&config.sort.cascade.path);
    if cascade.is_file() {
        println!("\nFace detection model: ✓ {}", cascade.display());
    } else {
        println!("\nFace detection model: ✗ missing ({})", cascade.display());
    }

    println!("\nConfiguration:");
    println!("  Chat model: {}", config.ai_engine.models.chat);
    println!("  Vision model: {}", config.ai_engine.models.vision);
    println!("  Default detection: {}", config.sort.method);
    println!("  History limit: {}", config.chat.history_limit);

    Ok(())
}

/// Initialize a new RPA4YOU folder
fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        bail!("config.json already exists. Use --force to overwrite");
    }

    let models_dir = target.join("models");
    std::fs::create_dir_all(&models_dir)
        .with_context(|| format!("Cannot create {:?}", models_dir))?;

    let mut config = AppConfig::default();
    config.sort.cascade.path = models_dir
        .join("haarcascade_frontalface_default.xml")
        .to_string_lossy()
        .to_string();
    config.save(&config_path)?;

    println!("RPA4YOU initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("  - models/");
    println!("\nNext steps:");
    println!("  1. Start Ollama: ollama serve");
    println!("  2. Pull models: ollama pull {} && ollama pull {}",
        config.ai_engine.models.chat, config.ai_engine.models.vision);
    println!("  3. For fast detection, put haarcascade_frontalface_default.xml in models/");
    println!("  4. Start chatting: rpa4you chat");

    Ok(())
}
