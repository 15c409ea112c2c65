//! Breeze CLI entry point

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use breeze::agent::{AgentLoop, AgentSettings, CycleOutcome, OpenAiCompatClient};
use breeze::config::Config;
use breeze::forum::DiscourseClient;
use breeze::memory::{AgentStore, FileStore};
use breeze::ui;

#[derive(Parser)]
#[command(name = "breeze")]
#[command(about = "Breeze - autonomous forum agent")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.breeze/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Run the agent until Ctrl+C
    Run,

    /// Run a single work cycle and exit
    Once,

    /// Show configuration and stored state
    Status,

    /// Edit the blacklist of user/topic ids
    Blacklist {
        #[command(subcommand)]
        action: BlacklistAction,
    },
}

#[derive(Subcommand)]
enum BlacklistAction {
    /// Add an id
    Add { id: u64 },
    /// Remove an id
    Remove { id: u64 },
    /// List every id
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("breeze=info")))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(breeze::config::config_path);

    match cli.command {
        Commands::Init { force } => {
            if config_path.exists() && !force {
                bail!("Config already exists at {:?} (use --force to overwrite)", config_path);
            }
            breeze::config::save_to(&Config::default(), &config_path)?;
            ui::print_success(&format!("Wrote {}", config_path.display()));
            println!("\nNext steps:");
            println!("  1. Fill in forum.base_url, forum.username and forum.api_key");
            println!("  2. Set model.api_key (and model.vision if the model accepts images)");
            println!("  3. Run: breeze once");
        }

        Commands::Run => {
            let config = load_config(&config_path)?;
            let agent = build_agent(&config)?;
            ui::print_breeze_header(&config.model.name, &config.forum.base_url);

            // Shutdown is honored between cycles; a second Ctrl+C exits at once.
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            ctrlc::set_handler(move || {
                if flag.swap(true, Ordering::SeqCst) {
                    std::process::exit(130);
                }
                ui::print_warning("Stopping after the current cycle (Ctrl+C again to exit now)");
            })?;

            agent.run(&shutdown).await;
            ui::print_success("Stopped");
        }

        Commands::Once => {
            let config = load_config(&config_path)?;
            let agent = build_agent(&config)?;
            ui::print_breeze_header(&config.model.name, &config.forum.base_url);
            match agent.run_cycle().await? {
                CycleOutcome::Idle => ui::print_step("No new notifications"),
                CycleOutcome::Committed { topics } => ui::print_success(&format!("Handled topics {:?}, memory updated", topics)),
                CycleOutcome::MemoryUnchanged { topics } => ui::print_step(&format!("Handled topics {:?}, memory unchanged", topics)),
                CycleOutcome::InvocationFailed { recoverable } => {
                    ui::print_error(&format!("Model call failed (recoverable: {})", recoverable))
                }
            }
        }

        Commands::Status => {
            println!("Breeze Status\n");
            println!("Config: {} {}", config_path.display(), if config_path.exists() { "✓" } else { "✗" });
            if config_path.exists() {
                let config = breeze::config::load_from(&config_path)?;
                let store = FileStore::new(&config.data_dir);
                println!("Forum: {} as {}", config.forum.base_url, config.forum.username);
                println!("Model: {} (vision: {})", config.model.name, config.model.vision);
                match &config.vlm {
                    Some(vlm) => println!("Vision helper: {}", vlm.name),
                    None => println!("Vision helper: none"),
                }
                println!("Web search: {}", if config.web_search.api_key.is_empty() { "off" } else { "on" });
                println!("Data dir: {}", config.data_dir.display());
                println!("Memory: {} chars", store.load_memory()?.len());
                println!("Blacklist: {} id(s)", store.load_blacklist()?.len());
                if let Err(e) = config.validate() {
                    ui::print_warning(&e.to_string());
                }
            }
        }

        Commands::Blacklist { action } => {
            let config = breeze::config::load_from(&config_path)?;
            let store = FileStore::new(&config.data_dir);
            let mut ids: BTreeSet<u64> = store.load_blacklist()?;
            match action {
                BlacklistAction::Add { id } => {
                    ids.insert(id);
                    store.save_blacklist(&ids)?;
                    ui::print_success(&format!("Blacklisted {}", id));
                }
                BlacklistAction::Remove { id } => {
                    if ids.remove(&id) {
                        store.save_blacklist(&ids)?;
                        ui::print_success(&format!("Removed {}", id));
                    } else {
                        ui::print_warning(&format!("{} is not blacklisted", id));
                    }
                }
                BlacklistAction::List => {
                    for id in &ids {
                        println!("{}", id);
                    }
                }
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let config = breeze::config::load_from(path)?;
    config.validate()?;
    Ok(config)
}

fn build_agent(config: &Config) -> Result<AgentLoop> {
    let settings = AgentSettings::from_config(config)?;
    let forum = Arc::new(DiscourseClient::new(&config.forum));
    let store = Arc::new(FileStore::new(&config.data_dir));
    let backend = Arc::new(OpenAiCompatClient::new());
    Ok(AgentLoop::new(forum, store, backend, settings))
}
