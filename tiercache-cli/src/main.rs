use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tiercache::{CacheConfig, TieredCache, spawn_janitor};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tiercache-cli")]
#[command(about = "Tiercache CLI - inspect and maintain a cache file", long_about = None)]
struct Args {
    /// YAML config file; flags below override it
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Directory holding the cache folders
    #[arg(short = 'r', long)]
    root_dir: Option<PathBuf>,

    /// Cache folder under the root directory
    #[arg(short = 'f', long)]
    folder: Option<String>,

    /// Cache file name
    #[arg(short = 'n', long)]
    filename: Option<String>,

    /// Queue writes until FLUSH or exit
    #[arg(long)]
    delay_write: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Command to execute (if not in interactive mode)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

impl Args {
    fn cache_config(&self) -> Result<CacheConfig> {
        let mut config = match &self.config {
            Some(path) => CacheConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => CacheConfig::default(),
        };
        if let Some(root_dir) = &self.root_dir {
            config.root_dir = root_dir.clone();
        }
        if let Some(folder) = &self.folder {
            config.folder = folder.clone();
        }
        if let Some(filename) = &self.filename {
            config.filename = filename.clone();
        }
        config.delay_write |= self.delay_write;
        Ok(config)
    }
}

struct CacheShell {
    cache: Arc<TieredCache>,
}

impl CacheShell {
    fn open(config: CacheConfig) -> Result<Self> {
        let path = config.database_path();
        let cache = TieredCache::new(config)
            .with_context(|| format!("Failed to open cache at {}", path.display()))?;
        Ok(Self {
            cache: Arc::new(cache),
        })
    }

    fn execute_command(&self, command: &str, args: &[String]) -> Result<String> {
        let start = Instant::now();

        let response = match command.to_uppercase().as_str() {
            "GET" => self.cmd_get(args)?,
            "SET" => self.cmd_set(args)?,
            "IDS" | "KEYS" => self.cmd_ids()?,
            "DBSIZE" => self.cmd_dbsize()?,
            "FLUSH" => self.cmd_flush(),
            "CLEANUP" => self.cmd_cleanup(args)?,
            "PURGE" => self.cmd_purge()?,
            "INFO" | "STATS" => self.cmd_stats()?,
            "HELP" => self.help_text(),
            _ => return Err(anyhow::anyhow!("Unknown command: {}", command)),
        };

        let elapsed = start.elapsed();
        Ok(format!(
            "{}\n{}",
            response,
            format!("({:.2?})", elapsed).dimmed()
        ))
    }

    fn cmd_get(&self, args: &[String]) -> Result<String> {
        let Some(key) = args.first() else {
            return Err(anyhow::anyhow!("Usage: GET key"));
        };

        match self.cache.get::<Value>(key)? {
            Some(value) => Ok(serde_json::to_string_pretty(&value)?),
            None => Ok("(nil)".yellow().to_string()),
        }
    }

    fn cmd_set(&self, args: &[String]) -> Result<String> {
        if args.len() < 2 {
            return Err(anyhow::anyhow!("Usage: SET key json [days]"));
        }

        // Bare words are stored as JSON strings
        let value: Value =
            serde_json::from_str(&args[1]).unwrap_or_else(|_| Value::String(args[1].clone()));
        match args.get(2) {
            Some(days) => {
                let days: u32 = days
                    .parse()
                    .with_context(|| format!("Invalid TTL in days: {}", days))?;
                self.cache.set(&args[0], &value, days)?;
            }
            None => self.cache.set_default(&args[0], &value)?,
        }
        Ok("OK".green().to_string())
    }

    fn cmd_ids(&self) -> Result<String> {
        let mut ids: Vec<String> = self
            .cache
            .ids()
            .context("Durable tier unavailable")?
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok("(empty)".yellow().to_string());
        }
        ids.sort();
        Ok(ids
            .iter()
            .enumerate()
            .map(|(i, id)| format!("{}) {}", i + 1, id))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn cmd_dbsize(&self) -> Result<String> {
        let count = self
            .cache
            .durable_len()
            .context("Durable tier unavailable")?;
        Ok(format!("(integer) {}", count))
    }

    fn cmd_flush(&self) -> String {
        format!("(integer) {}", self.cache.flush())
    }

    fn cmd_cleanup(&self, args: &[String]) -> Result<String> {
        let force = args
            .first()
            .is_some_and(|a| a.eq_ignore_ascii_case("force"));
        match self.cache.cleanup(force) {
            Some(report) => Ok(serde_json::to_string_pretty(&report)?),
            None => Ok("Cleanup skipped".yellow().to_string()),
        }
    }

    fn cmd_purge(&self) -> Result<String> {
        let deleted = self
            .cache
            .purge()
            .context("Durable tier unavailable")?;
        Ok(format!("(integer) {}", deleted))
    }

    fn cmd_stats(&self) -> Result<String> {
        let stats = self.cache.stats();
        let config = self.cache.config();
        let info = json!({
            "namespace": self.cache.namespace(),
            "path": config.database_path(),
            "delay_write": config.delay_write,
            "pending": self.cache.pending(),
            "rows": self.cache.durable_len(),
            "hit_rate": stats.hit_rate(),
            "stats": stats,
        });
        Ok(serde_json::to_string_pretty(&info)?)
    }

    fn help_text(&self) -> String {
        format!(
            "{}\n\n\
            {}\n  \
            GET key                  - Get a value (JSON)\n  \
            SET key json [days]      - Set a value with TTL in days\n  \
            IDS                      - List keys in the durable tier\n  \
            DBSIZE                   - Count rows in the durable tier\n\n\
            {}\n  \
            FLUSH                    - Write queued entries\n  \
            CLEANUP [FORCE]          - Delete expired (or all) rows\n  \
            PURGE                    - Delete every entry\n  \
            STATS                    - Show cache statistics\n  \
            HELP                     - Show this help\n  \
            QUIT/EXIT                - Exit CLI",
            "Tiercache CLI Commands".bold().cyan(),
            "Entries:".bold(),
            "Maintenance:".bold(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Use info level by default to show user-facing messages
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stdout)
            .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }

    let config = args.cache_config()?;
    let shell = CacheShell::open(config)?;

    if !args.command.is_empty() {
        // Command mode: execute single command and exit
        let cmd = &args.command[0];
        let cmd_args: Vec<String> = args.command[1..].to_vec();

        let result = shell.execute_command(cmd, &cmd_args);
        shell.cache.close();
        match result {
            Ok(output) => {
                info!("{}", output);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "{}", format!("Error: {}", e).red());
                std::process::exit(1);
            }
        }
    } else {
        run_interactive(shell).await
    }
}

async fn run_interactive(shell: CacheShell) -> Result<()> {
    info!(
        "{}",
        format!("Tiercache CLI v{}", env!("CARGO_PKG_VERSION"))
            .bold()
            .cyan()
    );
    info!("Opened {}", shell.cache.config().database_path().display());
    info!("Type {} for available commands\n", "HELP".bold());

    let janitor = spawn_janitor(&shell.cache, shell.cache.config().cleanup_interval());
    let mut rl = DefaultEditor::new()?;
    let prompt = format!("{}> ", shell.cache.config().filename.as_str().green());

    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }

                rl.add_history_entry(&line)?;

                let parts: Vec<String> = line.split_whitespace().map(String::from).collect();
                let cmd = &parts[0];
                let args = &parts[1..];

                if cmd.eq_ignore_ascii_case("QUIT") || cmd.eq_ignore_ascii_case("EXIT") {
                    info!("Goodbye!");
                    break;
                }

                match shell.execute_command(cmd, args) {
                    Ok(output) => info!("{}", output),
                    Err(e) => {
                        error!(error = %e, "{}", format!("Error: {}", e).red());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                info!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                info!("Goodbye!");
                break;
            }
            Err(err) => {
                error!(error = ?err, "Readline error: {:?}", err);
                break;
            }
        }
    }

    shell.cache.close();
    janitor.abort();
    Ok(())
}
