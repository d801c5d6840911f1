use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use flowjournal::config::Config;
use flowjournal::serve::JournalServer;
use flowjournal::{logging, Database, CURRENT_SCHEMA};
use std::io::{self, BufRead, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "flowjournal")]
#[command(author, version, about = "Self-hosted mood journal and reflection API")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: ./flowjournal.toml if present)
    #[arg(long, global = true, env = "FLOWJOURNAL_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true, env = "FLOWJOURNAL_DATABASE")]
    database: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API
    Serve {
        /// Address to bind, e.g. 0.0.0.0:8000
        #[arg(long, env = "FLOWJOURNAL_LISTEN")]
        listen: Option<SocketAddr>,

        /// Number of request worker threads
        #[arg(long, env = "FLOWJOURNAL_WORKERS")]
        workers: Option<usize>,

        /// Idle connections kept in the pool
        #[arg(long, env = "FLOWJOURNAL_POOL_MIN")]
        pool_min: Option<u32>,

        /// Maximum pooled connections
        #[arg(long, env = "FLOWJOURNAL_POOL_MAX")]
        pool_max: Option<u32>,

        /// Emit JSON log lines
        #[arg(long)]
        log_json: bool,
    },

    /// Create a user account
    Register {
        /// Name to log in with
        username: String,

        /// Password (read from stdin when unset)
        #[arg(long, env = "FLOWJOURNAL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "flowjournal", &mut io::stdout());
            Ok(())
        }
        Command::Serve {
            listen,
            workers,
            pool_min,
            pool_max,
            log_json,
        } => {
            let mut config = load_config(cli.config, cli.database)?;
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            if let Some(workers) = workers {
                config.server.workers = workers;
            }
            if let Some(pool_min) = pool_min {
                config.database.pool_min = pool_min;
            }
            if let Some(pool_max) = pool_max {
                config.database.pool_max = pool_max;
            }
            config.logging.json |= log_json;
            config.validate()?;

            serve(&config)
        }
        Command::Register { username, password } => {
            let config = load_config(cli.config, cli.database)?;
            config.validate()?;
            register(&config, &username, password)
        }
    }
}

fn load_config(path: Option<PathBuf>, database: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::load(path.as_deref())?;
    if let Some(database) = database {
        config.database.path = database;
    }
    Ok(config)
}

fn serve(config: &Config) -> Result<()> {
    logging::init(&config.logging)?;

    let db = Arc::new(
        Database::open(&config.database)
            .with_context(|| format!("failed to open {}", config.database.path.display()))?,
    );
    let server = JournalServer::bind(config.server.listen, Arc::clone(&db), config.server.workers)
        .with_context(|| format!("failed to bind {}", config.server.listen))?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("shutdown requested");
        shutdown.shutdown();
    })
    .context("failed to install signal handler")?;

    let addr = server
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|| config.server.listen.to_string());

    eprintln!("\n{}", "Flow Journal".cyan().bold());
    eprintln!("   {} http://{}", "Listening".green(), addr);
    eprintln!("   {} {}", "Database".green(), config.database.path.display());
    eprintln!("   {} {}", "Schema".green(), CURRENT_SCHEMA);
    eprintln!("   {} {}\n", "Workers".green(), config.server.workers);

    server.run();

    // workers have exited, so this is the last handle on the pool
    drop(db);
    info!("database closed");
    Ok(())
}

fn read_password() -> Result<String> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("Password: ");
        io::stderr().flush()?;
    }

    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn register(config: &Config, username: &str, password: Option<String>) -> Result<()> {
    logging::init(&config.logging)?;

    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };
    if password.is_empty() {
        bail!("password must not be empty");
    }

    let db = Database::open(&config.database)
        .with_context(|| format!("failed to open {}", config.database.path.display()))?;
    let user_id = db.register(username, &password)?;

    println!("{} user '{}' (id {})", "Created".green(), username, user_id);
    Ok(())
}
