//! txscope command-line interface.
//!
//! `txscope check <CONN>` verifies a connection string end to end.
//! `txscope demo <CONN>` walks one request transaction through its lifecycle.

use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use txscope::db::Database;
use txscope::transaction::{RequestContext, TxResult};

#[derive(Parser, Debug)]
#[command(name = "txscope")]
#[command(about = "Request-scoped database transactions")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize, run the health check and shut down
    Check {
        /// Connection string, e.g. memory:// or git:///path/to/repo
        connection: String,
    },

    /// Run one transaction with callbacks attached
    Demo {
        /// Connection string
        connection: String,

        /// Flag the transaction for rollback before resolving
        #[arg(long)]
        rollback: bool,

        /// How long to wait for the callback, in milliseconds
        #[arg(long, default_value_t = 1000)]
        wait_ms: u64,

        /// Print database counters as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let result = match cli.command {
        Commands::Check { connection } => run_check(&connection),
        Commands::Demo {
            connection,
            rollback,
            wait_ms,
            json,
        } => run_demo(&connection, rollback, Duration::from_millis(wait_ms), json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_check(connection: &str) -> TxResult<()> {
    let db = Database::new();
    db.initialize(connection)?;

    let checked = db.health_check();
    db.shutdown()?;
    checked?;

    println!("ok");
    Ok(())
}

fn run_demo(connection: &str, rollback: bool, wait: Duration, json: bool) -> TxResult<()> {
    let db = Database::new();
    db.initialize(connection)?;

    let ctx = db.new_context(&RequestContext::with_request_id("demo"))?;
    println!("transaction {}", ctx.transaction_id().unwrap_or_default());

    let (tx, rx) = mpsc::channel();
    let commit_tx = tx.clone();
    ctx.on_commit(move || {
        let _ = commit_tx.send("post-commit");
    })?;
    ctx.on_rollback(move || {
        let _ = tx.send("post-rollback");
    })?;

    let result = ctx.query("SELECT 'ok' AS status")?;
    println!("query returned {:?}", result.scalar());

    if rollback {
        ctx.mark_for_rollback();
    }
    db.resolve(&ctx)?;

    match ctx.state() {
        Some(state) => println!("resolved: {}", state),
        None => println!("resolved"),
    }
    match rx.recv_timeout(wait) {
        Ok(name) => println!("callback ran: {}", name),
        Err(_) => println!("no callback within {:?}", wait),
    }

    if json {
        if let Ok(stats) = serde_json::to_string_pretty(&db.stats()) {
            println!("{}", stats);
        }
    }

    db.shutdown()
}
