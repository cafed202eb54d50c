mod observability;
mod render;

use std::path::PathBuf;

use agent::{ChatSession, SessionEvent};
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use config::AppConfig;
use db::sqlite::SqliteDatabase;
use db::{Database, QueryPolicy};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "medchat", version, about = "Ask questions about Synthea patient records")]
struct Cli {
    /// Path to the configuration file, defaults to ~/.config/medchat/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start an interactive chat session (the default)
    Chat {
        /// Model name sent to the chat-completions endpoint
        #[arg(short, long)]
        model: Option<String>,

        /// SQLite database to answer from
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Load every CSV file of a directory into the database, one table per file
    Load {
        #[arg(long)]
        csv_dir: Option<PathBuf>,

        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the tables and columns of the database
    Schema {
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env is fine, the key may already be exported
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let conf = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::get_or_default(),
    };
    observability::init_tracing(&conf.log);

    match cli.command.unwrap_or(Command::Chat {
        model: None,
        db: None,
    }) {
        Command::Chat { model, db } => chat(conf, model, db).await,
        Command::Load { csv_dir, db } => load(&conf, csv_dir, db).await,
        Command::Schema { db } => schema(&conf, db).await,
    }
}

async fn chat(mut conf: AppConfig, model: Option<String>, db: Option<PathBuf>) -> anyhow::Result<()> {
    if let Some(model) = model {
        conf.ai.model = model;
    }
    let db_path = db.unwrap_or_else(|| conf.database.path.clone());

    let api_key = std::env::var(&conf.ai.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty());
    if api_key.is_none() && conf.ai.requires_api_key() {
        bail!(
            "{} is not set. Export it or put it in a .env file, {} needs an API key",
            conf.ai.api_key_env,
            conf.ai.url
        );
    }

    let llm = ai::LLM::new(&conf.ai, api_key).context("failed to create the model client")?;
    let policy = QueryPolicy::from(&conf.query);
    let database = match SqliteDatabase::open(&db_path, policy.clone()).await {
        Ok(database) => database,
        Err(err) => {
            // tool calls report the failure and retry the open on each call
            warn!(path = %db_path.display(), "starting without a data store: {err}");
            eprintln!("{} {err}, run `medchat load` first", "warning:".yellow());
            SqliteDatabase::new(&db_path, policy)
        }
    };
    let mut session = ChatSession::new(llm, database, conf.ai.max_tool_rounds);
    info!(model = %conf.ai.model, db = %db_path.display(), "chat session started");

    println!(
        "{} using {} on {}",
        "medchat".bold(),
        session.llm().model().cyan(),
        db_path.display()
    );
    println!("Ask about the patients in the database, `exit` to leave.\n");

    while let Ok(prompt) = inquire::Text::new("You:").prompt() {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            continue;
        }
        if matches!(prompt.to_ascii_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        let answer = session
            .ask(prompt, |event| match event {
                SessionEvent::ToolCall(call) => println!("{}", render::tool_call(call)),
                SessionEvent::ToolResult(result) => println!("{}\n", render::tool_result(result)),
            })
            .await;

        match answer {
            Ok(text) => println!("\n{}\n{}\n", "[Assistant]".blue(), text.blue()),
            Err(err) => eprintln!("{} {err}\n", "error:".red()),
        }
    }

    session.into_dispatcher().into_database().close().await;
    Ok(())
}

async fn load(conf: &AppConfig, csv_dir: Option<PathBuf>, db: Option<PathBuf>) -> anyhow::Result<()> {
    let csv_dir = csv_dir.unwrap_or_else(|| conf.database.csv_dir.clone());
    let db_path = db.unwrap_or_else(|| conf.database.path.clone());

    let loaded = db::loader::load_csv_dir(&csv_dir, &db_path)
        .await
        .with_context(|| {
            format!(
                "failed to load {} into {}",
                csv_dir.display(),
                db_path.display()
            )
        })?;

    if loaded.is_empty() {
        println!("no CSV files in {}", csv_dir.display());
        return Ok(());
    }

    for table in &loaded {
        println!("{} {:>9} rows  {}", "loaded".green(), table.rows, table.table);
    }
    println!("{} tables written to {}", loaded.len(), db_path.display());
    Ok(())
}

async fn schema(conf: &AppConfig, db: Option<PathBuf>) -> anyhow::Result<()> {
    let db_path = db.unwrap_or_else(|| conf.database.path.clone());
    let mut database = SqliteDatabase::open(&db_path, QueryPolicy::from(&conf.query))
        .await
        .with_context(|| format!("cannot open {}", db_path.display()))?;

    let catalog = database.get_schema().await?;
    println!("{}", render::schema_table(&catalog));

    database.close().await;
    Ok(())
}
