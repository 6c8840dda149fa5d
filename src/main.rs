//! # Pressdesk: operator CLI
//!
//! Usage:
//!   pressdesk init                                   # Write default config, create the database
//!   pressdesk send --subject S --to a@x,b@y --template welcome.html --param name=Ana
//!   pressdesk resend 42                              # One manual attempt
//!   pressdesk outbox --status failed                 # Inspect the outbox
//!   pressdesk versions 7                             # Article version archive
//!   pressdesk audit --limit 20
//!   pressdesk purge-tokens

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pressdesk_cms::CmsDb;
use pressdesk_core::PressdeskConfig;
use pressdesk_core::types::{EmailStatus, TemplateParams};
use pressdesk_mail::{Dispatcher, FileTemplates, MailSettings, OutboxStore, SendRequest, SmtpMailer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pressdesk", version, about = "📰 Pressdesk: content backend operator CLI")]
struct Cli {
    /// Config file (default: ~/.pressdesk/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config (if missing) and create the database
    Init,
    /// Render a template and send it to a list of recipients
    Send {
        #[arg(long)]
        subject: String,
        /// Recipients, comma or semicolon separated
        #[arg(long)]
        to: String,
        /// Template name, relative to the templates directory
        #[arg(long)]
        template: String,
        /// Template parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Send a stored email again, single attempt
    Resend { id: i64 },
    /// List outbox records, newest first
    Outbox {
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Only records with this status (pending, sending, retrying, failed, sent)
        #[arg(long)]
        status: Option<String>,
    },
    /// Show the version archive of an article
    Versions { article_id: i64 },
    /// Show recent audit log entries
    Audit {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Delete expired signup tokens
    PurgeTokens,
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(cli: &Cli) -> Result<(PressdeskConfig, PathBuf)> {
    let path = cli
        .config
        .as_deref()
        .map(expand_path)
        .unwrap_or_else(PressdeskConfig::default_path);
    let config = if path.exists() {
        PressdeskConfig::load_from(&path)?
    } else {
        PressdeskConfig::default()
    };
    Ok((config, path))
}

fn database_path(config: &PressdeskConfig) -> Result<PathBuf> {
    let path = expand_path(&config.database.path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(path)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn start_dispatcher(config: &PressdeskConfig, db_path: &Path) -> Result<Dispatcher> {
    let store = Arc::new(OutboxStore::open(db_path)?);
    let transport = Arc::new(SmtpMailer::from_config(&config.mail)?);
    let templates = Arc::new(FileTemplates::new(&expand_path(&config.templates.dir)));
    Ok(Dispatcher::start(
        store,
        transport,
        templates,
        MailSettings::from_config(&config.mail),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "pressdesk=debug" } else { "pressdesk=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let (config, config_path) = load_config(&cli)?;
    let db_path = database_path(&config)?;

    match cli.command {
        Command::Init => {
            if !config_path.exists() {
                config.save_to(&config_path)?;
                println!("✅ Config written: {}", config_path.display());
            } else {
                println!("⚠️  Config already exists: {}", config_path.display());
            }
            CmsDb::open(&db_path)?;
            OutboxStore::open(&db_path)?;
            std::fs::create_dir_all(expand_path(&config.templates.dir))?;
            println!("   🗄️  Database:  {}", db_path.display());
            println!("   📄 Templates: {}", config.templates.dir);
        }
        Command::Send {
            subject,
            to,
            template,
            params,
        } => {
            let recipients = pressdesk_mail::parse_recipients(&to)?;
            let dispatcher = start_dispatcher(&config, &db_path)?;
            let id = dispatcher
                .dispatch(SendRequest {
                    subject,
                    recipients,
                    template,
                    params: params.into_iter().collect::<TemplateParams>(),
                })
                .await?;
            let store = dispatcher.store().clone();
            dispatcher.shutdown().await;

            let record = store.get(id)?;
            println!("📨 Email #{id}: {} after {} attempt(s)", record.status, record.attempts);
            if let Some(err) = record.last_error {
                println!("   last error: {err}");
            }
        }
        Command::Resend { id } => {
            let dispatcher = start_dispatcher(&config, &db_path)?;
            let status = dispatcher.resend(id).await;
            dispatcher.shutdown().await;
            println!("📨 Email #{id}: {}", status?);
        }
        Command::Outbox { limit, status } => {
            let store = OutboxStore::open(&db_path)?;
            let records = match status {
                Some(s) => {
                    let status = EmailStatus::parse(&s)
                        .with_context(|| format!("unknown status '{s}'"))?;
                    store.list_by_status(status, limit)?
                }
                None => store.list_recent(limit)?,
            };
            print_json(&records)?;
        }
        Command::Versions { article_id } => {
            let db = CmsDb::open(&db_path)?;
            let article = db.get_article(article_id)?;
            println!("📝 {} ({})", article.title, article.slug);
            print_json(&db.list_versions(article_id)?)?;
        }
        Command::Audit { limit } => {
            let db = CmsDb::open(&db_path)?;
            print_json(&db.recent_events(limit)?)?;
        }
        Command::PurgeTokens => {
            let db = CmsDb::open(&db_path)?;
            let removed = db.purge_expired_tokens(config.site.token_age())?;
            println!("🧹 Removed {removed} expired token(s)");
        }
    }

    Ok(())
}
