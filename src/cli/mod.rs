pub mod commands;

use std::future::Future;
use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::chat::{ChatSession, SessionDeps, SubmitOutcome};
use crate::cli::commands::{Commands, HistoryAction, SettingsAction};
use crate::config::AppConfig;
use crate::db::{get_connection, lock, DbPool, HistoryStore};
use crate::llm::ClientFactory;
use crate::settings::Settings;

pub async fn run_cli(command: Commands, config_path: String) -> Result<()> {
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    let pool = get_connection(&config.database).context("Failed to open history database")?;

    match command {
        Commands::Chat { conversation } => run_repl(conversation, pool, config).await,
        Commands::History { action } => run_history(action, &pool),
        Commands::Images { prompt, count } => run_images(&prompt, count, &config).await,
        Commands::Settings { action } => run_settings(action, &pool, &config).await,
    }
}

fn run_history(action: HistoryAction, pool: &DbPool) -> Result<()> {
    let conn = lock(pool);

    match action {
        HistoryAction::List => {
            let conversations = HistoryStore::list_conversations(&conn)?;
            if conversations.is_empty() {
                println!("No conversations found.");
            } else {
                println!("{:<36} | {:<20} | Title", "ID", "Last Updated");
                println!("{:-<36}-+-{:-<20}-+-{:-<20}", "", "", "");
                for c in conversations {
                    println!("{:<36} | {:<20} | {}", c.id, c.last_updated.format("%Y-%m-%d %H:%M:%S").to_string(), c.title);
                }
            }
        }
        HistoryAction::Show { id } => {
            let Some(conversation) = HistoryStore::get_conversation(&conn, id)? else {
                bail!("Conversation {} not found", id);
            };
            println!("{}", conversation.title);
            println!("---");
            for m in HistoryStore::list_messages(&conn, id)? {
                println!("[{}]: {}", m.role.as_str().to_uppercase(), m.content);
                println!("---");
            }
        }
        HistoryAction::Rename { id, title } => {
            if title.trim().is_empty() {
                bail!("Title must not be empty");
            }
            if !HistoryStore::rename_conversation(&conn, id, &title)? {
                bail!("Conversation {} not found", id);
            }
            println!("Renamed conversation {}", id);
        }
        HistoryAction::Delete { id } => {
            if !HistoryStore::delete_conversation(&conn, id)? {
                bail!("Conversation {} not found", id);
            }
            println!("Deleted conversation {}", id);
        }
    }
    Ok(())
}

async fn run_images(prompt: &str, count: Option<u32>, config: &AppConfig) -> Result<()> {
    if prompt.trim().is_empty() {
        bail!("Prompt must not be empty");
    }
    let client = ClientFactory::create(config);
    let count = count.unwrap_or(config.images.count).max(1);

    info!(count, "generating images");
    match client.generate_images(prompt.trim(), count).await {
        Ok(urls) => {
            for url in urls {
                println!("{}", url);
            }
        }
        Err(e) => error!("Image generation failed: {}", e),
    }
    Ok(())
}

async fn run_settings(action: SettingsAction, pool: &DbPool, config: &AppConfig) -> Result<()> {
    match action {
        SettingsAction::Show => {
            let conn = lock(pool);
            println!("theme: {}", Settings::theme(&conn)?);
            println!("model: {}", Settings::api_model(&conn, &config.chat.default_model)?);
        }
        SettingsAction::Theme { theme } => {
            Settings::set_theme(&lock(pool), theme)?;
            println!("Theme set to {}", theme);
        }
        SettingsAction::Model { name } => {
            if name.trim().is_empty() {
                bail!("Model name must not be empty");
            }
            Settings::set_api_model(&lock(pool), &name)?;
            if !config.chat.supported_models.iter().any(|m| m == name.trim()) {
                println!("Note: {} is not enabled for chat in this configuration.", name.trim());
            }
            println!("Model set to {}", name.trim());
        }
        SettingsAction::Models { refresh } => {
            let client = ClientFactory::create(config);
            let models = Settings::api_models(pool, client.as_ref(), refresh).await?;
            if models.is_empty() {
                println!("No models available.");
            }
            for model in models {
                println!("{}", model);
            }
        }
    }
    Ok(())
}

/// Next line typed at the prompt, or `None` on end of input or when
/// `interrupt` fires first.
async fn next_input<R, I>(lines: &mut Lines<R>, interrupt: I) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    I: Future,
{
    tokio::select! {
        line = lines.next_line() => line,
        _ = interrupt => Ok(None),
    }
}

async fn run_repl(conversation: Option<Uuid>, pool: DbPool, config: AppConfig) -> Result<()> {
    let deps = SessionDeps {
        pool,
        client: ClientFactory::create(&config),
        config: config.chat.clone(),
    };
    let mut session = match conversation {
        Some(id) => ChatSession::resume(deps, id)?,
        None => ChatSession::new(deps)?,
    };

    println!("--- Chatter ---");
    println!("Model: {}", session.model());
    if let Some(id) = session.conversation_id() {
        println!("Conversation: {} ({})", session.title(), id);
        for m in session.messages() {
            println!("[{}]: {}", m.role.as_str().to_uppercase(), m.content);
        }
    }
    println!("Type /exit or press Ctrl-C to quit. Ctrl-C while waiting stops the answer.");
    println!("---------------");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\nUser> ");
        io::stdout().flush()?;

        let Some(input) = next_input(&mut lines, tokio::signal::ctrl_c()).await? else {
            println!();
            break;
        };
        let text = input.trim();

        if text.is_empty() {
            continue;
        }
        if text == "/exit" || text == "/quit" {
            break;
        }

        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.cancel();
            }
        });

        match session.submit(text, &cancel).await {
            Ok(SubmitOutcome::EmptyInput) => {}
            Ok(SubmitOutcome::RateLimitedLocally) => {
                println!("(Too many requests. Please wait a while before sending again.)");
            }
            Ok(SubmitOutcome::ModelNotSupported(model)) => {
                println!("(Model {} is not supported for chat. Pick another with `settings model`.)", model);
            }
            Ok(SubmitOutcome::Replied { reply, .. }) => {
                println!("Assistant> {}", reply.content);
                if session.wants_title() {
                    if let Err(e) = session.refresh_title(&cancel).await {
                        error!("Failed to store title: {}", e);
                    }
                }
            }
            Err(e) => {
                watcher.abort();
                return Err(e.into());
            }
        }
        watcher.abort();
    }

    Ok(())
}
