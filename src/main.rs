use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use multichat::settings::{ModelParamsPatch, AVAILABLE_MODELS};
use multichat::storage::resolve_default_data_dir;
use multichat::{AppConfigPatch, ChatEngine, ConfigService, FileStore, KeyValueStore, OpenAICompatible, SessionStore};

#[derive(Debug, Parser)]
#[command(name = "multichat")]
#[command(about = "Multi-session chat client for OpenAI-compatible endpoints", long_about = None)]
struct Cli {
    /// Where chats and config are stored
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List chats, most recently updated first
    List,
    New,
    Use { id: String },
    Rename { id: String, name: String },
    Delete { id: String },
    /// Replace the active chat's system message
    System { text: String },
    /// Change the active chat's model parameters
    Params {
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        top_p: Option<f32>,
    },
    Send { text: String },
    Clear,
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Import { file: PathBuf },
    Models,
    Config {
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let dir = cli.data_dir.unwrap_or_else(resolve_default_data_dir);
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&dir)?);

    let config = Arc::new(ConfigService::load(store.clone(), AppConfigPatch::from_env())?);
    let sessions = Arc::new(SessionStore::new(store));
    sessions.load()?;
    let engine = ChatEngine::new(sessions.clone(), Arc::new(OpenAICompatible::new(config.clone())));

    match cli.command {
        Commands::List => {
            let list = sessions.snapshot();
            for chat in list.chats_by_recent() {
                let marker = if list.active_id.as_deref() == Some(chat.id.as_str()) { "*" } else { " " };
                println!(
                    "{marker} {}  {:<24} {:>4} msgs  {:>6} tokens  {}",
                    chat.id,
                    chat.name,
                    chat.messages.len(),
                    chat.token_totals().total_tokens,
                    chat.updated_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        Commands::New => println!("{}", sessions.create_new_chat()?),
        Commands::Use { id } => {
            sessions.set_active_chat(&id)?;
            if sessions.snapshot().active_id.as_deref() != Some(id.as_str()) {
                anyhow::bail!("no chat with id {id}");
            }
        }
        Commands::Rename { id, name } => sessions.update_chat_name(&id, &name)?,
        Commands::Delete { id } => sessions.delete_chat(&id)?,
        Commands::System { text } => engine.update_system_message(&text)?,
        Commands::Params { model, max_tokens, temperature, top_p } => {
            let chat = sessions.get_active_chat().context("no active chat")?;
            let patch = ModelParamsPatch { model, max_tokens, temperature, top_p };
            let params = chat.openai_parameters.patched(&patch);
            sessions.update_openai_parameters(&chat.id, params.clone())?;
            println!("{}", serde_json::to_string_pretty(&params)?);
        }
        Commands::Send { text } => {
            let outcome = engine.send_message(&text).await?;
            if let Some(reply) = outcome.reply() {
                println!("{}", reply.content);
            }
        }
        Commands::Clear => engine.clear_chat()?,
        Commands::Export { out } => {
            let payload = engine.export_chat()?;
            match out {
                Some(path) => std::fs::write(&path, payload)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{payload}"),
            }
        }
        Commands::Import { file } => {
            let payload = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            engine.import_chat(&payload)?;
        }
        Commands::Models => {
            for m in AVAILABLE_MODELS {
                println!("{:<22} {:<18} {}", m.id, m.name, m.description);
            }
        }
        Commands::Config { api_key, base_url } => {
            if api_key.is_some() || base_url.is_some() {
                config.update_config(AppConfigPatch { openai_api_key: api_key, base_url })?;
            }
            let current = config.current();
            let key_state = if current.api_key().is_some() { "configured" } else { "not configured" };
            println!("api key: {key_state}\nbase url: {}", current.base_url);
        }
    }
    Ok(())
}
