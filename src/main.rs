//! profile-sync —— 匿名用户场景演示
//!
//! 填写表单、发送一条聊天消息，等待各自的静默期结束后打印持久级存储中的记录。
//!
//! ```bash
//! cargo run -- --store /tmp/profile-sync.json --message "hello"
//! RUST_LOG=profile_sync=debug cargo run
//! ```

use clap::Parser;
use profile_sync::prelude::*;
use profile_sync::storage::{InMemoryRemoteStore, LocalTiers};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "profile-sync")]
#[command(about = "Tiered profile cache and debounced autosave demo")]
struct Cli {
    /// YAML config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Persistent local store file (overrides the config)
    #[arg(long, env = "PROFILE_SYNC_STORE", default_value = "profile-sync-demo.json")]
    store: PathBuf,

    /// First chat message
    #[arg(short, long, default_value = "hello")]
    message: String,

    #[arg(long, default_value = "Ohio")]
    region: String,

    #[arg(long, default_value = "A")]
    category: String,

    #[arg(long, default_value = "II")]
    sub_category: String,

    #[arg(long, default_value = "Private")]
    tertiary: String,
}

#[tokio::main]
async fn main() -> profile_sync::error::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "profile_sync=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    }
    .with_env_overrides()?;
    config.persistent_store_path = Some(cli.store.clone());

    let local = LocalTiers::from_config(&config)?;
    let form_wait = config.form_quiet_window() + Duration::from_millis(100);
    let chat_wait = config.chat_quiet_window() + Duration::from_millis(100);
    let session = Arc::new(
        SessionContext::builder(config)
            .local(local)
            .remote(Arc::new(InMemoryRemoteStore::new()))
            .build(),
    );

    let client = SyncClient::new(session.clone());
    let form = client.form();
    let chat = client.chat();
    let context = FormSnapshot::new(&cli.region, &cli.category, &cli.sub_category, &cli.tertiary);

    println!("📝 表单: {}", context.fingerprint());
    form.schedule(&context);
    tokio::time::sleep(form_wait).await;

    let messages = vec![chat.new_message(Role::User, cli.message.as_str())];
    let id = chat.schedule(&context, &messages);
    println!("💬 会话: {}", id.unwrap_or_default());
    tokio::time::sleep(chat_wait).await;
    client.flush_pending().await;

    println!("\n📦 {}", cli.store.display());
    println!(
        "{} = {}",
        session.config().anonymous_form_key,
        serde_json::to_string_pretty(&session.load_form_snapshot())?
    );
    println!(
        "{} = {}",
        session.config().anonymous_chat_key,
        serde_json::to_string_pretty(&session.load_conversations())?
    );
    Ok(())
}
