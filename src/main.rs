//! Quickreply command line interface
//!
//! Inspects and maintains the reply store used by the insertion engine.

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use quickreply::reply::{group_by_category, needs_normalization};
use quickreply::{
    get_config_path, load_config, normalize, Config, InsertionEngine, JsonFileStore, ReplyEntry,
    ReplyStore, Result,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn display_help() {
    println!("quickreply - category-grouped quick replies");
    println!();
    println!("USAGE:");
    println!("    quickreply <command> [--store <path>]");
    println!();
    println!("COMMANDS:");
    println!("    list            Show stored replies grouped by category");
    println!("    normalize       Rewrite legacy entries in the current format");
    println!("    preview <n>     Show reply <n> as it would be inserted right now");
    println!("    config          Print the configuration file location and contents");
    println!("    help            Show this message");
}

/// Splits `--store <path>` out of the argument list.
fn take_store_override(args: &mut Vec<String>) -> Result<Option<PathBuf>> {
    let Some(index) = args.iter().position(|a| a == "--store") else {
        return Ok(None);
    };
    if index + 1 >= args.len() {
        return Err(anyhow::anyhow!("--store needs a path").into());
    }
    let path = args.remove(index + 1);
    args.remove(index);
    Ok(Some(PathBuf::from(path)))
}

fn open_store(config: &Config, override_path: Option<PathBuf>) -> Result<JsonFileStore> {
    let path = match override_path {
        Some(path) => path,
        None => config.store.resolve_path()?,
    };
    debug!("using reply store at {}", path.display());
    Ok(JsonFileStore::new(path))
}

async fn load_entries(store: &JsonFileStore) -> Result<Vec<ReplyEntry>> {
    let raw = store
        .get()
        .await
        .with_context(|| format!("Failed to read replies from {}", store.path().display()))?;
    Ok(normalize(&raw))
}

async fn handle_list(store: &JsonFileStore) -> Result<()> {
    let entries = load_entries(store).await?;
    if entries.is_empty() {
        println!("No replies stored in {}", store.path().display());
        return Ok(());
    }
    let mut index = 1;
    for group in group_by_category(&entries) {
        println!("[{}]", group.name);
        for entry in &group.entries {
            let first_line = entry.text.lines().next().unwrap_or_default();
            let more = if entry.text.contains('\n') { " ..." } else { "" };
            println!("  {:>3}. {}{}", index, first_line, more);
            index += 1;
        }
    }
    Ok(())
}

async fn handle_normalize(store: &JsonFileStore) -> Result<()> {
    let raw = store
        .get()
        .await
        .with_context(|| format!("Failed to read replies from {}", store.path().display()))?;
    if !needs_normalization(&raw) {
        println!("All {} replies are already in the current format", raw.len());
        return Ok(());
    }
    let entries = normalize(&raw);
    let dropped = raw.len() - entries.len();
    store
        .set(&entries)
        .await
        .context("Failed to save normalized replies")?;
    if dropped > 0 {
        warn!("dropped {} malformed or empty entries", dropped);
    }
    println!("Normalized {} replies ({} dropped)", entries.len(), dropped);
    Ok(())
}

async fn handle_preview(config: &Config, store: &JsonFileStore, arg: Option<&String>) -> Result<()> {
    let n: usize = arg
        .context("preview needs the number shown by `list`")?
        .parse()
        .context("preview number must be a positive integer")?;
    let entries = load_entries(store).await?;
    // `list` numbers entries in grouped order
    let ordered: Vec<ReplyEntry> = group_by_category(&entries)
        .into_iter()
        .flat_map(|g| g.entries)
        .collect();
    let entry = n
        .checked_sub(1)
        .and_then(|i| ordered.get(i))
        .with_context(|| format!("there is no reply number {} ({} stored)", n, ordered.len()))?;
    let engine = InsertionEngine::new(config.clone());
    println!("{}", engine.prepare(&entry.text));
    Ok(())
}

fn handle_config(config: &Config) -> Result<()> {
    let path = get_config_path()?;
    println!("# {}", path.display());
    println!("{}", config.to_toml()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|e| {
            eprintln!("Failed to parse RUST_LOG: {}. Using default 'info' level.", e);
            EnvFilter::new("info")
        }))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let mut args: Vec<String> = env::args().skip(1).collect();
    let store_override = take_store_override(&mut args)?;
    let Some(command) = args.first().cloned() else {
        display_help();
        return Ok(());
    };

    let config = load_config().context("Failed to load configuration")?;
    info!("loaded configuration");
    let store = open_store(&config, store_override)?;

    match command.as_str() {
        "list" | "ls" => handle_list(&store).await,
        "normalize" | "migrate" => handle_normalize(&store).await,
        "preview" | "show" => handle_preview(&config, &store, args.get(1)).await,
        "config" | "settings" => handle_config(&config),
        _ => {
            display_help();
            Ok(())
        }
    }
}
