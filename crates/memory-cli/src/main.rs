// ============================================================================
// memory-db - CLI inspection and maintenance tool for persona memory
// ============================================================================
// Usage:
//   memory-db stats                                Show memory statistics
//   memory-db list --scope helper                  List a persona's memories
//   memory-db search --scope helper "apple pie"    Ranked recall (reinforces hits)
//   memory-db add --scope helper [--public] TEXT   Record a memory
//   memory-db decay | merge [--threshold 0.8]      Run a maintenance pass
//   memory-db export > backup.json                 Export full database as JSON
//   memory-db import backup.json                   Restore from an export
// ============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use memory_core::db::ExportSnapshot;
use memory_core::memory::Memory;
use memory_core::{MemoryConfig, MemoryDb, MemoryManager, Scope};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Persona memory database tool
#[derive(Parser)]
#[command(name = "memory-db", version, about = "Inspect and maintain the persona memory database")]
struct Cli {
    /// Path to the database file (default: ~/.persona-memory/memories.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show memory counts per scope
    Stats,

    /// List memories visible to a scope, newest first
    List {
        /// Persona id, or "public"
        #[arg(long)]
        scope: String,

        /// Leave out the public pool
        #[arg(long)]
        no_public: bool,
    },

    /// Retrieve the memories most relevant to a query
    Search {
        #[arg(long)]
        scope: String,

        query: String,

        #[arg(long, default_value = "3")]
        limit: usize,
    },

    /// Record a new memory
    Add {
        #[arg(long)]
        scope: String,

        /// Store in the public pool instead of the persona's own scope
        #[arg(long)]
        public: bool,

        content: String,
    },

    /// Replace a memory's content
    Update { id: Uuid, content: String },

    /// Delete a memory
    Delete { id: Uuid },

    /// Run one decay pass
    Decay,

    /// Merge near-duplicate memories
    Merge {
        /// Limit the pass to one scope
        #[arg(long)]
        scope: Option<String>,

        /// Cosine similarity required to merge (default: configured threshold)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Export full database contents as JSON
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Import a JSON export, replacing rows with the same id
    Import { file: String },

    /// Register or update a persona
    Persona {
        #[arg(long)]
        id: String,

        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        description: String,
    },
}

fn parse_scope(s: &str) -> Result<Scope> {
    s.parse::<Scope>()
        .with_context(|| format!("Invalid scope '{}'", s))
}

fn format_timestamp(ts_millis: i64) -> String {
    Utc.timestamp_millis_opt(ts_millis)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts_millis))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so exports stay clean on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("memory_core=info".parse()?)
                .add_directive("memory_db=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = MemoryConfig::from_env();
    if cli.db_path.is_some() {
        config.db_path = cli.db_path.clone();
    }

    let db = Arc::new(MemoryDb::open(config.db_path.as_deref())?);
    let manager = MemoryManager::open(config, db.clone()).await?;

    let result = match cli.command {
        Commands::Stats => cmd_stats(&db, &manager).await,
        Commands::List { scope, no_public } => cmd_list(&manager, &scope, !no_public).await,
        Commands::Search { scope, query, limit } => cmd_search(&manager, &scope, &query, limit).await,
        Commands::Add { scope, public, content } => cmd_add(&manager, &scope, public, &content).await,
        Commands::Update { id, content } => cmd_update(&manager, id, &content).await,
        Commands::Delete { id } => cmd_delete(&manager, id).await,
        Commands::Decay => cmd_decay(&manager).await,
        Commands::Merge { scope, threshold } => cmd_merge(&manager, scope.as_deref(), threshold).await,
        Commands::Export { format } => cmd_export(&manager, &format).await,
        Commands::Import { file } => cmd_import(&manager, &file).await,
        Commands::Persona { id, name, description } => cmd_persona(&manager, &id, &name, &description).await,
    };

    manager.shutdown().await?;
    result
}

async fn cmd_stats(db: &MemoryDb, manager: &MemoryManager) -> Result<()> {
    let stats = db.stats()?;
    let cache = manager.stats().await;

    println!("=== Persona Memory Stats ===");
    match db.path() {
        Some(path) => println!("Database: {}", path.display()),
        None => println!("Database: (in memory)"),
    }
    println!();
    println!("Memories: {} total", stats.total_memories);
    println!("  {:16} {}", "public", stats.public_memories);

    let mut personas: Vec<_> = stats.per_persona.iter().collect();
    personas.sort();
    for (persona, count) in personas {
        println!("  {:16} {}", persona, count);
    }
    println!("Personas: {}", stats.total_personas);
    if cache.cache_only > 0 {
        println!("Unsaved:  {}", cache.cache_only);
    }

    Ok(())
}

fn memory_row(memory: &Memory) -> String {
    let content = memory.content.chars().take(40).collect::<String>();
    format!(
        "{:<36}  {:<10}  {:<8}  {:>6.3}  {:>5}  {:<23}  {}",
        memory.id,
        memory.scope.to_string(),
        memory.origin().to_string(),
        memory.weight,
        memory.access_count,
        format_timestamp(memory.created_at),
        content
    )
}

fn print_memories(memories: &[Memory]) {
    println!(
        "{:<36}  {:<10}  {:<8}  {:>6}  {:>5}  {:<23}  {}",
        "ID", "SCOPE", "ORIGIN", "WEIGHT", "HITS", "CREATED AT", "CONTENT"
    );
    println!("{}", "-".repeat(120));

    for memory in memories {
        println!("{}", memory_row(memory));
    }
}

async fn cmd_list(manager: &MemoryManager, scope: &str, include_public: bool) -> Result<()> {
    let scope = parse_scope(scope)?;
    let memories = manager.get_all_memories(&scope, include_public).await;

    if memories.is_empty() {
        println!("No memories found.");
        return Ok(());
    }

    print_memories(&memories);
    println!("\nTotal: {} memories", memories.len());
    Ok(())
}

async fn cmd_search(manager: &MemoryManager, scope: &str, query: &str, limit: usize) -> Result<()> {
    let scope = parse_scope(scope)?;
    let results = manager.retrieve_memories(&scope, query, limit).await?;

    if results.is_empty() {
        println!("No relevant memories.");
        return Ok(());
    }

    println!("{:>6}  {:<8}  {:<36}  {}", "SCORE", "ORIGIN", "ID", "CONTENT");
    println!("{}", "-".repeat(90));
    for scored in &results {
        println!(
            "{:>6.3}  {:<8}  {:<36}  {}",
            scored.score,
            scored.origin.to_string(),
            scored.memory.id,
            scored.memory.content
        );
    }
    Ok(())
}

async fn cmd_add(manager: &MemoryManager, scope: &str, public: bool, content: &str) -> Result<()> {
    let scope = parse_scope(scope)?;
    let memory = manager.add_memory(&scope, content, public).await?;

    println!("Stored memory {} in scope {}", memory.id, memory.scope);
    if !memory.persisted {
        println!("Warning: the database rejected the write; the memory was not saved.");
    }
    Ok(())
}

async fn cmd_update(manager: &MemoryManager, id: Uuid, content: &str) -> Result<()> {
    if manager.update_memory(id, content).await? {
        println!("Updated memory {}", id);
    } else {
        anyhow::bail!("Memory {} not found", id);
    }
    Ok(())
}

async fn cmd_delete(manager: &MemoryManager, id: Uuid) -> Result<()> {
    if manager.delete_memory(id).await? {
        println!("Deleted memory {}", id);
    } else {
        anyhow::bail!("Memory {} not found", id);
    }
    Ok(())
}

async fn cmd_decay(manager: &MemoryManager) -> Result<()> {
    let report = manager.apply_decay().await;
    println!(
        "Decayed {} memories, pruned {} below the floor",
        report.decayed, report.pruned
    );
    Ok(())
}

async fn cmd_merge(manager: &MemoryManager, scope: Option<&str>, threshold: Option<f64>) -> Result<()> {
    let scope = scope.map(parse_scope).transpose()?;
    let report = manager.merge_similar(scope.as_ref(), threshold).await?;
    println!("Merged {} near-duplicate memories", report.merged);
    Ok(())
}

async fn cmd_export(manager: &MemoryManager, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only 'json' is supported.", format);
    }

    let snapshot = manager.export().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn cmd_import(manager: &MemoryManager, file: &str) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file))?;
    let snapshot: ExportSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a memory export", file))?;

    let imported = manager.import(&snapshot).await?;
    println!(
        "Imported {} memories and {} personas (exported at {})",
        imported,
        snapshot.personas.len(),
        snapshot.exported_at
    );
    Ok(())
}

async fn cmd_persona(manager: &MemoryManager, id: &str, name: &str, description: &str) -> Result<()> {
    let persona = manager.register_persona(id, name, description).await?;
    println!("Registered persona {} ({})", persona.id, persona.name);
    Ok(())
}
