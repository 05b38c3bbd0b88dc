//! cogcommit CLI - import transcripts and sync cognitive commits.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cogcommit::store::SearchOptions;
use cogcommit::sync::{HttpRemoteStore, PushOptions, RemoteStore, SyncEngine};
use cogcommit::{Config, ImportOptions, Importer, Store};

#[derive(Parser)]
#[command(name = "cogcommit")]
#[command(author = "e421")]
#[command(version)]
#[command(about = "Capture AI coding sessions as cognitive commits")]
#[command(long_about = r#"
cogcommit groups Claude Code transcripts into cognitive commits, keeps them in a
local store and syncs them with the cloud.

Examples:
  cogcommit import                 # Import new transcript lines
  cogcommit push --dry-run         # Show what would be uploaded
  cogcommit sync                   # Pull, settle conflicts, push
  cogcommit search "login bug"     # Search stored turns
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.config/cogcommit/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import new transcript lines into the local store
    Import {
        /// Re-read every transcript from the start
        #[arg(short, long)]
        force: bool,
    },

    /// Upload closed commits
    Push {
        /// Push every closed commit, ignoring remote changes
        #[arg(short, long)]
        force: bool,

        /// Show what would be pushed without writing anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Only retry commits whose last push failed
        #[arg(long)]
        retry: bool,

        /// Do not import before pushing
        #[arg(long)]
        skip_import: bool,
    },

    /// Download commits changed remotely since the last pull
    Pull,

    /// Pull, settle conflicts, then push
    Sync {
        /// Only show local sync state
        #[arg(long)]
        status: bool,
    },

    /// Search stored turns
    Search {
        query: String,

        /// Restrict to one project
        #[arg(short, long)]
        project: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Local usage summary
    Analytics {
        /// Number of recent commits to sample
        #[arg(short, long, default_value_t = 50)]
        recent: usize,
    },

    /// Plan usage reported by the remote
    Usage,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path);
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        }
        None => Config::load(),
    };

    let store = Store::open(config.db_path())
        .with_context(|| format!("Failed to open store at {:?}", config.db_path()))?;

    match cli.command {
        Commands::Import { force } => {
            let result = run_import(&store, &config, force)?;
            println!("✓ Import complete");
            println!("  Imported:      {}", result.imported);
            println!("  Skipped:       {}", result.skipped);
            println!("  Closed:        {}", result.commits_closed);
            println!("  Parse errors:  {}", result.parse_errors);

            if config.sync.continuous_sync {
                let remote = remote(&config)?;
                if remote.is_authenticated() {
                    let engine =
                        SyncEngine::new(&store, &remote).with_policy(config.sync.conflict_policy);
                    let synced = engine.sync().await?;
                    println!("✓ Sync complete");
                    println!("  Pulled:        {}", synced.pulled);
                    println!("  Pushed:        {}", synced.pushed);
                    println!("  Conflicts:     {}", synced.conflicts);
                    print_errors(&synced.errors);
                } else {
                    log::info!("continuous_sync is on but no token is configured, skipping sync");
                }
            }
        }

        Commands::Push {
            force,
            dry_run,
            retry,
            skip_import,
        } => {
            if !skip_import && !dry_run {
                run_import(&store, &config, false)?;
            }
            let remote = remote(&config)?;
            let engine = SyncEngine::new(&store, &remote).with_policy(config.sync.conflict_policy);
            let result = engine
                .push(&PushOptions {
                    force,
                    dry_run,
                    retry,
                })
                .await?;
            let verb = if dry_run { "Would push" } else { "Pushed" };
            println!("{}: {}", verb, result.pushed);
            println!("Conflicts: {}", result.conflicts);
            print_errors(&result.errors);
        }

        Commands::Pull => {
            let remote = remote(&config)?;
            let engine = SyncEngine::new(&store, &remote).with_policy(config.sync.conflict_policy);
            let result = engine.pull().await?;
            println!("Pulled: {}", result.pulled);
            println!("Conflicts: {}", result.conflicts);
            print_errors(&result.errors);
        }

        Commands::Sync { status } => {
            let remote = remote(&config)?;
            let engine = SyncEngine::new(&store, &remote).with_policy(config.sync.conflict_policy);
            if status {
                let report = engine.status()?;
                println!("Online:     {}", if report.is_online { "yes" } else { "no" });
                match report.last_sync_at {
                    Some(at) => println!("Last sync:  {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                    None => println!("Last sync:  never"),
                }
                println!("Pending:    {}", report.pending_count);
                println!("Synced:     {}", report.synced_count);
                println!("Conflicts:  {}", report.conflict_count);
                println!("Failed:     {}", report.failed_count);
            } else {
                let result = engine.sync().await?;
                println!("Pulled: {}", result.pulled);
                println!("Pushed: {}", result.pushed);
                println!("Conflicts: {}", result.conflicts);
                print_errors(&result.errors);
            }
        }

        Commands::Search {
            query,
            project,
            limit,
        } => {
            let hits = store.turns().search(
                &query,
                &SearchOptions {
                    project,
                    limit: Some(limit),
                },
            )?;
            if hits.is_empty() {
                println!("No results found for '{}'", query);
            }
            for hit in hits {
                let preview: String = hit.turn.content.chars().take(80).collect();
                let short_id: String = hit.commit_id.chars().take(8).collect();
                println!(
                    "{} [{}] {} {}: {}",
                    hit.turn.timestamp.format("%Y-%m-%d %H:%M"),
                    hit.project_name,
                    short_id,
                    hit.turn.role.as_str(),
                    preview.replace('\n', " ")
                );
            }
        }

        Commands::Analytics { recent } => {
            let analytics = store.analytics(recent)?;
            println!("{}", serde_json::to_string_pretty(&analytics)?);
        }

        Commands::Usage => {
            let remote = remote(&config)?;
            let user_id = config
                .remote
                .user_id
                .as_deref()
                .context("No user_id configured")?;
            let usage = SyncEngine::new(&store, &remote).usage(user_id).await?;
            println!("Commits: {} / {}", usage.commit_count, usage.commit_limit);
            println!(
                "Storage: {} / {} bytes",
                usage.storage_used_bytes, usage.storage_limit_bytes
            );
        }
    }

    Ok(())
}

fn run_import(store: &Store, config: &Config, force: bool) -> Result<cogcommit::ImportResult> {
    Importer::new(store, &config.transcripts_dir)
        .import_all(&ImportOptions { force })
        .with_context(|| format!("Failed to import from {:?}", config.transcripts_dir))
}

fn remote(config: &Config) -> Result<HttpRemoteStore> {
    HttpRemoteStore::new(
        config.remote.url.clone(),
        config.remote.token.clone(),
        config.remote_timeout(),
    )
    .context("Failed to create remote client")
}

fn print_errors(errors: &[String]) {
    if errors.is_empty() {
        return;
    }
    println!("Errors: {}", errors.len());
    for error in errors {
        println!("  ✗ {}", error);
    }
}
