use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use vault_core::auditor;
use vault_core::cache::FingerprintCache;
use vault_core::config;
use vault_core::config::AppConfig;
use vault_core::extractor::PlainTextExtractor;
use vault_core::models::{ConfirmationReason, PlacementOutcome};
use vault_core::pipeline;
use vault_core::placement::VaultSnapshot;
use vault_core::CancelFlag;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, finishing current phase");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Ingest { dry_run, json } => run_ingest(cfg, cancel, dry_run, json).await,
        Commands::Audit { json } => run_audit(cfg, cancel, json),
        Commands::Repair { json } => run_repair(cfg, cancel, json),
        Commands::Status { json } => run_status(cfg, json).await,
    }
}

#[derive(Parser)]
#[command(name = "vault-cli")]
#[command(about = "Vault ingestion and consistency engine", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify and place files from the inbox
    Ingest {
        /// Report what would happen without touching any file
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Scan the vault for broken links and missing metadata
    Audit {
        /// Output JSON report
        #[arg(long)]
        json: bool,
    },
    /// Audit the vault, then fix what can be fixed automatically
    Repair {
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Show vault and fingerprint-cache statistics
    Status {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

async fn run_ingest(cfg: AppConfig, cancel: CancelFlag, dry_run: bool, json: bool) -> Result<()> {
    let registry = Arc::new(pipeline::build_registry(&cfg));
    let limiter = Arc::new(pipeline::build_limiter(&cfg));
    let report = pipeline::run_ingest(
        &cfg,
        registry,
        limiter,
        Arc::new(PlainTextExtractor),
        &cancel,
        dry_run,
    )
    .await?;

    if json {
        let outcomes: Vec<serde_json::Value> = report
            .outcomes
            .iter()
            .map(|o| {
                serde_json::json!({
                    "source": o.source,
                    "placed_at": o.placed_at,
                    "outcome": outcome_label(&o.outcome),
                    "reason": confirmation_reason(&o.outcome),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": "ok",
                "dry_run": dry_run,
                "summary": report.summary,
                "outcomes": outcomes,
            }))?
        );
    } else {
        let s = &report.summary;
        println!(
            "ingest{}: discovered {}, unchanged {}, duplicates {}, placed {}, needs confirmation {}, rejected {}",
            if dry_run { " (dry run)" } else { "" },
            s.discovered,
            s.skipped_unchanged,
            s.duplicates_merged,
            s.auto_placed,
            s.needs_confirmation,
            s.rejected
        );
        for outcome in &report.outcomes {
            if let PlacementOutcome::NeedsConfirmation { reason, alternatives } = &outcome.outcome {
                println!(
                    "  confirm {}: {:?}, {} alternative(s)",
                    outcome.source.display(),
                    reason,
                    alternatives.len()
                );
            }
        }
    }
    Ok(())
}

fn run_audit(cfg: AppConfig, cancel: CancelFlag, json: bool) -> Result<()> {
    let report = auditor::audit(&PathBuf::from(&cfg.vault.root), &cfg, &cancel)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "audit: scanned {}, broken links {}, missing frontmatter {}, missing category {}, untagged {}",
            report.total_scanned,
            report.broken_links.len(),
            report.missing_frontmatter.len(),
            report.missing_category.len(),
            report.untagged_files.len()
        );
        for link in &report.broken_links {
            match &link.suggestion {
                Some(s) => println!(
                    "  {}: [[{}]] -> [[{}]]",
                    link.file_path.display(),
                    link.link_target,
                    s
                ),
                None => println!(
                    "  {}: [[{}]] has no candidate",
                    link.file_path.display(),
                    link.link_target
                ),
            }
        }
    }
    Ok(())
}

fn run_repair(cfg: AppConfig, cancel: CancelFlag, json: bool) -> Result<()> {
    let root = PathBuf::from(&cfg.vault.root);
    let report = auditor::audit(&root, &cfg, &cancel)?;
    let summary = auditor::repair(&root, &cfg, &report, &cancel)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "repair: links fixed {}, links stripped {}, frontmatter injected {}, categories filled {}, failures {}",
            summary.links_fixed,
            summary.links_stripped,
            summary.frontmatter_injected,
            summary.categories_filled,
            summary.failures
        );
    }
    Ok(())
}

async fn run_status(cfg: AppConfig, json: bool) -> Result<()> {
    let root = PathBuf::from(&cfg.vault.root);
    let cache = FingerprintCache::load(&root, &root.join(&cfg.cache.path));
    let snapshot = VaultSnapshot::scan(&root, &cfg.vault, &cfg.scan.exclude)?;
    let tracked_files: usize = snapshot.folder_files.values().map(|f| f.len()).sum();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "vault": cfg.vault.root,
                "projects": snapshot.projects,
                "files": tracked_files,
                "fingerprints": cache.len().await,
            }))?
        );
    } else {
        println!(
            "vault {}: {} files, {} projects, {} fingerprints cached",
            cfg.vault.root,
            tracked_files,
            snapshot.projects.len(),
            cache.len().await
        );
    }
    Ok(())
}

fn outcome_label(outcome: &PlacementOutcome) -> &'static str {
    match outcome {
        PlacementOutcome::AutoPlace(_) => "auto_place",
        PlacementOutcome::NeedsConfirmation { .. } => "needs_confirmation",
        PlacementOutcome::Rejected(_) => "rejected",
    }
}

fn confirmation_reason(outcome: &PlacementOutcome) -> Option<ConfirmationReason> {
    match outcome {
        PlacementOutcome::NeedsConfirmation { reason, .. } => Some(*reason),
        _ => None,
    }
}
