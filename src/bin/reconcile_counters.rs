//! Reconcile denormalized counters with the rows they summarize.
//!
//! Reports every feature request whose `upvotes` or `comments_count`
//! disagrees with the upvote and comment rows, then rewrites them.
//! Comments left behind by deleted requests are listed, and removed only
//! when asked.
//!
//! Usage: `reconcile_counters [--dry-run] [--reap-orphans] [DB_PATH]`
//! The database defaults to the configured path (`FEATUREBOARD_DB` or
//! `~/.featureboard/featureboard.db`).

use std::path::PathBuf;

use featureboard_lib::db::BoardDb;
use featureboard_lib::state::load_config;

#[derive(Debug, Default)]
struct Options {
    dry_run: bool,
    reap_orphans: bool,
    db_path: Option<PathBuf>,
}

fn parse_args(args: impl Iterator<Item = String>) -> anyhow::Result<Options> {
    let mut options = Options::default();
    for arg in args {
        match arg.as_str() {
            "--dry-run" => options.dry_run = true,
            "--reap-orphans" => options.reap_orphans = true,
            flag if flag.starts_with("--") => anyhow::bail!("Unknown flag: {flag}"),
            path => {
                if options.db_path.is_some() {
                    anyhow::bail!("Only one database path may be given");
                }
                options.db_path = Some(PathBuf::from(path));
            }
        }
    }
    Ok(options)
}

fn open_db(options: &Options) -> anyhow::Result<BoardDb> {
    let db = match options.db_path {
        Some(ref path) => BoardDb::open_at(path.clone()),
        None => {
            let database_path = load_config().ok().and_then(|c| c.database_path);
            BoardDb::open_configured(database_path.as_deref())
        }
    };
    db.map_err(|e| anyhow::anyhow!("Failed to open database: {e}"))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = parse_args(std::env::args().skip(1))?;
    let db = open_db(&options)?;

    let drift = db.find_counter_drift()?;
    for row in &drift {
        log::info!(
            "{}: upvotes {} -> {}, comments {} -> {}",
            row.id,
            row.upvotes,
            row.actual_upvotes,
            row.comments_count,
            row.actual_comments
        );
    }

    if drift.is_empty() {
        log::info!("All counters match");
    } else if options.dry_run {
        log::info!("{} feature requests drifted (dry run, nothing written)", drift.len());
    } else {
        let repaired = db.repair_counters()?;
        log::info!("Repaired counters on {} feature requests", repaired);
    }

    let orphans = db.list_orphaned_comment_ids()?;
    if !orphans.is_empty() {
        log::warn!(
            "{} comments belong to deleted feature requests: {}",
            orphans.len(),
            orphans.join(", ")
        );
        if options.reap_orphans && !options.dry_run {
            let reaped = db.delete_orphaned_comments()?;
            log::info!("Deleted {} orphaned comments", reaped);
        }
    }

    Ok(())
}
