use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;

use townhall::{count, open_database, top_by_votes, Config, EntityKind, Problem};

const TOP_PROBLEMS: usize = 5;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(db_path(&args)?),
        Some("stats") => run_stats(db_path(&args)?),
        _ => {
            eprintln!("usage: townhall <init|stats> [database path]");
            std::process::exit(2);
        }
    }
}

/// Explicit path argument wins over TOWNHALL_DB_PATH
fn db_path(args: &[String]) -> Result<PathBuf> {
    match args.get(2) {
        Some(path) => Ok(PathBuf::from(path)),
        None => Ok(Config::load()?.db_path),
    }
}

fn run_init(path: PathBuf) -> Result<()> {
    println!("Setting up database at {:?}...", path);

    open_database(&path).with_context(|| format!("Failed to initialize {:?}", path))?;

    println!("✓ Schema ready (WAL mode)");
    Ok(())
}

fn run_stats(path: PathBuf) -> Result<()> {
    if !path.exists() {
        bail!("Database not found at {:?} (run: townhall init)", path);
    }

    let conn = open_database(&path).with_context(|| format!("Failed to open {:?}", path))?;

    println!("townhall database: {:?}", path);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for kind in EntityKind::ALL {
        println!("{:<10} {:>8}", kind.to_string(), count(&conn, kind)?);
    }

    let top: Vec<Problem> = top_by_votes(&conn, TOP_PROBLEMS)?;
    if !top.is_empty() {
        println!("\nTop problems:");
        for problem in top {
            println!("{:>6}  {}", problem.total_votes, problem.title);
        }
    }

    Ok(())
}
