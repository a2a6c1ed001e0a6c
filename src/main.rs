use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};

use tuition_ledger::{business_metrics, import_roster, setup_database, Period};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init") => run_init()?,
        Some("import") => run_import(args.get(2).map(|s| s.as_str()))?,
        _ => run_status()?,
    }

    Ok(())
}

fn db_path() -> PathBuf {
    env::var("TUITION_DB")
        .unwrap_or_else(|_| "tuition.db".to_string())
        .into()
}

fn run_init() -> Result<()> {
    println!("🗄️  Tuition Ledger - Database Setup");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let path = db_path();
    let conn = Connection::open(&path)?;
    setup_database(&conn)?;

    println!("✓ Database initialized with WAL mode: {:?}", path);

    Ok(())
}

fn run_import(csv_arg: Option<&str>) -> Result<()> {
    let Some(csv_path) = csv_arg else {
        bail!("usage: tuition-ledger import <roster.csv>");
    };

    println!("📂 Tuition Ledger - Roster Import");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = Connection::open(db_path())?;
    setup_database(&conn)?;

    let enrolled = import_roster(&conn, Path::new(csv_path))?;

    println!("✓ Roster import complete: {} students", enrolled);

    Ok(())
}

fn run_status() -> Result<()> {
    let path = db_path();

    if !path.exists() {
        eprintln!("❌ Database not found at {:?}", path);
        eprintln!("   Run: tuition-ledger init");
        eprintln!("   to create it first.");
        std::process::exit(1);
    }

    let conn = Connection::open(&path)?;

    let period = Period::from_datetime(Utc::now());
    let metrics = business_metrics(&conn, period)?;

    println!("📊 Tuition Ledger - Collection for {}", period);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Active students:   {}", metrics.active_students);
    println!("  Teachers:          {}", metrics.teachers);
    println!("  Expected tuition:  ${:.2}", metrics.expected_tuition);
    println!("  Collected:         ${:.2}", metrics.collected);
    println!("  Outstanding:       ${:.2}", metrics.outstanding);
    println!("  Percent collected: {:.1}%", metrics.percent_collected);

    Ok(())
}
