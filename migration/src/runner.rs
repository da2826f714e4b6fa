use colored::*;
use futures::FutureExt;
use sea_orm_migration::prelude::*;
use std::io::{self, Write};
use std::time::Instant;

pub async fn run_all_migrations(url: &str) {
    let db = sea_orm::Database::connect(url)
        .await
        .expect("DB connection failed");
    let schema_manager = SchemaManager::new(&db);

    let migrations = <migration::Migrator as MigratorTrait>::migrations();
    println!("Applying {} migrations", migrations.len());

    let started = Instant::now();
    for migration in migrations {
        apply_one(&schema_manager, migration).await;
    }
    println!("All migrations applied in {:.2?}", started.elapsed());
}

async fn apply_one(schema_manager: &SchemaManager<'_>, migration: Box<dyn MigrationTrait>) {
    print!("  {:.<68} ", migration.name().bold());
    io::stdout().flush().ok();

    let start = Instant::now();
    // Catch panics so one bad migration reports as a failure instead of a raw backtrace.
    let outcome = std::panic::AssertUnwindSafe(migration.up(schema_manager))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {
            println!("{} {}", "ok".green(), format!("({:.2?})", start.elapsed()).dimmed());
        }
        Ok(Err(e)) => {
            println!("{} {}", "failed".red(), e);
            std::process::exit(1);
        }
        Err(_) => {
            println!("{}", "panicked".red());
            std::process::exit(1);
        }
    }
}
