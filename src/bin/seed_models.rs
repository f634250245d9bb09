//! Insert the configured chat models into the registry.
//!
//! Usage: cargo run --bin seed_models [gptbot.json]
//!
//! Existing models keep their priority; only new ids are inserted.

use anyhow::Context;

use gptbot::backend::ModelRegistry;
use gptbot::config::Config;
use gptbot::storage::Database;

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "gptbot.json".to_string());
    let config = Config::load(&config_path)?;

    let db_path = config.db_path();
    let db = Database::open(&db_path).with_context(|| format!("opening database {}", db_path.display()))?;
    let registry = ModelRegistry::new(db);

    let inserted = registry.seed(&config.default_models).context("seeding chat models")?;
    println!(
        "Seeded {} new model(s) into {} ({} configured)",
        inserted,
        db_path.display(),
        config.default_models.len()
    );

    for model in registry.list()? {
        println!("  [{:>3}] {} (priority {})", model.id, model.model, model.priority);
    }
    Ok(())
}
