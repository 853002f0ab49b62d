use anyhow::Result;
use tracing::info;

use trawl::config::Config;
use trawl::storage::Database;

/// Create the database schema without starting the server
pub async fn init_db() -> Result<()> {
    let config = Config::from_env()?;

    let database = Database::connect(&config.database)?;
    database.init_schema().await?;

    info!("Database schema initialized");
    Ok(())
}
