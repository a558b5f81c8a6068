//! Server lifecycle commands: `hospital-admin serve` and `init-db`.

use anyhow::Result;

use hospital_admin::config::AppConfig;
use hospital_admin::server;

pub async fn cmd_serve(config: AppConfig) -> Result<()> {
    tracing::info!(
        addr = %config.bind_addr(),
        db = %config.database.path.display(),
        dev_mode = config.server.dev_mode,
        "starting server"
    );
    server::start_server(config).await
}

/// Create the database file and run migrations without serving.
pub fn cmd_init_db(config: &AppConfig) -> Result<()> {
    server::open_database(config)?;
    println!(
        "Database initialized at {}",
        config.database.path.display()
    );
    Ok(())
}
