use sqlx::postgres::PgPoolOptions;

use astro_dealer::{services, settings};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenv::dotenv().ok();
    log4rs::init_file("log4rs.yaml", Default::default())?;

    let config = settings::Settings::new()?;
    let conn = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.postgres.url)
        .await?;

    log::info!("Starting services.");
    services::start_services(conn, config).await
}
