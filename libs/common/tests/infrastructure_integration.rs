//! Integration tests for the infrastructure components
//!
//! These tests need PostgreSQL and Redis reachable through `DATABASE_URL`
//! and `REDIS_URL`; run them with `--ignored`.

use common::{
    database::{DatabaseConfig, health_check, init_pool},
    events::{LabEventPublisher, RedisConfig, lab_channel},
};
use sqlx::Row;

#[tokio::test]
#[ignore = "requires PostgreSQL and Redis"]
async fn test_infrastructure_integration() -> Result<(), Box<dyn std::error::Error>> {
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    assert!(health_check(&pool).await?, "Database health check failed");

    let row = sqlx::query("SELECT 1 as result").fetch_one(&pool).await?;
    let result: i32 = row.get("result");
    assert_eq!(result, 1, "PostgreSQL simple query test failed");

    let redis_config = RedisConfig::from_env()?;
    let publisher = LabEventPublisher::new(&redis_config)?;
    assert!(publisher.health_check().await?, "Redis health check failed");

    // Subscribe first so the publish has a receiver
    let client = redis::Client::open(redis_config.url.clone())?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(lab_channel(99)).await?;

    let receivers = publisher
        .publish(99, &serde_json::json!({"type": "integration_test"}))
        .await?;
    assert!(receivers >= 1, "Redis publish reached no subscriber");

    Ok(())
}
