//! Kiosk device number bindings

use async_trait::async_trait;
use booking::{
    BookingError, BookingResult, Conflict, models::DeviceBinding, store::DeviceStore,
};
use common::error::is_constraint_violation;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::store_error;

/// Device repository for database operations
#[derive(Clone)]
pub struct DeviceRepository {
    pool: PgPool,
}

impl DeviceRepository {
    /// Create a new device repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceStore for DeviceRepository {
    async fn find_device(&self, device_id: Uuid) -> BookingResult<Option<DeviceBinding>> {
        let row = sqlx::query(
            r#"
            SELECT device_id, lab_id, device_number, ip, hostname, registered_at
            FROM devices
            WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to find device", e))?;

        Ok(row.map(|row| binding_from_row(&row)))
    }

    async fn claimed_numbers(&self, lab_id: i32) -> BookingResult<Vec<i32>> {
        let rows = sqlx::query(
            r#"
            SELECT device_number
            FROM devices
            WHERE lab_id = $1 AND device_number IS NOT NULL
            ORDER BY device_number
            "#,
        )
        .bind(lab_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to list claimed device numbers", e))?;

        Ok(rows.iter().map(|row| row.get("device_number")).collect())
    }

    async fn upsert_device(&self, binding: DeviceBinding) -> BookingResult<DeviceBinding> {
        let result = sqlx::query(
            r#"
            INSERT INTO devices (device_id, lab_id, device_number, ip, hostname, registered_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (device_id) DO UPDATE
            SET lab_id = EXCLUDED.lab_id,
                device_number = EXCLUDED.device_number,
                ip = EXCLUDED.ip,
                hostname = EXCLUDED.hostname,
                registered_at = EXCLUDED.registered_at
            RETURNING device_id, lab_id, device_number, ip, hostname, registered_at
            "#,
        )
        .bind(binding.device_id)
        .bind(binding.lab_id)
        .bind(binding.device_number)
        .bind(&binding.ip)
        .bind(&binding.hostname)
        .bind(binding.registered_at)
        .fetch_one(&self.pool)
        .await;

        match (result, binding.device_number) {
            (Ok(row), _) => Ok(binding_from_row(&row)),
            (Err(e), Some(device_number)) if is_constraint_violation(&e) => {
                Err(BookingError::Conflict(Conflict::DeviceNumberTaken {
                    lab_id: binding.lab_id,
                    device_number,
                }))
            }
            (Err(e), _) => Err(store_error("Failed to upsert device", e)),
        }
    }
}

fn binding_from_row(row: &PgRow) -> DeviceBinding {
    DeviceBinding {
        device_id: row.get("device_id"),
        lab_id: row.get("lab_id"),
        device_number: row.get("device_number"),
        ip: row.get("ip"),
        hostname: row.get("hostname"),
        registered_at: row.get("registered_at"),
    }
}
