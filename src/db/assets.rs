use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};

use super::organization::{check_department, require_colleague};
use super::sequence::{format_asset_no, next_value, yearly_key};
use super::{Db, is_unique_violation, parse_column};
use crate::errors::{AdminError, require};
use crate::models::{AssetDevice, AssetFilter, AssetStatus, AssetUpdate, NewAsset, Staff};
use crate::permissions::{self, ensure, ensure_same_hospital};
use crate::validation::{optional_text, positive, required_text};

const ASSET_SELECT: &str = "SELECT id, hospital_id, department_id, asset_no, title, serial_no, type_spec,
        manufacturer, service_life, purchase_date, storage_place, responsible_id, status,
        created_at, updated_at
     FROM asset_devices";

/// Intermediate row struct for asset_devices.
struct AssetRow {
    id: i64,
    hospital_id: i64,
    department_id: Option<i64>,
    asset_no: String,
    title: String,
    serial_no: Option<String>,
    type_spec: Option<String>,
    manufacturer: Option<String>,
    service_life: Option<i32>,
    purchase_date: Option<String>,
    storage_place: Option<String>,
    responsible_id: Option<i64>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl AssetRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            hospital_id: row.get(1)?,
            department_id: row.get(2)?,
            asset_no: row.get(3)?,
            title: row.get(4)?,
            serial_no: row.get(5)?,
            type_spec: row.get(6)?,
            manufacturer: row.get(7)?,
            service_life: row.get(8)?,
            purchase_date: row.get(9)?,
            storage_place: row.get(10)?,
            responsible_id: row.get(11)?,
            status: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_asset(self) -> Result<AssetDevice> {
        Ok(AssetDevice {
            id: self.id,
            hospital_id: self.hospital_id,
            department_id: self.department_id,
            asset_no: self.asset_no,
            title: self.title,
            serial_no: self.serial_no,
            type_spec: self.type_spec,
            manufacturer: self.manufacturer,
            service_life: self.service_life,
            purchase_date: self.purchase_date,
            storage_place: self.storage_place,
            responsible_id: self.responsible_id,
            status: parse_column(&self.status, "asset status")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(crate) fn fetch_asset(conn: &Connection, id: i64) -> Result<Option<AssetDevice>> {
    let row = conn
        .query_row(
            &format!("{} WHERE id = ?1", ASSET_SELECT),
            params![id],
            AssetRow::from_row,
        )
        .optional()
        .context("Failed to query asset")?;
    row.map(AssetRow::into_asset).transpose()
}

pub(crate) fn set_asset_status(conn: &Connection, id: i64, status: AssetStatus) -> Result<()> {
    conn.execute(
        "UPDATE asset_devices SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![status.as_str(), id],
    )
    .context("Failed to update asset status")?;
    Ok(())
}

/// Whether the asset has submitted or dispatched orders, ignoring `except`.
pub(crate) fn has_open_orders(conn: &Connection, asset_id: i64, except: Option<i64>) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM repair_orders
         WHERE asset_id = ?1 AND status IN ('submitted', 'dispatched') AND id != COALESCE(?2, -1))",
        params![asset_id, except],
        |row| row.get(0),
    )
    .context("Failed to check open repair orders")
}

fn asset_no_taken(conn: &Connection, hospital_id: i64, asset_no: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM asset_devices WHERE hospital_id = ?1 AND asset_no = ?2)",
        params![hospital_id, asset_no],
        |row| row.get(0),
    )
    .context("Failed to check asset number")
}

fn duplicate_asset_no(asset_no: &str) -> AdminError {
    AdminError::conflict(format!("Asset number '{}' is already registered", asset_no))
}

fn ensure_asset_manager(actor: &Staff, hospital_id: i64) -> Result<(), AdminError> {
    ensure_same_hospital(actor, hospital_id)?;
    ensure(
        permissions::can_manage_assets(actor),
        "asset manager role required",
    )
}

impl Db {
    /// Register a device. Without an explicit `asset_no` one is minted from
    /// the yearly asset sequence inside the insert transaction.
    pub fn create_asset(
        &self,
        actor: &Staff,
        hospital_id: i64,
        input: &NewAsset,
        prefix: &str,
        today: NaiveDate,
    ) -> Result<AssetDevice> {
        ensure_asset_manager(actor, hospital_id)?;
        let title = required_text("title", &input.title)?;
        if let Some(years) = input.service_life {
            positive("service_life", years)?;
        }
        let explicit_no = optional_text(input.asset_no.as_deref());

        let tx = self.immediate()?;
        check_department(&tx, hospital_id, input.department_id)?;
        if let Some(responsible) = input.responsible_id {
            require_colleague(&tx, hospital_id, responsible, "responsible_id")?;
        }

        let asset_no = match explicit_no {
            Some(no) => {
                if asset_no_taken(&tx, hospital_id, &no)? {
                    return Err(duplicate_asset_no(&no).into());
                }
                no
            }
            // Explicit registrations may already hold a number in the minted
            // shape; step past them so the counter never stalls.
            None => loop {
                let value = next_value(&tx, &yearly_key(prefix, today))?;
                let candidate = format_asset_no(prefix, today, value);
                if !asset_no_taken(&tx, hospital_id, &candidate)? {
                    break candidate;
                }
                tracing::debug!(asset_no = %candidate, hospital_id, "minted asset number already registered, skipping");
            },
        };

        tx.execute(
            "INSERT INTO asset_devices (hospital_id, department_id, asset_no, title, serial_no,
                type_spec, manufacturer, service_life, purchase_date, storage_place, responsible_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                hospital_id,
                input.department_id,
                asset_no,
                title,
                optional_text(input.serial_no.as_deref()),
                optional_text(input.type_spec.as_deref()),
                optional_text(input.manufacturer.as_deref()),
                input.service_life,
                input.purchase_date.map(|d| d.format("%Y-%m-%d").to_string()),
                optional_text(input.storage_place.as_deref()),
                input.responsible_id
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                anyhow::Error::from(duplicate_asset_no(&asset_no))
            } else {
                anyhow::Error::from(e).context("Failed to insert asset")
            }
        })?;
        let id = tx.last_insert_rowid();
        tx.commit().context("Failed to commit asset creation")?;

        tracing::info!(asset_id = id, %asset_no, hospital_id, "asset registered");
        self.get_asset(id)?.context("Asset not found after insert")
    }

    pub fn list_assets(&self, hospital_id: i64, filter: &AssetFilter) -> Result<Vec<AssetDevice>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE hospital_id = ?1
                   AND (?2 IS NULL OR status = ?2)
                   AND (?3 IS NULL OR department_id = ?3)
                 ORDER BY id",
                ASSET_SELECT
            ))
            .context("Failed to prepare list_assets")?;
        let rows = stmt
            .query_map(
                params![
                    hospital_id,
                    filter.status.map(|s| s.as_str()),
                    filter.department_id
                ],
                AssetRow::from_row,
            )
            .context("Failed to query assets")?;
        let mut assets = Vec::new();
        for row in rows {
            let r = row.context("Failed to read asset row")?;
            assets.push(r.into_asset()?);
        }
        Ok(assets)
    }

    pub fn get_asset(&self, id: i64) -> Result<Option<AssetDevice>> {
        fetch_asset(&self.conn, id)
    }

    /// Update descriptive fields. `status` may only move between `using` and
    /// `idle`; repair and scrap states are owned by their workflows.
    pub fn update_asset(&self, actor: &Staff, id: i64, input: &AssetUpdate) -> Result<AssetDevice> {
        let asset = require(self.get_asset(id)?, "Asset", id)?;
        ensure_asset_manager(actor, asset.hospital_id)?;

        let status = match input.status {
            Some(next) if next != asset.status => {
                if !next.is_manual() || !asset.status.is_manual() {
                    tracing::warn!(asset_id = id, from = %asset.status, to = %next, "rejected asset status change");
                    return Err(AdminError::transition("asset", asset.status, next).into());
                }
                next
            }
            _ => asset.status,
        };
        let title = match &input.title {
            Some(t) => required_text("title", t)?,
            None => asset.title.clone(),
        };
        if let Some(years) = input.service_life {
            positive("service_life", years)?;
        }
        let department_id = input.department_id.or(asset.department_id);
        check_department(&self.conn, asset.hospital_id, department_id)?;
        let responsible_id = input.responsible_id.or(asset.responsible_id);
        if let Some(responsible) = input.responsible_id {
            require_colleague(&self.conn, asset.hospital_id, responsible, "responsible_id")?;
        }

        let pick = |new: &Option<String>, old: &Option<String>| match new {
            Some(v) => optional_text(Some(v.as_str())),
            None => old.clone(),
        };

        self.conn
            .execute(
                "UPDATE asset_devices SET title = ?1, department_id = ?2, serial_no = ?3, type_spec = ?4,
                    manufacturer = ?5, service_life = ?6, storage_place = ?7, responsible_id = ?8,
                    status = ?9, updated_at = datetime('now')
                 WHERE id = ?10",
                params![
                    title,
                    department_id,
                    pick(&input.serial_no, &asset.serial_no),
                    pick(&input.type_spec, &asset.type_spec),
                    pick(&input.manufacturer, &asset.manufacturer),
                    input.service_life.or(asset.service_life),
                    pick(&input.storage_place, &asset.storage_place),
                    responsible_id,
                    status.as_str(),
                    id
                ],
            )
            .context("Failed to update asset")?;
        self.get_asset(id)?.context("Asset not found after update")
    }

    /// Retire the device. Refused while a repair is still open.
    pub fn scrap_asset(&self, actor: &Staff, id: i64) -> Result<AssetDevice> {
        let tx = self.immediate()?;
        let asset = require(fetch_asset(&tx, id)?, "Asset", id)?;
        ensure_asset_manager(actor, asset.hospital_id)?;
        if asset.status == AssetStatus::Scrapped {
            return Err(AdminError::transition("asset", asset.status, AssetStatus::Scrapped).into());
        }
        if has_open_orders(&tx, id, None)? {
            return Err(AdminError::conflict(format!(
                "Asset {} has open repair orders",
                asset.asset_no
            ))
            .into());
        }
        set_asset_status(&tx, id, AssetStatus::Scrapped)?;
        tx.commit().context("Failed to commit asset scrap")?;

        tracing::info!(asset_id = id, asset_no = %asset.asset_no, "asset scrapped");
        self.get_asset(id)?.context("Asset not found after scrap")
    }

    /// Delete a device that never had a repair order.
    pub fn delete_asset(&self, actor: &Staff, id: i64) -> Result<()> {
        let tx = self.immediate()?;
        let asset = require(fetch_asset(&tx, id)?, "Asset", id)?;
        ensure_asset_manager(actor, asset.hospital_id)?;
        let orders: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM repair_orders WHERE asset_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .context("Failed to count repair orders")?;
        if orders > 0 {
            return Err(AdminError::conflict(format!(
                "Asset {} has {} repair order(s) and cannot be deleted",
                asset.asset_no, orders
            ))
            .into());
        }
        tx.execute("DELETE FROM asset_devices WHERE id = ?1", params![id])
            .context("Failed to delete asset")?;
        tx.commit().context("Failed to commit asset deletion")?;
        tracing::info!(asset_id = id, asset_no = %asset.asset_no, "asset deleted");
        Ok(())
    }
}
