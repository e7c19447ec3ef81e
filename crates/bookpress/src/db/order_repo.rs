//! Order repository: CRUD operations for the `print_orders` table.

use rusqlite::{params, Connection, Row};

use super::{
    corrupt, format_timestamp, parse_json, parse_timestamp, Database, DatabaseError,
    RepositoryError,
};
use crate::cover::{CoverType, PaperType};
use crate::fulfillment::{OrderStatus, PrintOrder, ShippingLevel};
use crate::geometry::BookSize;

#[derive(Debug, Clone)]
struct OrderRow {
    id: String,
    family_id: String,
    job_id: String,
    book_size: String,
    cover_type: String,
    paper_type: String,
    page_count: u32,
    quantity: u32,
    shipping_address: String,
    shipping_level: String,
    cover_design: String,
    status: String,
    provider_order_id: Option<String>,
    provider_status: Option<String>,
    cost: Option<String>,
    cover_storage_key: Option<String>,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl OrderRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            family_id: row.get("family_id")?,
            job_id: row.get("job_id")?,
            book_size: row.get("book_size")?,
            cover_type: row.get("cover_type")?,
            paper_type: row.get("paper_type")?,
            page_count: row.get("page_count")?,
            quantity: row.get("quantity")?,
            shipping_address: row.get("shipping_address")?,
            shipping_level: row.get("shipping_level")?,
            cover_design: row.get("cover_design")?,
            status: row.get("status")?,
            provider_order_id: row.get("provider_order_id")?,
            provider_status: row.get("provider_status")?,
            cost: row.get("cost")?,
            cover_storage_key: row.get("cover_storage_key")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn from_order(order: &PrintOrder) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: order.id.clone(),
            family_id: order.family_id.clone(),
            job_id: order.job_id.clone(),
            book_size: order.book_size.as_str().to_string(),
            cover_type: order.cover_type.as_str().to_string(),
            paper_type: order.paper_type.as_str().to_string(),
            page_count: order.page_count,
            quantity: order.quantity,
            shipping_address: serde_json::to_string(&order.shipping_address)?,
            shipping_level: order.shipping_level.as_str().to_string(),
            cover_design: serde_json::to_string(&order.cover_design)?,
            status: order.status.as_str().to_string(),
            provider_order_id: order.provider_order_id.clone(),
            provider_status: order.provider_status.clone(),
            cost: order.cost.as_ref().map(serde_json::to_string).transpose()?,
            cover_storage_key: order.cover_storage_key.clone(),
            error: order.error.clone(),
            created_at: format_timestamp(&order.created_at),
            updated_at: format_timestamp(&order.updated_at),
        })
    }

    fn into_order(self) -> Result<PrintOrder, DatabaseError> {
        let id = self.id;
        Ok(PrintOrder {
            family_id: self.family_id,
            job_id: self.job_id,
            book_size: BookSize::parse(&self.book_size)
                .ok_or_else(|| corrupt(&id, "book_size", &self.book_size))?,
            cover_type: CoverType::parse(&self.cover_type)
                .ok_or_else(|| corrupt(&id, "cover_type", &self.cover_type))?,
            paper_type: PaperType::parse(&self.paper_type)
                .ok_or_else(|| corrupt(&id, "paper_type", &self.paper_type))?,
            page_count: self.page_count,
            quantity: self.quantity,
            shipping_address: parse_json(&id, "shipping_address", &self.shipping_address)?,
            shipping_level: ShippingLevel::parse(&self.shipping_level)
                .ok_or_else(|| corrupt(&id, "shipping_level", &self.shipping_level))?,
            cover_design: parse_json(&id, "cover_design", &self.cover_design)?,
            status: OrderStatus::parse(&self.status)
                .ok_or_else(|| corrupt(&id, "status", &self.status))?,
            provider_order_id: self.provider_order_id,
            provider_status: self.provider_status,
            cost: self
                .cost
                .map(|c| parse_json(&id, "cost", &c))
                .transpose()?,
            cover_storage_key: self.cover_storage_key,
            error: self.error,
            created_at: parse_timestamp(&id, "created_at", &self.created_at)?,
            updated_at: parse_timestamp(&id, "updated_at", &self.updated_at)?,
            id,
        })
    }
}

/// Inserts a new order row.
pub fn insert(db: &Database, order: &PrintOrder) -> Result<(), RepositoryError> {
    let row = OrderRow::from_order(order)?;
    let inserted = db.with_conn(|conn| {
        let exists: u32 = conn.query_row(
            "SELECT COUNT(*) FROM print_orders WHERE id = ?1",
            params![row.id],
            |r| r.get(0),
        )?;
        if exists > 0 {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO print_orders (id, family_id, job_id, book_size, cover_type, paper_type,
             page_count, quantity, shipping_address, shipping_level, cover_design, status,
             provider_order_id, provider_status, cost, cover_storage_key, error, created_at,
             updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19)",
            params![
                row.id,
                row.family_id,
                row.job_id,
                row.book_size,
                row.cover_type,
                row.paper_type,
                row.page_count,
                row.quantity,
                row.shipping_address,
                row.shipping_level,
                row.cover_design,
                row.status,
                row.provider_order_id,
                row.provider_status,
                row.cost,
                row.cover_storage_key,
                row.error,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(true)
    })?;

    if inserted {
        Ok(())
    } else {
        Err(RepositoryError::Duplicate {
            kind: "Order",
            id: order.id.clone(),
        })
    }
}

/// Overwrites the mutable columns of an existing order.
pub fn update(db: &Database, order: &PrintOrder) -> Result<(), RepositoryError> {
    let row = OrderRow::from_order(order)?;
    let changed = db.with_conn(|conn| {
        Ok(conn.execute(
            "UPDATE print_orders SET status=?2, provider_order_id=?3, provider_status=?4,
             cost=?5, cover_storage_key=?6, error=?7, updated_at=?8
             WHERE id=?1",
            params![
                row.id,
                row.status,
                row.provider_order_id,
                row.provider_status,
                row.cost,
                row.cover_storage_key,
                row.error,
                row.updated_at,
            ],
        )?)
    })?;

    if changed == 0 {
        return Err(RepositoryError::order_not_found(&order.id));
    }
    Ok(())
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<PrintOrder>, RepositoryError> {
    let rows = db.with_conn(|conn| query_rows(conn, "SELECT * FROM print_orders WHERE id = ?1", id))?;
    match rows.into_iter().next() {
        Some(row) => Ok(Some(row.into_order()?)),
        None => Ok(None),
    }
}

/// All orders of a family, newest first.
pub fn list_by_family(db: &Database, family_id: &str) -> Result<Vec<PrintOrder>, RepositoryError> {
    let rows = db.with_conn(|conn| {
        query_rows(
            conn,
            "SELECT * FROM print_orders WHERE family_id = ?1
             ORDER BY created_at DESC, rowid DESC",
            family_id,
        )
    })?;
    rows.into_iter()
        .map(|row| row.into_order().map_err(RepositoryError::from))
        .collect()
}

fn query_rows(conn: &Connection, sql: &str, key: &str) -> Result<Vec<OrderRow>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![key], OrderRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
