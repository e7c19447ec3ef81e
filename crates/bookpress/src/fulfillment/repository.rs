//! Persistence seam for print orders.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::db::{order_repo, Database, RepositoryError};

use super::order::PrintOrder;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &PrintOrder) -> Result<(), RepositoryError>;

    async fn get(&self, id: &str) -> Result<Option<PrintOrder>, RepositoryError>;

    /// Replaces the stored order with `order`.
    async fn save(&self, order: &PrintOrder) -> Result<(), RepositoryError>;

    /// A family's orders, newest first.
    async fn list_for_family(&self, family_id: &str) -> Result<Vec<PrintOrder>, RepositoryError>;
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: Mutex<Vec<PrintOrder>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &PrintOrder) -> Result<(), RepositoryError> {
        let mut orders = self.orders.lock().await;
        if orders.iter().any(|o| o.id == order.id) {
            return Err(RepositoryError::Duplicate {
                kind: "Order",
                id: order.id.clone(),
            });
        }
        orders.push(order.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PrintOrder>, RepositoryError> {
        Ok(self.orders.lock().await.iter().find(|o| o.id == id).cloned())
    }

    async fn save(&self, order: &PrintOrder) -> Result<(), RepositoryError> {
        let mut orders = self.orders.lock().await;
        let stored = orders
            .iter_mut()
            .find(|o| o.id == order.id)
            .ok_or_else(|| RepositoryError::order_not_found(&order.id))?;
        *stored = order.clone();
        Ok(())
    }

    async fn list_for_family(&self, family_id: &str) -> Result<Vec<PrintOrder>, RepositoryError> {
        let orders = self.orders.lock().await;
        let mut list: Vec<PrintOrder> = orders
            .iter()
            .rev()
            .filter(|o| o.family_id == family_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }
}

pub struct SqliteOrderRepository {
    db: Database,
}

impl SqliteOrderRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, RepositoryError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| RepositoryError::Task(e.to_string()))?
    }
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn insert(&self, order: &PrintOrder) -> Result<(), RepositoryError> {
        let order = order.clone();
        self.blocking(move |db| order_repo::insert(db, &order)).await
    }

    async fn get(&self, id: &str) -> Result<Option<PrintOrder>, RepositoryError> {
        let id = id.to_string();
        self.blocking(move |db| order_repo::find_by_id(db, &id)).await
    }

    async fn save(&self, order: &PrintOrder) -> Result<(), RepositoryError> {
        let order = order.clone();
        self.blocking(move |db| order_repo::update(db, &order)).await
    }

    async fn list_for_family(&self, family_id: &str) -> Result<Vec<PrintOrder>, RepositoryError> {
        let family_id = family_id.to_string();
        self.blocking(move |db| order_repo::list_by_family(db, &family_id))
            .await
    }
}
