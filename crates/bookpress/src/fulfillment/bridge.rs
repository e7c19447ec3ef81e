use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use log::{error, info, warn};
use tracing::Instrument;
use uuid::Uuid;

use crate::assembler::ArtifactAssembler;
use crate::clock::Clock;
use crate::compile::{CompilationJob, JobRepository, JobStatus};
use crate::cover::{CoverComposer, CoverDesign, CoverSpec, CoverType, DesignError, PaperType};
use crate::db::RepositoryError;

use super::order::{AddressError, OrderStatus, PrintOrder, ShippingAddress, ShippingLevel};
use super::pricing::{CostBreakdown, PriceTable, QuoteRequest};
use super::provider::{PrintProvider, PrintSubmission};
use super::repository::OrderRepository;

#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Job '{job_id}' is {status}; only complete books can be printed")]
    JobNotComplete { job_id: String, status: JobStatus },

    #[error("Order '{0}' not found")]
    OrderNotFound(String),

    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Design(#[from] DesignError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Order {order_id} failed: {reason}")]
    Submission { order_id: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct FulfillmentSettings {
    pub price_table: PriceTable,
    pub quote_timeout: Duration,
    /// Lifetime of the artifact URLs handed to the provider.
    pub asset_url_ttl: ChronoDuration,
}

impl Default for FulfillmentSettings {
    fn default() -> Self {
        Self {
            price_table: PriceTable::default(),
            quote_timeout: Duration::from_secs(10),
            asset_url_ttl: ChronoDuration::hours(72),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub family_id: String,
    pub job_id: String,
    pub cover_type: CoverType,
    pub paper_type: PaperType,
    pub quantity: u32,
    pub shipping_address: ShippingAddress,
    pub shipping_level: ShippingLevel,
    pub cover_design: CoverDesign,
}

/// Turns complete books into print orders.
pub struct FulfillmentBridge {
    jobs: Arc<dyn JobRepository>,
    orders: Arc<dyn OrderRepository>,
    provider: Arc<dyn PrintProvider>,
    composer: Arc<CoverComposer>,
    assembler: Arc<ArtifactAssembler>,
    clock: Arc<dyn Clock>,
    settings: FulfillmentSettings,
}

impl FulfillmentBridge {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        orders: Arc<dyn OrderRepository>,
        provider: Arc<dyn PrintProvider>,
        composer: Arc<CoverComposer>,
        assembler: Arc<ArtifactAssembler>,
        clock: Arc<dyn Clock>,
        settings: FulfillmentSettings,
    ) -> Self {
        Self {
            jobs,
            orders,
            provider,
            composer,
            assembler,
            clock,
            settings,
        }
    }

    /// Provider quote, or the local table flagged as an estimate when the
    /// provider fails or is slow.
    pub async fn estimate(&self, request: &QuoteRequest) -> CostBreakdown {
        match tokio::time::timeout(self.settings.quote_timeout, self.provider.quote(request)).await
        {
            Ok(Ok(quote)) => quote,
            Ok(Err(e)) => {
                warn!("Quote failed, using local estimate: {}", e);
                self.settings.price_table.estimate(request)
            }
            Err(_) => {
                warn!(
                    "Quote took longer than {}s, using local estimate",
                    self.settings.quote_timeout.as_secs()
                );
                self.settings.price_table.estimate(request)
            }
        }
    }

    /// Creates an order for a complete job and submits it.
    ///
    /// Once the order exists it ends `submitted` or `failed`.
    pub async fn place_order(
        &self,
        request: PlaceOrderRequest,
    ) -> Result<PrintOrder, FulfillmentError> {
        let span = tracing::info_span!(
            "submit_order",
            family_id = %request.family_id,
            job_id = %request.job_id
        );
        async move {
            if request.quantity == 0 {
                return Err(FulfillmentError::InvalidQuantity);
            }
            request.shipping_address.validate()?;
            request.cover_design.validate()?;

            let job = self
                .jobs
                .get(&request.job_id)
                .await?
                .filter(|job| job.family_id == request.family_id)
                .ok_or_else(|| FulfillmentError::JobNotFound(request.job_id.clone()))?;
            if job.status != JobStatus::Complete {
                return Err(FulfillmentError::JobNotComplete {
                    job_id: job.id,
                    status: job.status,
                });
            }

            let now = self.clock.now();
            let mut order = PrintOrder {
                id: Uuid::new_v4().to_string(),
                family_id: request.family_id,
                job_id: job.id.clone(),
                book_size: job.book_size,
                cover_type: request.cover_type,
                paper_type: request.paper_type,
                page_count: job.page_count.unwrap_or(job.total_pages),
                quantity: request.quantity,
                shipping_address: request.shipping_address,
                shipping_level: request.shipping_level,
                cover_design: request.cover_design,
                status: OrderStatus::Pending,
                provider_order_id: None,
                provider_status: None,
                cost: None,
                cover_storage_key: None,
                error: None,
                created_at: now,
                updated_at: now,
            };
            self.orders.insert(&order).await?;
            info!("Created print order {} for job {}", order.id, job.id);

            if let Err(reason) = self.submit(&mut order, &job).await {
                error!("Print order {} failed: {}", order.id, reason);
                order.error = Some(reason.clone());
                if let Err(e) = order.transition(OrderStatus::Failed, self.clock.now()) {
                    warn!("{}", e);
                }
                self.orders.save(&order).await?;
                return Err(FulfillmentError::Submission {
                    order_id: order.id,
                    reason,
                });
            }

            self.orders.save(&order).await?;
            info!(
                "Print order {} submitted as {}",
                order.id,
                order.provider_order_id.as_deref().unwrap_or("?")
            );
            Ok(order)
        }
        .instrument(span)
        .await
    }

    /// Pulls the provider's status for an order and applies it.
    pub async fn sync_status(&self, order_id: &str) -> Result<PrintOrder, FulfillmentError> {
        let mut order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(order_id.to_string()))?;
        let Some(provider_order_id) = order.provider_order_id.clone() else {
            return Ok(order);
        };
        if order.status.is_terminal() {
            return Ok(order);
        }

        let raw = match self.provider.order_status(&provider_order_id).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not refresh order {}: {}", order.id, e);
                return Ok(order);
            }
        };

        let now = self.clock.now();
        match OrderStatus::from_provider(&raw) {
            Some(next) if next == order.status => {}
            Some(next) => {
                if let Err(e) = order.transition(next, now) {
                    warn!("Ignoring provider status '{}': {}", raw, e);
                } else {
                    info!("Order {} is now {}", order.id, next);
                }
            }
            None => warn!("Unknown provider status '{}' for order {}", raw, order.id),
        }
        order.provider_status = Some(raw);
        order.updated_at = now;
        self.orders.save(&order).await?;
        Ok(order)
    }

    pub async fn list_orders(&self, family_id: &str) -> Result<Vec<PrintOrder>, FulfillmentError> {
        Ok(self.orders.list_for_family(family_id).await?)
    }

    pub async fn get_order(&self, order_id: &str) -> Result<PrintOrder, FulfillmentError> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(order_id.to_string()))
    }

    /// Prices, composes the cover and hands everything to the provider.
    async fn submit(&self, order: &mut PrintOrder, job: &CompilationJob) -> Result<(), String> {
        let interior_key = job
            .storage_key
            .clone()
            .ok_or_else(|| format!("Job {} has no stored artifact", job.id))?;

        let quote = QuoteRequest {
            book_size: order.book_size,
            page_count: order.page_count,
            cover_type: order.cover_type,
            paper_type: order.paper_type,
            quantity: order.quantity,
            shipping_level: order.shipping_level,
            country_code: order.shipping_address.country_code.clone(),
        };
        order.cost = Some(self.estimate(&quote).await);

        let spec = CoverSpec {
            book_size: order.book_size,
            page_count: order.page_count,
            paper_type: order.paper_type,
            cover_type: order.cover_type,
        };
        let cover = self
            .composer
            .compose(&order.family_id, spec, &order.cover_design)
            .await
            .map_err(|e| e.to_string())?;
        let stored_cover = self
            .assembler
            .store_cover(&order.family_id, &order.id, &cover)
            .await
            .map_err(|e| e.to_string())?;
        order.cover_storage_key = Some(stored_cover.storage_key.clone());

        let expires_at = self.clock.now() + self.settings.asset_url_ttl;
        let store = self.assembler.store();
        let submission = PrintSubmission {
            external_id: order.id.clone(),
            title: order
                .cover_design
                .title
                .clone()
                .unwrap_or_else(|| order.cover_design.family_name.clone()),
            book_size: order.book_size,
            cover_type: order.cover_type,
            paper_type: order.paper_type,
            page_count: order.page_count,
            quantity: order.quantity,
            interior_url: store.signed_url(&interior_key, expires_at).url,
            cover_url: store.signed_url(&stored_cover.storage_key, expires_at).url,
            shipping_level: order.shipping_level,
            shipping_address: order.shipping_address.clone(),
        };

        let receipt = self
            .provider
            .submit(&submission)
            .await
            .map_err(|e| e.to_string())?;
        order.provider_order_id = Some(receipt.provider_order_id);
        order.provider_status = Some(receipt.status);
        order
            .transition(OrderStatus::Submitted, self.clock.now())
            .map_err(|e| e.to_string())
    }
}
