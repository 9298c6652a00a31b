//! Harvest repository: the seven operations callers use to read and write
//! harvests and their references

use std::future::Future;
use std::time::Duration;

use shared::{CreateHarvest, Harvest, HarvestDetails, ObjectId};
use tracing::{debug, info, warn};

use super::historic::build_historic_pipeline;
use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    decode_all, decode_document, decode_identifier, to_create_document, FIELD_ESTIMATES,
    FIELD_ID_FARM_LOT, FIELD_SUMMARY_FINAL_PRODUCTION,
};
use crate::store::{
    Collection, DocumentStore, Filter, StoreError, StoreResult, Update, UpdateOutcome,
};

/// How reference updates treat an identifier that matches no harvest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Succeed without effect and log a warning
    #[default]
    Lenient,
    /// Report the missing harvest as not found
    RequireMatch,
}

/// Harvest service over any document store
#[derive(Clone)]
pub struct HarvestService<S> {
    store: S,
    operation_timeout: Option<Duration>,
    update_policy: UpdatePolicy,
}

impl<S: DocumentStore> HarvestService<S> {
    /// Create a new HarvestService instance
    pub fn new(store: S) -> Self {
        Self {
            store,
            operation_timeout: None,
            update_policy: UpdatePolicy::default(),
        }
    }

    /// Create a service with the timeout and update policy from configuration
    pub fn from_config(store: S, config: &DatabaseConfig) -> Self {
        Self {
            store,
            operation_timeout: config.operation_timeout(),
            update_policy: config.update_policy(),
        }
    }

    /// Bound every store call by `timeout`
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn with_update_policy(mut self, policy: UpdatePolicy) -> Self {
        self.update_policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Every harvest in the collection
    pub async fn list_all_harvests(&self) -> AppResult<Vec<Harvest>> {
        const OPERATION: &str = "list_all_harvests";
        debug!("Listing all harvests");

        let cursor = self
            .within(self.store.find(Collection::Harvest, &Filter::All))
            .await
            .map_err(|source| query_error(OPERATION, source))?;
        decode_all(cursor, OPERATION)
    }

    /// A single harvest by identifier
    pub async fn get_harvest(&self, id: &str) -> AppResult<Harvest> {
        const OPERATION: &str = "get_harvest";
        let harvest_id = decode_identifier(id)?;
        debug!(%harvest_id, "Fetching harvest");

        let document = self
            .within(self.store.find_one(Collection::Harvest, &Filter::by_id(harvest_id)))
            .await
            .map_err(|source| query_error(OPERATION, source))?
            .ok_or_else(|| AppError::NotFound(format!("Harvest {}", harvest_id)))?;

        decode_document(document).map_err(|source| AppError::Decode {
            operation: OPERATION,
            collection: Collection::Harvest,
            source,
        })
    }

    /// Harvests recorded against one farm lot
    pub async fn list_harvests_by_farm_lot(&self, farm_lot_id: &str) -> AppResult<Vec<Harvest>> {
        const OPERATION: &str = "list_harvests_by_farm_lot";
        let farm_lot = decode_identifier(farm_lot_id)?;
        debug!(%farm_lot, "Listing harvests for farm lot");

        let filter = Filter::eq(FIELD_ID_FARM_LOT, farm_lot);
        let cursor = self
            .within(self.store.find(Collection::Harvest, &filter))
            .await
            .map_err(|source| query_error(OPERATION, source))?;
        decode_all(cursor, OPERATION)
    }

    /// Insert a new harvest with no estimates and no final production
    ///
    /// Returns the request with its assigned identifier. The dates are echoed
    /// as received; the stored copy holds them normalized to UTC.
    pub async fn create_harvest(&self, request: CreateHarvest) -> AppResult<CreateHarvest> {
        const OPERATION: &str = "create_harvest";
        let document = to_create_document(&request)?;

        let id = self
            .within(self.store.insert_one(Collection::Harvest, document))
            .await
            .map_err(|source| AppError::Insert {
                operation: OPERATION,
                collection: Collection::Harvest,
                source,
            })?;

        info!(
            harvest_id = %id,
            farm_lot = %request.id_farm_lot,
            harvest_type = %request.harvest_type,
            "Harvest created"
        );

        Ok(CreateHarvest {
            id: Some(id),
            ..request
        })
    }

    /// Point the harvest at its final production summary, replacing any
    /// previous reference
    pub async fn set_final_production_summary(
        &self,
        harvest_id: &str,
        final_production_id: ObjectId,
    ) -> AppResult<()> {
        const OPERATION: &str = "set_final_production_summary";
        let harvest = decode_identifier(harvest_id)?;
        debug!(%harvest, %final_production_id, "Setting final production summary");

        let update = Update::set(FIELD_SUMMARY_FINAL_PRODUCTION, final_production_id);
        self.apply_update(OPERATION, harvest, &update).await
    }

    /// Append an estimate reference to the harvest
    ///
    /// The append is a single atomic store update, so concurrent appends are
    /// never lost. Duplicates are kept.
    pub async fn append_estimate_reference(
        &self,
        harvest_id: &str,
        estimate_id: ObjectId,
    ) -> AppResult<()> {
        const OPERATION: &str = "append_estimate_reference";
        let harvest = decode_identifier(harvest_id)?;
        debug!(%harvest, %estimate_id, "Appending estimate reference");

        let update = Update::push(FIELD_ESTIMATES, estimate_id);
        self.apply_update(OPERATION, harvest, &update).await
    }

    /// Every harvest of a farm lot with estimates and final production
    /// resolved
    ///
    /// Harvests without a final production, or whose reference dangles, come
    /// back with `summary_final_production` set to `None`.
    pub async fn get_historic_estimation(&self, farm_lot_id: &str) -> AppResult<Vec<HarvestDetails>> {
        const OPERATION: &str = "get_historic_estimation";
        let farm_lot = decode_identifier(farm_lot_id)?;
        debug!(%farm_lot, "Aggregating historic estimation");

        let pipeline = build_historic_pipeline(farm_lot);
        let cursor = self
            .within(self.store.aggregate(Collection::Harvest, &pipeline))
            .await
            .map_err(|source| AppError::Aggregation {
                operation: OPERATION,
                collection: Collection::Harvest,
                source,
            })?;
        decode_all(cursor, OPERATION)
    }

    async fn apply_update(
        &self,
        operation: &'static str,
        harvest: ObjectId,
        update: &Update,
    ) -> AppResult<()> {
        let outcome: UpdateOutcome = self
            .within(
                self.store
                    .update_one(Collection::Harvest, &Filter::by_id(harvest), update),
            )
            .await
            .map_err(|source| AppError::Update {
                operation,
                collection: Collection::Harvest,
                source,
            })?;

        if outcome.matched == 0 {
            return match self.update_policy {
                UpdatePolicy::Lenient => {
                    warn!(%harvest, field = update.field(), "{} matched no harvest", operation);
                    Ok(())
                }
                UpdatePolicy::RequireMatch => {
                    Err(AppError::NotFound(format!("Harvest {}", harvest)))
                }
            };
        }

        debug!(%harvest, modified = outcome.modified, "{} applied", operation);
        Ok(())
    }

    async fn within<T>(&self, call: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| StoreError::Timeout(limit))?,
            None => call.await,
        }
    }
}

fn query_error(operation: &'static str, source: StoreError) -> AppError {
    AppError::Query {
        operation,
        collection: Collection::Harvest,
        source,
    }
}
