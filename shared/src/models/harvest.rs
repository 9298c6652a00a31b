//! Harvest models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Estimate, FinalProduction};
use crate::types::ObjectId;

/// A harvest evaluation period for a farm lot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Harvest {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "type")]
    pub harvest_type: String,
    pub id_farm_lot: ObjectId,
    pub evaluation_start_date: DateTime<Utc>,
    pub evaluation_end_date: DateTime<Utc>,
    /// Weak reference to the final production summary, if one was recorded
    pub summary_final_production: Option<ObjectId>,
    /// Weak references to estimates, in append order
    #[serde(default)]
    pub estimates: Vec<ObjectId>,
}

/// Request for creating a harvest
///
/// Dates are accepted as a date (`2024-01-01`) or a timestamp without zone
/// (`2024-01-01T06:00:00`) and are stored as UTC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateHarvest {
    /// Assigned by the store on creation
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(rename = "type")]
    pub harvest_type: String,
    pub id_farm_lot: ObjectId,
    pub evaluation_start_date: String,
    pub evaluation_end_date: String,
}

impl CreateHarvest {
    pub fn new(
        harvest_type: impl Into<String>,
        id_farm_lot: ObjectId,
        evaluation_start_date: impl Into<String>,
        evaluation_end_date: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            harvest_type: harvest_type.into(),
            id_farm_lot,
            evaluation_start_date: evaluation_start_date.into(),
            evaluation_end_date: evaluation_end_date.into(),
        }
    }
}

/// Harvest with its estimates and final production resolved
///
/// `summary_final_production` always serializes, as `null` when absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HarvestDetails {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "type")]
    pub harvest_type: String,
    pub id_farm_lot: ObjectId,
    pub evaluation_start_date: DateTime<Utc>,
    pub evaluation_end_date: DateTime<Utc>,
    pub summary_final_production: Option<FinalProduction>,
    #[serde(default)]
    pub estimates: Vec<Estimate>,
}

impl HarvestDetails {
    pub fn has_final_production(&self) -> bool {
        self.summary_final_production.is_some()
    }

    /// Look up a resolved estimate by its identifier
    pub fn estimate(&self, id: &ObjectId) -> Option<&Estimate> {
        self.estimates.iter().find(|estimate| &estimate.id == id)
    }
}
