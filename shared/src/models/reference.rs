//! Documents referenced by a harvest
//!
//! Estimates and final production summaries are owned elsewhere; only their
//! identity is interpreted here and the remaining fields pass through as-is.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::ObjectId;

/// A production estimate document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Estimate {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A final production summary document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalProduction {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Estimate {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl FinalProduction {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
