//! Historical estimation pipeline
//!
//! For one farm lot: select its harvests, resolve the estimate references,
//! resolve the final production reference, flatten it to a single document
//! and normalize a missing one to `null`.

use serde_json::Value;
use shared::ObjectId;

use crate::models::{FIELD_ESTIMATES, FIELD_ID_FARM_LOT, FIELD_SUMMARY_FINAL_PRODUCTION};
use crate::store::{Collection, Filter, Pipeline, ID_FIELD};

pub fn build_historic_pipeline(farm_lot: ObjectId) -> Pipeline {
    Pipeline::new()
        .matching(Filter::eq(FIELD_ID_FARM_LOT, farm_lot))
        .lookup_membership(Collection::Estimates, FIELD_ESTIMATES, FIELD_ESTIMATES)
        .lookup_eq(
            Collection::FinalProduction,
            FIELD_SUMMARY_FINAL_PRODUCTION,
            ID_FIELD,
            FIELD_SUMMARY_FINAL_PRODUCTION,
        )
        // Keep harvests that have no final production yet
        .unwind(FIELD_SUMMARY_FINAL_PRODUCTION, true)
        .if_null(FIELD_SUMMARY_FINAL_PRODUCTION, Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, MemoryStore, Stage};
    use serde_json::json;

    #[test]
    fn test_stage_order() {
        let farm_lot = ObjectId::new();
        let pipeline = build_historic_pipeline(farm_lot);

        assert_eq!(pipeline.len(), 5);
        assert_eq!(
            pipeline.stages()[0],
            Stage::Match(Filter::Eq("idFarmLot".into(), json!(farm_lot.to_hex())))
        );
        assert!(matches!(
            pipeline.stages()[1],
            Stage::LookupMembership { from: Collection::Estimates, .. }
        ));
        assert!(matches!(
            pipeline.stages()[2],
            Stage::LookupEq { from: Collection::FinalProduction, .. }
        ));
        assert!(matches!(
            pipeline.stages()[3],
            Stage::Unwind { preserve_null_and_empty: true, .. }
        ));
        assert!(matches!(pipeline.stages()[4], Stage::IfNull { .. }));
    }

    #[tokio::test]
    async fn test_resolves_references() {
        let store = MemoryStore::new();
        let farm_lot = ObjectId::new();
        let first = store
            .insert_value(Collection::Estimates, json!({ "estimatedKg": 10 }))
            .await
            .unwrap();
        let second = store
            .insert_value(Collection::Estimates, json!({ "estimatedKg": 20 }))
            .await
            .unwrap();
        let production = store
            .insert_value(Collection::FinalProduction, json!({ "totalKg": 25 }))
            .await
            .unwrap();
        store
            .insert_value(
                Collection::Harvest,
                json!({
                    "idFarmLot": farm_lot,
                    "estimates": [second, first],
                    "summaryFinalProduction": production
                }),
            )
            .await
            .unwrap();

        let results: Vec<_> = store
            .aggregate(Collection::Harvest, &build_historic_pipeline(farm_lot))
            .await
            .unwrap()
            .collect();

        assert_eq!(results.len(), 1);
        let mut kgs: Vec<_> = results[0]["estimates"]
            .as_array()
            .unwrap()
            .iter()
            .map(|estimate| estimate["estimatedKg"].as_i64().unwrap())
            .collect();
        kgs.sort();
        assert_eq!(kgs, vec![10, 20]);
        assert_eq!(results[0]["summaryFinalProduction"]["totalKg"], json!(25));
    }
}
