//! Mapping between harvest domain shapes and stored documents

use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{format_utc_timestamp, normalize_utc_timestamp, CreateHarvest, ObjectId};

use crate::error::{AppError, AppResult};
use crate::store::{Cursor, Document};

pub const FIELD_TYPE: &str = "type";
pub const FIELD_ID_FARM_LOT: &str = "idFarmLot";
pub const FIELD_EVALUATION_START_DATE: &str = "evaluationStartDate";
pub const FIELD_EVALUATION_END_DATE: &str = "evaluationEndDate";
pub const FIELD_SUMMARY_FINAL_PRODUCTION: &str = "summaryFinalProduction";
pub const FIELD_ESTIMATES: &str = "estimates";

/// Decode an external identifier
pub fn decode_identifier(value: &str) -> AppResult<ObjectId> {
    ObjectId::parse_str(value).map_err(|source| AppError::invalid_identifier(value, source))
}

/// Build the stored shape of a new harvest
///
/// Both dates are normalized to UTC; the final production reference starts as
/// `null` and the estimate list starts empty. Only dates that cannot be read
/// are rejected; the rest of the request is stored as given.
pub fn to_create_document(request: &CreateHarvest) -> AppResult<Document> {
    let start = normalize_utc_timestamp(&request.evaluation_start_date)
        .map_err(|msg| AppError::validation(FIELD_EVALUATION_START_DATE, msg))?;
    let end = normalize_utc_timestamp(&request.evaluation_end_date)
        .map_err(|msg| AppError::validation(FIELD_EVALUATION_END_DATE, msg))?;

    let mut document = Document::new();
    document.insert(FIELD_TYPE.into(), Value::String(request.harvest_type.clone()));
    document.insert(FIELD_ID_FARM_LOT.into(), request.id_farm_lot.into());
    document.insert(
        FIELD_EVALUATION_START_DATE.into(),
        Value::String(format_utc_timestamp(&start)),
    );
    document.insert(
        FIELD_EVALUATION_END_DATE.into(),
        Value::String(format_utc_timestamp(&end)),
    );
    document.insert(FIELD_SUMMARY_FINAL_PRODUCTION.into(), Value::Null);
    document.insert(FIELD_ESTIMATES.into(), Value::Array(Vec::new()));
    Ok(document)
}

/// Decode one stored document
pub fn decode_document<T: DeserializeOwned>(document: Document) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(document))
}

/// Drain a cursor into domain values
///
/// Stops at the first document that does not decode; the cursor is released
/// either way.
pub fn decode_all<T: DeserializeOwned>(
    cursor: Cursor,
    operation: &'static str,
) -> AppResult<Vec<T>> {
    let collection = cursor.collection();
    let mut decoded = Vec::with_capacity(cursor.remaining());
    for document in cursor {
        let value = decode_document(document).map_err(|source| AppError::Decode {
            operation,
            collection,
            source,
        })?;
        decoded.push(value);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Collection;
    use serde_json::json;
    use shared::Harvest;

    fn request() -> CreateHarvest {
        CreateHarvest::new(
            "coffee",
            ObjectId::parse_str("65a1f0c2e4b0a1b2c3d4e5f7").unwrap(),
            "2024-01-01",
            "2024-03-01T12:00:00",
        )
    }

    #[test]
    fn test_create_document_shape() {
        let document = to_create_document(&request()).unwrap();
        assert_eq!(
            Value::Object(document),
            json!({
                "type": "coffee",
                "idFarmLot": "65a1f0c2e4b0a1b2c3d4e5f7",
                "evaluationStartDate": "2024-01-01T00:00:00Z",
                "evaluationEndDate": "2024-03-01T12:00:00Z",
                "summaryFinalProduction": null,
                "estimates": []
            })
        );
    }

    #[test]
    fn test_create_document_rejects_bad_dates() {
        let mut bad = request();
        bad.evaluation_start_date = "01/02/2024".into();
        let err = to_create_document(&bad).unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation { ref field, .. } if field == FIELD_EVALUATION_START_DATE
        ));
    }

    #[test]
    fn test_create_document_stores_inverted_period_as_given() {
        let mut inverted = request();
        inverted.evaluation_start_date = "2024-06-01".into();
        let document = to_create_document(&inverted).unwrap();
        assert_eq!(document[FIELD_EVALUATION_START_DATE], json!("2024-06-01T00:00:00Z"));
        assert_eq!(document[FIELD_EVALUATION_END_DATE], json!("2024-03-01T12:00:00Z"));
    }

    #[test]
    fn test_create_document_keeps_blank_type() {
        let mut blank = request();
        blank.harvest_type = String::new();
        let document = to_create_document(&blank).unwrap();
        assert_eq!(document[FIELD_TYPE], json!(""));
    }

    #[test]
    fn test_decode_identifier_reports_input() {
        let err = decode_identifier("xyz").unwrap_err();
        assert!(matches!(err, AppError::InvalidIdentifier { ref value, .. } if value == "xyz"));
    }

    #[test]
    fn test_decode_all_reports_shape_mismatch() {
        let good = match json!({
            "_id": "65a1f0c2e4b0a1b2c3d4e5f6",
            "type": "coffee",
            "idFarmLot": "65a1f0c2e4b0a1b2c3d4e5f7",
            "evaluationStartDate": "2024-01-01T00:00:00Z",
            "evaluationEndDate": "2024-03-01T00:00:00Z",
            "summaryFinalProduction": null,
            "estimates": []
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let mut broken = good.clone();
        broken.insert(FIELD_ID_FARM_LOT.into(), json!(42));

        let cursor = Cursor::new(Collection::Harvest, vec![good.clone()]);
        let harvests: Vec<Harvest> = decode_all(cursor, "test").unwrap();
        assert_eq!(harvests.len(), 1);
        assert_eq!(harvests[0].summary_final_production, None);

        let cursor = Cursor::new(Collection::Harvest, vec![good, broken]);
        let err = decode_all::<Harvest>(cursor, "test").unwrap_err();
        assert!(matches!(
            err,
            AppError::Decode {
                collection: Collection::Harvest,
                ..
            }
        ));
    }
}
