//! Object Routes
//!
//! - GET /api/v1/objects/:id - Registered value and class of an object
//!
//! The id is either `host:sequence` or the raw 64-bit value.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::ObjectResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::blocking;
use crate::api::state::AppState;
use crate::storage::ObjectId;

/// GET /api/v1/objects/:id
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ObjectResponse>> {
    let object_id = parse_object_id(&id)?;

    let master = Arc::clone(&state.master);
    let (data, class) = blocking(move || {
        let data = master.registered_object(object_id)?;
        let class = master.object_type(object_id)?;
        Ok((data, class))
    })
    .await?;

    if data.is_none() && class.is_none() {
        return Err(ApiError::NotFound(format!("Object '{}'", object_id)));
    }

    Ok(Json(ObjectResponse {
        id: object_id.to_string(),
        raw_id: object_id.0,
        data: data.map(|bytes| {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| serde_json::Value::from(bytes))
        }),
        class,
    }))
}

fn parse_object_id(id: &str) -> ApiResult<ObjectId> {
    let invalid = || ApiError::Validation(format!("Invalid object id '{}'", id));
    match id.split_once(':') {
        Some((host, sequence)) => {
            let host: u32 = host.parse().map_err(|_| invalid())?;
            let sequence: u64 = sequence.parse().map_err(|_| invalid())?;
            if host >= 1 << ObjectId::HOST_BITS || ObjectId::new(host, sequence).sequence() != sequence {
                return Err(invalid());
            }
            Ok(ObjectId::new(host, sequence))
        }
        None => id.parse().map(ObjectId).map_err(|_| invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_id() {
        assert_eq!(parse_object_id("3:17").unwrap(), ObjectId::new(3, 17));
        assert_eq!(parse_object_id("42").unwrap(), ObjectId(42));
        assert!(parse_object_id("256:1").is_err());
        assert!(parse_object_id("a:b").is_err());
        assert!(parse_object_id("").is_err());
    }
}
