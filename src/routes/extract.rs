//! JSON body extractor whose rejections share the API error shape.

use axum::{
    Json,
    extract::{FromRequest, Request},
};
use axum_valid::{Valid, ValidationRejection};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::AppError;

/// Deserialized and validated JSON body.
///
/// Malformed, mistyped or invalid payloads are answered with `400` and a
/// `{ "message": ... }` body, like every other API error.
#[derive(Debug, Clone)]
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Valid::<Json<T>>::from_request(req, state).await {
            Ok(Valid(Json(value))) => Ok(Self(value)),
            Err(ValidationRejection::Valid(errors)) => Err(errors.into()),
            Err(ValidationRejection::Inner(rejection)) => Err(rejection.into()),
        }
    }
}
