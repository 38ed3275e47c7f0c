use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use ulid::Ulid;

use crate::limits::MAX_FILTER_TERMS;
use crate::model::Filter;

use super::error::AppError;

/// `{id}` path segment parsed as a ULID.
pub struct IdPath(pub Ulid);

impl<S: Send + Sync> FromRequestParts<S> for IdPath {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        raw.parse()
            .map(IdPath)
            .map_err(|_| AppError::BadRequest(format!("invalid id: {raw}")))
    }
}

/// JSON body whose rejections use the API error shape.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
        }
    }
}

/// Query parameters of a list endpoint, taken as an equality filter.
pub struct FilterQuery(pub Filter);

impl<S: Send + Sync> FromRequestParts<S> for FilterQuery {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<BTreeMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        if params.len() > MAX_FILTER_TERMS {
            return Err(AppError::BadRequest(format!(
                "at most {MAX_FILTER_TERMS} filter terms"
            )));
        }
        let filter = params
            .into_iter()
            .fold(Filter::new(), |filter, (field, value)| filter.eq(field, value));
        Ok(FilterQuery(filter))
    }
}

/// Typed query string whose rejections use the API error shape.
pub struct QueryParams<T>(pub T);

impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| QueryParams(value))
            .map_err(|e| AppError::BadRequest(e.body_text()))
    }
}
