use std::time::Instant;

use axum::Router;
use axum::extract::{DefaultBodyLimit, MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::model::*;
use crate::observability::{self, REQUEST_DURATION_SECONDS, REQUESTS_TOTAL};

use super::handlers;
use super::state::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// `GET|POST /<path>` and `GET|PATCH|DELETE /<path>/{id}` for one entity kind.
fn crud<E: Entity>(router: Router<AppState>, path: &str) -> Router<AppState> {
    router
        .route(path, get(handlers::list::<E>).post(handlers::create::<E>))
        .route(
            &format!("{path}/{{id}}"),
            get(handlers::get::<E>)
                .patch(handlers::update::<E>)
                .delete(handlers::delete::<E>),
        )
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut api = Router::new();
    api = crud::<Establishment>(api, "/establishments");
    api = crud::<Service>(api, "/services");
    api = crud::<Bed>(api, "/beds");
    api = crud::<Patient>(api, "/patients");
    api = crud::<Staff>(api, "/staff");
    api = crud::<Equipment>(api, "/equipment");
    api = crud::<Transfer>(api, "/transfers");
    api = crud::<CareEpisode>(api, "/care-episodes");

    api.route(
        "/reservations",
        get(handlers::list::<Reservation>).post(handlers::create_reservation),
    )
    .route(
        "/reservations/{id}",
        get(handlers::get::<Reservation>)
            .patch(handlers::update_reservation)
            .delete(handlers::delete::<Reservation>),
    )
    .route("/beds/{id}/availability", get(handlers::bed_availability))
    .route("/health", get(handlers::health))
    .route_layer(middleware::from_fn(track_metrics))
    .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
    .layer(TraceLayer::new_for_http())
    .layer(cors)
    .with_state(state)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_default();

    let response = next.run(req).await;

    let status = observability::status_class(response.status().as_u16());
    metrics::counter!(REQUESTS_TOTAL, "method" => method.clone(), "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "method" => method, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::consistency::ConsistencyService;
    use crate::store::Store;

    #[tokio::test]
    async fn router_builds_without_overlapping_routes() {
        let dir = std::env::temp_dir().join("silbo_test_router");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("router.wal");
        let _ = std::fs::remove_file(&path);

        let store = Arc::new(Store::open(&path).unwrap());
        let service = Arc::new(ConsistencyService::new(store, Duration::from_secs(1)));
        let _router = create_router(AppState::new(service));
    }
}
