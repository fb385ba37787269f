//! Request dispatch: validate, serve from cache, authenticate, compute, store.

use std::sync::Arc;

use geo_core::{AnalysisClient, FanOut, ResponseCache};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::assets::AssetCatalog;
use crate::auth::{AuthSession, AuthState};
use crate::error::{GatewayError, Result};
use crate::procedures::{Analysis, flood, location, ndvi, snow, soil_water};
use crate::request::{Endpoint, Operation};

/// Routes validated requests to their analysis procedure.
///
/// Responses are cached by operation and parameters. Validation happens before
/// any cache, authentication or remote work, and only successful responses
/// are stored.
///
/// # Example
///
/// ```rust,ignore
/// use geo_gateway::{Dispatcher, Endpoint};
/// use geo_cache::InMemoryCache;
///
/// let dispatcher = Dispatcher::new(client, Arc::new(InMemoryCache::default()));
/// let body = serde_json::json!({"funcion": "graficoAnual", "cuenca": "atuel", "año": 2021});
/// let response = dispatcher.dispatch(Endpoint::BasinSnow, &body).await?;
/// ```
pub struct Dispatcher {
    analysis: Analysis,
    cache: Arc<dyn ResponseCache>,
    auth: AuthSession,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("client", &self.analysis.client.name())
            .field("assets", &self.analysis.assets.root())
            .field("concurrency", &self.analysis.fanout.concurrency())
            .field("cache_ttl", &self.cache.ttl())
            .field("auth", &self.auth.state())
            .finish()
    }
}

fn to_json(value: impl Serialize) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| GatewayError::Analysis(e.into()))
}

impl Dispatcher {
    /// Create a dispatcher with the default asset root and concurrency.
    #[must_use]
    pub fn new(client: Arc<dyn AnalysisClient>, cache: Arc<dyn ResponseCache>) -> Self {
        Self {
            auth: AuthSession::new(client.clone()),
            analysis: Analysis::new(client, AssetCatalog::default(), FanOut::default()),
            cache,
        }
    }

    /// Use a different asset root.
    #[must_use]
    pub fn with_assets(mut self, assets: AssetCatalog) -> Self {
        self.analysis.assets = assets;
        self
    }

    /// Set the fan-out concurrency.
    #[must_use]
    pub fn with_fanout(mut self, fanout: FanOut) -> Self {
        self.analysis.fanout = fanout;
        self
    }

    /// Authentication state of the underlying client.
    #[must_use]
    pub fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    /// Validates a request body and runs it.
    pub async fn dispatch(&self, endpoint: Endpoint, body: &Value) -> Result<Value> {
        let operation = Operation::parse(endpoint, body)?;
        self.execute(&operation).await
    }

    /// Runs a validated operation, answering from the cache when possible.
    #[instrument(skip(self, operation), fields(operation = operation.name()))]
    pub async fn execute(&self, operation: &Operation) -> Result<Value> {
        let key = operation.cache_key()?;

        if let Ok(Some(cached)) = self.cache.get(&key).await {
            debug!(key = %key, "Cache hit");
            return Ok(cached);
        }
        debug!(key = %key, "Cache miss");

        self.auth.ensure().await?;
        let value = self.run(operation).await?;

        if let Err(e) = self.cache.put(&key, value.clone()).await {
            warn!(key = %key, error = %e, "Failed to cache response");
        }
        Ok(value)
    }

    async fn run(&self, operation: &Operation) -> Result<Value> {
        let ctx = &self.analysis;
        match operation {
            Operation::VerifyLocation(p) => to_json(location::verify_location(ctx, p).await?),
            Operation::BasinAnnual(p) => to_json(snow::basin_annual(ctx, p).await?),
            Operation::BasinComparator(p) => to_json(snow::basin_comparator(ctx, p).await?),
            Operation::BasinExtremes(p) => to_json(snow::basin_extremes(ctx, p).await?),
            Operation::Flood(p) => {
                let grafico = flood::flood_map(ctx, p).await?;
                Ok(json!({ "grafico": to_json(grafico)? }))
            }
            Operation::NdviDepartment(p) => to_json(ndvi::department_ndvi(ctx, p).await?),
            Operation::NdviComparator(p) => to_json(ndvi::point_series(ctx, p).await?),
            Operation::NdviPoint(p) => to_json(ndvi::point_report(ctx, p).await?),
            Operation::NdviPolygon(p) => to_json(ndvi::polygon_report(ctx, p, true).await?),
            Operation::NdviPolygonSeries(p) => {
                to_json(ndvi::polygon_report(ctx, p, false).await?)
            }
            Operation::SoilWater(p) => to_json(soil_water::soil_water(ctx, p).await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CapturedLogs, MockClient, date_constant};
    use geo_cache::{InMemoryCache, NoopCache};
    use geo_core::AnalysisError;
    use std::time::Duration;

    fn dispatcher(client: &Arc<MockClient>) -> Dispatcher {
        Dispatcher::new(client.clone(), Arc::new(InMemoryCache::default()))
    }

    fn point_body() -> Value {
        json!({"funcion": "graficoComparativo", "año": 2021, "point": [-31.4, -64.2]})
    }

    #[tokio::test]
    async fn test_validation_failure_makes_no_remote_calls() {
        let client = Arc::new(MockClient::new());
        let dispatcher = dispatcher(&client);

        let bodies = [
            json!({"funcion": "graficoComparativo", "point": [-31.4, -64.2]}),
            json!({"funcion": "graficoComparativo", "año": 2021}),
            json!({"funcion": "graficoAnual", "año": 2021, "point": [-31.4, -64.2]}),
            json!({"año": 2021, "point": [-31.4, -64.2]}),
        ];
        for body in bodies {
            let err = dispatcher
                .dispatch(Endpoint::NdviComparator, &body)
                .await
                .unwrap_err();
            assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST, "{body}");
        }

        assert_eq!(client.auth_calls(), 0);
        assert_eq!(client.remote_calls(), 0);
        assert_eq!(dispatcher.auth_state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_auth_and_remote_calls() {
        let client = Arc::new(MockClient::new().with_responder(|_| Ok(json!(5000.0))));
        let dispatcher = dispatcher(&client);

        let first = dispatcher
            .dispatch(Endpoint::NdviComparator, &point_body())
            .await
            .unwrap();
        let calls = client.remote_calls();
        assert_eq!(client.auth_calls(), 1);

        // Same request with the year as a string.
        let body = json!({"point": [-31.4, -64.2], "año": "2021", "funcion": "graficoComparativo"});
        let second = dispatcher
            .dispatch(Endpoint::NdviComparator, &body)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(client.remote_calls(), calls);
        assert_eq!(client.auth_calls(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let client = Arc::new(MockClient::new().with_responder(|_| Ok(json!(0))));
        let dispatcher = dispatcher(&client);
        let body = json!({"localidad": "Capital", "provincia": "Córdoba", "point": [-31.4, -64.2]});

        for _ in 0..2 {
            let err = dispatcher
                .dispatch(Endpoint::VerifyLocation, &body)
                .await
                .unwrap_err();
            assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
        }
        assert_eq!(client.compute_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_requests_share_one_handshake() {
        let client = Arc::new(
            MockClient::new()
                .with_auth_delay(Duration::from_millis(200))
                .with_responder(|_| Ok(serde_json::Value::Null)),
        );
        let dispatcher = Dispatcher::new(client.clone(), Arc::new(NoopCache));

        let bodies: Vec<Value> = (0..5)
            .map(|i| json!({"funcion": "graficoComparativo", "año": 2015 + i, "point": [-31.4, -64.2]}))
            .collect();
        let results = futures::future::join_all(
            bodies
                .iter()
                .map(|body| dispatcher.dispatch(Endpoint::NdviComparator, body)),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(client.auth_calls(), 1);
        assert_eq!(dispatcher.auth_state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_failed_handshake_is_retried_by_next_request() {
        let client = Arc::new(MockClient::new().with_auth_failures(1));
        let dispatcher = dispatcher(&client);

        let err = dispatcher
            .dispatch(Endpoint::NdviComparator, &point_body())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Analysis(AnalysisError::AuthenticationFailed(_))
        ));
        assert_eq!(dispatcher.auth_state(), AuthState::Unauthenticated);
        assert_eq!(client.remote_calls(), 0);

        dispatcher
            .dispatch(Endpoint::NdviComparator, &point_body())
            .await
            .unwrap();
        assert_eq!(client.auth_calls(), 2);
        assert_eq!(dispatcher.auth_state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_failed_date_is_dropped_from_series() {
        let (logs, _guard) = CapturedLogs::install();
        // Three dates with data; the middle one fails remotely.
        let client = Arc::new(MockClient::new().with_responder(|expr| {
            match date_constant(expr).as_deref() {
                Some("2021-01-01") => Ok(json!(6100.0)),
                Some("2021-01-17") => Err(AnalysisError::upstream("Computation timed out.")),
                Some("2021-02-02") => Ok(json!(6300.0)),
                _ => Ok(Value::Null),
            }
        }));
        let dispatcher = dispatcher(&client).with_fanout(FanOut::new(2));

        let response = dispatcher
            .dispatch(Endpoint::NdviComparator, &point_body())
            .await
            .unwrap();

        assert_eq!(
            response,
            json!({"fechaGrafico": ["01/01", "02/02"], "valoresNdviPunto": [61.0, 63.0]})
        );
        assert_eq!(client.compute_calls(), 23);

        let warnings = logs.lines("WARN");
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains("item=17/01"), "{}", warnings[0]);
        assert!(warnings[0].contains("Computation timed out."));
    }

    #[tokio::test]
    async fn test_all_failed_request_is_not_cached() {
        let client = Arc::new(
            MockClient::new().with_responder(|_| Err(AnalysisError::upstream("Earth Engine down"))),
        );
        let dispatcher = dispatcher(&client);

        let first = dispatcher
            .dispatch(Endpoint::NdviComparator, &point_body())
            .await
            .unwrap_err();
        assert_eq!(first.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(client.compute_calls(), 23);

        let second = dispatcher
            .dispatch(Endpoint::NdviComparator, &point_body())
            .await
            .unwrap_err();
        assert_eq!(second.to_string(), "Earth Engine error: Earth Engine down");
        assert_eq!(client.compute_calls(), 46);
    }

    #[tokio::test]
    async fn test_rate_limited_batch_is_unavailable() {
        let client = Arc::new(MockClient::new().with_responder(|_| {
            Err(AnalysisError::RateLimited {
                service: "Earth Engine".into(),
                retry_after: None,
            })
        }));
        let dispatcher = dispatcher(&client);
        let body = json!({"funcion": "graficoComparativo", "cuenca": "atuel", "año": 2021});

        for _ in 0..2 {
            let err = dispatcher
                .dispatch(Endpoint::BasinComparator, &body)
                .await
                .unwrap_err();
            assert_eq!(err.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
        }
        assert_eq!(client.compute_calls(), 92);
    }

    #[tokio::test]
    async fn test_polygon_functions_do_not_collide() {
        let client = Arc::new(MockClient::new().with_responder(|expr| {
            if expr.invokes("Image.load") {
                return Ok(json!({"b1": 50.0}));
            }
            Ok(Value::Null)
        }));
        let dispatcher = dispatcher(&client);
        let body = |f: &str| {
            json!({
                "funcion": f,
                "año": 2022,
                "polygon": [[-64.0, -31.0], [-63.0, -31.0], [-63.0, -32.0]],
            })
        };

        let full = dispatcher
            .dispatch(Endpoint::NdviPolygon, &body("graficoAnual"))
            .await
            .unwrap();
        let series = dispatcher
            .dispatch(Endpoint::NdviPolygon, &body("graficoAnual2"))
            .await
            .unwrap();

        assert!(full.get("promedio").is_some());
        assert!(series.get("promedio").is_none());
        assert!(series["grafico"]["fechaGrafico"].is_array());
    }

    #[tokio::test]
    async fn test_flood_is_wrapped() {
        let client = Arc::new(MockClient::new().with_responder(|expr| {
            Ok(match expr {
                geo_core::Expr::Array(_) => json!([2, 2]),
                _ => json!(25_000.0),
            })
        }));
        let dispatcher = dispatcher(&client);
        let body = json!({
            "funcion": "graficoAnual",
            "provincia": "Buenos Aires",
            "localidad": "Pergamino",
            "firstPeriodo": ["2024-01-01", "2024-01-31"],
            "secondPeriodo": ["2024-03-01T00:00:00.000Z", "2024-03-31T00:00:00.000Z"],
        });

        let response = dispatcher.dispatch(Endpoint::Flood, &body).await.unwrap();
        assert_eq!(response["grafico"]["flood_area_ha"], "2,50");
    }
}
