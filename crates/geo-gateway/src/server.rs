//! HTTP routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::mail::{ContactForm, Mailer, SENT_MESSAGE};
use crate::request::Endpoint;

/// Liveness text of `GET /status`.
pub const STATUS_TEXT: &str = "Backend disponible";

/// Liveness text of `GET /`.
pub const ROOT_TEXT: &str = "¡Servidor de Earth Engine está en funcionamiento!";

/// Shared handler state.
#[derive(Clone, Debug)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    mailer: Option<Arc<dyn Mailer>>,
}

impl AppState {
    /// State without a contact relay; `/contact` then answers 500.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            mailer: None,
        }
    }

    /// Relay contact forms through `mailer`.
    #[must_use]
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }
}

async fn analyze(
    state: AppState,
    endpoint: Endpoint,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(body) = body.map_err(|e| GatewayError::validation(e.body_text()))?;
    state.dispatcher.dispatch(endpoint, &body).await.map(Json)
}

async fn contact(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(body) = body.map_err(|e| GatewayError::validation(e.body_text()))?;
    let form = ContactForm::parse(&body)?;
    let mailer = state
        .mailer
        .as_ref()
        .ok_or_else(|| GatewayError::Mail("contact relay not configured".into()))?;
    mailer.send(&form).await?;
    Ok(Json(json!({ "message": SENT_MESSAGE })))
}

fn cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

/// Builds the gateway router.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let mut router = Router::new()
        .route("/", get(|| async { ROOT_TEXT }))
        .route("/status", get(|| async { STATUS_TEXT }))
        .route("/contact", post(contact));

    for endpoint in Endpoint::ALL {
        router = router.route(
            &endpoint.path(),
            post(
                move |State(state): State<AppState>,
                      body: std::result::Result<Json<Value>, JsonRejection>| {
                    analyze(state, endpoint, body)
                },
            ),
        );
    }

    router
        .layer(cors(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockClient;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use geo_cache::InMemoryCache;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Debug, Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<ContactForm>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, form: &ContactForm) -> Result<()> {
            self.sent.lock().unwrap().push(form.clone());
            Ok(())
        }
    }

    fn app(client: &Arc<MockClient>) -> Router {
        let dispatcher = Dispatcher::new(client.clone(), Arc::new(InMemoryCache::default()));
        router(
            AppState::new(Arc::new(dispatcher)),
            &["http://localhost:5173".to_string()],
        )
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read(response: axum::response::Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_liveness() {
        let client = Arc::new(MockClient::new());
        let response = app(&client)
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], STATUS_TEXT.as_bytes());
    }

    #[tokio::test]
    async fn test_verify_location_route() {
        let client = Arc::new(MockClient::new().with_responder(|expr| {
            Ok(match expr.function_name() {
                Some("Collection.size") => json!(1),
                _ => json!(true),
            })
        }));
        let body = r#"{"provincia":"Córdoba","localidad":"Capital","point":[-31.4,-64.2]}"#;

        let response = app(&client)
            .oneshot(post_json("/verificar-ubicacion", body))
            .await
            .unwrap();

        let (status, json) = read(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!(true));
    }

    #[tokio::test]
    async fn test_missing_field_is_bad_request() {
        let client = Arc::new(MockClient::new());
        let response = app(&client)
            .oneshot(post_json("/getCuencaYearComparador", r#"{"funcion":"graficoComparativo"}"#))
            .await
            .unwrap();

        let (status, json) = read(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().starts_with("Parámetros inválidos"));
        assert_eq!(client.remote_calls(), 0);
        assert_eq!(client.auth_calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let client = Arc::new(MockClient::new());
        let response = app(&client)
            .oneshot(post_json("/getPointNdvi", "{not json"))
            .await
            .unwrap();

        let (status, json) = read(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_function_is_bad_request() {
        let client = Arc::new(MockClient::new());
        let response = app(&client)
            .oneshot(post_json(
                "/getMapIdCuenca",
                r#"{"funcion":"graficoX","cuenca":"atuel","año":2021}"#,
            ))
            .await
            .unwrap();

        let (status, json) = read(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Función no válida: graficoX");
    }

    #[tokio::test]
    async fn test_contact_relays_form() {
        let client = Arc::new(MockClient::new());
        let mailer = Arc::new(RecordingMailer::default());
        let dispatcher = Dispatcher::new(client, Arc::new(InMemoryCache::default()));
        let app = router(
            AppState::new(Arc::new(dispatcher)).with_mailer(mailer.clone()),
            &[],
        );
        let body = r#"{"name":"Ana","email":"ana@example.com","requestType":"Datos","message":"Hola"}"#;

        let response = app.oneshot(post_json("/contact", body)).await.unwrap();

        let (status, json) = read(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], SENT_MESSAGE);
        assert_eq!(mailer.sent.lock().unwrap()[0].request_type, "Datos");
    }

    #[tokio::test]
    async fn test_contact_missing_field() {
        let client = Arc::new(MockClient::new());
        let response = app(&client)
            .oneshot(post_json("/contact", r#"{"name":"Ana"}"#))
            .await
            .unwrap();

        let (status, _) = read(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin() {
        let client = Arc::new(MockClient::new());
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/getPointNdvi")
            .header("origin", "http://localhost:5173")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();

        let response = app(&client).oneshot(request).await.unwrap();

        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://localhost:5173"
        );
    }
}
