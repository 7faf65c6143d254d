use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

use forage_core::error::SearchError;
use forage_core::grams::ParsedIngredientLine;
use forage_core::importer::{ImportOptions, ImportSummary, raw_row_from_value};
use forage_core::models::Food;
use forage_core::search::SearchResponse;
use forage_core::service::{FoodEngine, GramsLookup, NutritionLookupProvider};

const BODY_LIMIT: usize = 50 * 1024 * 1024; // 50 MB

#[derive(Clone)]
struct AppState {
    engine: Arc<Mutex<FoodEngine>>,
    provider: Option<Arc<dyn NutritionLookupProvider>>,
}

impl AppState {
    fn lock(&self) -> MutexGuard<'_, FoodEngine> {
        self.engine
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

#[derive(Deserialize)]
struct ImportRequest {
    rows: Vec<serde_json::Value>,
    #[serde(default)]
    dry_run: bool,
    batch_size: Option<usize>,
    skip_duplicates: Option<bool>,
}

/// Either a whole ingredient line, or a quantity/unit pair plus a name.
#[derive(Deserialize)]
struct GramsRequest {
    line: Option<String>,
    qty: Option<String>,
    unit: Option<String>,
    name: Option<String>,
    food_id: Option<i64>,
}

#[derive(Serialize)]
struct FoodDetail {
    #[serde(flatten)]
    food: Food,
    aliases: Vec<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (
            status,
            Json(ErrorResponse {
                success: false,
                error: message,
            }),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Validation(msg) => Self::BadRequest(msg),
            SearchError::Storage(e) => Self::Internal(e),
        }
    }
}

/// Run a blocking engine call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("engine task failed")?
}

// --- Middleware ---

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn search_foods(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    let engine_state = state.clone();
    let (local, backfill) = blocking(move || {
        let engine = engine_state.lock();
        let local = engine.begin_search(&params.q)?;
        let backfill = engine.needs_backfill(&local);
        Ok((local, backfill))
    })
    .await?;

    // The external lookup can take seconds; it runs without the engine lock.
    let fetched = match state.provider.clone().filter(|_| backfill) {
        Some(provider) => {
            let query = local.query().to_string();
            Some(blocking(move || Ok(provider.search_by_text(&query))).await?)
        }
        None => None,
    };

    blocking(move || {
        let resp = state.lock().finish_search(local, fetched)?;
        Ok(Json(resp))
    })
    .await
}

async fn import_foods(
    State(state): State<AppState>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<ImportSummary>, ApiError> {
    if req.batch_size == Some(0) {
        return Err(ApiError::BadRequest(
            "batch_size must be greater than 0".to_string(),
        ));
    }
    blocking(move || {
        let rows: Vec<_> = req.rows.into_iter().map(raw_row_from_value).collect();
        let engine = state.lock();
        let defaults = engine.default_import_options();
        let options = ImportOptions {
            dry_run: req.dry_run,
            batch_size: req.batch_size.unwrap_or(defaults.batch_size),
            skip_duplicates: req.skip_duplicates.unwrap_or(defaults.skip_duplicates),
        };
        Ok(Json(engine.import_batch(&rows, &options, None)))
    })
    .await
}

fn parse_grams_request(req: &GramsRequest) -> Result<ParsedIngredientLine, ApiError> {
    let parsed = match (&req.line, &req.qty) {
        (Some(line), _) => ParsedIngredientLine::parse(line),
        (None, Some(qty)) => ParsedIngredientLine::from_quantity(
            qty,
            req.unit.as_deref().unwrap_or_default(),
            req.name.as_deref().unwrap_or_default(),
        ),
        (None, None) => {
            return Err(ApiError::BadRequest(
                "Provide either 'line' or 'qty'".to_string(),
            ));
        }
    };
    parsed.map_err(|e| ApiError::BadRequest(format!("{e:#}")))
}

async fn resolve_grams(
    State(state): State<AppState>,
    Json(req): Json<GramsRequest>,
) -> Result<Json<GramsLookup>, ApiError> {
    let parsed = parse_grams_request(&req)?;
    let food_id = req.food_id;
    blocking(move || {
        let engine = state.lock();
        if let Some(id) = food_id {
            ensure_food_exists(&engine, id)?;
        }
        Ok(Json(engine.resolve_line(&parsed, food_id)?))
    })
    .await
}

fn ensure_food_exists(engine: &FoodEngine, id: i64) -> Result<(), ApiError> {
    if engine.database().find_food(id)?.is_none() {
        return Err(ApiError::NotFound(format!("Food {id} not found")));
    }
    Ok(())
}

async fn get_food(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<FoodDetail>, ApiError> {
    blocking(move || {
        let engine = state.lock();
        let food = engine
            .database()
            .find_food(id)?
            .ok_or_else(|| ApiError::NotFound(format!("Food {id} not found")))?;
        let aliases = engine
            .food_aliases(id)?
            .into_iter()
            .map(|a| a.alias)
            .collect();
        Ok(Json(FoodDetail { food, aliases }))
    })
    .await
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/foods/search", get(search_foods))
        .route("/api/foods/import", post(import_foods))
        .route("/api/foods/{id}", get(get_food))
        .route("/api/grams", post(resolve_grams))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    engine: FoodEngine,
    provider: Option<Arc<dyn NutritionLookupProvider>>,
    port: u16,
    bind: &str,
) -> anyhow::Result<()> {
    if provider.is_none() {
        info!("external backfill disabled");
    }
    let state = AppState {
        engine: Arc::new(Mutex::new(engine)),
        provider,
    };

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    info!(event = "server_listening", bind, port, "listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::body::Body;
    use forage_core::models::{ExternalFoodRecord, Nutrients};
    use forage_core::normalize::RawNutritionRow;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct MockProvider;

    impl NutritionLookupProvider for MockProvider {
        fn search_by_text(&self, _query: &str) -> Result<Vec<ExternalFoodRecord>> {
            Ok(vec![ExternalFoodRecord {
                external_id: "fdc:2001".to_string(),
                name: "Greek yogurt, plain".to_string(),
                brand: None,
                source: "usda-fdc".to_string(),
                per_100g: Nutrients {
                    kcal: 59.0,
                    protein: 10.0,
                    carbs: 3.6,
                    fat: 0.4,
                    ..Nutrients::default()
                },
            }])
        }
    }

    fn seeded_engine() -> FoodEngine {
        let engine = FoodEngine::new_in_memory().unwrap();
        let rows = vec![RawNutritionRow {
            name: Some("Olive oil".to_string()),
            calories: Some(884.0),
            fat: Some(100.0),
            ..RawNutritionRow::default()
        }];
        engine.import_batch(&rows, &ImportOptions::default(), None);
        engine
    }

    fn test_app(provider: Option<Arc<dyn NutritionLookupProvider>>) -> Router {
        build_router(AppState {
            engine: Arc::new(Mutex::new(seeded_engine())),
            provider,
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(uri: &str, body: &serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn search_returns_ranked_results() {
        let app = test_app(None);

        let response = app
            .oneshot(
                axum::http::Request::get("/api/foods/search?q=olive")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["sources"]["total"], 1);
        assert_eq!(json["data"][0]["name"], "Olive oil");
        assert!(json["data"][0]["confidence"].as_f64().unwrap() > 0.0);
        assert_eq!(json["data"][0]["display_serving_options"][0]["label"], "1 tbsp");
    }

    #[tokio::test]
    async fn search_short_query_returns_400() {
        let app = test_app(None);

        let response = app
            .oneshot(
                axum::http::Request::get("/api/foods/search?q=a")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn search_backfills_from_provider() {
        let app = test_app(Some(Arc::new(MockProvider)));

        let response = app
            .oneshot(
                axum::http::Request::get("/api/foods/search?q=greek%20yogurt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["sources"]["external"], 1);
        assert_eq!(json["data"][0]["source"], "external-live");
        assert_eq!(json["data"][0]["external_id"], "fdc:2001");
    }

    #[tokio::test]
    async fn import_counts_rows() {
        let app = test_app(None);
        let body = serde_json::json!({
            "rows": [
                {"description": "Banana, raw", "energy_kcal": "89", "protein_g": 1.1},
                {"name": "Water", "calories": 0},
                {"name": "Olive oil", "calories": 884, "fat": 100},
                "not an object"
            ]
        });

        let response = app.oneshot(post_json("/api/foods/import", &body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["created"], 1);
        assert_eq!(json["skipped"], 3);
        assert_eq!(json["errors"], 0);
        assert_eq!(json["dry_run"], false);
    }

    #[tokio::test]
    async fn import_rejects_zero_batch_size() {
        let app = test_app(None);
        let body = serde_json::json!({"rows": [], "batch_size": 0});
        let response = app.oneshot(post_json("/api/foods/import", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn grams_from_line() {
        let app = test_app(None);
        let body = serde_json::json!({"line": "2 tbsp olive oil"});

        let response = app.oneshot(post_json("/api/grams", &body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!((json["grams"].as_f64().unwrap() - 27.2).abs() < 1e-9);
        assert_eq!(json["used_fallback"], false);
        assert_eq!(json["method"], "serving_exact");
        assert_eq!(json["food"]["name"], "Olive oil");
    }

    #[tokio::test]
    async fn grams_from_quantity_and_unit() {
        let app = test_app(None);
        let body = serde_json::json!({"qty": "1/2", "unit": "cup", "food_id": 1});

        let response = app.oneshot(post_json("/api/grams", &body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        // No "cup" serving on the oil, so density applies: 120 mL * 0.91
        assert!((json["grams"].as_f64().unwrap() - 109.2).abs() < 1e-9);
        assert_eq!(json["method"], "density");
    }

    #[tokio::test]
    async fn grams_unknown_food_returns_404() {
        let app = test_app(None);
        let body = serde_json::json!({"line": "1 cup rice", "food_id": 999});
        let response = app.oneshot(post_json("/api/grams", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn grams_missing_input_returns_400() {
        let app = test_app(None);
        let body = serde_json::json!({"name": "rice"});
        let response = app.oneshot(post_json("/api/grams", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_food_with_aliases() {
        let app = test_app(None);

        let response = app
            .oneshot(
                axum::http::Request::get("/api/foods/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["name"], "Olive oil");
        assert_eq!(json["source"], "curated-bulk-import");
        let aliases = json["aliases"].as_array().unwrap();
        assert!(aliases.iter().any(|a| a == "olive oil"));
    }

    /// Signals when a lookup starts, then waits until released.
    struct GatedProvider {
        entered: Mutex<std::sync::mpsc::Sender<()>>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl NutritionLookupProvider for GatedProvider {
        fn search_by_text(&self, _query: &str) -> Result<Vec<ExternalFoodRecord>> {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self
                .release
                .lock()
                .unwrap()
                .recv_timeout(std::time::Duration::from_secs(5));
            Ok(Vec::new())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn external_lookup_does_not_block_other_requests() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let app = test_app(Some(Arc::new(GatedProvider {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        })));

        let search = tokio::spawn(
            app.clone().oneshot(
                axum::http::Request::get("/api/foods/search?q=greek%20yogurt")
                    .body(Body::empty())
                    .unwrap(),
            ),
        );
        tokio::task::spawn_blocking(move || {
            entered_rx.recv_timeout(std::time::Duration::from_secs(5))
        })
        .await
        .unwrap()
        .unwrap();

        // The lookup is still in flight; an unrelated read must not wait for it
        let detail = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            app.oneshot(
                axum::http::Request::get("/api/foods/1")
                    .body(Body::empty())
                    .unwrap(),
            ),
        )
        .await
        .expect("food detail waited for the external lookup")
        .unwrap();
        assert_eq!(detail.status(), StatusCode::OK);

        release_tx.send(()).unwrap();
        let response = search.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["sources"]["external"], 0);
    }

    #[tokio::test]
    async fn get_food_not_found() {
        let app = test_app(None);

        let response = app
            .oneshot(
                axum::http::Request::get("/api/foods/404")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn security_headers_present() {
        let app = test_app(None);

        let response = app
            .oneshot(
                axum::http::Request::get("/api/foods/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let app = test_app(None);

        let big_body = vec![0u8; BODY_LIMIT + 1];
        let response = app
            .oneshot(
                axum::http::Request::post("/api/foods/import")
                    .header("content-type", "application/json")
                    .body(Body::from(big_body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::Internal(anyhow::anyhow!("secret database path /home/user/forage.db"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"], "Internal server error");
        assert!(!json["error"].as_str().unwrap().contains("secret"));
    }
}
