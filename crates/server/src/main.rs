//! FutureWallet: target-price probability estimates from daily price history
//!
//! Usage:
//!   futurewallet predict --symbol BTCUSDT --target 100000 --days 10
//!   futurewallet serve --port 3002
//!   futurewallet history --limit 20

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use engine::api::binance::{normalize_symbol, DEFAULT_BASE_URL};
use engine::{
    estimate, summarize_history, BinanceClient, CsvPriceSource, EstimateRequest,
    FeatureImportances, HistorySummary, PredictionResult, PriceHistorySource,
};
use persistence::repository::PredictionRecord;
use persistence::{Database, DbError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

const ENV_DB_PATH: &str = "FUTUREWALLET_DB_PATH";
const ENV_BINANCE_URL: &str = "FUTUREWALLET_BINANCE_URL";
const DEFAULT_DB_PATH: &str = "data/futurewallet.db";
const DEFAULT_HISTORY_LIMIT: i64 = 20;

#[derive(Parser)]
#[command(name = "futurewallet")]
#[command(about = "Estimate the probability that an asset reaches a target price", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch daily history and estimate the probability of reaching a target
    Predict {
        /// Asset symbol (BTC, BTC-USD, BTCUSDT)
        #[arg(long)]
        symbol: String,
        /// Target price in quote currency
        #[arg(long)]
        target: f64,
        /// Horizon in days
        #[arg(long)]
        days: u32,
        /// Seed for row subsampling; recorded with the run, the default booster ignores it
        #[arg(long)]
        seed: Option<u64>,
        /// Read history from a CSV file instead of Binance
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Do not store the run in the database
        #[arg(long)]
        no_save: bool,
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Launch the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3002)]
        port: u16,
    },
    /// List stored runs, newest first
    History {
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: i64,
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Delete a stored run
    Delete {
        #[arg(long)]
        id: i64,
    },
}

/// Settings read from the environment (and `.env`)
#[derive(Debug, Clone, PartialEq)]
struct Config {
    db_path: String,
    binance_url: String,
}

impl Config {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            db_path: non_empty(ENV_DB_PATH).unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            binance_url: non_empty(ENV_BINANCE_URL).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    async fn open_database(&self) -> anyhow::Result<Database> {
        let db = Database::new(&self.db_path).await.map_err(|e| {
            error!("Failed to initialize database: {}", e);
            anyhow::anyhow!("Database initialization failed: {}", e)
        })?;
        info!("Database initialized: {}", self.db_path);
        Ok(db)
    }
}

#[derive(Clone)]
struct AppState {
    source: Arc<dyn PriceHistorySource>,
    db: Arc<Database>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,futurewallet=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,persistence=info,futurewallet=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    match cli.command {
        Commands::Predict {
            symbol,
            target,
            days,
            seed,
            csv,
            no_save,
            json,
        } => {
            let request = EstimateRequest {
                symbol,
                target_price: target,
                days,
                seed,
            };
            cmd_predict(&config, request, csv, no_save, json).await?;
        }
        Commands::Serve { host, port } => {
            cmd_serve(&config, &host, port).await?;
        }
        Commands::History { limit, symbol } => {
            cmd_history(&config, limit, symbol).await?;
        }
        Commands::Delete { id } => {
            cmd_delete(&config, id).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Prediction pipeline shared by CLI and API
// ============================================================================

/// Everything produced by one prediction request
struct PredictionOutcome {
    request: EstimateRequest,
    result: PredictionResult,
    summary: Option<HistorySummary>,
    /// Row id when the run was stored
    id: Option<i64>,
    /// Last stored run of the same query, looked up before saving
    previous: Option<PredictionRecord>,
}

/// Reject requests that cannot be estimated and canonicalize the symbol
fn validate_request(request: EstimateRequest) -> Result<EstimateRequest, String> {
    if request.symbol.trim().is_empty() {
        return Err("symbol must not be empty".to_string());
    }
    if !request.target_price.is_finite() || request.target_price <= 0.0 {
        return Err(format!(
            "target_price must be a positive number, got {}",
            request.target_price
        ));
    }
    if request.days == 0 {
        return Err("days must be at least 1".to_string());
    }
    Ok(EstimateRequest {
        symbol: normalize_symbol(&request.symbol),
        ..request
    })
}

async fn run_prediction(
    source: &dyn PriceHistorySource,
    db: Option<&Database>,
    request: EstimateRequest,
) -> anyhow::Result<PredictionOutcome> {
    let request = validate_request(request).map_err(anyhow::Error::msg)?;

    let bars = source.fetch_daily_history(&request.symbol).await?;
    info!(
        symbol = %request.symbol,
        source = source.name(),
        bars = bars.len(),
        "History loaded"
    );
    let summary = summarize_history(&bars, request.target_price);

    // Training is CPU-bound; keep it off the async workers
    let params = request.params();
    let result = tokio::task::spawn_blocking(move || estimate(&bars, &params)).await?;

    let mut outcome = PredictionOutcome {
        request,
        result,
        summary,
        id: None,
        previous: None,
    };

    if let Some(db) = db {
        let repo = db.predictions();
        let hash = outcome.request.fingerprint();
        match repo.latest_for_hash(&hash).await {
            Ok(previous) => outcome.previous = previous,
            Err(e) => warn!("Failed to look up previous run: {}", e),
        }

        let saved = match to_record(&outcome, source.name()) {
            Ok(record) => repo.save(&record).await,
            Err(e) => Err(e),
        };
        match saved {
            Ok(id) => outcome.id = Some(id),
            Err(e) => warn!("Failed to store prediction: {}", e),
        }
    }

    Ok(outcome)
}

fn to_record(outcome: &PredictionOutcome, source: &str) -> Result<PredictionRecord, DbError> {
    let result = &outcome.result;
    Ok(PredictionRecord {
        id: None,
        request_hash: outcome.request.fingerprint(),
        symbol: outcome.request.symbol.clone(),
        source: source.to_string(),
        target_price: result.target_price,
        days: i64::from(result.days),
        // Stored bit-for-bit; read back with the inverse cast
        seed: outcome.request.seed.map(|s| s as i64),
        success: result.success,
        message: result.message.clone(),
        current_price: result.current_price,
        probability: result.probability,
        accuracy: result.accuracy,
        required_increase: result.required_increase,
        feature_importances: PredictionRecord::encode_importances(&result.feature_importances)?,
        all_time_high: outcome.summary.as_ref().map(|s| s.all_time_high),
        regime: outcome.summary.as_ref().map(|s| s.regime.as_str().to_string()),
        created_at: None,
    })
}

/// A stored run as returned by the API
#[derive(Debug, Serialize)]
struct StoredPrediction {
    id: i64,
    symbol: String,
    source: String,
    request_hash: String,
    seed: Option<u64>,
    all_time_high: Option<f64>,
    regime: Option<String>,
    created_at: Option<String>,
    result: PredictionResult,
}

impl TryFrom<PredictionRecord> for StoredPrediction {
    type Error = DbError;

    fn try_from(record: PredictionRecord) -> Result<Self, Self::Error> {
        let feature_importances: FeatureImportances = record.importances_as()?;
        Ok(Self {
            id: record.id.unwrap_or_default(),
            seed: record.seed.map(|s| s as u64),
            created_at: record.created_at.and_then(format_timestamp),
            result: PredictionResult {
                success: record.success,
                message: record.message,
                current_price: record.current_price,
                target_price: record.target_price,
                days: u32::try_from(record.days).unwrap_or_default(),
                probability: record.probability,
                accuracy: record.accuracy,
                feature_importances,
                required_increase: record.required_increase,
            },
            symbol: record.symbol,
            source: record.source,
            request_hash: record.request_hash,
            all_time_high: record.all_time_high,
            regime: record.regime,
        })
    }
}

fn format_timestamp(secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(secs, 0).map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
}

// ============================================================================
// Predict command (CLI mode)
// ============================================================================

async fn cmd_predict(
    config: &Config,
    request: EstimateRequest,
    csv: Option<PathBuf>,
    no_save: bool,
    json: bool,
) -> anyhow::Result<()> {
    let source: Box<dyn PriceHistorySource> = match csv {
        Some(path) => Box::new(CsvPriceSource::new(path)),
        None => Box::new(BinanceClient::new(&config.binance_url)?),
    };

    let db = if no_save {
        None
    } else {
        Some(config.open_database().await?)
    };

    let outcome = run_prediction(source.as_ref(), db.as_ref(), request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&PredictResponse::from(&outcome))?);
    } else {
        print_prediction(&outcome);
    }
    Ok(())
}

fn print_prediction(outcome: &PredictionOutcome) {
    let result = &outcome.result;
    println!(
        "\n=== {} → {:.2} within {} days ===",
        outcome.request.symbol, result.target_price, result.days
    );

    if let Some(s) = &outcome.summary {
        println!("  History:          {} .. {} ({} days)", s.first_date, s.last_date, s.bars);
        println!("  Current price:    {:.2}", s.current_price);
        println!(
            "  All-time high:    {:.2} ({:+.1}% away, target is a {})",
            s.all_time_high,
            s.distance_from_high * 100.0,
            s.regime
        );
    }

    if !result.success {
        println!("\n  Estimate failed: {}", result.message);
        return;
    }
    if !result.message.is_empty() {
        println!("  Note:             {}", result.message);
    }

    println!("  Required move:    {:+.2}%", result.required_increase * 100.0);
    println!("  Probability:      {:.1}%", result.probability * 100.0);
    if !result.feature_importances.is_empty() {
        println!("  Holdout accuracy: {:.1}%", result.accuracy * 100.0);
        println!("\n  Feature importances:");
        for (name, value) in result.feature_importances.entries() {
            println!("    {:<18} {:>6.3}", name.as_str(), value);
        }
    }

    if let Some(prev) = &outcome.previous {
        println!(
            "\n  Previous run of this query (#{}{}): {:.1}%",
            prev.id.unwrap_or_default(),
            prev.created_at
                .and_then(format_timestamp)
                .map(|t| format!(", {}", t))
                .unwrap_or_default(),
            prev.probability * 100.0
        );
    }
    if let Some(id) = outcome.id {
        println!("  Saved as #{}", id);
    }
}

// ============================================================================
// History / Delete commands
// ============================================================================

async fn cmd_history(config: &Config, limit: i64, symbol: Option<String>) -> anyhow::Result<()> {
    let db = config.open_database().await?;
    let symbol = symbol.map(|s| normalize_symbol(&s));
    let records = db
        .predictions()
        .get_recent(limit, symbol.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load history: {}", e))?;

    if records.is_empty() {
        println!("No stored predictions.");
        return Ok(());
    }

    println!(
        "\n  {:>5}  {:<19}  {:<10} {:>12} {:>5} {:>7} {:>7}  {}",
        "#", "Created", "Symbol", "Target", "Days", "Prob%", "Acc%", "Status"
    );
    println!("  {}", "-".repeat(84));
    for r in &records {
        let status = if r.success { "ok" } else { r.message.as_str() };
        println!(
            "  {:>5}  {:<19}  {:<10} {:>12.2} {:>5} {:>6.1}% {:>6.1}%  {}",
            r.id.unwrap_or_default(),
            r.created_at.and_then(format_timestamp).unwrap_or_default(),
            r.symbol,
            r.target_price,
            r.days,
            r.probability * 100.0,
            r.accuracy * 100.0,
            status,
        );
    }
    Ok(())
}

async fn cmd_delete(config: &Config, id: i64) -> anyhow::Result<()> {
    let db = config.open_database().await?;
    let deleted = db
        .predictions()
        .delete(id)
        .await
        .map_err(|e| anyhow::anyhow!("Delete failed: {}", e))?;

    if deleted {
        info!("Deleted prediction #{}", id);
    } else {
        anyhow::bail!("No prediction with id {}", id);
    }
    Ok(())
}

// ============================================================================
// Serve command (Axum web server)
// ============================================================================

async fn cmd_serve(config: &Config, host: &str, port: u16) -> anyhow::Result<()> {
    info!("FutureWallet v{} starting...", APP_VERSION);

    let db = config.open_database().await?;
    let state = AppState {
        source: Arc::new(BinanceClient::new(&config.binance_url)?),
        db: Arc::new(db),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new().nest("/api", api_routes(state)).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== FutureWallet v{} ===", APP_VERSION);
    println!("Target probability estimator");
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET    /api/health            - Health check");
    println!("  POST   /api/predict           - Estimate probability of reaching a target");
    println!("  GET    /api/predictions       - Stored runs (limit, symbol)");
    println!("  GET    /api/predictions/:id   - One stored run");
    println!("  DELETE /api/predictions/:id   - Delete a stored run");
    println!("\n  Database: {}", config.db_path);
    println!("  Binance:  {}", config.binance_url);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api_health))
        .route("/predict", post(api_predict))
        .route("/predictions", get(api_list_predictions))
        .route(
            "/predictions/:id",
            get(api_get_prediction).delete(api_delete_prediction),
        )
        .with_state(state)
}

// ============================================================================
// API Handlers
// ============================================================================

/// Body of `POST /api/predict` and of `predict --json`
#[derive(Debug, Serialize)]
struct PredictResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<PredictionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<HistorySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl PredictResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            summary: None,
            id: None,
            error: Some(message.into()),
        }
    }
}

impl From<&PredictionOutcome> for PredictResponse {
    fn from(outcome: &PredictionOutcome) -> Self {
        Self {
            success: outcome.result.success,
            error: (!outcome.result.success).then(|| outcome.result.message.clone()),
            result: Some(outcome.result.clone()),
            summary: outcome.summary.clone(),
            id: outcome.id,
        }
    }
}

/// Envelope for stored-run endpoints
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "futurewallet",
        "version": APP_VERSION,
    }))
}

/// POST /api/predict: fetch history, estimate, store
async fn api_predict(
    State(state): State<AppState>,
    Json(request): Json<EstimateRequest>,
) -> Json<PredictResponse> {
    let request = match validate_request(request) {
        Ok(r) => r,
        Err(msg) => return Json(PredictResponse::failure(msg)),
    };

    match run_prediction(state.source.as_ref(), Some(state.db.as_ref()), request).await {
        Ok(outcome) => Json(PredictResponse::from(&outcome)),
        Err(e) => {
            error!("Prediction failed: {:#}", e);
            Json(PredictResponse::failure(format!("Prediction failed: {:#}", e)))
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<i64>,
    symbol: Option<String>,
}

/// GET /api/predictions: stored runs, newest first
async fn api_list_predictions(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Json<ApiResponse<Vec<StoredPrediction>>> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let symbol = params.symbol.map(|s| normalize_symbol(&s));

    let records = match state.db.predictions().get_recent(limit, symbol.as_deref()).await {
        Ok(records) => records,
        Err(e) => return Json(ApiResponse::err(format!("Failed to query predictions: {}", e))),
    };

    match records
        .into_iter()
        .map(StoredPrediction::try_from)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(data) => Json(ApiResponse::ok(data)),
        Err(e) => Json(ApiResponse::err(format!("Corrupt stored prediction: {}", e))),
    }
}

/// GET /api/predictions/:id
async fn api_get_prediction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<ApiResponse<StoredPrediction>>) {
    match state.db.predictions().get_by_id(id).await {
        Ok(Some(record)) => match StoredPrediction::try_from(record) {
            Ok(stored) => (StatusCode::OK, Json(ApiResponse::ok(stored))),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err(format!("Corrupt stored prediction: {}", e))),
            ),
        },
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::err(format!("No prediction with id {}", id))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::err(format!("Failed to load prediction: {}", e))),
        ),
    }
}

/// DELETE /api/predictions/:id
async fn api_delete_prediction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.db.predictions().delete(id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "id": id })),
        ),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "success": false,
                "error": format!("No prediction with id {}", id),
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "success": false,
                "error": format!("Failed to delete prediction: {}", e),
            })),
        ),
    }
}
