//! Database schema definitions

/// SQL to create all tables.
/// Importances are stored as a JSON object in descending order.
pub const CREATE_TABLES: &str = r#"
-- Past estimator runs (analysis history)
CREATE TABLE IF NOT EXISTS predictions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_hash TEXT NOT NULL,
    symbol TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'binance',
    target_price REAL NOT NULL,
    days INTEGER NOT NULL,
    seed INTEGER,
    success INTEGER NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    current_price REAL NOT NULL DEFAULT 0,
    probability REAL NOT NULL DEFAULT 0,
    accuracy REAL NOT NULL DEFAULT 0,
    required_increase REAL NOT NULL DEFAULT 0,
    feature_importances TEXT NOT NULL DEFAULT '{}',
    all_time_high REAL,
    regime TEXT,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_predictions_hash ON predictions(request_hash);
CREATE INDEX IF NOT EXISTS idx_predictions_symbol ON predictions(symbol, created_at DESC)
"#;
