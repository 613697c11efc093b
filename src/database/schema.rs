// Database schema definitions and migrations
// Column names follow the persisted layout of existing ledgers (`ts`, `ua`).

pub const CREATE_LOGS: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module TEXT NOT NULL,
    action TEXT NOT NULL,
    user TEXT NOT NULL DEFAULT '',
    ts INTEGER NOT NULL,
    success INTEGER NOT NULL DEFAULT 1,
    severity TEXT NOT NULL DEFAULT 'info',
    ip TEXT NOT NULL DEFAULT '',
    ua TEXT NOT NULL DEFAULT '',
    details TEXT NOT NULL DEFAULT '',
    prev_hash TEXT NOT NULL DEFAULT '',
    hash TEXT NOT NULL
)
"#;

pub const CREATE_AUDITS: &str = r#"
CREATE TABLE IF NOT EXISTS audits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    type TEXT NOT NULL,
    actor TEXT NOT NULL DEFAULT '',
    details TEXT NOT NULL DEFAULT ''
)
"#;

pub const CREATE_ALERT_RULES: &str = r#"
CREATE TABLE IF NOT EXISTS alert_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

pub const CREATE_RETENTION_STATE: &str = r#"
CREATE TABLE IF NOT EXISTS retention_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_run INTEGER NOT NULL DEFAULT 0,
    last_result TEXT
)
"#;

pub const SEED_RETENTION_STATE: &str =
    "INSERT OR IGNORE INTO retention_state (id, last_run) VALUES (1, 0)";

pub const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_logs_ts ON logs(ts)",
    "CREATE INDEX IF NOT EXISTS idx_logs_module ON logs(module)",
    "CREATE INDEX IF NOT EXISTS idx_logs_action ON logs(action)",
    "CREATE INDEX IF NOT EXISTS idx_logs_user ON logs(user)",
    "CREATE INDEX IF NOT EXISTS idx_logs_severity ON logs(severity)",
    "CREATE INDEX IF NOT EXISTS idx_audits_ts ON audits(ts)",
    "CREATE INDEX IF NOT EXISTS idx_audits_type ON audits(type)",
];

/// Ordered migration steps, all idempotent.
pub fn migrations() -> Vec<&'static str> {
    let mut steps = vec![
        CREATE_LOGS,
        CREATE_AUDITS,
        CREATE_ALERT_RULES,
        CREATE_RETENTION_STATE,
        SEED_RETENTION_STATE,
    ];
    steps.extend_from_slice(INDEXES);
    steps
}

pub const TRIGGER_NO_UPDATE: &str = r#"
CREATE TRIGGER IF NOT EXISTS logs_no_update BEFORE UPDATE ON logs
BEGIN
    SELECT RAISE(ABORT, 'Immutable logs: UPDATE not allowed');
END
"#;

pub const TRIGGER_DELETE_AUDIT: &str = r#"
CREATE TRIGGER IF NOT EXISTS logs_delete_audit BEFORE DELETE ON logs
BEGIN
    INSERT INTO audits (ts, type, actor, details)
    VALUES (
        CAST(strftime('%s', 'now') AS INTEGER),
        'logs.delete',
        'db-trigger',
        'id=' || OLD.id || ';ts=' || OLD.ts || ';module=' || OLD.module || ';action=' || OLD.action || ';user=' || OLD.user
    );
END
"#;

pub const TRIGGER_NO_DELETE: &str = r#"
CREATE TRIGGER IF NOT EXISTS logs_no_delete BEFORE DELETE ON logs
BEGIN
    SELECT RAISE(ABORT, 'Immutable logs: DELETE not allowed');
END
"#;
