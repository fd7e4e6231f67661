// Dialect - per-backend capabilities and the SQL differences they imply

use crate::error::{DatabaseError, OutboxError};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The queue table
pub const OUTBOX_TABLE: &str = "outbox_entries";

/// Bound on a lock attempt when the backend cannot skip locked rows
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    PostgreSql,
    MySql,
    Sqlite,
}

impl DialectKind {
    /// Backend implied by a connection URL, if any
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?.to_ascii_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Some(DialectKind::PostgreSql),
            "mysql" | "mariadb" => Some(DialectKind::MySql),
            "sqlite" => Some(DialectKind::Sqlite),
            _ => None,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialectKind::PostgreSql => write!(f, "PostgreSQL"),
            DialectKind::MySql => write!(f, "MySQL"),
            DialectKind::Sqlite => write!(f, "SQLite"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`
    Question,
    /// `$1`, `$2`, ...
    Dollar,
}

/// How `lock` probes a single `(id, version)` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockProbe {
    /// Query; acquired iff a row comes back
    Select(String),
    /// No-op write; acquired iff exactly one row is affected
    Touch(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPlan {
    /// Statement issued before the probe in the same transaction
    pub setup: Option<String>,
    pub probe: LockProbe,
}

/// Capability descriptor for a database backend.
///
/// Chosen once at configuration time; the persistor renders every statement
/// from it when it is built.
///
/// SQLite has no row locks. Its lock probe takes the database write lock, so
/// while one transaction holds a lock on any entry, `lock` on every other entry
/// returns `false` until that transaction ends. Workers sharing a SQLite
/// database therefore process entries one transaction at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    kind: DialectKind,
    supports_skip_lock: bool,
    lock_timeout: Duration,
}

impl Dialect {
    pub const POSTGRESQL_9: Dialect = Dialect::new(DialectKind::PostgreSql, true);
    pub const MYSQL_8: Dialect = Dialect::new(DialectKind::MySql, true);
    pub const MYSQL_5: Dialect = Dialect::new(DialectKind::MySql, false);
    pub const SQLITE: Dialect = Dialect::new(DialectKind::Sqlite, false);

    pub const fn new(kind: DialectKind, supports_skip_lock: bool) -> Self {
        Self {
            kind,
            supports_skip_lock,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Default dialect for a connection URL
    pub fn from_url(url: &str) -> Option<Self> {
        DialectKind::from_url(url).map(|kind| match kind {
            DialectKind::PostgreSql => Dialect::POSTGRESQL_9,
            DialectKind::MySql => Dialect::MYSQL_8,
            DialectKind::Sqlite => Dialect::SQLITE,
        })
    }

    pub fn kind(&self) -> DialectKind {
        self.kind
    }

    pub fn supports_skip_lock(&self) -> bool {
        // SQLite has no row locks at all
        self.supports_skip_lock && self.kind != DialectKind::Sqlite
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn placeholder_style(&self) -> PlaceholderStyle {
        match self.kind {
            DialectKind::PostgreSql => PlaceholderStyle::Dollar,
            DialectKind::MySql | DialectKind::Sqlite => PlaceholderStyle::Question,
        }
    }

    /// Most bind parameters one statement may carry
    ///
    /// SQLite builds before 3.32 stop at 999; the wire protocols of PostgreSQL
    /// and MySQL count parameters in 16 bits.
    pub fn max_bind_params(&self) -> usize {
        match self.kind {
            DialectKind::PostgreSql | DialectKind::MySql => 65_535,
            DialectKind::Sqlite => 999,
        }
    }

    /// Rewrite `?` placeholders into this backend's style
    pub fn render(&self, sql: &str) -> String {
        match self.placeholder_style() {
            PlaceholderStyle::Question => sql.to_string(),
            PlaceholderStyle::Dollar => {
                let mut out = String::with_capacity(sql.len() + 8);
                let mut n = 0;
                for c in sql.chars() {
                    if c == '?' {
                        n += 1;
                        out.push_str(&format!("${}", n));
                    } else {
                        out.push(c);
                    }
                }
                out
            }
        }
    }

    /// Database server clock as epoch milliseconds
    pub fn now_millis_sql(&self) -> &'static str {
        match self.kind {
            DialectKind::PostgreSql => "CAST(EXTRACT(EPOCH FROM CURRENT_TIMESTAMP) * 1000 AS BIGINT)",
            DialectKind::MySql => "CAST(UNIX_TIMESTAMP(CURRENT_TIMESTAMP(3)) * 1000 AS SIGNED)",
            DialectKind::Sqlite => "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)",
        }
    }

    /// Lock strategy for this backend. The only place skip-lock support is consulted.
    pub fn lock_plan(&self) -> LockPlan {
        let by_key = "WHERE id = ? AND version = ?";

        if self.supports_skip_lock() {
            return LockPlan {
                setup: None,
                probe: LockProbe::Select(self.render(&format!(
                    "SELECT id FROM {} {} FOR UPDATE SKIP LOCKED",
                    OUTBOX_TABLE, by_key
                ))),
            };
        }

        let select_for_update =
            self.render(&format!("SELECT id FROM {} {} FOR UPDATE", OUTBOX_TABLE, by_key));
        match self.kind {
            DialectKind::PostgreSql => LockPlan {
                setup: Some(format!(
                    "SET LOCAL lock_timeout = '{}ms'",
                    self.lock_timeout.as_millis()
                )),
                probe: LockProbe::Select(select_for_update),
            },
            // innodb_lock_wait_timeout is applied per session, see session_setup
            DialectKind::MySql => LockPlan {
                setup: None,
                probe: LockProbe::Select(select_for_update),
            },
            // Takes the database write lock (not a row lock); bounded by busy_timeout
            DialectKind::Sqlite => LockPlan {
                setup: None,
                probe: LockProbe::Touch(self.render(&format!(
                    "UPDATE {} SET version = version {}",
                    OUTBOX_TABLE, by_key
                ))),
            },
        }
    }

    /// Whether a failed statement is the lock wait running out
    pub fn is_lock_timeout(&self, err: &DatabaseError) -> bool {
        let codes: &[&str] = match self.kind {
            // lock_not_available, query_canceled
            DialectKind::PostgreSql => &["55P03", "57014"],
            // ER_LOCK_WAIT_TIMEOUT
            DialectKind::MySql => &["1205"],
            // SQLITE_BUSY family and SQLITE_LOCKED family
            DialectKind::Sqlite => &["5", "261", "517", "773", "6", "262"],
        };
        if err.code().is_some_and(|code| codes.contains(&code)) {
            return true;
        }
        match self.kind {
            DialectKind::MySql => err.message.contains("Lock wait timeout exceeded"),
            DialectKind::Sqlite => err.message.contains("database is locked"),
            DialectKind::PostgreSql => false,
        }
    }

    /// Statements run on every new connection
    pub fn session_setup(&self) -> Vec<String> {
        let millis = self.lock_timeout.as_millis();
        match self.kind {
            DialectKind::PostgreSql => vec![
                "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL READ COMMITTED"
                    .to_string(),
            ],
            DialectKind::MySql => {
                let mut setup =
                    vec!["SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED".to_string()];
                if !self.supports_skip_lock() {
                    let secs = millis.div_ceil(1000).max(1);
                    setup.push(format!("SET SESSION innodb_lock_wait_timeout = {}", secs));
                }
                setup
            }
            DialectKind::Sqlite => vec![
                "PRAGMA journal_mode = WAL".to_string(),
                format!("PRAGMA busy_timeout = {}", millis),
            ],
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.supports_skip_lock() {
            write!(f, "{} (skip locked)", self.kind)
        } else {
            write!(
                f,
                "{} (lock timeout {}ms)",
                self.kind,
                self.lock_timeout.as_millis()
            )
        }
    }
}

impl FromStr for Dialect {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "postgresql9" => Ok(Dialect::POSTGRESQL_9),
            "mysql" | "mysql8" => Ok(Dialect::MYSQL_8),
            "mysql5" => Ok(Dialect::MYSQL_5),
            "sqlite" => Ok(Dialect::SQLITE),
            other => Err(OutboxError::Config(format!(
                "Unknown dialect '{}' (expected postgresql, mysql5, mysql8 or sqlite)",
                other
            ))),
        }
    }
}
