use std::fmt;

/// Storage error kinds the service layer can act on.
#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    /// Connection pool is exhausted
    PoolExhausted,
    /// Record not found
    NotFound,
    /// Unique constraint violation (e.g., duplicate idempotency key)
    UniqueConstraintViolation {
        constraint: String,
    },
    /// Query execution error
    QueryError {
        message: String,
    },
    /// Database connection error
    ConnectionError {
        message: String,
    },
    /// Configuration error
    ConfigError {
        message: String,
    },
    /// Unknown error
    Unknown {
        message: String,
    },
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub is_retryable: bool,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        let is_retryable = matches!(
            kind,
            DatabaseErrorKind::PoolExhausted | DatabaseErrorKind::ConnectionError { .. }
        );

        Self { kind, is_retryable }
    }

    pub fn not_found() -> Self {
        Self::new(DatabaseErrorKind::NotFound)
    }

    pub fn is_retryable(&self) -> bool {
        self.is_retryable
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound)
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueConstraintViolation { .. })
    }

    /// Map SQLx error to our custom error type
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::new(DatabaseErrorKind::NotFound),
            sqlx::Error::PoolTimedOut => Self::new(DatabaseErrorKind::PoolExhausted),
            sqlx::Error::PoolClosed => Self::new(DatabaseErrorKind::ConnectionError {
                message: "Connection pool is closed".to_string(),
            }),
            sqlx::Error::Configuration(msg) => Self::new(DatabaseErrorKind::ConfigError {
                message: msg.to_string(),
            }),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code();
                match code.as_deref() {
                    // Unique constraint violation (Postgres code)
                    Some("23505") => Self::new(DatabaseErrorKind::UniqueConstraintViolation {
                        constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                    }),
                    _ => Self::new(DatabaseErrorKind::QueryError {
                        message: db_err.message().to_string(),
                    }),
                }
            }
            sqlx::Error::Io(io_err) => Self::new(DatabaseErrorKind::ConnectionError {
                message: io_err.to_string(),
            }),
            _ => Self::new(DatabaseErrorKind::Unknown {
                message: error.to_string(),
            }),
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::PoolExhausted => {
                write!(f, "Database connection pool exhausted. Please try again.")
            }
            DatabaseErrorKind::NotFound => write!(f, "Record not found"),
            DatabaseErrorKind::UniqueConstraintViolation { constraint } => {
                write!(f, "A record violating constraint '{}' already exists", constraint)
            }
            DatabaseErrorKind::QueryError { message } => {
                write!(f, "Database query failed: {}", message)
            }
            DatabaseErrorKind::ConnectionError { message } => {
                write!(f, "Database connection error: {}", message)
            }
            DatabaseErrorKind::ConfigError { message } => {
                write!(f, "Database configuration error: {}", message)
            }
            DatabaseErrorKind::Unknown { message } => {
                write!(f, "Unknown database error: {}", message)
            }
        }
    }
}

impl std::error::Error for DatabaseError {}
