//! Structured logging schema and field name constants for taxa.
//!
//! All crates use these names for structured `tracing` fields so that a run's
//! JSON log can be filtered by source, entity, or chunk without guessing.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Run cannot continue, or a unit of work was dropped after retries |
//! | WARN  | Recoverable issue, fallback applied (miss, shrink, skipped row) |
//! | INFO  | Lifecycle events, page and run totals |
//! | DEBUG | Decisions, chosen candidates, config choices |
//! | TRACE | Per-item iteration (index rows, individual candidates) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "engine", "db", "registry", "dump", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "resolver", "writeback", "pool", "gbif", "index"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "resolve", "write_synonyms", "match", "build"
pub const OPERATION: &str = "op";

/// Naming source id ("gbif", "dwca", ...).
pub const SOURCE: &str = "source";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Entity UUID being operated on.
pub const ENTITY_ID: &str = "entity_id";

/// Scientific name under lookup.
pub const SCIENTIFIC_NAME: &str = "scientific_name";

/// External registry key.
pub const EXTERNAL_KEY: &str = "external_key";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Items in the current chunk or window.
pub const CHUNK_SIZE: &str = "chunk_size";

/// Offset of the current page or window.
pub const OFFSET: &str = "offset";

/// Number of rows read, matched, or written.
pub const ROW_COUNT: &str = "row_count";

/// Retry attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

/// Database table affected.
pub const DB_TABLE: &str = "db_table";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// HTTP status code returned by a registry.
pub const STATUS: &str = "status";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_are_snake_case() {
        for name in [
            SUBSYSTEM,
            COMPONENT,
            OPERATION,
            SOURCE,
            ENTITY_ID,
            SCIENTIFIC_NAME,
            EXTERNAL_KEY,
            DURATION_MS,
            CHUNK_SIZE,
            OFFSET,
            ROW_COUNT,
            ATTEMPT,
            POOL_SIZE,
            POOL_IDLE,
            DB_TABLE,
            SUCCESS,
            ERROR_MSG,
            STATUS,
        ] {
            assert!(name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
