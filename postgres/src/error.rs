//! Mapping of sqlx errors onto the pipeline's error taxonomy.
//!
//! | sqlx error | Pipeline error |
//! |---|---|
//! | `Io` (timed out, reset, refused, aborted, broken pipe, unexpected EOF) | `Transient` |
//! | `PoolTimedOut` | `Transient` |
//! | `Database` with SQLSTATE `40001`, `40P01`, `57P01` or class `08` | `Transient` |
//! | `RowNotFound` on a lookup | `NotFound` |
//! | anything else | `Storage` (terminal) |

use snapshare_core::PipelineError;
use std::io::ErrorKind;

/// Classify a sqlx error from a write.
#[must_use]
pub fn classify(err: sqlx::Error) -> PipelineError {
    if is_transient(&err) {
        PipelineError::Transient(err.to_string())
    } else {
        PipelineError::Storage(err.to_string())
    }
}

/// Classify a sqlx error from a lookup of `entity` `id`.
#[must_use]
pub fn classify_lookup(err: sqlx::Error, entity: &'static str, id: i64) -> PipelineError {
    match err {
        sqlx::Error::RowNotFound => PipelineError::not_found(entity, id),
        other => classify(other),
    }
}

/// Whether retrying the failed statement can succeed.
#[must_use]
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(io) => is_transient_io(io.kind()),
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    }
}

const fn is_transient_io(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::TimedOut
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}

/// Serialization failure, deadlock, admin shutdown, or any connection exception.
fn is_transient_sqlstate(code: &str) -> bool {
    matches!(code, "40001" | "40P01" | "57P01") || code.starts_with("08")
}
