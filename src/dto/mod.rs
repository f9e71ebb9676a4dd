//! Input parameters and projection types exposed to callers of the service
//! layer.

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Game views and bootstrap inputs.
pub mod game;
/// Tag views and creation inputs.
pub mod tag;

fn format_datetime(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
