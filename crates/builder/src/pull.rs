//! Pull progress consumption
//!
//! The runtime answers an image pull with a feed of JSON records. Pulling is
//! observability only: the feed is logged, never buffered, and a bad record
//! stops consumption without failing the build.

use futures::{Stream, StreamExt};
use k6x_errors::Error;
use serde_json::{Map, Value};
use tracing::{debug, error};

/// What happened to a single progress record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Carried a `progress` field and was dropped
    Progress,
    /// Carried a `status` field, logged with the rest as context
    Status,
    /// Neither shape, logged as is
    Other,
}

/// Tally of one pull feed
#[derive(Debug, Default, Clone)]
pub struct PullSummary {
    pub progress: usize,
    pub status: usize,
    pub other: usize,
    /// The error that stopped consumption early, if any
    pub aborted: Option<Error>,
}

impl PullSummary {
    fn count(&mut self, kind: RecordKind) {
        match kind {
            RecordKind::Progress => self.progress += 1,
            RecordKind::Status => self.status += 1,
            RecordKind::Other => self.other += 1,
        }
    }
}

/// Consume a pull feed until it ends or yields an error
pub async fn drain_pull_progress<S>(mut records: S) -> PullSummary
where
    S: Stream<Item = Result<Value, Error>> + Unpin,
{
    let mut summary = PullSummary::default();

    while let Some(record) = records.next().await {
        match record {
            Ok(record) => summary.count(log_record(record)),
            Err(err) => {
                error!(error = %err, "Error while decoding image pull output");
                summary.aborted = Some(err);
                break;
            }
        }
    }

    summary
}

/// Log one record according to its shape
pub fn log_record(record: Value) -> RecordKind {
    let mut fields = match record {
        Value::Object(fields) => fields,
        other => {
            debug!("{other}");
            return RecordKind::Other;
        }
    };

    // Presence of the key marks a progress bar, even when it is null
    if fields.contains_key("progress") {
        return RecordKind::Progress;
    }

    fields.retain(|_, value| !value.is_null());

    match fields.remove("status") {
        Some(status) => {
            fields.remove("progressDetail");
            let status = match status {
                Value::String(status) => status,
                other => other.to_string(),
            };
            log_status(&status, fields);
            RecordKind::Status
        }
        None => {
            let record = Value::Object(fields);
            debug!("{record}");
            RecordKind::Other
        }
    }
}

fn log_status(status: &str, mut fields: Map<String, Value>) {
    let id = fields.remove("id");
    let id = id.as_ref().and_then(Value::as_str).unwrap_or_default();

    if fields.is_empty() {
        debug!(id, "{status}");
    } else {
        let context = Value::Object(fields);
        debug!(id, context = %context, "{status}");
    }
}
