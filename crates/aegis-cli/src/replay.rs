//! Replaying recorded calls.
//!
//! A call file holds one JSON object per line:
//!
//! ```json
//! {"protocol": "rest", "client": "198.51.100.4", "raw": {"method": "POST", "path": "/v1/chat"}}
//! ```
//!
//! Blank lines are ignored. Lines that do not parse are skipped with a
//! warning and counted.

use std::io::Write;

use aegis_audit::{GatewayStats, MemoryAuditStore};
use aegis_core::Protocol;
use aegis_gateway::{Forwarder, Gateway, RawMessage};
use anyhow::Context;
use serde::{Deserialize, Serialize};

/// One recorded call.
#[derive(Debug, Clone, Deserialize)]
pub struct CallRecord {
    pub protocol: String,
    #[serde(default)]
    pub client: Option<String>,
    pub raw: RawMessage,
}

/// Output line for one replayed call.
#[derive(Debug, Serialize)]
struct ReplayedCall {
    line: usize,
    request_id: String,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<RawMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Final summary line.
#[derive(Debug, Serialize)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub skipped: usize,
    pub statistics: GatewayStats,
}

/// Run every call in `calls` through `gateway` in order, writing one JSON
/// line per call and a final summary line to `out`.
pub async fn replay<F: Forwarder>(
    gateway: &Gateway<MemoryAuditStore, F>,
    calls: &str,
    out: &mut impl Write,
) -> anyhow::Result<ReplaySummary> {
    let mut replayed = 0;
    let mut skipped = 0;

    for (index, line) in calls.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let (protocol, record) = match parse_line(line) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(line = line_no, error = %err, "Skipping unreadable call");
                skipped += 1;
                continue;
            }
        };

        let response = gateway
            .handle(&protocol, record.raw, record.client.as_deref())
            .await;
        let (response_raw, error) = match gateway.adapter().format(&protocol, &response) {
            Ok(raw) => (Some(raw), None),
            Err(err) => (None, Some(err.to_string())),
        };

        let output = ReplayedCall {
            line: line_no,
            request_id: response.request_id.to_string(),
            status: response.status_code,
            response: response_raw,
            error,
        };
        writeln!(out, "{}", serde_json::to_string(&output)?)?;
        replayed += 1;
    }

    let summary = ReplaySummary {
        replayed,
        skipped,
        statistics: gateway.statistics()?,
    };
    writeln!(out, "{}", serde_json::to_string(&summary)?)?;
    tracing::info!(replayed, skipped, "Replay finished");
    Ok(summary)
}

fn parse_line(line: &str) -> anyhow::Result<(Protocol, CallRecord)> {
    let record: CallRecord = serde_json::from_str(line).context("malformed call record")?;
    let protocol = record
        .protocol
        .parse::<Protocol>()
        .with_context(|| format!("unknown protocol {:?}", record.protocol))?;
    Ok((protocol, record))
}
