//! # perf stat JSON record parsing
//!
//! `perf stat -j` writes one JSON object per counter reading to stderr:
//!
//! ```text
//! {"interval" : 5.005113019, "cpu": "0", "counter-value" : "22901873.000000", "unit" : "",
//!  "cgroup" : "...1cb2de.scope", "event" : "L1D.REPLACEMENT", "event-runtime" : 80081151765,
//!  "pcnt-running" : 6.00, "metric-value" : 0.000000, "metric-unit" : "(null)"}
//! ```
//!
//! Records carry no group marker. Groups are recovered by counting distinct
//! event names against the group definitions, in the order perf was given
//! them.

use log::{debug, warn};
use serde::Deserialize;

use crate::definitions::GroupDefinition;
use crate::domain::{FrameError, Scope};

/// One record exactly as perf writes it
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub interval: f64,
    #[serde(default)]
    pub cpu: String,
    #[serde(rename = "counter-value")]
    pub counter_value: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub cgroup: String,
    pub event: String,
    #[serde(rename = "event-runtime", default)]
    pub event_runtime: u64,
    #[serde(rename = "pcnt-running", default)]
    pub pcnt_running: f64,
}

/// A decoded counter sample
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Seconds since perf started
    pub timestamp: f64,
    /// Logical cpu as reported by perf, empty when counts are aggregated
    pub cpu: String,
    /// Cgroup name, empty outside cgroup scope
    pub cgroup: String,
    /// Counter value, NaN when perf reported something that is not a number
    pub value: f64,
    /// Percentage of the interval the counter was scheduled
    pub percentage: f64,
    pub name: String,
    /// Index into the group definitions
    pub group_id: usize,
}

/// Decode a single line
///
/// A counter value that is not a number (`<not counted>`,
/// `<not supported>`) becomes NaN.
///
/// # Errors
/// Returns an error if the line is not a perf JSON record
pub fn parse_event_line(line: &str) -> Result<Event, serde_json::Error> {
    let raw: RawEvent = serde_json::from_str(line)?;
    let value = raw.counter_value.trim().parse::<f64>().unwrap_or_else(|_| {
        debug!("Failed to parse event value: {line}");
        f64::NAN
    });
    Ok(Event {
        timestamp: raw.interval,
        cpu: raw.cpu,
        cgroup: raw.cgroup,
        value,
        percentage: raw.pcnt_running,
        name: raw.event,
        group_id: 0,
    })
}

/// Decode a batch of lines and assign each event its group id
///
/// The group advances once as many distinct events have been seen as the
/// current definition holds. Running past the last definition is only legal
/// in cgroup scope, where perf repeats the whole definition list per cgroup.
/// Every batch must end on a complete definition cycle.
///
/// Lines that do not look like records are skipped. A record that is not
/// valid JSON still occupies its slot in the group count and is then dropped,
/// so the records after it keep their groups.
pub fn parse_events(
    lines: &[String],
    definitions: &[GroupDefinition],
    scope: Scope,
) -> Result<Vec<Event>, FrameError> {
    if definitions.is_empty() || definitions.iter().any(GroupDefinition::is_empty) {
        return Err(FrameError::NoDefinitions);
    }

    let mut events = Vec::with_capacity(lines.len());
    let mut group_idx = 0;
    // distinct events seen in the current group, minus one
    let mut event_idx: Option<usize> = None;
    let mut previous: Option<(String, String)> = None;

    for line in lines {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            if !trimmed.is_empty() {
                debug!("Ignoring non-record perf output: {trimmed}");
            }
            continue;
        }
        let parsed = parse_event_line(trimmed);

        let key_changed = match &parsed {
            Ok(event) => previous
                .as_ref()
                .map_or(true, |(name, cgroup)| *name != event.name || *cgroup != event.cgroup),
            Err(_) => true,
        };
        if key_changed {
            event_idx = Some(event_idx.map_or(0, |idx| idx + 1));
            previous = parsed.as_ref().ok().map(|e| (e.name.clone(), e.cgroup.clone()));
        }

        if event_idx == Some(definitions[group_idx].len()) {
            group_idx += 1;
            if group_idx == definitions.len() {
                if scope == Scope::Cgroup {
                    group_idx = 0;
                } else {
                    return Err(FrameError::GroupWrap);
                }
            }
            event_idx = Some(0);
        }

        match parsed {
            Ok(mut event) => {
                event.group_id = group_idx;
                events.push(event);
            }
            Err(e) => warn!("Dropping malformed perf record [{trimmed}] in group {group_idx}: {e}"),
        }
    }

    if let Some(event_idx) = event_idx {
        let last = definitions.len() - 1;
        let group_size = definitions[group_idx].len();
        if group_idx != last || event_idx + 1 != group_size {
            return Err(FrameError::IncompleteBatch {
                group: group_idx,
                definitions: definitions.len(),
                event: event_idx + 1,
                group_size,
            });
        }
    }

    Ok(events)
}
