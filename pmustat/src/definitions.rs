//! Event group definitions
//!
//! An event file lists perf events one per line. A line ending in `,`
//! continues the current group, a line ending in `;` closes it. Blank lines
//! and `#` comments are ignored:
//!
//! ```text
//! # core
//! cpu-cycles,
//! instructions;
//! uncore_cha_0/event=0x35,umask=0xc80ffe01,name='UNC_CHA_TOR_INSERTS.IA_MISS_CRD.0'/,
//! uncore_cha_0/event=0x36,umask=0xc80ffe01,name='UNC_CHA_TOR_OCCUPANCY.IA_MISS_CRD.0'/;
//! ```
//!
//! Platform-specific filtering and per-device uncore expansion happen before
//! this file is written; groups are used exactly as listed.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// A single perf event as passed to `perf stat -e`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDefinition {
    /// Text passed to perf verbatim
    pub raw: String,
    /// Name perf reports the event under
    pub name: String,
}

impl EventDefinition {
    /// Parse one event (without its trailing `,` or `;`)
    ///
    /// Plain events (`cpu-cycles:k`) are their own name. Raw PMU events must
    /// carry a `name='...'` term as their last field.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            bail!("empty event definition");
        }
        let fields: Vec<&str> = raw.split(',').collect();
        if fields.len() == 1 {
            return Ok(Self { raw: raw.to_string(), name: raw.to_string() });
        }

        let name_field = fields[fields.len() - 1];
        let Some(quoted) = name_field.strip_prefix("name=") else {
            bail!("unrecognized event format, name field not found: {raw}");
        };
        let name = quoted.trim_end_matches('/').trim_matches('\'');
        if name.is_empty() {
            bail!("unrecognized event format, empty name: {raw}");
        }

        Ok(Self { raw: raw.to_string(), name: name.to_string() })
    }
}

/// Events the hardware must schedule together
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupDefinition {
    pub events: Vec<EventDefinition>,
}

impl GroupDefinition {
    pub fn new(events: Vec<EventDefinition>) -> Self {
        Self { events }
    }

    /// Build a group of plain events by name
    pub fn from_names(names: &[&str]) -> Self {
        let events = names
            .iter()
            .map(|n| EventDefinition { raw: (*n).to_string(), name: (*n).to_string() })
            .collect();
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The group as perf expects it: `{raw1,raw2,...}`
    pub fn expression(&self) -> String {
        let raws: Vec<&str> = self.events.iter().map(|e| e.raw.as_str()).collect();
        format!("{{{}}}", raws.join(","))
    }
}

/// Read event groups from a file
///
/// # Errors
/// Returns an error if the file cannot be read or contains malformed events
pub fn load_event_groups(path: &Path) -> Result<Vec<GroupDefinition>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read event file {}", path.display()))?;
    parse_event_groups(&content).with_context(|| format!("Invalid event file {}", path.display()))
}

/// Parse event groups from event file content
pub fn parse_event_groups(content: &str) -> Result<Vec<GroupDefinition>> {
    let mut groups = Vec::new();
    let mut current = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (body, ends_group) = if let Some(body) = line.strip_suffix(';') {
            (body, true)
        } else if let Some(body) = line.strip_suffix(',') {
            (body, false)
        } else {
            bail!("line {}: event must end with ',' or ';'", idx + 1);
        };
        current.push(EventDefinition::parse(body).with_context(|| format!("line {}", idx + 1))?);
        if ends_group {
            groups.push(GroupDefinition::new(std::mem::take(&mut current)));
        }
    }

    if !current.is_empty() {
        bail!("last group is not terminated with ';'");
    }
    if groups.is_empty() {
        bail!("no event groups defined");
    }
    Ok(groups)
}

/// The `-e` argument for a list of groups: `{a,b},{c,d}`
pub fn event_expression(groups: &[GroupDefinition]) -> String {
    groups.iter().map(GroupDefinition::expression).collect::<Vec<_>>().join(",")
}
