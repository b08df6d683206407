//! # Shared Frame Data Model (Collector ↔ Evaluator)
//!
//! Defines the values handed from the collection engine to whatever evaluates
//! metric formulas and renders them. The collector builds these; evaluators
//! only read them.
//!
//! ## Key Types
//!
//! - [`EventGroup`] - Counter values scheduled together for one period
//! - [`EventFrame`] - One period's groups plus timestamp and entity
//! - [`FrameEntity`] - What a frame describes: whole system, a socket or a cpu
//!
//! Enable the `serde` feature to serialize frames (the collector's JSON-lines
//! writer uses it).

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Prefix shared by all uncore (non-core, per-device) event names
///
/// Example: `UNC_CHA_TOR_INSERTS.IA_MISS_CRD.0` is the CHA #0 instance of
/// `UNC_CHA_TOR_INSERTS.IA_MISS_CRD`.
pub const UNCORE_PREFIX: &str = "UNC";

// ============================================================================
// Event Groups
// ============================================================================

/// Values for one set of counters that the hardware scheduled together
///
/// Names keep their arrival order. The uncore collapser relies on this: it
/// decides whether a group is an uncore group from its *first* event name.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventGroup {
    /// Index of the group definition this group was collected for
    pub group_id: usize,

    /// Percentage of the interval the group was actually scheduled (0-100)
    ///
    /// Below 100 means the kernel multiplexed the group with others.
    pub percentage: f64,

    /// Event name → counter value, in arrival order
    values: Vec<(String, f64)>,
}

impl EventGroup {
    /// Create an empty group
    #[must_use]
    pub fn new(group_id: usize, percentage: f64) -> Self {
        Self { group_id, percentage, values: Vec::new() }
    }

    /// Set the value for `name`, replacing an earlier value for the same name
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        if let Some(slot) = self.values.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.values.push((name, value));
        }
    }

    /// Add `value` to the value for `name`, starting from zero if absent
    pub fn accumulate(&mut self, name: &str, value: f64) {
        if let Some(slot) = self.values.iter_mut().find(|(n, _)| n == name) {
            slot.1 += value;
        } else {
            self.values.push((name.to_string(), value));
        }
    }

    /// Value recorded for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    /// First event name in arrival order
    #[must_use]
    pub fn first_name(&self) -> Option<&str> {
        self.values.first().map(|(n, _)| n.as_str())
    }

    /// Iterate event names in arrival order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    /// Iterate `(name, value)` pairs in arrival order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(n, v)| (n.as_str(), *v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether this looks like a per-device uncore group
    #[must_use]
    pub fn is_uncore(&self) -> bool {
        self.first_name().is_some_and(|n| n.starts_with(UNCORE_PREFIX))
    }
}

// ============================================================================
// Event Frames
// ============================================================================

/// The entity a frame's values describe
///
/// A frame is never attributed to both a socket and a cpu, so this is a
/// single enum rather than two optional fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", content = "id", rename_all = "lowercase"))]
pub enum FrameEntity {
    /// Whole system, or the monitored process/cgroup as a whole
    #[default]
    System,
    /// One physical package
    Socket(u32),
    /// One logical cpu
    Cpu(u32),
}

/// One sampling period's complete set of event groups
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventFrame {
    /// Seconds since the sampling tool started, as reported by the tool
    pub timestamp: f64,

    pub entity: FrameEntity,

    /// Control group the values belong to (cgroup scope only)
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub cgroup: Option<String>,

    pub groups: Vec<EventGroup>,
}

impl EventFrame {
    /// Look up an event value across all groups, first match wins
    #[must_use]
    pub fn value(&self, name: &str) -> Option<f64> {
        self.groups.iter().find_map(|g| g.get(name))
    }

    #[must_use]
    pub fn socket(&self) -> Option<u32> {
        match self.entity {
            FrameEntity::Socket(id) => Some(id),
            _ => None,
        }
    }

    #[must_use]
    pub fn cpu(&self) -> Option<u32> {
        match self.entity {
            FrameEntity::Cpu(id) => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_arrival_order() {
        let mut group = EventGroup::new(0, 100.0);
        group.insert("b", 1.0);
        group.insert("a", 2.0);
        group.insert("b", 3.0);

        let names: Vec<&str> = group.names().collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(group.get("b"), Some(3.0));
    }

    #[test]
    fn test_accumulate_sums() {
        let mut group = EventGroup::new(2, 50.0);
        group.accumulate("UNC_X", 5.0);
        group.accumulate("UNC_X", 3.0);
        assert_eq!(group.get("UNC_X"), Some(8.0));
        assert!(group.is_uncore());
    }

    #[test]
    fn test_frame_entity_accessors() {
        let frame = EventFrame { entity: FrameEntity::Socket(1), ..EventFrame::default() };
        assert_eq!(frame.socket(), Some(1));
        assert_eq!(frame.cpu(), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_frame_serializes_entity_tag() {
        let frame = EventFrame { entity: FrameEntity::Cpu(3), ..EventFrame::default() };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["entity"]["kind"], "cpu");
        assert_eq!(json["entity"]["id"], 3);
        assert!(json.get("cgroup").is_none());
    }
}
