//! Uncore group collapsing
//!
//! Uncore events are counted per device instance, so an uncore group arrives
//! once per device with the device id as the last dotted name component:
//!
//! ```text
//! UNC_CHA_TOR_INSERTS.IA_MISS_CRD.0   49
//! UNC_CHA_TOR_OCCUPANCY.IA_MISS_CRD.0 1061494
//! UNC_CHA_TOR_INSERTS.IA_MISS_CRD.1   49
//! UNC_CHA_TOR_OCCUPANCY.IA_MISS_CRD.1 1200063
//! ```
//!
//! Metric formulas reference the device-less names, so consecutive instances
//! are merged into one group holding per-event sums:
//!
//! ```text
//! UNC_CHA_TOR_INSERTS.IA_MISS_CRD     98
//! UNC_CHA_TOR_OCCUPANCY.IA_MISS_CRD   2261557
//! ```
//!
//! Uncore events are assumed not to share a group with core events.

use pmustat_common::EventGroup;

/// Drop the trailing `.<device>` component, if any
pub fn strip_device_suffix(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(base, _)| base)
}

fn stripped_names(group: &EventGroup) -> Vec<&str> {
    let mut names: Vec<&str> = group.names().map(strip_device_suffix).collect();
    names.sort_unstable();
    names
}

/// Same events once device ids are ignored, in any order
fn is_matching_group(a: &EventGroup, b: &EventGroup) -> bool {
    a.len() == b.len() && stripped_names(a) == stripped_names(b)
}

/// Merge runs of per-device uncore groups
///
/// Non-uncore groups pass through untouched and in order. Every uncore group
/// comes out de-suffixed, even when it has no sibling to merge with.
pub fn collapse_uncore_groups(groups: Vec<EventGroup>) -> Vec<EventGroup> {
    let mut out = Vec::with_capacity(groups.len());
    let mut idx = 0;
    while idx < groups.len() {
        let first = &groups[idx];
        if !first.is_uncore() {
            out.push(first.clone());
            idx += 1;
            continue;
        }

        let mut end = idx + 1;
        while end < groups.len() && is_matching_group(first, &groups[end]) {
            end += 1;
        }

        let mut merged = EventGroup::new(first.group_id, first.percentage);
        for group in &groups[idx..end] {
            for (name, value) in group.iter() {
                merged.accumulate(strip_device_suffix(name), value);
            }
        }
        out.push(merged);
        idx = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: usize, values: &[(&str, f64)]) -> EventGroup {
        let mut group = EventGroup::new(id, 25.0);
        for (name, value) in values {
            group.insert(*name, *value);
        }
        group
    }

    #[test]
    fn test_strip_device_suffix() {
        assert_eq!(strip_device_suffix("UNC_CHA_TOR_INSERTS.IA_MISS_CRD.12"), "UNC_CHA_TOR_INSERTS.IA_MISS_CRD");
        assert_eq!(strip_device_suffix("UNC_M_CAS_COUNT"), "UNC_M_CAS_COUNT");
    }

    #[test]
    fn test_two_devices_collapse() {
        let groups = vec![
            group(0, &[("UNC_X.0", 5.0), ("UNC_Y.0", 7.0)]),
            group(1, &[("UNC_X.1", 3.0), ("UNC_Y.1", 2.0)]),
        ];

        let out = collapse_uncore_groups(groups);
        assert_eq!(out, vec![group(0, &[("UNC_X", 8.0), ("UNC_Y", 9.0)])]);
    }

    #[test]
    fn test_match_ignores_name_order() {
        let groups = vec![
            group(0, &[("UNC_X.0", 1.0), ("UNC_Y.0", 1.0)]),
            group(1, &[("UNC_Y.1", 1.0), ("UNC_X.1", 1.0)]),
        ];

        let out = collapse_uncore_groups(groups);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("UNC_X"), Some(2.0));
    }

    #[test]
    fn test_only_contiguous_matches_merge() {
        let groups = vec![
            group(0, &[("UNC_X.0", 1.0)]),
            group(1, &[("UNC_X.1", 2.0)]),
            group(2, &[("UNC_Z.0", 4.0)]),
        ];

        let out = collapse_uncore_groups(groups);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], group(0, &[("UNC_X", 3.0)]));
        assert_eq!(out[1], group(2, &[("UNC_Z", 4.0)]));
    }

    #[test]
    fn test_core_groups_pass_through() {
        let core = group(0, &[("cpu-cycles", 10.0), ("instructions", 20.0)]);
        let groups = vec![core.clone(), group(1, &[("UNC_X.0", 1.0)]), core.clone()];

        let out = collapse_uncore_groups(groups);
        assert_eq!(out, vec![core.clone(), group(1, &[("UNC_X", 1.0)]), core]);
    }

    #[test]
    fn test_different_sizes_do_not_match() {
        let groups = vec![
            group(0, &[("UNC_X.0", 1.0), ("UNC_Y.0", 1.0)]),
            group(1, &[("UNC_X.1", 1.0)]),
        ];

        assert_eq!(collapse_uncore_groups(groups).len(), 2);
    }
}
