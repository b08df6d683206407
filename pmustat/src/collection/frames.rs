//! Turns one buffered batch of perf output into event frames
//!
//! ```text
//! lines ──▶ parse_events ──▶ coalesce_events ──▶ group assembly ──▶ collapse_uncore_groups
//!            (group ids)      (per socket/cpu/     (EventGroup per     (per-device uncore
//!                              cgroup lists)        group id run)       groups merged)
//! ```

use pmustat_common::{EventFrame, EventGroup};
use serde::Serialize;
use std::sync::Arc;

use super::coalesce::{coalesce_events, EntityEvents};
use super::parser::parse_events;
use super::targets::TargetLabel;
use super::uncore::collapse_uncore_groups;
use crate::definitions::GroupDefinition;
use crate::domain::{FrameError, Granularity, Scope};
use crate::topology::Topology;

/// Everything the frame builder needs to know about a run
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub scope: Scope,
    pub granularity: Granularity,
    pub definitions: Arc<Vec<GroupDefinition>>,
    pub topology: Arc<Topology>,
}

/// Build every frame contained in one batch of lines
///
/// One frame per entity (system, socket, cpu or cgroup) that has events.
pub fn build_frames(lines: &[String], ctx: &FrameContext) -> Result<Vec<EventFrame>, FrameError> {
    let events = parse_events(lines, &ctx.definitions, ctx.scope)?;
    let lists = coalesce_events(events, ctx.scope, ctx.granularity, &ctx.topology)?;
    Ok(lists.into_iter().map(assemble_frame).collect())
}

/// Group consecutive events by group id and collapse uncore groups
fn assemble_frame(list: EntityEvents) -> EventFrame {
    let timestamp = list.events.first().map_or(0.0, |e| e.timestamp);
    let mut groups: Vec<EventGroup> = Vec::new();

    for event in list.events {
        match groups.last_mut() {
            Some(group) if group.group_id == event.group_id => {
                group.percentage = event.percentage;
                group.insert(event.name, event.value);
            }
            _ => {
                let mut group = EventGroup::new(event.group_id, event.percentage);
                group.insert(event.name, event.value);
                groups.push(group);
            }
        }
    }

    EventFrame {
        timestamp,
        entity: list.entity,
        cgroup: list.cgroup,
        groups: collapse_uncore_groups(groups),
    }
}

/// A frame as handed to consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectedFrame {
    /// Which sampling session produced the frame
    pub target: TargetLabel,
    /// Running count of frames for this target, starting at 1
    pub number: u64,
    /// Timestamp of the previous batch for this target, 0.0 for the first
    pub previous_timestamp: f64,
    pub frame: EventFrame,
}

/// Per-target frame numbering
#[derive(Debug)]
pub struct FrameAssembler {
    target: TargetLabel,
    ctx: FrameContext,
    count: u64,
    previous_timestamp: f64,
}

impl FrameAssembler {
    pub fn new(target: TargetLabel, ctx: FrameContext) -> Self {
        Self { target, ctx, count: 0, previous_timestamp: 0.0 }
    }

    pub fn target(&self) -> &TargetLabel {
        &self.target
    }

    /// Frames produced so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Build and number the frames of one batch
    pub fn assemble(&mut self, lines: &[String]) -> Result<Vec<CollectedFrame>, FrameError> {
        let frames = build_frames(lines, &self.ctx)?;
        let previous_timestamp = self.previous_timestamp;
        if let Some(first) = frames.first() {
            self.previous_timestamp = first.timestamp;
        }

        Ok(frames
            .into_iter()
            .map(|frame| {
                self.count += 1;
                CollectedFrame {
                    target: self.target.clone(),
                    number: self.count,
                    previous_timestamp,
                    frame,
                }
            })
            .collect())
    }
}
