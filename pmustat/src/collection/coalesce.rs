//! Reorganizes a parsed batch by scope and granularity
//!
//! Each returned [`EntityEvents`] becomes one frame.

use pmustat_common::FrameEntity;
use std::collections::BTreeMap;

use super::parser::Event;
use crate::domain::{CpuId, FrameError, Granularity, Scope, SocketId};
use crate::topology::Topology;

/// Events belonging to one frame
#[derive(Debug, Clone, PartialEq)]
pub struct EntityEvents {
    pub entity: FrameEntity,
    pub cgroup: Option<String>,
    pub events: Vec<Event>,
}

impl EntityEvents {
    fn system(events: Vec<Event>) -> Self {
        Self { entity: FrameEntity::System, cgroup: None, events }
    }
}

fn cpu_of(event: &Event) -> Result<CpuId, FrameError> {
    event
        .cpu
        .trim()
        .parse::<u32>()
        .map(CpuId)
        .map_err(|_| FrameError::InvalidCpu(event.cpu.clone()))
}

/// Split (and for socket granularity, sum) events into per-frame lists
///
/// Lists that end up empty are dropped. Granularity is ignored outside
/// system scope.
pub fn coalesce_events(
    events: Vec<Event>,
    scope: Scope,
    granularity: Granularity,
    topology: &Topology,
) -> Result<Vec<EntityEvents>, FrameError> {
    let lists = match (scope, granularity) {
        (Scope::System, Granularity::Socket) => by_socket(events, topology)?,
        (Scope::System, Granularity::Cpu) => by_cpu(events, topology)?,
        (Scope::Cgroup, _) => by_cgroup(events),
        (Scope::System | Scope::Process, _) => vec![EntityEvents::system(events)],
    };
    Ok(lists.into_iter().filter(|list| !list.events.is_empty()).collect())
}

/// Sum consecutive per-cpu records of the same event on the same socket
fn by_socket(events: Vec<Event>, topology: &Topology) -> Result<Vec<EntityEvents>, FrameError> {
    let mut sockets: BTreeMap<SocketId, Vec<Event>> =
        (0..topology.socket_count()).map(|s| (SocketId(s), Vec::new())).collect();

    let mut pending: Option<(SocketId, Event)> = None;
    for event in events {
        let cpu = cpu_of(&event)?;
        let socket = topology.socket_of(cpu).ok_or(FrameError::UnknownCpu(cpu))?;
        if let Some((current, sum)) = pending.as_mut() {
            if *current == socket && sum.name == event.name {
                sum.value += event.value;
                continue;
            }
        }
        if let Some((current, sum)) = pending.replace((socket, event)) {
            sockets.entry(current).or_default().push(sum);
        }
    }
    if let Some((current, sum)) = pending {
        sockets.entry(current).or_default().push(sum);
    }

    Ok(sockets
        .into_iter()
        .map(|(socket, events)| EntityEvents {
            entity: FrameEntity::Socket(socket.0),
            cgroup: None,
            events,
        })
        .collect())
}

fn by_cpu(events: Vec<Event>, topology: &Topology) -> Result<Vec<EntityEvents>, FrameError> {
    let mut cpus: Vec<Vec<Event>> = vec![Vec::new(); topology.cpu_count()];
    for event in events {
        let cpu = cpu_of(&event)?;
        let slot = cpus.get_mut(cpu.0 as usize).ok_or(FrameError::UnknownCpu(cpu))?;
        slot.push(event);
    }
    Ok(cpus
        .into_iter()
        .zip(0u32..)
        .map(|(events, cpu)| EntityEvents { entity: FrameEntity::Cpu(cpu), cgroup: None, events })
        .collect())
}

/// One list per cgroup, in order of first appearance
fn by_cgroup(events: Vec<Event>) -> Vec<EntityEvents> {
    let mut lists: Vec<EntityEvents> = Vec::new();
    for event in events {
        match lists.iter_mut().find(|l| l.cgroup.as_deref() == Some(event.cgroup.as_str())) {
            Some(list) => list.events.push(event),
            None => lists.push(EntityEvents {
                entity: FrameEntity::System,
                cgroup: Some(event.cgroup.clone()),
                events: vec![event],
            }),
        }
    }
    lists
}
