//! Collection cycles against a scripted stand-in for perf
//!
//! Each test writes a small shell script that prints perf-style JSON records
//! to stderr and points the collector at it instead of the real perf.

use anyhow::Result;
use regex::Regex;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use pmustat::collection::targets::ProcessInfo;
use pmustat::collection::{CollectedFrame, FrameContext, Orchestrator, TargetDiscovery, TargetLabel};
use pmustat::config::CollectionConfig;
use pmustat::definitions::GroupDefinition;
use pmustat::domain::{CollectionError, ConfigError, Granularity, Pid, Scope};
use pmustat::sink::FrameConsumer;
use pmustat::topology::Topology;

const RECORD: &str = r#"{"interval" : 1.0, "cpu": "", "counter-value" : "42.000000", "unit" : "", "event" : "cycles", "event-runtime" : 1000, "pcnt-running" : 100.00}"#;
const CGROUP_RECORD: &str = r#"{"interval" : 1.0, "cpu": "", "counter-value" : "7.000000", "unit" : "", "cgroup" : "/system.slice/docker-abc.scope", "event" : "cycles", "event-runtime" : 1000, "pcnt-running" : 100.00}"#;

/// Collects frames for inspection after the run
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<CollectedFrame>>>);

impl Recorder {
    fn frames(&self) -> Vec<CollectedFrame> {
        self.0.lock().unwrap().clone()
    }
}

impl FrameConsumer for Recorder {
    fn consume(&mut self, frame: &CollectedFrame) -> Result<()> {
        self.0.lock().unwrap().push(frame.clone());
        Ok(())
    }
}

/// Fixed answers in place of `/proc`
#[derive(Default)]
struct FakeDiscovery {
    processes: Vec<ProcessInfo>,
}

impl TargetDiscovery for FakeDiscovery {
    fn process(&self, pid: Pid) -> Result<Option<ProcessInfo>> {
        Ok(self.processes.iter().find(|p| p.pid == pid).cloned())
    }

    fn hot_processes(&self, count: usize, _filter: Option<&Regex>) -> Result<Vec<ProcessInfo>> {
        Ok(self.processes.iter().take(count).cloned().collect())
    }

    fn cgroup(&self, cid: &str) -> Result<String> {
        Ok(format!("/system.slice/docker-{cid}.scope"))
    }

    fn hot_cgroups(&self, _count: usize, _filter: Option<&Regex>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

fn process(pid: u32, command: &str) -> ProcessInfo {
    ProcessInfo {
        pid: Pid(pid),
        ppid: Pid(1),
        command: command.to_string(),
        cmdline: command.to_string(),
        cpu_ticks: 100,
        cgroup: None,
    }
}

fn fake_perf(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("perf");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn context(scope: Scope) -> FrameContext {
    FrameContext {
        scope,
        granularity: Granularity::System,
        definitions: Arc::new(vec![GroupDefinition::from_names(&["cycles"])]),
        topology: Arc::new(Topology::uniform(1, 1, 1).unwrap()),
    }
}

fn config(scope: Scope, perf_path: PathBuf) -> CollectionConfig {
    CollectionConfig {
        scope,
        interval: Duration::from_millis(100),
        refresh: Duration::from_millis(300),
        perf_path,
        ..CollectionConfig::default()
    }
}

#[tokio::test]
async fn test_system_scope_single_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let perf = fake_perf(
        dir.path(),
        &format!("printf '%s\\n' '{RECORD}' >&2; sleep 0.3; printf '%s\\n' '{RECORD}' >&2"),
    );

    let recorder = Recorder::default();
    let orchestrator =
        Orchestrator::new(config(Scope::System, perf), context(Scope::System), Arc::new(FakeDiscovery::default()));
    let summary = orchestrator.run(Box::new(recorder.clone()), CancellationToken::new()).await.unwrap();

    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.frames, 2);

    let frames = recorder.frames();
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| f.target == TargetLabel::System));
    assert_eq!(frames[0].number, 1);
    assert_eq!(frames[1].number, 2);
    assert_eq!(frames[0].frame.value("cycles"), Some(42.0));
}

#[tokio::test]
async fn test_failed_session_reported_after_others_finish() {
    let dir = tempfile::tempdir().unwrap();
    let perf = fake_perf(
        dir.path(),
        &format!("case \"$*\" in *\"-p 2 \"*) exit 1;; esac; printf '%s\\n' '{RECORD}' >&2"),
    );

    let mut config = config(Scope::Process, perf);
    config.pids = vec![Pid(1), Pid(2)];
    let discovery = FakeDiscovery { processes: vec![process(1, "init"), process(2, "kthreadd")] };

    let recorder = Recorder::default();
    let orchestrator = Orchestrator::new(config, context(Scope::Process), Arc::new(discovery));
    let err = orchestrator.run(Box::new(recorder.clone()), CancellationToken::new()).await.unwrap_err();

    match err.downcast_ref::<CollectionError>() {
        Some(CollectionError::Aggregate(failures)) => {
            assert_eq!(failures.len(), 1);
            assert!(matches!(failures[0], CollectionError::UnexpectedExit { .. }));
        }
        other => panic!("expected an aggregate failure, got {other:?}"),
    }

    let frames = recorder.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].target, TargetLabel::Process { pid: Pid(1), command: "init".to_string() });
}

#[tokio::test]
async fn test_discovered_targets_are_refreshed() {
    let dir = tempfile::tempdir().unwrap();
    let perf = fake_perf(dir.path(), &format!("printf '%s\\n' '{RECORD}' >&2; sleep 0.2"));

    let mut config = config(Scope::Process, perf);
    config.timeout = Some(Duration::from_millis(700));
    let discovery = FakeDiscovery { processes: vec![process(42, "busy")] };

    let recorder = Recorder::default();
    let orchestrator = Orchestrator::new(config, context(Scope::Process), Arc::new(discovery));
    let summary = orchestrator.run(Box::new(recorder.clone()), CancellationToken::new()).await.unwrap();

    assert!(summary.cycles >= 2, "only {} cycle(s)", summary.cycles);
    assert_eq!(summary.frames, u64::from(summary.cycles));
    // every cycle starts a fresh session
    assert!(recorder.frames().iter().all(|f| f.number == 1));
}

#[tokio::test]
async fn test_no_targets() {
    let dir = tempfile::tempdir().unwrap();
    let perf = fake_perf(dir.path(), "exit 0");

    let orchestrator = Orchestrator::new(
        config(Scope::Process, perf),
        context(Scope::Process),
        Arc::new(FakeDiscovery::default()),
    );
    let err = orchestrator.run(Box::new(Recorder::default()), CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.downcast_ref::<ConfigError>(), Some(&ConfigError::NoTargets));
}

#[tokio::test]
async fn test_cgroup_session_interrupted_at_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let perf = fake_perf(
        dir.path(),
        &format!(
            "emit() {{ printf '%s\\n' '{CGROUP_RECORD}' >&2; }}; trap 'emit; exit 130' INT; \
             while true; do sleep 0.05; done"
        ),
    );

    let mut config = config(Scope::Cgroup, perf);
    config.cids = vec!["abc".to_string()];
    config.timeout = Some(Duration::from_millis(300));

    let recorder = Recorder::default();
    let orchestrator =
        Orchestrator::new(config, context(Scope::Cgroup), Arc::new(FakeDiscovery::default()));
    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        orchestrator.run(Box::new(recorder.clone()), CancellationToken::new()),
    )
    .await
    .expect("cgroup session was not interrupted")
    .unwrap();

    assert_eq!(summary.cycles, 1);
    let frames = recorder.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].frame.cgroup.as_deref(), Some("/system.slice/docker-abc.scope"));
    assert_eq!(frames[0].frame.value("cycles"), Some(7.0));
}

#[tokio::test]
async fn test_cancel_ends_run() {
    let dir = tempfile::tempdir().unwrap();
    let perf = fake_perf(
        dir.path(),
        &format!(
            "emit() {{ printf '%s\\n' '{RECORD}' >&2; }}; trap 'emit; exit 130' INT; \
             while true; do sleep 0.05; done"
        ),
    );

    let cancel = CancellationToken::new();
    let orchestrator =
        Orchestrator::new(config(Scope::System, perf), context(Scope::System), Arc::new(FakeDiscovery::default()));
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        })
    };

    let summary = tokio::time::timeout(Duration::from_secs(10), orchestrator.run(Box::new(Recorder::default()), cancel))
        .await
        .expect("run did not stop on cancel")
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.frames, 1);
}
