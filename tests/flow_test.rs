// ABOUTME: Integration tests for flow control against real processes
//
// Covers the hard-fork binary switch ordering and the full path from node
// output to a paused in-process relay.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use syncgate::control::push::handle_command;
use syncgate::control::ControlledService;
use syncgate::relay::{RelayTable, TcpRelay};
use syncgate::services::{NodeOptions, NodeService};
use syncgate::supervisor::{LogOnly, ProcessSpec, ProcessSupervisor, StopStrategy};
use syncgate::sync::{
    CheckpointStore, FlowController, FlowRunner, PauseTarget, StateDirs, SyncEvent, VersionTable,
    DEFAULT_SYNC_PATTERN,
};
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Records "start <pid>" on launch and "stop <pid>" when it receives SIGTERM
const LIFECYCLE_SCRIPT: &str = r#"echo "start $$" >> "$1"
trap 'echo "stop $$" >> "$1"; exit 0' TERM
while true; do sleep 0.05; done"#;

fn lifecycle_lines(log: &Path) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(ToString::to_string)
        .collect()
}

async fn wait_for_lines(log: &Path, count: usize) -> Vec<String> {
    for _ in 0..200 {
        let lines = lifecycle_lines(log);
        if lines.len() >= count {
            return lines;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} lifecycle lines, got {:?}", lifecycle_lines(log));
}

#[tokio::test]
async fn test_hard_fork_switches_once_and_never_overlaps() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("lifecycle.log");

    // Same shell under two names, so the switch is a real binary change
    let sh_path = which::which("sh").unwrap();
    let sh_path = sh_path.to_str().unwrap().to_string();
    let versions = VersionTable::parse(&format!("0=sh,150={sh_path}")).unwrap();

    let supervisor = Arc::new(Mutex::new(ProcessSupervisor::new(
        ProcessSpec::new(
            "node",
            "sh",
            ["-c", LIFECYCLE_SCRIPT, "node", log.to_str().unwrap()],
        ),
        StopStrategy::Graceful,
        Arc::new(LogOnly),
    )));
    supervisor.lock().await.start().await.unwrap();
    wait_for_lines(&log, 1).await;

    let mut runner = FlowRunner::new(
        FlowController::new(versions),
        Arc::clone(&supervisor),
        None,
        Duration::from_millis(10),
    );

    let decision = runner
        .handle(SyncEvent { block: 50, epoch: 0 })
        .await
        .unwrap();
    assert_eq!(decision.switch_to, None);
    assert_eq!(lifecycle_lines(&log).len(), 1);

    let decision = runner
        .handle(SyncEvent { block: 150, epoch: 0 })
        .await
        .unwrap();
    assert_eq!(decision.switch_to.as_deref(), Some(sh_path.as_str()));
    assert_eq!(runner.state().current_version, sh_path);

    let decision = runner
        .handle(SyncEvent { block: 151, epoch: 0 })
        .await
        .unwrap();
    assert_eq!(decision.switch_to, None);

    let lines = wait_for_lines(&log, 3).await;
    let old_pid = lines[0].strip_prefix("start ").unwrap();
    assert_eq!(lines[1], format!("stop {old_pid}"));
    let new_pid = lines[2].strip_prefix("start ").unwrap();
    assert_ne!(old_pid, new_pid);
    assert_eq!(lines.len(), 3);

    let mut supervisor = supervisor.lock().await;
    assert_eq!(supervisor.program(), sh_path);
    assert_eq!(supervisor.pid().map(|pid| pid.to_string()).as_deref(), Some(new_pid));
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_new_epoch_in_node_output_pauses_local_relay() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(TcpRelay::new(
        RelayTable::parse("26666=127.0.0.1:26656").unwrap(),
        "127.0.0.1",
        Duration::from_secs(1),
    ));
    let store = CheckpointStore::new(dir.path().join("flow.json"));

    let node = NodeService::spawn(NodeOptions {
        name: "node".to_string(),
        args: vec![
            "-c".to_string(),
            "echo 'Block height: 10, block time: now, epoch: 0'; \
             echo 'Block height: 11, block time: now, epoch: 1'; sleep 30"
                .to_string(),
        ],
        versions: VersionTable::single("sh").unwrap(),
        sync_pattern: DEFAULT_SYNC_PATTERN.to_string(),
        state_dirs: StateDirs::new(dir.path(), "test-chain"),
        pause_target: Some(Arc::clone(&relay) as Arc<dyn PauseTarget>),
        retry_delay: Duration::from_millis(10),
        checkpoint: Some(store.clone()),
    })
    .unwrap();

    assert!(relay.status().await.can_connect);
    node.start().await.unwrap();

    let mut saved = None;
    for _ in 0..200 {
        let checkpoint = store.load().ok().flatten().filter(|c| c.epoch == 1);
        if checkpoint.is_some() && !relay.status().await.can_connect {
            saved = checkpoint;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let saved = saved.expect("relay was not paused after the epoch change");
    assert_eq!(saved.version, "sh");
    assert_eq!(node.flow_state().current_epoch, 1);

    // Resume only comes from outside
    relay.resume().await;
    assert!(relay.status().await.can_connect);

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resume_on_node_channel_reopens_relay() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(TcpRelay::new(
        RelayTable::parse("26666=127.0.0.1:26656").unwrap(),
        "127.0.0.1",
        Duration::from_secs(1),
    ));
    let node = NodeService::spawn(NodeOptions {
        name: "node".to_string(),
        args: vec!["30".to_string()],
        versions: VersionTable::single("sleep").unwrap(),
        sync_pattern: DEFAULT_SYNC_PATTERN.to_string(),
        state_dirs: StateDirs::new(dir.path(), "test-chain"),
        pause_target: Some(Arc::clone(&relay) as Arc<dyn PauseTarget>),
        retry_delay: Duration::from_millis(10),
        checkpoint: None,
    })
    .unwrap();
    let node: Arc<dyn ControlledService> = Arc::new(node);

    relay.pause().await;
    assert!(!relay.status().await.can_connect);

    handle_command(&node, r#"{"resume": true}"#).await;

    assert!(relay.status().await.can_connect);
}
