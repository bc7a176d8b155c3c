//! End-to-end reconciliation against a scripted driver.
//!
//! Drives refresh -> replan -> execute (dry-run) through the public
//! daemon surface and checks that the in-memory model converges on the
//! synthesized target.

use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};

use backupd::config::{Config, LocalConfig, RemoteConfig};
use backupd::daemon::{CancelToken, Daemon, execute_plan};
use backupd::logs::Logbook;
use backupd::model::{DatasetName, Policy};
use backupd::zfs::{Driver, DriverError, Shell, Zfs};

/// Answers command lines from a fixed prefix table; unmatched commands
/// fail the test. Pipeline endpoints come from a consumable script and
/// default to `true`, so transfers "succeed" without moving bytes.
struct ScriptedShell {
    label: &'static str,
    script: Vec<(String, Vec<String>)>,
    failures: Vec<(String, String)>,
    pipelines: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedShell {
    fn new(label: &'static str, script: &[(&str, &[&str])]) -> Arc<Self> {
        ScriptedShell::failing(label, script, &[])
    }

    fn failing(
        label: &'static str,
        script: &[(&str, &[&str])],
        failures: &[(&str, &str)],
    ) -> Arc<Self> {
        Arc::new(ScriptedShell {
            label,
            script: script
                .iter()
                .map(|(prefix, lines)| {
                    (
                        prefix.to_string(),
                        lines.iter().map(|line| line.to_string()).collect(),
                    )
                })
                .collect(),
            failures: failures
                .iter()
                .map(|(prefix, output)| (prefix.to_string(), output.to_string()))
                .collect(),
            pipelines: Mutex::new(Vec::new()),
        })
    }

    /// Queue an argv to stand in for the next pipeline command matching
    /// `prefix`.
    fn queue_pipeline(self: &Arc<Self>, prefix: &str, argv: &[&str]) {
        self.pipelines.lock().expect("pipeline lock").push((
            prefix.to_string(),
            argv.iter().map(|part| part.to_string()).collect(),
        ));
    }
}

impl Shell for ScriptedShell {
    fn run(&self, _logs: &Logbook, line: &str) -> Result<Vec<String>, DriverError> {
        for (prefix, output) in &self.failures {
            if line.starts_with(prefix.as_str()) {
                return Err(DriverError::Failed {
                    command: line.to_string(),
                    status: 1,
                    output: output.clone(),
                });
            }
        }
        for (prefix, lines) in &self.script {
            if line.starts_with(prefix.as_str()) {
                return Ok(lines.clone());
            }
        }
        panic!("unscripted {} command: {line}", self.label);
    }

    fn command(&self, line: &str) -> Command {
        let mut pipelines = self.pipelines.lock().expect("pipeline lock");
        if let Some(position) = pipelines
            .iter()
            .position(|(prefix, _)| line.starts_with(prefix.as_str()))
        {
            let (_, argv) = pipelines.remove(position);
            let mut cmd = Command::new(&argv[0]);
            cmd.args(&argv[1..]);
            return cmd;
        }
        Command::new("true")
    }

    fn describe(&self, line: &str) -> String {
        line.to_string()
    }
}

fn test_config(local_policy: &[(&str, u32)], remote_policy: &[(&str, u32)]) -> Config {
    let mut local = Policy::new();
    for (kind, count) in local_policy {
        local.set(*kind, *count);
    }
    let mut remote = Policy::new();
    for (kind, count) in remote_policy {
        remote.set(*kind, *count);
    }
    Config {
        local: LocalConfig {
            root: "tank".to_string(),
            policy: local,
        },
        remote: RemoteConfig {
            root: "backup/tank".to_string(),
            ssh_key: PathBuf::from("/root/.ssh/id_ed25519"),
            ssh_host: "root@backup.example.net".to_string(),
            policy: remote,
        },
        snitch_id: None,
    }
}

fn daemon_with(
    config: Config,
    local_script: &[(&str, &[&str])],
    remote_script: &[(&str, &[&str])],
) -> Daemon {
    let driver = Driver {
        local: Zfs::new("tank", ScriptedShell::new("local", local_script)),
        remote: Zfs::new("backup/tank", ScriptedShell::new("remote", remote_script)),
    };
    Daemon::with_driver(config, driver, true)
}

const LOCAL_DATASETS: (&str, &[&str]) = (
    "zfs list -H -p -t filesystem",
    &["tank\t4096\t2048"],
);
const REMOTE_DATASETS: (&str, &[&str]) = (
    "zfs list -H -p -t filesystem",
    &["backup/tank\t4096\t2048"],
);
const NO_RESUME_TOKEN: (&str, &[&str]) = ("zfs list -H -o receive_resume_token", &["-"]);

fn run_cycle(daemon: &Daemon) -> backupd::Result<()> {
    let cancel = CancelToken::new();
    daemon.refresh_all(&cancel)?;
    for name in daemon.state().names() {
        daemon.refresh_dataset(&cancel, &name)?;
        daemon.replan_dataset(&name)?;
        execute_plan(daemon, &cancel, &name)?;
    }
    Ok(())
}

#[test]
fn incremental_chain_converges_on_the_target() {
    let daemon = daemon_with(
        test_config(&[("daily", 3)], &[("daily", 3)]),
        &[
            LOCAL_DATASETS,
            (
                "zfs list -H -p -t snapshot",
                &[
                    "tank@daily-a\t1\t100",
                    "tank@daily-b\t2\t100",
                    "tank@daily-c\t3\t100",
                ],
            ),
        ],
        &[
            REMOTE_DATASETS,
            ("zfs list -H -p -t snapshot", &["backup/tank@daily-a\t1\t100"]),
            NO_RESUME_TOKEN,
        ],
    );

    run_cycle(&daemon).expect("cycle");

    let model = daemon.state();
    let ds = model.get(&DatasetName::root()).expect("root dataset");
    let target = ds.target.as_ref().expect("target");

    // executor-model coherence: the dry-run landed exactly on target
    assert_eq!(&ds.current, target);
    assert_eq!(ds.current.remote.len(), 3);
    assert!(!ds.sync_in_progress);

    // every step completed
    let plan = ds.plan.as_ref().expect("plan");
    assert_eq!(plan.len(), 2);
    for step in &plan.steps {
        assert_eq!(step.status, backupd::StepStatus::Completed);
        assert!(step.duration().is_some());
    }
}

#[test]
fn settled_dataset_needs_no_steps() {
    let daemon = daemon_with(
        test_config(&[("hourly", 2)], &[("daily", 1)]),
        &[
            LOCAL_DATASETS,
            (
                "zfs list -H -p -t snapshot",
                &[
                    "tank@hourly-a\t1\t100",
                    "tank@hourly-b\t2\t100",
                    "tank@hourly-c\t3\t100",
                ],
            ),
        ],
        &[
            REMOTE_DATASETS,
            ("zfs list -H -p -t snapshot", &["backup/tank@hourly-a\t1\t100"]),
            NO_RESUME_TOKEN,
        ],
    );

    run_cycle(&daemon).expect("cycle");

    let model = daemon.state();
    let ds = model.get(&DatasetName::root()).expect("root dataset");
    assert!(ds.plan.as_ref().expect("plan").is_empty());
    assert_eq!(ds.current.local.len(), 3);
    assert_eq!(ds.current.remote.len(), 1);
}

#[test]
fn prune_collapses_adjacent_deletions() {
    // Local keeps only the newest hourly plus anchors; b through d are
    // adjacent and must go as one range.
    let daemon = daemon_with(
        test_config(&[("hourly", 1)], &[]),
        &[
            LOCAL_DATASETS,
            (
                "zfs list -H -p -t snapshot",
                &[
                    "tank@hourly-a\t1\t100",
                    "tank@hourly-b\t2\t100",
                    "tank@hourly-c\t3\t100",
                    "tank@hourly-d\t4\t100",
                    "tank@hourly-e\t5\t100",
                ],
            ),
        ],
        &[
            REMOTE_DATASETS,
            ("zfs list -H -p -t snapshot", &["backup/tank@hourly-a\t1\t100"]),
            NO_RESUME_TOKEN,
        ],
    );

    run_cycle(&daemon).expect("cycle");

    let model = daemon.state();
    let ds = model.get(&DatasetName::root()).expect("root dataset");
    let plan = ds.plan.as_ref().expect("plan");
    assert_eq!(plan.len(), 1);
    assert_eq!(
        plan.steps[0].op.to_string(),
        "destroy local @hourly-b%hourly-d"
    );
    assert_eq!(&ds.current, ds.target.as_ref().expect("target"));
}

#[test]
fn divergent_remote_fails_the_dataset() {
    let daemon = daemon_with(
        test_config(&[], &[("daily", 2)]),
        &[
            LOCAL_DATASETS,
            ("zfs list -H -p -t snapshot", &["tank@daily-a\t1\t100"]),
        ],
        &[
            REMOTE_DATASETS,
            ("zfs list -H -p -t snapshot", &["backup/tank@daily-z\t9\t100"]),
        ],
    );

    let cancel = CancelToken::new();
    daemon.refresh_all(&cancel).expect("refresh");
    let err = daemon
        .replan_dataset(&DatasetName::root())
        .expect_err("divergence must fail");
    assert!(matches!(
        err,
        backupd::Error::Model(backupd::ModelError::NoSharedSnapshot)
    ));
}

#[test]
fn missing_remote_dataset_reads_as_empty() {
    // The remote side has never seen this dataset: its listing is empty
    // and probing the dataset fails with the driver's missing signature.
    // The planner must produce an initial transfer.
    let driver = Driver {
        local: Zfs::new(
            "tank",
            ScriptedShell::new(
                "local",
                &[
                    LOCAL_DATASETS,
                    ("zfs list -H -p -t snapshot", &["tank@daily-x\t10\t100"]),
                ],
            ),
        ),
        remote: Zfs::new(
            "backup/tank",
            ScriptedShell::failing(
                "remote",
                &[("zfs list -H -p -t filesystem", &[]), NO_RESUME_TOKEN],
                &[(
                    "zfs list -H -p -t snapshot",
                    "cannot open 'backup/tank': dataset does not exist",
                )],
            ),
        ),
    };
    let daemon = Daemon::with_driver(test_config(&[], &[("daily", 1)]), driver, true);

    let cancel = CancelToken::new();
    daemon.refresh_all(&cancel).expect("refresh");
    daemon
        .refresh_dataset(&cancel, &DatasetName::root())
        .expect("refresh dataset");
    daemon
        .replan_dataset(&DatasetName::root())
        .expect("replan");

    let model = daemon.state();
    let ds = model.get(&DatasetName::root()).expect("root dataset");
    let plan = ds.plan.as_ref().expect("plan");
    assert_eq!(plan.len(), 1);
    assert_eq!(
        plan.steps[0].op.to_string(),
        "transfer initial @daily-x (100 B)"
    );
}

#[test]
fn resume_aborts_partial_state_and_retries() {
    // A dangling resume token, and the first resume attempt dies on
    // partially-complete receive state: the executor aborts the
    // resumable, retries the resume, then re-observes and re-plans.
    let local_shell = ScriptedShell::new(
        "local",
        &[
            LOCAL_DATASETS,
            ("zfs list -H -p -t snapshot", &["tank@daily-a\t1\t100"]),
        ],
    );
    let remote_shell = ScriptedShell::new(
        "remote",
        &[
            REMOTE_DATASETS,
            ("zfs list -H -p -t snapshot", &["backup/tank@daily-a\t1\t100"]),
            ("zfs list -H -o receive_resume_token", &["1-abcdef-123"]),
            ("zfs receive -A", &[]),
        ],
    );
    remote_shell.queue_pipeline(
        "zfs receive",
        &[
            "sh",
            "-c",
            "echo 'destination contains partially-complete state' 1>&2; exit 1",
        ],
    );

    let driver = Driver {
        local: Zfs::new("tank", local_shell),
        remote: Zfs::new("backup/tank", remote_shell),
    };
    let daemon = Daemon::with_driver(
        test_config(&[("daily", 1)], &[("daily", 1)]),
        driver,
        false,
    );

    run_cycle(&daemon).expect("cycle");

    let entries = daemon.dataset_logs(&DatasetName::root()).entries();
    let lines: Vec<&str> = entries.iter().map(|entry| entry.line.as_str()).collect();
    assert!(
        lines.iter().any(|line| line.contains("aborting partially-complete receive state")),
        "expected an abort, got: {lines:#?}"
    );
    assert!(
        lines.iter().any(|line| line.contains("retrying resume")),
        "expected a retry"
    );
    assert!(
        lines.iter().any(|line| line.contains("resume complete")),
        "expected the resume to finish"
    );
}

#[test]
fn dryrun_skips_the_resume_but_notes_it() {
    let daemon = daemon_with(
        test_config(&[("daily", 1)], &[("daily", 1)]),
        &[
            LOCAL_DATASETS,
            ("zfs list -H -p -t snapshot", &["tank@daily-a\t1\t100"]),
        ],
        &[
            REMOTE_DATASETS,
            ("zfs list -H -p -t snapshot", &["backup/tank@daily-a\t1\t100"]),
            ("zfs list -H -o receive_resume_token", &["1-abcdef-123"]),
        ],
    );

    run_cycle(&daemon).expect("cycle");

    let entries = daemon.dataset_logs(&DatasetName::root()).entries();
    assert!(
        entries
            .iter()
            .any(|entry| entry.line.contains("would resume transfer")),
        "expected a dry-run resume note"
    );
}
