//! `Shell` against the real host shell.

#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use environ_agent::{ExecPolicy, Shell, ShellRunner};
use environ_common::Outcome;

fn shell() -> Shell {
    Shell::new(ShellRunner::default(), ExecPolicy::default())
}

#[tokio::test]
async fn echo_returns_stdout() {
    assert_eq!(shell().execute("echo hi").await, Outcome::Msg("hi\n".into()));
}

#[tokio::test]
async fn stderr_output_is_an_error() {
    assert_eq!(
        shell().execute("echo oops 1>&2").await,
        Outcome::Error("oops\n".into())
    );
}

#[tokio::test]
async fn silent_nonzero_exit_is_an_error() {
    let Outcome::Error(error) = shell().execute("exit 3").await else {
        panic!("expected error");
    };
    assert!(error.contains('3'), "{error}");
}

#[tokio::test]
async fn large_output_does_not_deadlock() {
    let outcome = shell().execute("head -c 200000 /dev/zero | tr '\\0' x").await;
    let Outcome::Msg(out) = outcome else {
        panic!("expected msg");
    };
    assert_eq!(out.len(), 200_000);
}

#[tokio::test]
async fn timeout_kills_the_command() {
    let shell = Shell::new(
        ShellRunner::new(Some(Duration::from_millis(200))),
        ExecPolicy::default(),
    );
    let started = Instant::now();

    let outcome = shell.execute("sleep 10").await;

    assert!(matches!(outcome, Outcome::Error(ref e) if e.contains("timed out")), "{outcome:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn disabled_shell_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let shell = Shell::new(
        ShellRunner::default(),
        ExecPolicy {
            enabled: false,
            ..ExecPolicy::default()
        },
    );

    let outcome = shell
        .execute(&format!("touch {}", marker.display()))
        .await;

    assert_eq!(outcome, Outcome::Error("execute is disabled on this node".into()));
    assert!(!marker.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_limit_queues_commands() {
    let shell = Arc::new(Shell::new(
        ShellRunner::default(),
        ExecPolicy {
            max_concurrent: 1,
            ..ExecPolicy::default()
        },
    ));
    let started = Instant::now();

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let shell = Arc::clone(&shell);
            tokio::spawn(async move { shell.execute("sleep 0.3").await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), Outcome::Msg(String::new()));
    }

    assert!(started.elapsed() >= Duration::from_millis(850));
}
