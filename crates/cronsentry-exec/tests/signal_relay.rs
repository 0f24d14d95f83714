//! Signal relay installs process-wide handlers, so it gets its own binary.
#![cfg(unix)]

use std::time::Duration;

use cronsentry_exec::{RunOptions, Supervisor};

fn options() -> RunOptions {
    let mut options = RunOptions::new("relay");
    options.monitor = false;
    options.no_stdout = true;
    options
}

#[tokio::test]
async fn termination_signals_reach_the_child_only_while_it_runs() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::new(None).with_output_dir(dir.path());

    let sender = tokio::spawn(async {
        // past the settle delay and the trap installation
        tokio::time::sleep(Duration::from_millis(600)).await;
        // SAFETY: signalling ourselves while the relay handler is installed.
        unsafe { libc::kill(libc::getpid(), libc::SIGINT) };
    });

    let code = supervisor
        .run(
            "trap 'exit 42' INT; i=0; while [ $i -lt 100 ]; do sleep 0.1; i=$((i+1)); done; exit 9",
            &options(),
        )
        .await
        .unwrap();
    sender.await.unwrap();
    assert_eq!(code, 42);

    // A signal after the child is reaped must not be forwarded to a stale
    // group. tokio's handler stays registered, so it is simply absorbed.
    let code = supervisor.run("exit 0", &options()).await.unwrap();
    assert_eq!(code, 0);
    // SAFETY: as above.
    unsafe { libc::kill(libc::getpid(), libc::SIGHUP) };
    tokio::time::sleep(Duration::from_millis(100)).await;
}
