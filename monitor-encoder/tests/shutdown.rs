//! Process-level shutdown of the service binary.

#![cfg(unix)]

use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

#[test]
fn interrupt_exits_while_stdin_is_open() {
    let root = tempfile::tempdir().unwrap();
    let dir = |name: &str| {
        let path = root.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        path
    };
    let (monitor, work, output, logs) = (dir("monitor"), dir("work"), dir("output"), dir("logs"));

    let mut child = Command::new(env!("CARGO_BIN_EXE_monitor-encoder"))
        .current_dir(root.path())
        .arg("--skip-tool-check")
        .args(["--port", "0"])
        .arg("--monitor-dir")
        .arg(&monitor)
        .arg("--work-dir")
        .arg(&work)
        .arg("--output-dir")
        .arg(&output)
        .arg("--log-dir")
        .arg(&logs)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    // Held until the end of the test so the console never sees EOF.
    let _stdin = child.stdin.take().unwrap();

    let stdout = child.stdout.take().unwrap();
    let (ready_tx, ready_rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else { break };
            if line.contains("Job pipeline running") {
                let _ = ready_tx.send(());
            }
        }
    });

    if ready_rx.recv_timeout(Duration::from_secs(15)).is_err() {
        let _ = child.kill();
        panic!("service did not start");
    }
    std::thread::sleep(Duration::from_millis(500));

    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            assert!(status.success(), "exited with {status}");
            break;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            let _ = child.wait();
            panic!("service kept running after SIGINT");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
