//! End-to-end runs of the `core-daemon` binary.

use std::io::{BufRead, BufReader, Write};
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use core_daemon::codec::{MessageCodec, RegisterCodec};

const TIMEOUT: Duration = Duration::from_secs(10);

fn write_conf(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

/// Start the daemon in the foreground and wait until the primary listener is up.
fn spawn_daemon(conf: &tempfile::NamedTempFile) -> Child {
    let mut child = Command::new(env!("CARGO_BIN_EXE_core-daemon"))
        .arg("-f")
        .arg(conf.path())
        .args(["-p", "0"])
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let stderr = child.stderr.take().unwrap();
    let (ready_tx, ready_rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stderr).lines() {
            let Ok(line) = line else { break };
            if line.contains("main server started") {
                let _ = ready_tx.send(());
            }
        }
    });
    ready_rx
        .recv_timeout(TIMEOUT)
        .expect("daemon did not report startup");
    child
}

fn wait_with_timeout(mut child: Child) -> std::process::ExitStatus {
    let deadline = std::time::Instant::now() + TIMEOUT;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if std::time::Instant::now() > deadline {
            let _ = child.kill();
            panic!("daemon did not exit");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_terminating_signals_exit_with_signal_number() {
    let conf = write_conf("[core-daemon]\nlistenaddr = 127.0.0.1\n");
    for signum in [libc::SIGHUP, libc::SIGINT, libc::SIGTERM, libc::SIGUSR1, libc::SIGUSR2] {
        let child = spawn_daemon(&conf);
        // SAFETY: signalling our own child process.
        assert_eq!(unsafe { libc::kill(child.id() as libc::pid_t, signum) }, 0);
        let status = wait_with_timeout(child);
        assert_eq!(status.code(), Some(signum), "signal {signum}");
    }
}

#[test]
fn test_execute_sends_one_register_datagram() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    server.set_read_timeout(Some(TIMEOUT)).unwrap();
    let port = server.local_addr().unwrap().port();
    let conf = write_conf("[core-daemon]\nlistenaddr = 127.0.0.1\n");

    let output = Command::new(env!("CARGO_BIN_EXE_core-daemon"))
        .arg("-f")
        .arg(conf.path())
        .args(["-p", &port.to_string(), "-e", "/tmp/session.xml"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));

    let mut buf = [0u8; 4096];
    let (len, _) = server.recv_from(&mut buf).unwrap();
    assert_eq!(
        &buf[..len],
        RegisterCodec.pack_execute("/tmp/session.xml").unwrap().as_slice()
    );
}

#[test]
fn test_port_conflict_exits_with_failure() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let conf = write_conf("[core-daemon]\nlistenaddr = 127.0.0.1\n");

    let output = Command::new(env!("CARGO_BIN_EXE_core-daemon"))
        .arg("-f")
        .arg(conf.path())
        .args(["-p", &port.to_string()])
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error starting primary server"), "{stderr}");
}

#[test]
fn test_bad_logging_flag_is_reported() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = server.local_addr().unwrap().port();
    let conf = write_conf("[core-daemon]\nlistenaddr = 127.0.0.1\nverbose = loud\n");

    let output = Command::new(env!("CARGO_BIN_EXE_core-daemon"))
        .arg("-f")
        .arg(conf.path())
        .args(["-p", &port.to_string(), "-e", "/tmp/session.xml"])
        .env_remove("RUST_LOG")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("using default for option"), "{stderr}");
    assert!(stderr.contains("loud"), "{stderr}");
}

fn poll<T>(what: &str, mut probe: impl FnMut() -> Option<T>) -> T {
    let deadline = std::time::Instant::now() + TIMEOUT;
    loop {
        if let Some(value) = probe() {
            return value;
        }
        if std::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn read_pid(path: &Path) -> libc::pid_t {
    poll("pidfile", || {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    })
}

fn wait_for_log(path: &Path, needle: &str) {
    poll(needle, || {
        std::fs::read_to_string(path)
            .ok()
            .filter(|log| log.contains(needle))
    });
}

fn is_alive(pid: libc::pid_t) -> bool {
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Detach with the given log/pid arguments, run from `cwd`.
fn start_detached(cwd: &Path, logfile: &Path, pidfile: &Path) {
    let conf = write_conf("[core-daemon]\nlistenaddr = 127.0.0.1\n");
    let status = Command::new(env!("CARGO_BIN_EXE_core-daemon"))
        .current_dir(cwd)
        .arg("-f")
        .arg(conf.path())
        .args(["-p", "0", "-d"])
        .arg("-l")
        .arg(logfile)
        .arg("-i")
        .arg(pidfile)
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    // The foreground process exits as soon as the daemon is forked off.
    assert_eq!(status.code(), Some(0));
}

/// Rotate the log under the daemon, then stop it; checks every step.
fn rotate_and_terminate(log: &Path, pidfile: &Path) {
    let pid = read_pid(pidfile);
    wait_for_log(log, "main server started");

    let rotated = PathBuf::from(format!("{}.1", log.display()));
    std::fs::rename(log, &rotated).unwrap();
    // SAFETY: signalling the daemon this test started.
    assert_eq!(unsafe { libc::kill(pid, libc::SIGUSR1) }, 0);
    wait_for_log(log, "log files reopened");
    assert!(is_alive(pid), "daemon exited on SIGUSR1");
    assert!(std::fs::read_to_string(&rotated)
        .unwrap()
        .contains("main server started"));

    // SAFETY: as above.
    assert_eq!(unsafe { libc::kill(pid, libc::SIGTERM) }, 0);
    wait_for_log(log, "status=15");
    poll("pidfile removal", || (!pidfile.exists()).then_some(()));

    let log_text = std::fs::read_to_string(log).unwrap();
    assert!(log_text.contains("terminated by signal"), "{log_text}");
}

#[test]
fn test_daemon_mode_rotates_logs_and_removes_pidfile() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("core-daemon.log");
    let pidfile = dir.path().join("core-daemon.pid");

    start_detached(dir.path(), &log, &pidfile);
    rotate_and_terminate(&log, &pidfile);
}

#[test]
fn test_daemon_mode_relative_paths_stay_in_start_directory() {
    let dir = tempfile::tempdir().unwrap();
    let log_name = Path::new("relative-core-daemon.log");
    let pid_name = Path::new("relative-core-daemon.pid");

    start_detached(dir.path(), log_name, pid_name);
    rotate_and_terminate(&dir.path().join(log_name), &dir.path().join(pid_name));
    assert!(!Path::new("/").join(log_name).exists());
}
