//! Exit status, arguments, environment and explicit kill

mod common;

use std::path::Path;

use childvisor::{Params, Process, Reaper, Slot, State, Status};
use common::{frame, manager, read_trimmed, sh, wait_for, wait_for_contents, wait_for_handle};
use nix::sys::signal::Signal;
use tempfile::{NamedTempFile, TempDir};

fn run(params: Params) -> Status {
    let manager = manager();
    let process = manager.create(params).expect("launch failed");
    wait_for(&manager, &process);
    process.status()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn test_exit_0() {
    assert_eq!(run(sh("exit 0")), Status::exited(0));
}

#[test]
fn test_exit_2() {
    let status = run(sh("exit 2"));
    assert_eq!(status.state, State::Exited);
    assert_eq!(status.data, 2);
}

#[test]
fn test_arguments_arrive_in_order() {
    let out = NamedTempFile::new().unwrap();
    let params = sh(r#"out="$1"; shift; for arg in "$@"; do printf '%s\n' "$arg" >> "$out"; done"#)
        .arg(path_arg(out.path()))
        .arg("first arg")
        .arg("second arg")
        .arg("  spaced  \"quoted\" $dollar");

    assert_eq!(run(params), Status::exited(0));

    let output = std::fs::read_to_string(out.path()).unwrap();
    let args: Vec<&str> = output.lines().collect();
    assert_eq!(
        args,
        vec!["first arg", "second arg", "  spaced  \"quoted\" $dollar"]
    );
}

#[test]
fn test_working_directory() {
    let dir = TempDir::new().unwrap();
    let out = NamedTempFile::new().unwrap();
    let params = sh(r#"pwd -P > "$1""#)
        .arg(path_arg(out.path()))
        .cwd(dir.path());

    assert_eq!(run(params), Status::exited(0));

    let expected = dir.path().canonicalize().unwrap();
    assert_eq!(read_trimmed(out.path()), path_arg(&expected));
}

#[test]
fn test_environment_override() {
    let out = NamedTempFile::new().unwrap();
    let params = sh(r#"printf '%s' "$CHILDVISOR_TEST_VALUE" > "$1""#)
        .arg(path_arg(out.path()))
        .env("CHILDVISOR_TEST_VALUE", "from parent");

    assert_eq!(run(params), Status::exited(0));
    assert_eq!(read_trimmed(out.path()), "from parent");
}

#[test]
fn test_env_clear_drops_parent_variables() {
    let out = NamedTempFile::new().unwrap();
    let params = Params::new("/bin/sh")
        .args(["-c", r#"printf '%s' "${HOME:-unset}" > "$1""#, "sh"])
        .arg(path_arg(out.path()))
        .env_clear(true);

    assert_eq!(run(params), Status::exited(0));
    assert_eq!(read_trimmed(out.path()), "unset");
}

#[test]
fn test_explicit_kill() {
    let manager = manager();
    let out = NamedTempFile::new().unwrap();
    std::fs::write(out.path(), "not started").unwrap();

    let params = sh(r#"echo ok > "$1"; sleep 30; echo bad > "$1""#)
        .desc("kill() script")
        .arg(path_arg(out.path()));
    let process = manager.create(params).expect("couldn't launch kill() script");

    wait_for_contents(&manager, out.path(), "ok");
    process.kill().unwrap();
    // Status only changes once a tick observes the death
    assert_eq!(process.status(), Status::RUNNING);

    wait_for(&manager, &process);
    assert_eq!(process.status(), Status::killed(Signal::SIGTERM as i32));
    assert_eq!(read_trimmed(out.path()), "ok");
}

#[test]
fn test_kill_is_idempotent_after_termination() {
    let manager = manager();
    let process = manager.create(sh("sleep 30")).expect("launch failed");

    process.kill().unwrap();
    process.kill().unwrap();
    wait_for(&manager, &process);
    let status = process.status();
    assert_eq!(status.state, State::Killed);

    process.kill().unwrap();
    process.kill().unwrap();
    frame(&manager);
    assert_eq!(process.status(), status);
}

#[test]
fn test_exit_notification() {
    let manager = manager();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let process = manager
        .create(sh("exit 4").desc("notifier").on_exit(tx))
        .expect("launch failed");
    let handle = process.handle();

    wait_for(&manager, &process);

    let event = rx.try_recv().expect("no exit event");
    assert_eq!(event.handle, handle);
    assert_eq!(event.desc, "notifier");
    assert_eq!(event.status, Status::exited(4));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_status_only_changes_on_tick() {
    let manager = manager();
    let process = manager.create(sh("exit 0")).expect("launch failed");
    std::thread::sleep(std::time::Duration::from_millis(500));
    // Child is long gone, but nobody ticked
    assert!(process.is_running());
    assert!(manager.is_running(process.handle()));

    wait_for(&manager, &process);
    assert!(!process.is_running());
    assert!(!manager.is_running(process.handle()));
}

#[test]
fn test_launch_from_toml() {
    let manager = manager();
    let out = NamedTempFile::new().unwrap();
    let source = format!(
        r#"
executable = "sh"
args = ["-c", 'printf "%s" "$GREETING" > "$1"; exit 3', "sh", "{}"]
desc = "toml launcher"

[env]
GREETING = "hello from toml"

[[files]]
type = ""

[[files]]
type = "pipe"
"#,
        path_arg(out.path())
    );
    let params = Params::from_toml_str(&source).unwrap();
    let mut process = manager.create(params).expect("launch failed");
    assert_eq!(process.desc(), "toml launcher");
    assert!(process.read_pipe(Slot::STDOUT).is_ok());
    assert!(process.write_pipe(Slot::STDIN).is_err());

    wait_for(&manager, &process);
    assert_eq!(process.status(), Status::exited(3));
    assert_eq!(read_trimmed(out.path()), "hello from toml");
}

#[test]
fn test_handle_query_follows_injected_reaper() {
    let manager = manager();
    let process = manager
        .create(sh("exec sleep 30").desc("detached").autokill(false))
        .expect("launch failed");
    let handle = process.handle();
    drop(process);

    frame(&manager);
    assert!(manager.is_running(handle));
    assert!(Process::is_running_handle(handle));
    assert!(!Reaper::global().is_running(handle));

    assert!(manager.reaper().terminate(handle).unwrap());
    wait_for_handle(&manager, handle);
    assert!(!Process::is_running_handle(handle));
}
