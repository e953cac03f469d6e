use serde_json::Value;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use svcpkg::clienv::Paths;
use svcpkg::daemon::pid::is_process_running;
use svcpkg::daemon::{DaemonClient, DaemonConfig, DaemonServer, Dispatcher, Outcome, Request};
use svcpkg::settings::Timings;
use svcpkg::{ConfigStore, ErrorKind};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

fn timings() -> Timings {
    Timings {
        start_settle: Duration::from_millis(200),
        stop_poll_interval: Duration::from_millis(50),
        stop_poll_attempts: 10,
        kill_wait: Duration::from_millis(100),
        restart_pause: Duration::from_millis(20),
    }
}

struct Running {
    _tmp: tempfile::TempDir,
    paths: Paths,
    client: DaemonClient,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Running {
    async fn start() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::under(tmp.path());
        let shutdown = CancellationToken::new();
        let server = DaemonServer::new(DaemonConfig::new(paths.clone(), timings()));
        let server = tokio::spawn(server.run(shutdown.clone()));

        let client = DaemonClient::new(&paths.socket_path);
        for _ in 0..100 {
            if client.is_running().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(client.is_running().await, "daemon never answered ping");

        Self {
            _tmp: tmp,
            paths,
            client,
            shutdown,
            server,
        }
    }

    async fn send(&self, request: Request) -> Outcome {
        self.client.send(&request).await
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.server.await.unwrap().unwrap();
        assert!(!self.paths.socket_path.exists());
        assert!(!self.paths.daemon_pid_path.exists());
    }
}

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn create_request(name: &str, version: &str, files: Vec<PathBuf>) -> Request {
    Request::Create {
        name: name.into(),
        version: version.into(),
        files: files.iter().map(|f| f.display().to_string()).collect(),
        os: Some("linux".into()),
        arch: Some("x86_64".into()),
        is_service: false,
        service_executable: None,
        service_args: vec![],
    }
}

fn service_create_request(home: &Path, name: &str, version: &str) -> Request {
    let exe = write_file(
        &home.join("src").join(name),
        "serve.sh",
        "#!/bin/sh\nexec sleep 60\n",
    );
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
    Request::Create {
        name: name.into(),
        version: version.into(),
        files: vec![exe.display().to_string()],
        os: Some("linux".into()),
        arch: Some("x86_64".into()),
        is_service: true,
        service_executable: Some("serve.sh".into()),
        service_args: vec![],
    }
}

fn install_request(name: &str, version: &str) -> Request {
    Request::Install {
        name: name.into(),
        version: version.into(),
        os: Some("linux".into()),
        arch: Some("x86_64".into()),
        start_service: true,
    }
}

fn pid_of(outcome: &Outcome) -> i32 {
    outcome
        .get("pid")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("no pid in {outcome:?}")) as i32
}

#[tokio::test]
async fn create_install_list_update_over_socket() {
    let daemon = Running::start().await;
    let file = write_file(&daemon.paths.home.join("src"), "hello.txt", "hello\n");

    let created = daemon
        .send(create_request("demo", "1.0.0", vec![file]))
        .await;
    assert!(created.is_success(), "{created:?}");
    assert!(daemon
        .paths
        .repo_dir
        .join("demo-1.0.0-linux-x86_64.tar.gz")
        .exists());

    let installed = daemon.send(install_request("demo", "1.0.0")).await;
    assert!(installed.is_success(), "{installed:?}");

    let listed = daemon.send(Request::List).await;
    let packages = listed.get("packages").and_then(Value::as_array).unwrap();
    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0]["name"], "demo");
    assert_eq!(packages[0]["version"], "1.0.0");

    let update = daemon
        .send(Request::Update {
            name: "demo".into(),
            version: None,
            os: None,
            arch: None,
        })
        .await;
    assert!(update.is_info(), "{update:?}");
    assert!(update.message().contains("already up to date"));

    daemon.stop().await;
}

#[tokio::test]
async fn unknown_and_malformed_lines_get_error_responses() {
    let daemon = Running::start().await;

    for (line, expected) in [
        ("{\"command\":\"explode\"}\n", "Unknown command: explode"),
        ("this is not json\n", ""),
    ] {
        let mut stream = UnixStream::connect(&daemon.paths.socket_path).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        let mut response = String::new();
        BufReader::new(&mut stream)
            .read_line(&mut response)
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["status"], "error");
        if !expected.is_empty() {
            assert_eq!(value["message"], expected);
        }
    }

    // The listener survives bad requests.
    assert!(daemon.client.is_running().await);
    daemon.stop().await;
}

#[tokio::test]
async fn service_lifecycle_and_self_healing() {
    let daemon = Running::start().await;
    let created = daemon
        .send(service_create_request(&daemon.paths.home, "web", "1.0"))
        .await;
    assert!(created.is_success(), "{created:?}");

    let installed = daemon.send(install_request("web", "1.0")).await;
    assert!(installed.is_success(), "{installed:?}");
    let pid = pid_of(&installed);
    assert!(is_process_running(pid));

    let status = daemon
        .send(Request::ServiceStatus { name: "web".into() })
        .await;
    assert_eq!(status.get("service_status"), Some(&Value::from("running")));
    assert_eq!(pid_of(&status), pid);

    let stopped = daemon
        .send(Request::StopService { name: "web".into() })
        .await;
    assert!(stopped.is_success(), "{stopped:?}");
    let pid_file = daemon.paths.service_pid_file("web");
    assert!(!pid_file.exists());
    let status = daemon
        .send(Request::ServiceStatus { name: "web".into() })
        .await;
    assert_eq!(status.get("service_status"), Some(&Value::from("stopped")));

    // Killed behind the supervisor's back.
    let started = daemon
        .send(Request::StartService { name: "web".into() })
        .await;
    let pid = pid_of(&started);
    std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    for _ in 0..50 {
        if !is_process_running(pid) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let status = daemon
        .send(Request::ServiceStatus { name: "web".into() })
        .await;
    assert_eq!(status.get("service_status"), Some(&Value::from("stopped")));
    assert!(!pid_file.exists());

    let restarted = daemon
        .send(Request::RestartService { name: "web".into() })
        .await;
    assert!(restarted.is_success(), "{restarted:?}");
    let pid = pid_of(&restarted);

    let removed = daemon.send(Request::Uninstall { name: "web".into() }).await;
    assert!(removed.is_success(), "{removed:?}");
    for _ in 0..50 {
        if !is_process_running(pid) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!is_process_running(pid));
    let status = daemon
        .send(Request::ServiceStatus { name: "web".into() })
        .await;
    assert_eq!(status.error_kind(), Some(ErrorKind::NotAService));

    daemon.stop().await;
}

#[tokio::test]
async fn disconnected_client_does_not_abort_install() {
    let daemon = Running::start().await;
    let file = write_file(&daemon.paths.home.join("src"), "a.txt", "a");
    assert!(daemon
        .send(create_request("early", "2.0", vec![file]))
        .await
        .is_success());

    {
        let mut stream = UnixStream::connect(&daemon.paths.socket_path).await.unwrap();
        let line = install_request("early", "2.0").to_line().unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
    }

    let mut found = false;
    for _ in 0..100 {
        let listed = daemon.send(Request::List).await;
        if listed
            .get("packages")
            .and_then(Value::as_array)
            .is_some_and(|p| !p.is_empty())
        {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(found, "install never landed");

    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_installs_are_all_persisted() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = Paths::under(tmp.path());
    let dispatcher = Arc::new(Dispatcher::new(&DaemonConfig::new(
        paths.clone(),
        timings(),
    )));

    let names: Vec<String> = (0..6).map(|i| format!("pkg{i}")).collect();
    for name in &names {
        let file = write_file(&paths.home.join("src").join(name), "f.txt", name);
        let created = dispatcher
            .handle(create_request(name, "1.0", vec![file]))
            .await;
        assert!(created.is_success(), "{created:?}");
    }

    let mut tasks = Vec::new();
    for name in &names {
        let dispatcher = Arc::clone(&dispatcher);
        let line = install_request(name, "1.0").to_line().unwrap();
        tasks.push(tokio::spawn(async move { dispatcher.handle_line(&line).await }));
    }
    for task in tasks {
        let outcome = task.await.unwrap();
        assert!(outcome.is_success(), "{outcome:?}");
    }

    let doc = ConfigStore::new(&paths.config_file).load();
    for name in &names {
        assert!(doc.installed_packages.contains_key(name), "lost {name}");
    }
}
