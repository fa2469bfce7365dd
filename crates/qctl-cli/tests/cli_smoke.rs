use assert_cmd::Command;
use std::io::Write;

/// `qctl` with a fixed set of simulated devices and a clean environment.
fn qctl() -> Command {
    let mut cmd = Command::cargo_bin("qctl").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("QCTL_CONFIG")
        .env_remove("QCTL_PLATFORM")
        .env("QCTL_PROBE_HOST", "0")
        .env("QCTL_FAKE_DEVICES", "opencl:cpu*2,opencl:gpu,level_zero:gpu");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let out = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(out).unwrap()
}

#[test]
fn help_works() {
    qctl().arg("--help").assert().success();
}

#[test]
fn version_works() {
    qctl().arg("--version").assert().success();
}

#[test]
fn help_mentions_core_subcommands() {
    let s = stdout_of(qctl().arg("--help"));
    for needle in ["devices", "info", "current", "dump", "--json", "--config"] {
        assert!(s.contains(needle), "help missing `{needle}`");
    }
}

#[test]
fn invalid_command_fails() {
    qctl().arg("nonexistent-command").assert().failure();
}

#[test]
fn devices_lists_every_category() {
    let s = stdout_of(qctl().arg("devices"));
    assert!(s.contains("opencl:cpu"), "{s}");
    assert!(s.contains("opencl:gpu"), "{s}");
    assert!(s.contains("level_zero:gpu"), "{s}");
    assert!(!s.contains("host:host"), "{s}");
}

#[test]
fn devices_json_filters_by_backend_and_type() {
    let s = stdout_of(qctl().args(["devices", "--backend", "opencl", "--type", "gpu", "--json"]));
    let devices: serde_json::Value = serde_json::from_str(&s).unwrap();
    let devices = devices.as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["category"]["backend"], "opencl");
    assert_eq!(devices[0]["category"]["device_type"], "gpu");
    assert_eq!(devices[0]["max_work_item_dims"], 3);
}

#[test]
fn info_prints_device_attributes() {
    let s = stdout_of(qctl().args(["info", "opencl:cpu", "--index", "1"]));
    assert!(s.contains("Max work group size"), "{s}");
    assert!(s.contains("#1"), "{s}");
}

#[test]
fn info_out_of_range_exits_not_found() {
    qctl().args(["info", "opencl:cpu", "--index", "2"]).assert().code(4);
    qctl().args(["info", "level_zero:cpu"]).assert().code(4);
}

#[test]
fn info_rejects_malformed_category() {
    qctl().args(["info", "opencl"]).assert().failure();
}

#[test]
fn current_defaults_to_the_first_cpu() {
    let s = stdout_of(qctl().args(["current", "--json"]));
    let queue: serde_json::Value = serde_json::from_str(&s).unwrap();
    assert_eq!(queue["category"]["backend"], "opencl");
    assert_eq!(queue["category"]["device_type"], "cpu");
}

#[test]
fn current_reports_the_activated_queue() {
    let s = stdout_of(qctl().args(["current", "level_zero:gpu", "--json"]));
    let queue: serde_json::Value = serde_json::from_str(&s).unwrap();
    assert_eq!(queue["category"]["backend"], "level_zero");
    assert_eq!(queue["device"]["category"]["device_type"], "gpu");
}

#[test]
fn dump_summarizes_the_runtime() {
    let s = stdout_of(qctl().arg("dump"));
    assert!(s.contains("Platform"), "{s}");
    assert!(s.contains("Activated queues            0"), "{s}");
    assert!(s.contains("Default queue"), "{s}");
}

#[test]
fn config_file_replaces_the_environment_devices() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
probe_host = false

[[devices]]
backend = "opencl"
device_type = "accelerator"
name = "Test FPGA"
"#
    )
    .unwrap();

    let s = stdout_of(
        qctl().env_remove("QCTL_FAKE_DEVICES").arg("--config").arg(file.path()).arg("devices"),
    );
    assert!(s.contains("opencl:accelerator"), "{s}");
    assert!(s.contains("Test FPGA"), "{s}");
}

#[test]
fn bad_configuration_exits_with_config_code() {
    qctl().env("QCTL_FAKE_DEVICES", "opencl:warp*2").arg("dump").assert().code(3);

    let dir = tempfile::tempdir().unwrap();
    qctl().arg("--config").arg(dir.path().join("missing.toml")).arg("dump").assert().code(3);
}

#[test]
fn config_prints_the_effective_settings() {
    let s = stdout_of(qctl().arg("config"));
    assert!(s.contains("probe_host = false"), "{s}");
    assert!(s.contains("backend = \"level_zero\""), "{s}");
    assert!(s.contains("count = 2"), "{s}");
}

#[test]
fn default_config_round_trips_through_a_file() {
    let s = stdout_of(qctl().args(["config", "--default"]));
    assert!(s.contains("platform = \"reference\""), "{s}");
    assert!(s.contains("probe_host = true"), "{s}");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(s.as_bytes()).unwrap();
    let listed = stdout_of(
        qctl()
            .env_remove("QCTL_FAKE_DEVICES")
            .env_remove("QCTL_PROBE_HOST")
            .arg("--config")
            .arg(file.path())
            .args(["devices", "--json"]),
    );
    let devices: serde_json::Value = serde_json::from_str(&listed).unwrap();
    assert_eq!(devices.as_array().unwrap().len(), 1);
    assert_eq!(devices[0]["category"]["backend"], "host");
}
