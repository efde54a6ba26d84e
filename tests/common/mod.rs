use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use toolmux::config::ServerConfig;
use toolmux::mcp::ClientOptions;

/// Returns the path to the `mcp_test_server` binary.
///
/// Cargo sets `CARGO_BIN_EXE_mcp_test_server` automatically when running
/// integration tests in the same package. Falls back to searching in the
/// `target/debug` directory for convenience during manual testing.
#[allow(dead_code)]
pub fn test_server_exe() -> PathBuf {
    if let Some(p) = option_env!("CARGO_BIN_EXE_mcp_test_server") {
        return PathBuf::from(p);
    }

    if let Ok(manifest) = std::env::var("CARGO_MANIFEST_DIR") {
        let debug = PathBuf::from(manifest)
            .join("target")
            .join("debug")
            .join("mcp_test_server");
        if debug.exists() {
            return debug;
        }
    }

    PathBuf::from("mcp_test_server")
}

/// Server entry launching the test server, reporting itself as `name`.
#[allow(dead_code)]
pub fn test_server(name: &str) -> ServerConfig {
    ServerConfig::new(test_server_exe().to_string_lossy()).with_env("MCP_TEST_SERVER_NAME", name)
}

/// Client options tuned for fast tests.
#[allow(dead_code)]
pub fn fast_options() -> ClientOptions {
    ClientOptions::default()
        .with_startup_delay(Duration::from_millis(10))
        .with_request_timeout(Duration::from_secs(10))
        .with_init_timeout(Duration::from_secs(10))
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
