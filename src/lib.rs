pub mod config;
pub mod dispatcher;
pub mod error;
pub mod judge;
pub mod language;
pub mod routes;
pub mod sandbox;
pub mod spj_cache;
pub mod web_server;
pub mod workspace;

pub fn create_timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Host and runtime facts reported by `ping`
pub fn server_info() -> serde_json::Value {
    let cpu_core = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    serde_json::json!({
        "hostname": hostname(),
        "cpu_core": cpu_core,
        "judger_version": env!("CARGO_PKG_VERSION"),
        "time": create_timestamp(),
    })
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|e| {
            log::warn!("Failed to read hostname: {e}");
            String::from("unknown")
        })
}
