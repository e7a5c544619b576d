use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use puzzlecoop_core::SNAP_THRESHOLD_DEFAULT;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "puzzlecoop-server",
    version,
    about = "Hosts collaborative jigsaw sessions over websockets"
)]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, env = "PUZZLE_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// Max distance in pixels between piece and cell centers for a release to snap.
    #[arg(long, env = "PUZZLE_SNAP_THRESHOLD", default_value_t = SNAP_THRESHOLD_DEFAULT)]
    pub snap_threshold: f64,

    #[arg(long, env = "PUZZLE_SESSION_TTL_SECS", default_value_t = DAY_SECS)]
    pub session_ttl_secs: u64,

    #[arg(long, env = "PUZZLE_IMAGE_TTL_SECS", default_value_t = DAY_SECS)]
    pub image_ttl_secs: u64,

    /// Idle time after which a held piece lock is released.
    #[arg(long, env = "PUZZLE_LOCK_TIMEOUT_SECS", default_value_t = 30)]
    pub lock_timeout_secs: u64,

    #[arg(long, env = "PUZZLE_HEARTBEAT_SECS", default_value_t = 15)]
    pub heartbeat_secs: u64,

    #[arg(long, env = "PUZZLE_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Tracing filter directive, e.g. `info` or `puzzlecoop_server=debug`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            snap_threshold: SNAP_THRESHOLD_DEFAULT,
            session_ttl_secs: DAY_SECS,
            image_ttl_secs: DAY_SECS,
            lock_timeout_secs: 30,
            heartbeat_secs: 15,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn image_ttl(&self) -> Duration {
        Duration::from_secs(self.image_ttl_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs.max(1))
    }

    /// How often rooms look for stale locks: a quarter of the timeout, at least a second.
    pub fn lease_sweep_interval(&self) -> Duration {
        (self.lock_timeout() / 4).max(Duration::from_secs(1))
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}
