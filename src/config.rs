//! Client configuration.
//!
//! Everything is set in code; the client reads no files and no environment.

use std::time::Duration;

/// Default and maximum I/O size per READ or WRITE, before clamping to the
/// server's maxread/maxwrite.
pub const DEFAULT_CHUNK_SIZE: u32 = 1024 * 1024;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
/// Used when the server does not report lease_time.
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REMOVE_RETRIES: usize = 3;
pub const DEFAULT_READDIR_DIRCOUNT: u32 = 16 * 1024;
pub const DEFAULT_READDIR_MAXCOUNT: u32 = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// `host[:port]`, port 2049 by default.
    pub server: String,
    /// Name sent in AUTH_SYS credentials and used in the client id.
    pub machine_name: String,
    /// Path under the server root that client paths are relative to.
    pub root_path: String,
    pub uid: u32,
    pub gid: u32,
    pub chunk_size: u32,
    pub readdir_dircount: u32,
    pub readdir_maxcount: u32,
    /// Zero disables the path cache.
    pub cache_ttl: Duration,
    /// `None` renews every third of the server lease.
    pub renew_interval: Option<Duration>,
    /// How many times a recursive delete re-lists a directory that
    /// refilled before it could be removed.
    pub remove_retries: usize,
}

impl ClientConfig {
    pub fn new<S: Into<String>>(server: S) -> ClientConfig {
        let machine_name = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        ClientConfig {
            server: server.into(),
            machine_name,
            root_path: "/".to_string(),
            uid: 0,
            gid: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            readdir_dircount: DEFAULT_READDIR_DIRCOUNT,
            readdir_maxcount: DEFAULT_READDIR_MAXCOUNT,
            cache_ttl: DEFAULT_CACHE_TTL,
            renew_interval: None,
            remove_retries: DEFAULT_REMOVE_RETRIES,
        }
    }

    pub fn with_machine_name<S: Into<String>>(mut self, machine_name: S) -> ClientConfig {
        self.machine_name = machine_name.into();
        self
    }

    /// Sets the root path, normalised to a leading slash and no trailing one.
    pub fn with_root_path<S: AsRef<str>>(mut self, root_path: S) -> ClientConfig {
        self.root_path =
            format!("/{}", root_path.as_ref().trim_end_matches('/').trim_start_matches('/'));
        self
    }

    pub fn with_credentials(mut self, uid: u32, gid: u32) -> ClientConfig {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Values of zero are raised to one byte.
    pub fn with_chunk_size(mut self, chunk_size: u32) -> ClientConfig {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_readdir_limits(mut self, dircount: u32, maxcount: u32) -> ClientConfig {
        self.readdir_dircount = dircount;
        self.readdir_maxcount = maxcount;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> ClientConfig {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> ClientConfig {
        self.renew_interval = Some(interval);
        self
    }

    pub fn with_remove_retries(mut self, retries: usize) -> ClientConfig {
        self.remove_retries = retries;
        self
    }

    /// Renewal period for a server lease of `lease_time` seconds.
    pub fn renew_interval_for(&self, lease_time: Option<u32>) -> Duration {
        match (self.renew_interval, lease_time) {
            (Some(interval), _) => interval,
            (None, Some(lease)) if lease > 0 => Duration::from_secs(u64::from(lease)) / 3,
            _ => DEFAULT_RENEW_INTERVAL,
        }
    }
}
