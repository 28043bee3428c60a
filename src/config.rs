use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,

    // Catalog
    pub catalog_db_path: String,

    // Instance provisioning
    pub port_range_start: u16,
    pub port_range_end: u16,
    /// Host advertised in connection strings.
    pub instance_host: String,
    pub postgres_image: String,
    pub container_memory_mb: u32,
    pub container_cpu_shares: u32,
    pub credential_length: usize,

    // Cache TTLs
    pub cache_default_ttl: Duration,
    pub cache_tables_ttl: Duration,
    pub cache_instance_ttl: Duration,

    // Worker pool
    pub workers: usize,
    pub workers_limit: usize,
    pub scale_interval: Duration,
    pub scale_threshold: u64,

    /// Header carrying the principal id verified upstream.
    pub principal_header: String,
}

impl Config {
    pub fn from_env() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            host: env::var("HOST")
                .ok()
                .and_then(|s| IpAddr::from_str(&s).ok())
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: parse_var("PORT", 4000),

            catalog_db_path: env::var("CATALOG_DB_PATH")
                .unwrap_or_else(|_| "/data/catalog.db".to_string()),

            port_range_start: parse_var("PORT_RANGE_START", 1100),
            port_range_end: parse_var("PORT_RANGE_END", 1200),
            instance_host: env::var("INSTANCE_HOST").unwrap_or_else(|_| local_ipv4()),
            postgres_image: env::var("POSTGRES_IMAGE")
                .unwrap_or_else(|_| "postgres:latest".to_string()),
            container_memory_mb: parse_var("CONTAINER_MEMORY_MB", 512),
            container_cpu_shares: parse_var("CONTAINER_CPU_SHARES", 1024),
            credential_length: parse_var("CREDENTIAL_LENGTH", 40),

            cache_default_ttl: Duration::from_secs(parse_var("CACHE_DEFAULT_TTL_SECS", 60)),
            cache_tables_ttl: Duration::from_secs(parse_var("CACHE_TABLES_TTL_SECS", 20)),
            cache_instance_ttl: Duration::from_secs(parse_var("CACHE_INSTANCE_TTL_SECS", 30)),

            workers: parse_var("WORKERS", cores),
            workers_limit: parse_var("WORKERS_LIMIT", cores),
            scale_interval: Duration::from_secs(parse_var("SCALE_INTERVAL_SECS", 5)),
            scale_threshold: parse_var("SCALE_THRESHOLD", 10),

            principal_header: env::var("PRINCIPAL_HEADER")
                .unwrap_or_else(|_| "x-principal-id".to_string()),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Inclusive range of host ports handed to instances.
    pub fn port_range(&self) -> std::ops::RangeInclusive<u16> {
        self.port_range_start..=self.port_range_end
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// First non-loopback IPv4 address of this host.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
fn local_ipv4() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("192.0.2.1:9")?;
            socket.local_addr()
        })
        .ok()
        .map(|addr| addr.ip())
        .filter(|ip| ip.is_ipv4() && !ip.is_loopback() && !ip.is_unspecified())
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

#[cfg(test)]
impl Config {
    /// Deterministic configuration for tests, independent of the environment.
    pub fn for_tests() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            catalog_db_path: ":memory:".to_string(),
            port_range_start: 1100,
            port_range_end: 1200,
            instance_host: "127.0.0.1".to_string(),
            postgres_image: "postgres:latest".to_string(),
            container_memory_mb: 512,
            container_cpu_shares: 1024,
            credential_length: 40,
            cache_default_ttl: Duration::from_secs(60),
            cache_tables_ttl: Duration::from_secs(20),
            cache_instance_ttl: Duration::from_secs(30),
            workers: 4,
            workers_limit: 8,
            scale_interval: Duration::from_secs(5),
            scale_threshold: 10,
            principal_header: "x-principal-id".to_string(),
        }
    }
}
