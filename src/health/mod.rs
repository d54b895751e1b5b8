// Service health checks. Each configured check yields one ServiceStatus per collection.

use std::time::Duration;

use bollard::Docker;
use bollard::query_parameters::InspectContainerOptions;
use bollard::models::{ContainerState, HealthStatusEnum};
use serde::Deserialize;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::models::{HealthState, Sample, ServiceStatus};

/// Name of the status derived from the host sample itself.
pub const HARDWARE_CHECK_NAME: &str = "hardware";

const CONTAINER_ATTEMPTS: u64 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketProtocol {
    #[default]
    Tcp,
    Udp,
}

/// A configured check, e.g. in config.toml:
///
/// ```toml
/// [[checks]]
/// kind = "http"
/// name = "forgejo"
/// url = "http://localhost:3000/api/healthz"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HealthCheck {
    /// GET `url`; 2xx is healthy. With `json_status`, the body's `status` field must match.
    Http {
        name: String,
        url: String,
        #[serde(default)]
        json_status: Option<String>,
    },
    /// Docker/Podman container healthcheck via the engine API.
    Container { name: String, container: String },
    /// Plain connect to `address` (host:port).
    Socket {
        name: String,
        address: String,
        #[serde(default)]
        protocol: SocketProtocol,
    },
}

/// Shared clients the checks run with.
pub struct Probes {
    http: reqwest::Client,
    docker: Option<Docker>,
    timeout: Duration,
}

impl Probes {
    /// Connects to the local container engine if one is reachable; container checks report
    /// `down` otherwise.
    pub fn new(check_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(check_timeout).build()?;
        let docker = match Docker::connect_with_unix_defaults() {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!(error = %e, "container engine unavailable; container checks will report down");
                None
            }
        };
        Ok(Self {
            http,
            docker,
            timeout: check_timeout,
        })
    }
}

impl HealthCheck {
    pub fn name(&self) -> &str {
        match self {
            HealthCheck::Http { name, .. }
            | HealthCheck::Container { name, .. }
            | HealthCheck::Socket { name, .. } => name,
        }
    }

    /// Runs the check. Never fails: problems become a non-healthy status.
    pub async fn check(&self, probes: &Probes, now: i64) -> ServiceStatus {
        let (status, detail) = match self {
            HealthCheck::Http {
                url, json_status, ..
            } => check_http(probes, url, json_status.as_deref()).await,
            HealthCheck::Container { container, .. } => check_container(probes, container).await,
            HealthCheck::Socket {
                address, protocol, ..
            } => check_socket(probes.timeout, address, *protocol).await,
        };
        ServiceStatus {
            name: self.name().to_string(),
            status,
            detail,
            timestamp: now,
        }
    }
}

async fn check_http(
    probes: &Probes,
    url: &str,
    json_status: Option<&str>,
) -> (HealthState, String) {
    let resp = match probes.http.get(url).send().await {
        Ok(r) => r,
        Err(e) => return (HealthState::Unhealthy, format!("HTTP check failed: {}", e)),
    };
    if !resp.status().is_success() {
        return (
            HealthState::Unhealthy,
            format!("unexpected status code: {}", resp.status().as_u16()),
        );
    }
    let Some(expected) = json_status else {
        return (HealthState::Healthy, format!("HTTP {}", resp.status().as_u16()));
    };
    match resp.json::<serde_json::Value>().await {
        Ok(body) if body.get("status").and_then(|v| v.as_str()) == Some(expected) => {
            (HealthState::Healthy, format!("status {}", expected))
        }
        Ok(_) => (
            HealthState::Unhealthy,
            format!("status field is not {:?}", expected),
        ),
        Err(e) => (HealthState::Unhealthy, format!("invalid JSON body: {}", e)),
    }
}

async fn check_container(probes: &Probes, container: &str) -> (HealthState, String) {
    let Some(docker) = probes.docker.as_ref() else {
        return (
            HealthState::Down,
            "container engine unavailable".to_string(),
        );
    };
    let mut last = (HealthState::Unhealthy, format!("{} healthcheck failed", container));
    for attempt in 0..CONTAINER_ATTEMPTS {
        let inspected = timeout(
            probes.timeout,
            docker.inspect_container(container, None::<InspectContainerOptions>),
        )
        .await;
        last = match inspected {
            Ok(Ok(info)) => classify_container(container, info.state.as_ref()),
            Ok(Err(e)) => (
                HealthState::Unhealthy,
                format!("{} inspect failed: {}", container, e),
            ),
            Err(_) => (
                HealthState::Unhealthy,
                format!("{} inspect timed out", container),
            ),
        };
        if last.0 == HealthState::Healthy || attempt + 1 == CONTAINER_ATTEMPTS {
            break;
        }
        tokio::time::sleep(Duration::from_secs(attempt)).await;
    }
    last
}

/// Healthy when the container's own healthcheck says so, or when it runs without one.
pub(crate) fn classify_container(
    container: &str,
    state: Option<&ContainerState>,
) -> (HealthState, String) {
    let Some(state) = state else {
        return (
            HealthState::Unhealthy,
            format!("{} has no state", container),
        );
    };
    if state.running != Some(true) {
        return (HealthState::Down, format!("{} is not running", container));
    }
    match state.health.as_ref().and_then(|h| h.status.as_ref()) {
        Some(HealthStatusEnum::HEALTHY) => (
            HealthState::Healthy,
            format!("{} healthcheck OK", container),
        ),
        Some(HealthStatusEnum::STARTING) => (
            HealthState::Degraded,
            format!("{} healthcheck starting", container),
        ),
        Some(HealthStatusEnum::UNHEALTHY) => (
            HealthState::Unhealthy,
            format!("{} healthcheck failed", container),
        ),
        _ => (
            HealthState::Healthy,
            format!("{} running (no healthcheck)", container),
        ),
    }
}

async fn check_socket(
    limit: Duration,
    address: &str,
    protocol: SocketProtocol,
) -> (HealthState, String) {
    let attempt = async {
        match protocol {
            SocketProtocol::Tcp => TcpStream::connect(address).await.map(|_| ()),
            SocketProtocol::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket.connect(address).await
            }
        }
    };
    match timeout(limit, attempt).await {
        Ok(Ok(())) => (HealthState::Healthy, format!("{} reachable", address)),
        Ok(Err(e)) => (
            HealthState::Unhealthy,
            format!("connection to {} failed: {}", address, e),
        ),
        Err(_) => (
            HealthState::Unhealthy,
            format!("connection to {} timed out", address),
        ),
    }
}

/// Status derived from host usage: disk first, then CPU, then RAM.
pub fn hardware_status(sample: &Sample) -> ServiceStatus {
    let (status, detail) = classify_usage(sample);
    ServiceStatus {
        name: HARDWARE_CHECK_NAME.to_string(),
        status,
        detail: detail.to_string(),
        timestamp: sample.timestamp,
    }
}

fn classify_usage(sample: &Sample) -> (HealthState, &'static str) {
    let gauges = [
        (
            sample.disk_percent,
            "Running out of disk space",
            "Disk usage is high",
        ),
        (
            sample.cpu_percent,
            "CPU usage is extremely high",
            "CPU usage is high",
        ),
        (
            sample.ram_percent,
            "RAM usage is extremely high",
            "RAM usage is high",
        ),
    ];
    for (value, critical, degraded) in gauges {
        if value > 90.0 {
            return (HealthState::Critical, critical);
        }
        if value > 70.0 {
            return (HealthState::Degraded, degraded);
        }
    }
    (HealthState::Healthy, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::Health;

    #[test]
    fn disk_outranks_cpu_and_ram() {
        let s = hardware_status(&Sample::new(1, 95.0, 95.0, 75.0));
        assert_eq!(s.status, HealthState::Degraded);
        assert_eq!(s.detail, "Disk usage is high");
        assert_eq!(s.name, HARDWARE_CHECK_NAME);
        assert_eq!(s.timestamp, 1);
    }

    #[test]
    fn cpu_then_ram_thresholds() {
        assert_eq!(
            hardware_status(&Sample::new(0, 91.0, 10.0, 10.0)).detail,
            "CPU usage is extremely high"
        );
        assert_eq!(
            hardware_status(&Sample::new(0, 10.0, 71.0, 10.0)).status,
            HealthState::Degraded
        );
        let ok = hardware_status(&Sample::new(0, 70.0, 70.0, 70.0));
        assert_eq!(ok.status, HealthState::Healthy);
        assert!(ok.detail.is_empty());
    }

    #[test]
    fn container_state_mapping() {
        let running = |status: Option<HealthStatusEnum>| ContainerState {
            running: Some(true),
            health: status.map(|s| Health {
                status: Some(s),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            classify_container("db", Some(&running(Some(HealthStatusEnum::HEALTHY)))).0,
            HealthState::Healthy
        );
        assert_eq!(
            classify_container("db", Some(&running(Some(HealthStatusEnum::UNHEALTHY)))).0,
            HealthState::Unhealthy
        );
        assert_eq!(
            classify_container("db", Some(&running(None))).0,
            HealthState::Healthy
        );
        let stopped = ContainerState {
            running: Some(false),
            ..Default::default()
        };
        assert_eq!(classify_container("db", Some(&stopped)).0, HealthState::Down);
        assert_eq!(classify_container("db", None).0, HealthState::Unhealthy);
    }

    #[test]
    fn checks_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            checks: Vec<HealthCheck>,
        }
        let w: Wrapper = toml::from_str(
            r#"
            [[checks]]
            kind = "http"
            name = "nextcloud"
            url = "http://localhost/nextcloud/status.php"
            json_status = "ok"

            [[checks]]
            kind = "container"
            name = "postgresql"
            container = "hl-postgres"

            [[checks]]
            kind = "socket"
            name = "wireguard"
            address = "10.0.0.1:51820"
            protocol = "udp"
            "#,
        )
        .unwrap();
        assert_eq!(w.checks.len(), 3);
        assert_eq!(w.checks[1].name(), "postgresql");
        assert_eq!(
            w.checks[2],
            HealthCheck::Socket {
                name: "wireguard".into(),
                address: "10.0.0.1:51820".into(),
                protocol: SocketProtocol::Udp,
            }
        );
    }

    #[tokio::test]
    async fn tcp_socket_check_reaches_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (state, _) = check_socket(Duration::from_secs(2), &addr, SocketProtocol::Tcp).await;
        assert_eq!(state, HealthState::Healthy);
    }
}
