//! CameraDiscovery - Local and network camera enumeration
//!
//! ## Responsibilities
//!
//! - Local enumeration: probe device indices 0..K through the capture
//!   backend, capturing one frame with a short deadline
//! - Network discovery: bounded-fanout TCP probes across a subnet, then
//!   ONVIF/RTSP introspection on responding hosts
//! - Per-target failures are swallowed; a run fails only when the global
//!   deadline fires

mod probes;

pub use probes::OnvifDeviceInfo;

use crate::capture::CaptureBackend;
use crate::config::{CameraDescriptor, DiscoverySettings, SourceKind};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One discovered source; transient, produced per run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredCamera {
    pub id: Uuid,
    pub kind: String,
    /// Device index or stream/endpoint URL
    pub locator: String,
    pub reachable: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub open_ports: Vec<u16>,
    pub discovered_at: DateTime<Utc>,
}

/// Result of a capability probe on one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbedCapabilities {
    pub reachable: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
}

/// CameraDiscovery service
pub struct CameraDiscovery {
    backend: Arc<dyn CaptureBackend>,
}

impl CameraDiscovery {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self { backend }
    }

    /// Capability probe: open a brief test session on the descriptor's
    /// source, read one frame, and report what worked. Never errors; an
    /// unreachable source reports `reachable: false`.
    pub async fn probe(
        &self,
        descriptor: &CameraDescriptor,
        deadline: Duration,
    ) -> ProbedCapabilities {
        let attempt = tokio::time::timeout(deadline, async {
            let mut session = self.backend.open(descriptor).await?;
            let frame = session.read(deadline).await;
            let dims = session.dimensions();
            session.close().await;
            frame.map(|_| dims)
        })
        .await;

        match attempt {
            Ok(Ok((width, height))) => ProbedCapabilities {
                reachable: true,
                width: Some(width),
                height: Some(height),
                fps: Some(descriptor.fps),
            },
            Ok(Err(e)) => {
                tracing::debug!(camera_id = %descriptor.id, error = %e, "Capability probe failed");
                ProbedCapabilities {
                    reachable: false,
                    width: None,
                    height: None,
                    fps: None,
                }
            }
            Err(_) => ProbedCapabilities {
                reachable: false,
                width: None,
                height: None,
                fps: None,
            },
        }
    }

    /// Run one discovery pass: local devices, then the network sweep.
    /// Cancellable mid-flight; `Error::DiscoveryTimeout` only when the
    /// global deadline fires.
    pub async fn run(
        &self,
        settings: &DiscoverySettings,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredCamera>> {
        let deadline = Duration::from_secs(settings.global_timeout_secs);
        let sweep = async {
            let mut found = self.discover_local(settings, cancel).await;
            found.extend(self.discover_network(settings, cancel).await);
            found
        };

        tokio::select! {
            result = tokio::time::timeout(deadline, sweep) => {
                result.map_err(|_| Error::DiscoveryTimeout)
            }
            _ = cancel.cancelled() => {
                tracing::info!("Discovery cancelled");
                Ok(Vec::new())
            }
        }
    }

    /// Probe local device indices 0..K by opening each and reading one frame
    async fn discover_local(
        &self,
        settings: &DiscoverySettings,
        cancel: &CancellationToken,
    ) -> Vec<DiscoveredCamera> {
        let probe_timeout = Duration::from_millis(settings.probe_timeout_ms.max(1000));
        let mut found = Vec::new();

        for index in 0..settings.local_device_count {
            if cancel.is_cancelled() {
                break;
            }

            let kind = if index == 0 { "builtin" } else { "usb" };
            let mut descriptor = CameraDescriptor::usb(&format!("probe-{index}"), index);
            if index == 0 {
                descriptor.source = SourceKind::Builtin { index };
            }

            let result = tokio::time::timeout(probe_timeout, async {
                let mut session = self.backend.open(&descriptor).await?;
                let frame = session.read(probe_timeout).await;
                let dims = session.dimensions();
                session.close().await;
                frame.map(|_| dims)
            })
            .await;

            match result {
                Ok(Ok((width, height))) => {
                    tracing::info!(index, kind, width, height, "Local device detected");
                    found.push(DiscoveredCamera {
                        id: Uuid::new_v4(),
                        kind: kind.to_string(),
                        locator: index.to_string(),
                        reachable: true,
                        width: Some(width),
                        height: Some(height),
                        fps: Some(descriptor.fps),
                        manufacturer: None,
                        model: None,
                        open_ports: Vec::new(),
                        discovered_at: Utc::now(),
                    });
                }
                Ok(Err(e)) => {
                    tracing::debug!(index, error = %e, "Local device probe failed");
                }
                Err(_) => {
                    tracing::debug!(index, "Local device probe timed out");
                }
            }
        }

        found
    }

    /// Sweep the configured subnet with bounded concurrency
    async fn discover_network(
        &self,
        settings: &DiscoverySettings,
        cancel: &CancellationToken,
    ) -> Vec<DiscoveredCamera> {
        let subnet = match &settings.subnet {
            Some(cidr) => cidr.clone(),
            None => match primary_subnet().await {
                Some(cidr) => cidr,
                None => {
                    tracing::warn!("No primary interface subnet; skipping network discovery");
                    return Vec::new();
                }
            },
        };

        let targets = match parse_cidr(&subnet) {
            Ok(ips) => ips,
            Err(e) => {
                tracing::warn!(subnet = %subnet, error = %e, "Failed to parse discovery subnet");
                return Vec::new();
            }
        };

        tracing::info!(
            subnet = %subnet,
            targets = targets.len(),
            ports = ?settings.ports,
            "Network discovery started"
        );

        let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        let timeout_ms = settings.probe_timeout_ms;
        let ports = settings.ports.clone();
        let mut handles = Vec::new();

        for ip in targets {
            if cancel.is_cancelled() {
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let ports = ports.clone();
            let handle = tokio::spawn(async move {
                let result = probe_host(ip, &ports, timeout_ms).await;
                drop(permit);
                result
            });
            handles.push(handle);
        }

        let mut found = Vec::new();
        for handle in handles {
            if let Ok(Some(camera)) = handle.await {
                found.push(camera);
            }
        }

        tracing::info!(cameras_found = found.len(), "Network discovery complete");
        found
    }
}

/// Probe one host: port scan, then ONVIF and RTSP introspection
async fn probe_host(ip: IpAddr, ports: &[u16], timeout_ms: u64) -> Option<DiscoveredCamera> {
    let mut open_ports = Vec::new();
    for &port in ports {
        if probes::scan_port(ip, port, timeout_ms).await {
            open_ports.push(port);
        }
    }
    if open_ports.is_empty() {
        return None;
    }

    let onvif = probes::probe_onvif(ip, timeout_ms).await;
    let mut rtsp_uri = None;
    for &port in &[554u16, 8554] {
        if open_ports.contains(&port) {
            if let Some(uri) = probes::probe_rtsp(ip, port, timeout_ms).await {
                rtsp_uri = Some(uri);
                break;
            }
        }
    }

    // A responding host only counts as a camera with ONVIF or RTSP evidence
    if onvif.is_none() && rtsp_uri.is_none() {
        tracing::debug!(ip = %ip, open_ports = ?open_ports, "Host has no camera protocol");
        return None;
    }

    let (kind, locator) = match (&onvif, &rtsp_uri) {
        (Some(info), _) if info.endpoint.is_some() => {
            ("onvif", info.endpoint.clone().unwrap_or_default())
        }
        (_, Some(uri)) => ("rtsp", uri.clone()),
        (Some(_), None) => ("onvif", format!("http://{ip}/onvif/device_service")),
        _ => unreachable!(),
    };

    tracing::info!(
        ip = %ip,
        kind,
        open_ports = ?open_ports,
        manufacturer = ?onvif.as_ref().and_then(|i| i.manufacturer.clone()),
        "Network camera detected"
    );

    Some(DiscoveredCamera {
        id: Uuid::new_v4(),
        kind: kind.to_string(),
        locator,
        reachable: true,
        width: None,
        height: None,
        fps: None,
        manufacturer: onvif.as_ref().and_then(|i| i.manufacturer.clone()),
        model: onvif.as_ref().and_then(|i| i.model.clone()),
        open_ports,
        discovered_at: Utc::now(),
    })
}

/// Host's primary /24, derived from the default-route local address
pub async fn primary_subnet() -> Option<String> {
    let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await.ok()?;
    // No packets are sent; connect only selects the outbound interface.
    socket.connect("8.8.8.8:80").await.ok()?;
    let local = socket.local_addr().ok()?;
    match local.ip() {
        IpAddr::V4(ip) => {
            let octets = ip.octets();
            Some(format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2]))
        }
        IpAddr::V6(_) => None,
    }
}

/// Expand CIDR notation to a host list; /24 and smaller skip network
/// and broadcast addresses
pub fn parse_cidr(cidr: &str) -> std::result::Result<Vec<IpAddr>, String> {
    if !cidr.contains('/') {
        return cidr
            .parse::<IpAddr>()
            .map(|ip| vec![ip])
            .map_err(|e| format!("Invalid IP: {e}"));
    }

    let parts: Vec<&str> = cidr.split('/').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid CIDR format: {cidr}"));
    }

    let base_ip: Ipv4Addr = parts[0].parse().map_err(|e| format!("Invalid IP: {e}"))?;
    let prefix: u8 = parts[1].parse().map_err(|e| format!("Invalid prefix: {e}"))?;

    if prefix > 32 {
        return Err(format!("Invalid prefix: {prefix} (must be 0-32)"));
    }

    let base_u32 = u32::from(base_ip);
    let mask = if prefix == 0 {
        0
    } else {
        !((1u32 << (32 - prefix)) - 1)
    };
    let network = base_u32 & mask;
    let broadcast = network | !mask;

    let start = if prefix >= 24 { network + 1 } else { network };
    let end = if prefix >= 24 { broadcast - 1 } else { broadcast };

    Ok((start..=end).map(|ip| IpAddr::V4(Ipv4Addr::from(ip))).collect())
}
