//! Network probes: TCP reachability, ONVIF introspection, RTSP OPTIONS

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Device info returned by an ONVIF GetDeviceInformation probe
#[derive(Debug, Clone, Default)]
pub struct OnvifDeviceInfo {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    /// device_service endpoint that answered
    pub endpoint: Option<String>,
}

/// TCP connect probe on one port
pub async fn scan_port(ip: IpAddr, port: u16, timeout_ms: u64) -> bool {
    let addr = SocketAddr::new(ip, port);
    matches!(
        timeout(Duration::from_millis(timeout_ms), TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// ONVIF device-service introspection.
///
/// Tries GetDeviceInformation on the common ONVIF ports; a SOAP response
/// mentioning Manufacturer/Model marks the host as an ONVIF device. The call
/// is unauthenticated; cameras requiring auth still reveal themselves
/// through the SOAP fault envelope.
pub async fn probe_onvif(ip: IpAddr, timeout_ms: u64) -> Option<OnvifDeviceInfo> {
    let ports = [80u16, 2020, 8080];
    let soap_body = r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
<s:Body><GetDeviceInformation xmlns="http://www.onvif.org/ver10/device/wsdl"/></s:Body>
</s:Envelope>"#;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms.max(200)))
        .build()
        .ok()?;

    for port in ports {
        let url = format!("http://{ip}:{port}/onvif/device_service");

        let result = client
            .post(&url)
            .header("Content-Type", "application/soap+xml")
            .body(soap_body.to_string())
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(_) => continue,
        };

        if !resp.status().is_success() {
            continue;
        }

        let body = match resp.text().await {
            Ok(b) => b,
            Err(_) => continue,
        };

        if body.contains("GetDeviceInformationResponse") || body.contains("Manufacturer") {
            return Some(OnvifDeviceInfo {
                manufacturer: extract_tag(&body, "Manufacturer"),
                model: extract_tag(&body, "Model"),
                firmware_version: extract_tag(&body, "FirmwareVersion"),
                endpoint: Some(url),
            });
        }
    }

    None
}

/// RTSP OPTIONS probe; returns the stream base URI when the server answers
pub async fn probe_rtsp(ip: IpAddr, port: u16, timeout_ms: u64) -> Option<String> {
    let addr = SocketAddr::new(ip, port);
    let timeout_dur = Duration::from_millis(timeout_ms);

    let mut stream = match timeout(timeout_dur, TcpStream::connect(addr)).await {
        Ok(Ok(s)) => s,
        _ => return None,
    };

    let options_req = format!(
        "OPTIONS rtsp://{ip}:{port} RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: facetrack/0.3\r\n\r\n"
    );

    if stream.write_all(options_req.as_bytes()).await.is_err() {
        return None;
    }

    let mut buf = [0u8; 1024];
    match timeout(timeout_dur, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            let response = String::from_utf8_lossy(&buf[..n]);
            // 200 and 401 both confirm an RTSP endpoint
            if response.contains("RTSP/1.0") {
                Some(format!("rtsp://{ip}:{port}/stream1"))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Extract the text of the first `<...:Tag>` or `<Tag>` element
fn extract_tag(body: &str, tag: &str) -> Option<String> {
    let open_plain = format!("<{tag}>");
    let start = if let Some(pos) = body.find(&open_plain) {
        pos + open_plain.len()
    } else {
        // Namespaced form: "<tds:Manufacturer>"
        let marker = format!(":{tag}>");
        let pos = body.find(&marker)?;
        pos + marker.len()
    };

    let rest = &body[start..];
    let end = rest.find('<')?;
    let value = rest[..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
