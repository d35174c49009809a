//! Capability-gated outbound HTTP.
//!
//! Grounded on the teacher's own `is_ssrf_target` / `is_private_ip` host
//! function guards: scheme whitelist, hostname blocklist for the obvious
//! metadata endpoints, then DNS resolution with every returned address
//! checked against the private/loopback/link-local ranges before the
//! request is allowed to go out.

use async_trait::async_trait;
use futures::StreamExt;
use goru_registry::{HostContext, HostFn};
use goru_types::capability::{host_allowed, HttpLimits};
use goru_types::error::{EngineError, EngineResult};
use serde_json::{json, Value};
use std::collections::BTreeMap as ArgMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "metadata.google.internal",
    "metadata.aws.internal",
    "instance-data",
    "169.254.169.254",
];

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            matches!(
                octets,
                [10, ..] | [172, 16..=31, ..] | [192, 168, ..] | [169, 254, ..]
            )
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            (segments[0] & 0xfe00) == 0xfc00 || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

fn extract_host(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("")
        .to_string()
}

fn check_ssrf(url: &str) -> Result<(), String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err("only http:// and https:// URLs are allowed".to_string());
    }
    let hostname = extract_host(url);
    if BLOCKED_HOSTNAMES.contains(&hostname.as_str()) {
        return Err(format!("ssrf blocked: {hostname} is a restricted hostname"));
    }
    let port = if url.starts_with("https") { 443 } else { 80 };
    if let Ok(addrs) = format!("{hostname}:{port}").to_socket_addrs() {
        for addr in addrs {
            let ip = addr.ip();
            if ip.is_loopback() || ip.is_unspecified() || is_private_ip(&ip) {
                return Err(format!("ssrf blocked: {hostname} resolves to private IP {ip}"));
            }
        }
    }
    Ok(())
}

pub struct HttpRequest {
    pub allowed_hosts: Vec<String>,
    pub limits: HttpLimits,
    pub client: reqwest::Client,
}

impl HttpRequest {
    pub fn new(allowed_hosts: Vec<String>, limits: HttpLimits) -> Self {
        let client = reqwest::Client::builder()
            .timeout(limits.timeout)
            .build()
            .unwrap_or_default();
        Self {
            allowed_hosts,
            limits,
            client,
        }
    }
}

#[async_trait]
impl HostFn for HttpRequest {
    async fn call(&self, _ctx: &HostContext, args: ArgMap<String, Value>) -> EngineResult<Value> {
        if self.allowed_hosts.is_empty() {
            return Err(EngineError::CapabilityDenied("http not enabled".to_string()));
        }
        let method = args
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        if !ALLOWED_METHODS.contains(&method.as_str()) {
            return Err(EngineError::HandlerError(format!("unsupported method: {method}")));
        }
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::HandlerError("missing 'url' parameter".to_string()))?;
        tracing::debug!(method = %method, url, "http_request dispatch");
        if url.len() > self.limits.max_url_len {
            return Err(EngineError::CapabilityDenied("url too long".to_string()));
        }
        let host = extract_host(url);
        if !host_allowed(&self.allowed_hosts, &host) {
            return Err(EngineError::CapabilityDenied(format!("host not allowed: {host}")));
        }
        check_ssrf(url).map_err(EngineError::CapabilityDenied)?;

        let body = args.get("body").and_then(Value::as_str).unwrap_or("");
        if body.len() > self.limits.max_request_body {
            return Err(EngineError::CapabilityDenied("request body too large".to_string()));
        }

        let method: reqwest::Method = method
            .parse()
            .map_err(|_| EngineError::HandlerError("invalid method".to_string()))?;
        let mut builder = self.client.request(method, url);
        if let Some(headers) = args.get("headers").and_then(Value::as_object) {
            for (k, v) in headers {
                if let Some(v) = v.as_str() {
                    builder = builder.header(k.as_str(), v);
                }
            }
        }
        if !body.is_empty() {
            builder = builder.body(body.to_string());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::HandlerError(format!("http request failed: {e}")))?;
        let status = response.status().as_u16();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), Value::from(v))))
            .collect();

        let body = read_capped_body(response.bytes_stream(), self.limits.max_response_body).await?;
        let text = String::from_utf8_lossy(&body).into_owned();
        Ok(json!({"status": status, "body": text, "headers": headers}))
    }
}

/// Accumulate a byte stream up to `max_len`, erroring out as soon as the
/// cap would be exceeded rather than buffering the whole body first. This
/// is what actually stops the read at the limit, not just rejecting an
/// already-buffered oversized response.
async fn read_capped_body<E: std::fmt::Display>(
    mut stream: impl futures::Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    max_len: usize,
) -> EngineResult<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| EngineError::HandlerError(format!("failed reading response body: {e}")))?;
        if body.len() + chunk.len() > max_len {
            return Err(EngineError::CapabilityDenied("response body too large".to_string()));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_scheme() {
        assert!(check_ssrf("file:///etc/passwd").is_err());
    }

    #[test]
    fn rejects_blocked_hostname() {
        assert!(check_ssrf("http://localhost/").is_err());
        assert!(check_ssrf("http://169.254.169.254/latest/meta-data/").is_err());
    }

    #[test]
    fn extract_host_strips_scheme_path_and_port() {
        assert_eq!(extract_host("https://api.example.com:8443/v1"), "api.example.com");
        assert_eq!(extract_host("http://example.com/"), "example.com");
    }

    #[test]
    fn private_ip_ranges_detected() {
        assert!(is_private_ip(&"10.0.0.1".parse().unwrap()));
        assert!(is_private_ip(&"172.16.0.1".parse().unwrap()));
        assert!(is_private_ip(&"192.168.1.1".parse().unwrap()));
        assert!(!is_private_ip(&"8.8.8.8".parse().unwrap()));
    }

    #[tokio::test]
    async fn capped_body_accepts_stream_under_the_limit() {
        let chunks = vec![
            Ok::<_, std::io::Error>(bytes::Bytes::from_static(b"hello ")),
            Ok(bytes::Bytes::from_static(b"world")),
        ];
        let body = read_capped_body(futures::stream::iter(chunks), 1024).await.unwrap();
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn capped_body_stops_before_buffering_past_the_limit() {
        let chunks = vec![
            Ok::<_, std::io::Error>(bytes::Bytes::from_static(b"aaaa")),
            Ok(bytes::Bytes::from_static(b"bbbb")),
            Ok(bytes::Bytes::from_static(b"cccc")),
        ];
        let err = read_capped_body(futures::stream::iter(chunks), 6).await.unwrap_err();
        assert!(matches!(err, EngineError::CapabilityDenied(_)));
    }
}
