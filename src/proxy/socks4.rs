//! Plain-HTTP GET through a SOCKS4 proxy
//!
//! reqwest only speaks SOCKS5, so SOCKS4 tunnels are negotiated by hand:
//! a CONNECT request (SOCKS4a when the target is a hostname), then an
//! HTTP/1.0 request with `Connection: close` read to EOF.

use crate::proxy::checker::{ProbeError, ProbeResponse};
use reqwest::Url;
use std::net::Ipv4Addr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const VERSION: u8 = 4;
const CMD_CONNECT: u8 = 1;
const REPLY_GRANTED: u8 = 90;

/// CONNECT request for `host:port`; hostnames use the SOCKS4a form
pub fn connect_request(host: &str, port: u16) -> Vec<u8> {
    let mut request = vec![VERSION, CMD_CONNECT];
    request.extend_from_slice(&port.to_be_bytes());
    match host.parse::<Ipv4Addr>() {
        Ok(ip) => {
            request.extend_from_slice(&ip.octets());
            request.push(0);
        }
        Err(_) => {
            // 0.0.0.1 tells the proxy to resolve the trailing hostname
            request.extend_from_slice(&[0, 0, 0, 1]);
            request.push(0);
            request.extend_from_slice(host.as_bytes());
            request.push(0);
        }
    }
    request
}

/// GET `target` (an `http://` URL) through the SOCKS4 proxy at `proxy_addr`
pub async fn get(
    proxy_addr: &str,
    target: &str,
    user_agent: &str,
) -> Result<ProbeResponse, ProbeError> {
    let url = Url::parse(target).map_err(|e| ProbeError::Request(e.to_string()))?;
    if url.scheme() != "http" {
        return Err(ProbeError::Request(format!(
            "SOCKS4 tunnels only carry http targets, got {}",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| ProbeError::Request(format!("{} has no host", target)))?;
    let port = url.port_or_known_default().unwrap_or(80);

    let mut stream = TcpStream::connect(proxy_addr)
        .await
        .map_err(|e| ProbeError::Connect(e.to_string()))?;

    stream
        .write_all(&connect_request(host, port))
        .await
        .map_err(|e| ProbeError::Connect(e.to_string()))?;
    let mut reply = [0u8; 8];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| ProbeError::Connect(e.to_string()))?;
    if reply[0] != 0 {
        return Err(ProbeError::Connect(format!(
            "invalid SOCKS4 reply version {}",
            reply[0]
        )));
    }
    if reply[1] != REPLY_GRANTED {
        return Err(ProbeError::Connect(format!(
            "SOCKS4 request rejected (code {})",
            reply[1]
        )));
    }

    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    let request = format!(
        "GET {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        path, host, user_agent
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ProbeError::Request(e.to_string()))?;

    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .await
        .map_err(|e| ProbeError::Body(e.to_string()))?;

    parse_response(&raw)
}

fn parse_response(raw: &[u8]) -> Result<ProbeResponse, ProbeError> {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| ProbeError::Request("incomplete HTTP response".to_string()))?;
    let head = String::from_utf8_lossy(&raw[..split]);
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| ProbeError::Request("malformed HTTP status line".to_string()))?;

    Ok(ProbeResponse {
        status,
        body: String::from_utf8_lossy(&raw[split + 4..]).into_owned(),
    })
}
