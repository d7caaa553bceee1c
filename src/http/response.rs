//! Raw HTTP/1.1 responses written before or instead of a WebSocket session.

use serde::Serialize;

/// Body returned to plain (non-upgrade) HTTP requests.
#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: &'static str,
    pub rooms: usize,
    pub connections: usize,
}

/// `101 Switching Protocols` completing a WebSocket handshake.
pub fn switching_protocols(accept_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept_key}\r\n\r\n"
    )
}

/// `400 Bad Request` for a rejected upgrade. `extra_headers` are written as
/// given, one `Name: value` pair each.
pub fn bad_request(extra_headers: &[(&str, &str)]) -> String {
    let mut response = String::from("HTTP/1.1 400 Bad Request\r\n");
    for (name, value) in extra_headers {
        response.push_str(name);
        response.push_str(": ");
        response.push_str(value);
        response.push_str("\r\n");
    }
    response.push_str("Content-Length: 0\r\nConnection: close\r\n\r\n");
    response
}

/// `200 OK` with a JSON body for non-upgrade requests.
pub fn json_ok<T: Serialize>(body: &T) -> Result<String, serde_json::Error> {
    let body = serde_json::to_string(body)?;
    Ok(format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        body.len(),
        body
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switching_protocols_headers() {
        let response = switching_protocols("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("\r\nUpgrade: websocket\r\n"));
        assert!(response.contains("\r\nConnection: Upgrade\r\n"));
        assert!(response.ends_with("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"));
    }

    #[test]
    fn bad_request_with_version_header() {
        let response = bad_request(&[("Sec-WebSocket-Version", "13")]);
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn json_body_has_length() {
        let response = json_ok(&StatusBody {
            status: "ok",
            rooms: 2,
            connections: 3,
        })
        .unwrap();
        let body = r#"{"status":"ok","rooms":2,"connections":3}"#;
        assert!(response.contains("Content-Type: application/json\r\n"));
        assert!(response.contains(&format!("Content-Length: {}\r\n", body.len())));
        assert!(response.ends_with(body));
    }
}
