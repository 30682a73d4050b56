use std::{net::IpAddr, str::FromStr};

use actix_web::HttpRequest;
use hmac::{Hmac, Mac};
use log::{debug, trace};
use regex::Regex;
use sha2::Sha256;

/// Get the remote IP address from the request. It uses 3 sources to determine the IP address, in decreasing order
/// of preference:
/// 1. The `X-Forwarded-For` header, iif `use_x_forwarded_for` is set to true in the configuration.
/// 2. The `Forwarded` header, iif `use_forwarded` is set to true in the configuration.
/// 3. The peer address from the connection info.
pub fn get_remote_ip(req: &HttpRequest, use_x_forwarded_for: bool, use_forwarded: bool) -> Option<IpAddr> {
    let mut result = None;
    if use_x_forwarded_for {
        trace!("Checking X-Forwarded-For header");
        // The left-most entry is the originating client
        result = req
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| IpAddr::from_str(s.trim()).ok());
        if let Some(ip) = result {
            debug!("Using X-Forwarded-For header for remote address: {ip}");
        }
    }
    if use_forwarded && result.is_none() {
        trace!("Checking Forwarded header");
        result = req.headers().get("Forwarded").and_then(|v| v.to_str().ok()).and_then(forwarded_for);
        if let Some(ip) = result {
            debug!("Using Forwarded header for remote address: {ip}");
        }
    }
    result.or_else(|| {
        let peer_addr = req.peer_addr().map(|a| a.ip());
        trace!("Using Peer address for remote address: {:?}", peer_addr);
        peer_addr
    })
}

/// Extracts the `for=` address from an RFC 7239 `Forwarded` header value.
fn forwarded_for(header: &str) -> Option<IpAddr> {
    let re = Regex::new(r#"(?i)for="?\[?(?P<ip>[0-9a-f.:]+?)\]?(:\d+)?"?(?:[;,\s]|$)"#).ok()?;
    let caps = re.captures(header)?;
    caps.name("ip").and_then(|m| IpAddr::from_str(m.as_str()).ok())
}

/// Base64-encoded HMAC-SHA256 of `data`, keyed with `secret`. This is the format webhook senders put in the signature
/// header.
pub fn calculate_hmac(secret: &str, data: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::default(),
    };
    mac.update(data);
    base64::encode(mac.finalize().into_bytes())
}

/// Checks a base64-encoded HMAC-SHA256 `signature` of `data` in constant time.
pub fn verify_hmac(secret: &str, data: &[u8], signature: &str) -> bool {
    let Ok(expected) = base64::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(data);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod test {
    use actix_web::test::TestRequest;

    use super::*;

    #[test]
    fn hmac_matches_known_vector() {
        // RFC 4231 test case 2
        let hmac = calculate_hmac("Jefe", b"what do ya want for nothing?");
        assert_eq!(hmac, "W9zBRr9gdU5qBCQmCJV1x1oAPwidJzmDnexYuWTsOEM=");
        assert!(verify_hmac("Jefe", b"what do ya want for nothing?", &hmac));
        assert!(!verify_hmac("Jefe", b"what do ya want for something?", &hmac));
        assert!(!verify_hmac("Jefe", b"what do ya want for nothing?", "not base64!"));
    }

    #[test]
    fn forwarded_header_parsing() {
        assert_eq!(forwarded_for("for=192.0.2.60;proto=http;by=203.0.113.43"), "192.0.2.60".parse().ok());
        assert_eq!(forwarded_for(r#"For="[2001:db8:cafe::17]:4711""#), "2001:db8:cafe::17".parse().ok());
        assert_eq!(forwarded_for("proto=https"), None);
    }

    #[test]
    fn remote_ip_preference() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "10.1.1.1, 10.2.2.2"))
            .insert_header(("Forwarded", "for=10.3.3.3"))
            .peer_addr("10.4.4.4:5000".parse().unwrap())
            .to_http_request();
        assert_eq!(get_remote_ip(&req, true, true), "10.1.1.1".parse().ok());
        assert_eq!(get_remote_ip(&req, false, true), "10.3.3.3".parse().ok());
        assert_eq!(get_remote_ip(&req, false, false), "10.4.4.4".parse().ok());
    }
}
