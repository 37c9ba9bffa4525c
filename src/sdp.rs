//! SDP Mangler: rewrite the `c=` connection-address line of an
//! SDP body when it names a private/unreachable address, so a NAT-traversed
//! peer sees a publicly reachable one.
//!
//! Scope is narrow by design — it does not touch port numbers or media
//! attributes — so this operates line-by-line rather than pulling in a
//! full SDP object model.

use std::net::IpAddr;

/// Rewrite `body`'s connection address to `new_address` if it is private or
/// otherwise unreachable and differs from `new_address`. Returns the
/// (possibly unchanged) body and whether a rewrite happened.
///
/// No-op if `body` is not SDP, if there is no `c=` line, or if the
/// connection address already matches `new_address` — this makes the
/// operation idempotent: `mangle(mangle(b, a).0, a) == mangle(b, a)`.
pub fn mangle(body: &str, new_address: &str) -> (String, bool) {
    if !looks_like_sdp(body) {
        return (body.to_string(), false);
    }

    let mut changed = false;
    let mut out = String::with_capacity(body.len());

    for (line, terminator) in split_lines_keep_terminators(body) {
        if let Some(rewritten) = rewrite_connection_line(line, new_address) {
            changed = true;
            out.push_str(&rewritten);
        } else {
            out.push_str(line);
        }
        out.push_str(terminator);
    }

    if !changed {
        return (body.to_string(), false);
    }
    (out, true)
}

/// Splits `body` into `(line, terminator)` pairs, where `terminator` is
/// `"\r\n"`, `"\n"`, or `""` for a final line with no trailing newline —
/// preserving each line's original terminator rather than normalizing them,
/// since SDP bodies conventionally use CRLF (RFC 4566) and this mangler must
/// not rewrite anything but the matched `c=` line.
fn split_lines_keep_terminators(body: &str) -> Vec<(&str, &str)> {
    let mut result = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        match rest.find('\n') {
            Some(idx) => {
                let (line, remainder) = rest.split_at(idx);
                let remainder = &remainder[1..];
                match line.strip_suffix('\r') {
                    Some(stripped) => result.push((stripped, "\r\n")),
                    None => result.push((line, "\n")),
                }
                rest = remainder;
            }
            None => {
                result.push((rest, ""));
                rest = "";
            }
        }
    }
    result
}

fn looks_like_sdp(body: &str) -> bool {
    body.lines().any(|l| l.starts_with("v=")) && body.lines().any(|l| l.starts_with("o="))
}

/// `c=IN IP4 10.0.0.5` -> `c=IN IP4 203.0.113.7`, only when the existing
/// address is private/unreachable and differs from `new_address`.
fn rewrite_connection_line(line: &str, new_address: &str) -> Option<String> {
    let rest = line.strip_prefix("c=")?;
    let mut parts = rest.split_whitespace();
    let nettype = parts.next()?;
    let addrtype = parts.next()?;
    let address = parts.next()?;

    if address == new_address {
        return None;
    }
    if !is_private_or_unreachable(address) {
        return None;
    }

    Some(format!("c={} {} {}", nettype, addrtype, new_address))
}

fn is_private_or_unreachable(address: &str) -> bool {
    // Address may carry a TTL/multicast suffix (e.g. `224.2.1.1/127`); the
    // reachability check only cares about the address itself.
    let addr_only = address.split('/').next().unwrap_or(address);
    match addr_only.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
        }
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || v6.is_unspecified() || is_unique_local(&v6),
        // Hostnames (FQDNs) in c= lines are not "unreachable" by this
        // mangler's definition — only literal private/loopback addresses are.
        Err(_) => false,
    }
}

fn is_unique_local(addr: &std::net::Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xfe00) == 0xfc00
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(conn: &str) -> String {
        format!(
            "v=0\r\no=- 123 456 IN IP4 {conn}\r\ns=-\r\nc=IN IP4 {conn}\r\nt=0 0\r\nm=audio 49170 RTP/AVP 0\r\n"
        )
    }

    #[test]
    fn rewrites_private_address() {
        let body = sample("10.0.0.5");
        let (out, changed) = mangle(&body, "203.0.113.7");
        assert!(changed);
        assert!(out.contains("c=IN IP4 203.0.113.7"));
        assert!(out.contains("o=- 123 456 IN IP4 10.0.0.5"), "only c= line is touched");
    }

    #[test]
    fn noop_when_address_already_matches() {
        let body = sample("203.0.113.7");
        let (out, changed) = mangle(&body, "203.0.113.7");
        assert!(!changed);
        assert_eq!(out, body);
    }

    #[test]
    fn noop_on_public_address() {
        let body = sample("198.51.100.9");
        let (out, changed) = mangle(&body, "203.0.113.7");
        assert!(!changed);
        assert_eq!(out, body);
    }

    #[test]
    fn noop_on_non_sdp_body() {
        let body = "this is not sdp";
        let (out, changed) = mangle(body, "203.0.113.7");
        assert!(!changed);
        assert_eq!(out, body);
    }

    #[test]
    fn idempotent() {
        let body = sample("10.0.0.5");
        let (once, _) = mangle(&body, "203.0.113.7");
        let (twice, changed_again) = mangle(&once, "203.0.113.7");
        assert!(!changed_again);
        assert_eq!(once, twice);
    }

    #[test]
    fn does_not_touch_port_or_media() {
        let body = sample("10.0.0.5");
        let (out, _) = mangle(&body, "203.0.113.7");
        assert!(out.contains("m=audio 49170 RTP/AVP 0"));
    }

    #[test]
    fn preserves_crlf_line_endings_on_untouched_lines() {
        let body = sample("10.0.0.5");
        let (out, changed) = mangle(&body, "203.0.113.7");
        assert!(changed);
        for line in out.split('\n').filter(|l| !l.is_empty() && *l != "\r") {
            assert!(line.ends_with('\r'), "line {line:?} lost its CR");
        }
        assert_eq!(out.matches("\r\n").count(), body.matches("\r\n").count());
    }
}
