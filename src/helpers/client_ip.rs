use actix_web::HttpRequest;

/// Resolves the client IP for rate limiting and session binding.
///
/// `X-Forwarded-For` / `X-Real-IP` are only honoured when the immediate
/// peer is in the trusted-proxy list; otherwise the socket address wins.
/// Anything else would let untrusted clients spoof their address with a
/// single header.
pub fn client_ip(req: &HttpRequest, trusted_proxies: &[String]) -> String {
    let peer = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if trusted_proxies.is_empty() || !trusted_proxies.iter().any(|p| p == &peer) {
        return peer;
    }

    if let Some(forwarded) = header_value(req, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = header_value(req, "x-real-ip") {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    peer
}

fn header_value<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}
