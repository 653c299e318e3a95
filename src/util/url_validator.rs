use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validates a subscription URL before it is fetched.
///
/// Always requires an `http` or `https` scheme. With `block_private` set,
/// also rejects hosts that resolve to the bot's own network (SSRF guard for
/// deployments where anyone in a channel can subscribe a URL):
/// - Localhost addresses (`localhost`, `127.0.0.1`, `::1`)
/// - Private IP ranges (RFC 1918, link-local, unique local IPv6)
///
/// Only literal IP hosts are checked; names are not resolved.
///
/// # Examples
///
/// ```
/// use feedbot::util::validate_feed_url;
///
/// assert!(validate_feed_url("https://example.com/feed.xml", true).is_ok());
/// assert!(validate_feed_url("http://127.0.0.1:8080/feed", false).is_ok());
/// assert!(validate_feed_url("http://127.0.0.1:8080/feed", true).is_err());
/// assert!(validate_feed_url("file:///etc/passwd", false).is_err());
/// ```
pub fn validate_feed_url(url_str: &str, block_private: bool) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if !block_private {
        return Ok(url);
    }

    if let Some(host) = url.host_str() {
        if host == "localhost" {
            return Err(UrlValidationError::Localhost);
        }

        // Strip brackets from IPv6 addresses for parsing
        let host_for_parse = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
            if ip.is_loopback() {
                return Err(UrlValidationError::Localhost);
            }
            if is_private_ip(&ip) {
                return Err(UrlValidationError::PrivateIp(ip.to_string()));
            }
        }
    }

    Ok(url)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_always_checked() {
        assert!(validate_feed_url("https://example.com/feed.xml", false).is_ok());
        assert!(validate_feed_url("http://news.example.org", false).is_ok());
        assert!(matches!(
            validate_feed_url("ftp://example.com", false),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            validate_feed_url("not a url", false),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_private_hosts_allowed_unless_blocked() {
        assert!(validate_feed_url("http://localhost/feed", false).is_ok());
        assert!(validate_feed_url("http://192.168.1.1/feed", false).is_ok());
    }

    #[test]
    fn test_localhost_rejected_when_blocked() {
        assert!(validate_feed_url("http://localhost/feed", true).is_err());
        assert!(validate_feed_url("http://127.0.0.1/feed", true).is_err());
        assert!(validate_feed_url("http://[::1]/feed", true).is_err());
    }

    #[test]
    fn test_private_ips_rejected_when_blocked() {
        assert!(validate_feed_url("http://192.168.1.1/feed", true).is_err());
        assert!(validate_feed_url("http://10.0.0.1:3000/feed", true).is_err());
        assert!(validate_feed_url("http://172.16.0.1/feed", true).is_err());
        assert!(validate_feed_url("http://169.254.1.1/feed", true).is_err());
        assert!(validate_feed_url("http://[fe80::1]/feed", true).is_err());
        assert!(validate_feed_url("http://0.0.0.0/feed", true).is_err());
    }

    #[test]
    fn test_public_url_accepted_when_blocked() {
        assert!(validate_feed_url("https://example.com:443/feed.xml", true).is_ok());
    }
}
