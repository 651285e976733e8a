use std::net::IpAddr;

use url::{Host, Url};

/// The page assets are delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    origin: Url,
}

impl PageContext {
    pub fn new(origin: Url) -> Self {
        Self { origin }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Mirrors the browser's potentially-trustworthy origin rules: https/wss,
    /// file, and localhost or loopback hosts. Caching is only used here.
    pub fn is_secure_context(&self) -> bool {
        match self.origin.scheme() {
            "https" | "wss" | "file" => return true,
            _ => {}
        }

        match self.origin.host() {
            Some(Host::Domain(domain)) => {
                let domain = domain.trim_end_matches('.').to_ascii_lowercase();
                domain == "localhost" || domain.ends_with(".localhost")
            }
            Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
            Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(origin: &str) -> PageContext {
        PageContext::new(Url::parse(origin).unwrap())
    }

    #[test]
    fn secure_origins() {
        assert!(page("https://example.com/").is_secure_context());
        assert!(page("http://localhost:8080/").is_secure_context());
        assert!(page("http://app.localhost/").is_secure_context());
        assert!(page("http://127.0.0.5/").is_secure_context());
        assert!(page("http://[::1]:3000/").is_secure_context());
        assert!(page("file:///srv/index.html").is_secure_context());
    }

    #[test]
    fn plain_http_is_insecure() {
        assert!(!page("http://example.com/").is_secure_context());
        assert!(!page("http://192.168.1.10/").is_secure_context());
        assert!(!page("http://notlocalhost.com/").is_secure_context());
    }
}
