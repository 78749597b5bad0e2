// src/utils/url.rs

//! URL authority utilities.

use url::Url;

/// Decides whether one URL can speak authoritatively about another.
///
/// A master has authority over a URL with the same scheme, on the same host
/// or one of its sub-domains, whose directory is the master's directory or
/// lies below it.
#[derive(Debug, Clone)]
pub struct UrlAuthority {
    scheme: String,
    netloc: String,
    dir: String,
}

impl UrlAuthority {
    /// Create an authority check rooted at `master`.
    pub fn new(master: &str) -> Option<Self> {
        let url = Url::parse(master).ok()?;
        Some(Self {
            scheme: url.scheme().to_string(),
            netloc: netloc(&url),
            dir: dirname(url.path()).to_string(),
        })
    }

    /// Returns true if the master has authority over `candidate`.
    pub fn has_authority_over(&self, candidate: &str) -> bool {
        let Ok(url) = Url::parse(candidate) else {
            return false;
        };
        if url.scheme() != self.scheme {
            return false;
        }

        let host = netloc(&url);
        if host != self.netloc && !host.ends_with(&format!(".{}", self.netloc)) {
            return false;
        }

        let dir = dirname(url.path());
        self.dir == "/" || dir == self.dir || dir.starts_with(&format!("{}/", self.dir))
    }
}

/// True if both URLs share scheme and host.
pub fn same_authority(a: &Url, b: &str) -> bool {
    match Url::parse(b) {
        Ok(other) => a.scheme() == other.scheme() && a.host_str() == other.host_str(),
        Err(_) => false,
    }
}

/// True if `location` refers to the local filesystem rather than the network.
pub fn is_file_uri(location: &str) -> bool {
    location.starts_with("file:") || location.starts_with('/') || !location.contains("://")
}

/// Strip a `file:` scheme, leaving a plain filesystem path.
pub fn file_path(location: &str) -> &str {
    location
        .strip_prefix("file://")
        .or_else(|| location.strip_prefix("file:"))
        .unwrap_or(location)
}

/// Extract the host from a URL string, for log context.
pub fn get_domain(url_str: &str) -> Option<String> {
    Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_string()))
}

fn netloc(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_same_site() {
        let auth = UrlAuthority::new("http://example.org/sitemap.xml").unwrap();
        assert!(auth.has_authority_over("http://example.org/sitemap.xml"));
        assert!(auth.has_authority_over("http://example.org/sitemap.xml?anything"));
        assert!(auth.has_authority_over("http://example.org/same_level"));
        assert!(auth.has_authority_over("http://example.org/one/two/deeper"));
        assert!(auth.has_authority_over("http://example.org/"));
        assert!(auth.has_authority_over("http://sub.example.org/subdomain"));
    }

    #[test]
    fn test_authority_denied() {
        let auth = UrlAuthority::new("http://example.org/dir/sitemap.xml").unwrap();
        assert!(!auth.has_authority_over("http://example.org/sitemap.xml"));
        assert!(!auth.has_authority_over("http://sub.example.org/sitemap.xml"));
        assert!(!auth.has_authority_over("https://example.org/dir/sitemap.xml"));
        assert!(!auth.has_authority_over("http://example.org/dirx/sitemap.xml"));
        assert!(!auth.has_authority_over("http://evil.org/dir/sitemap.xml"));
    }

    #[test]
    fn test_authority_sibling_domains() {
        let auth = UrlAuthority::new("http://a.example.org/sitemap.xml").unwrap();
        assert!(auth.has_authority_over("http://sub.a.example.org/sitemap.xml"));
        assert!(!auth.has_authority_over("http://b.example.org/sitemap.xml"));
    }

    #[test]
    fn test_same_authority() {
        let endpoint = Url::parse("http://eprints.example.org/cgi/oai2").unwrap();
        assert!(same_authority(&endpoint, "http://eprints.example.org/123/"));
        assert!(!same_authority(&endpoint, "https://eprints.example.org/123/"));
        assert!(!same_authority(&endpoint, "http://other.org/123"));
        assert!(!same_authority(&endpoint, "not a url"));
    }

    #[test]
    fn test_is_file_uri() {
        assert!(is_file_uri("/tmp/sitemap.xml"));
        assert!(is_file_uri("file:///tmp/sitemap.xml"));
        assert!(is_file_uri("sitemap.xml"));
        assert!(!is_file_uri("http://example.org/sitemap.xml"));
        assert_eq!(file_path("file:///tmp/a.xml"), "/tmp/a.xml");
    }

    #[test]
    fn test_get_domain() {
        assert_eq!(
            get_domain("https://sub.example.com:8080/path"),
            Some("sub.example.com".to_string())
        );
    }
}
