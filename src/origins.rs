use url::Url;

/// One allowed remote origin: a host (optionally wildcarded with a leading
/// `*.`) and a normalized path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub host: String,
    pub path: String,
}

impl Origin {
    /// Parse a single origin entry. A trailing `*` on the path allows prefix
    /// matches over a partial last segment; otherwise a non-empty path gets a
    /// trailing `/` so `/assets` does not accept `/assets-foo`.
    pub fn parse(origin: &str) -> Option<Self> {
        let url = Url::parse(origin).ok()?;
        let host = url.host_str()?.to_string();

        let mut path = url.path().to_string();
        if path == "/" {
            path.clear();
        }
        if !path.is_empty() {
            if let Some(stripped) = path.strip_suffix('*') {
                path = stripped.to_string();
            } else if !path.ends_with('/') {
                path.push('/');
            }
        }

        Some(Self { host, path })
    }

    fn matches(&self, host: &str, path: &str) -> bool {
        if let Some(apex) = self.host.strip_prefix("*.") {
            // "*.example.org" accepts the apex and any subdomain.
            let suffix = &self.host[1..];
            (host == apex || host.ends_with(suffix)) && path.starts_with(&self.path)
        } else {
            host == self.host && path.starts_with(&self.path)
        }
    }
}

/// Parse a comma-separated allow-list, dropping entries that fail to parse.
pub fn parse_origins(entries: &[String]) -> Vec<Origin> {
    entries
        .iter()
        .flat_map(|entry| entry.split(','))
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                None
            } else {
                Origin::parse(entry)
            }
        })
        .collect()
}

/// A fetched URL is restricted iff it matches no configured origin. An
/// empty allow-list never restricts.
pub fn should_restrict(url: &Url, origins: &[Origin]) -> bool {
    if origins.is_empty() {
        return false;
    }
    let Some(host) = url.host_str() else {
        return true;
    };
    let path = url.path();
    !origins.iter().any(|origin| origin.matches(host, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origins(entries: &[&str]) -> Vec<Origin> {
        parse_origins(&entries.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    fn restricted(url: &str, allowed: &[&str]) -> bool {
        should_restrict(&Url::parse(url).unwrap(), &origins(allowed))
    }

    #[test]
    fn test_empty_list_never_restricts() {
        assert!(!restricted("https://anything.example/x.jpg", &[]));
    }

    #[test]
    fn test_exact_host_match() {
        let allowed = ["https://static.example.org"];
        assert!(!restricted("https://static.example.org/logo.png", &allowed));
        assert!(restricted("https://other.example.org/logo.png", &allowed));
    }

    #[test]
    fn test_wildcard_subdomain() {
        let allowed = ["https://*.example.org/assets"];
        assert!(!restricted(
            "https://static.example.org/assets/logo.webp",
            &allowed
        ));
        assert!(!restricted("https://example.org/assets/logo.webp", &allowed));
        assert!(restricted("https://myexample.org/logo.jpg", &allowed));
        assert!(restricted(
            "https://static.example.org/private/logo.webp",
            &allowed
        ));
    }

    #[test]
    fn test_path_segment_boundary() {
        let allowed = ["https://cdn.example.org/assets"];
        assert!(!restricted("https://cdn.example.org/assets/a.png", &allowed));
        assert!(restricted("https://cdn.example.org/assets-foo/a.png", &allowed));
    }

    #[test]
    fn test_path_wildcard_allows_partial_segment() {
        let allowed = ["https://cdn.example.org/assets*"];
        assert!(!restricted("https://cdn.example.org/assets-foo/a.png", &allowed));
        assert!(!restricted("https://cdn.example.org/assets/a.png", &allowed));
    }

    #[test]
    fn test_monotonic_in_origins() {
        let url = "https://cdn.example.org/assets/a.png";
        assert!(restricted(url, &["https://other.example"]));
        assert!(!restricted(url, &["https://other.example", "https://cdn.example.org"]));
    }

    #[test]
    fn test_parse_comma_separated() {
        let parsed = origins(&["https://a.example,https://b.example/media"]);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].path, "/media/");
    }
}
