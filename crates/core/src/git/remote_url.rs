//! Remote URL normalization.
//!
//! Push notifications describe the repository with whatever URL flavours the
//! forge sends (`ssh_url`, `clone_url`, `html_url`, ...), while operators
//! configure one URL per mapping. Both sides are reduced to a canonical
//! `host/owner/name` form before comparison:
//!
//! - `git@github.com:org/app.git`      → `github.com/org/app`
//! - `ssh://git@github.com:22/org/app` → `github.com/org/app`
//! - `https://GitHub.com/org/app/`     → `github.com/org/app`
//! - `/srv/origin.git` (local path)    → `/srv/origin`
//!
//! Paths are lowercased only on forges known to ignore their case.

/// A parsed remote location.
#[derive(Debug, PartialEq, Eq)]
struct RemoteLocation<'a> {
    host: Option<String>,
    path: &'a str,
}

fn parse(url: &str) -> RemoteLocation<'_> {
    let url = url.trim().trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url);

    // scheme://[user@]host[:port]/path
    if let Some((_, rest)) = url.split_once("://") {
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let host = authority.rsplit('@').next().unwrap_or(authority);
        let host = host.split(':').next().unwrap_or(host);
        if host.is_empty() {
            // file:///srv/origin
            return RemoteLocation {
                host: None,
                path: rest,
            };
        }
        return RemoteLocation {
            host: Some(host.to_ascii_lowercase()),
            path: path.trim_start_matches('/'),
        };
    }

    // scp-like [user@]host:path, but not a Windows drive or a plain path.
    if let Some((authority, path)) = url.split_once(':') {
        let looks_like_host = !authority.is_empty()
            && !authority.contains('/')
            && !(authority.len() == 1 && authority.chars().all(|c| c.is_ascii_alphabetic()));
        if looks_like_host {
            let host = authority.rsplit('@').next().unwrap_or(authority);
            return RemoteLocation {
                host: Some(host.to_ascii_lowercase()),
                path: path.trim_start_matches('/'),
            };
        }
    }

    RemoteLocation {
        host: None,
        path: url,
    }
}

/// Hosts whose owner/name paths are case-insensitive.
const CASE_INSENSITIVE_HOSTS: &[&str] = &["github.com", "gitlab.com", "bitbucket.org"];

/// Reduce a remote URL to its canonical comparison form.
pub fn normalize_remote_url(url: &str) -> String {
    let loc = parse(url);
    match loc.host {
        Some(host) if CASE_INSENSITIVE_HOSTS.contains(&host.as_str()) => {
            format!("{}/{}", host, loc.path.to_ascii_lowercase())
        }
        Some(host) => format!("{}/{}", host, loc.path),
        None => loc.path.to_string(),
    }
}

/// Whether two URLs designate the same remote repository.
pub fn same_repository(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    !a.is_empty() && !b.is_empty() && (a == b || normalize_remote_url(a) == normalize_remote_url(b))
}

/// Short repository name for log lines (`org/app`).
///
/// Hosted URLs yield the path after the host; local paths yield their last
/// component.
pub fn short_name(url: &str) -> String {
    let loc = parse(url);
    match loc.host {
        Some(_) if !loc.path.is_empty() => loc.path.to_string(),
        _ => loc
            .path
            .rsplit(['/', '\\'])
            .find(|s| !s.is_empty())
            .unwrap_or(loc.path)
            .to_string(),
    }
}
