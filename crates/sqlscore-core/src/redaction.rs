use serde::{Deserialize, Serialize};

/// Database URL metadata that is safe to persist in run records and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedUrl {
    pub scheme: Option<String>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    /// The original URL with the password and secret query values masked.
    pub display: String,
}

const MASK: &str = "***";

/// Mask secrets in a database URL and pull out the non-secret parts.
///
/// Strings without a `scheme://` prefix are returned unchanged apart from
/// query-parameter masking.
pub fn redact_database_url(url: &str) -> RedactedUrl {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    };

    let mut redacted = RedactedUrl {
        scheme: None,
        user: None,
        host: None,
        port: None,
        database: None,
        display: String::new(),
    };

    let display_base = match base.split_once("://") {
        Some((scheme, rest)) => {
            redacted.scheme = Some(scheme.to_string());
            let (authority, database) = rest.split_once('/').unwrap_or((rest, ""));
            let (userinfo, host_port) = match authority.rsplit_once('@') {
                Some((userinfo, host_port)) => (Some(userinfo), host_port),
                None => (None, authority),
            };

            let masked_userinfo = userinfo.map(|userinfo| match userinfo.split_once(':') {
                Some((user, _password)) => {
                    redacted.user = Some(user.to_string());
                    format!("{user}:{MASK}@")
                }
                None => {
                    redacted.user = Some(userinfo.to_string());
                    format!("{userinfo}@")
                }
            });

            let (host, port) = split_host_port(host_port);
            redacted.host = host;
            redacted.port = port;
            if !database.is_empty() {
                redacted.database = Some(database.to_string());
            }

            let mut display = format!("{scheme}://{}", masked_userinfo.unwrap_or_default());
            display.push_str(host_port);
            if !database.is_empty() {
                display.push('/');
                display.push_str(database);
            }
            display
        }
        None => base.to_string(),
    };

    redacted.display = match query {
        Some(query) => format!("{display_base}?{}", mask_query(query)),
        None => display_base,
    };
    redacted
}

fn split_host_port(host_port: &str) -> (Option<String>, Option<u16>) {
    if host_port.is_empty() {
        return (None, None);
    }
    // Bracketed IPv6 literals carry colons of their own.
    let port_sep = if host_port.starts_with('[') {
        host_port
            .find("]:")
            .map(|idx| idx + 1)
    } else {
        host_port.rfind(':')
    };
    match port_sep {
        Some(idx) => (
            Some(host_port[..idx].to_string()),
            host_port[idx + 1..].parse().ok(),
        ),
        None => (Some(host_port.to_string()), None),
    }
}

fn mask_query(query: &str) -> String {
    query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if is_secret_key(key) => format!("{key}={MASK}"),
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    ["password", "passwd", "pass", "token", "secret", "api_key", "apikey"]
        .contains(&key.as_str())
}
