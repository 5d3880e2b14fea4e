use url::{Host, Url};

use crate::error::{IndexError, Result};

/// Canonicalizes `uri` into its SURT form, e.g.
/// `https://example.com/a?b` becomes `https://(com,example,)/a?b`.
pub fn canonicalize(uri: &str) -> Result<String> {
    let failed = |reason: String| IndexError::CanonicalizationFailed {
        uri: uri.to_owned(),
        reason,
    };

    let url = Url::parse(uri.trim()).map_err(|err| failed(err.to_string()))?;
    let host = match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.');
            if domain.is_empty() {
                return Err(failed("empty host".to_owned()));
            }
            let mut reversed = domain.rsplit('.').collect::<Vec<_>>().join(",");
            reversed.push(',');
            reversed
        }
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => format!("[{ip}]"),
        None => return Err(failed("uri has no host".to_owned())),
    };

    let mut out = format!("{}://({host}", url.scheme());
    if let Some(port) = url.port() {
        out.push_str(&format!(":{port}"));
    }
    out.push(')');

    let path = url.path();
    let query = url.query();
    if path != "/" || query.is_some() {
        out.push_str(path);
    }
    if let Some(query) = query {
        out.push('?');
        out.push_str(query);
    }
    Ok(out)
}
