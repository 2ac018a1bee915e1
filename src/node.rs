use url::Url;

use crate::error::Error;

/// A single registered endpoint within a service (§3 Data Model).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub uri: Url,
}

impl Node {
    pub fn new(name: impl Into<String>, uri: impl AsRef<str>) -> Result<Self, Error> {
        let name = name.into();
        validate_identifier(&name)?;
        let uri = parse_uri(uri.as_ref())?;
        Ok(Self { name, uri })
    }
}

/// Validates that `id` is non-empty and contains no `/`, the shared rule
/// for `name` and `service` (§3).
pub(crate) fn validate_identifier(id: &str) -> Result<(), Error> {
    if id.is_empty() || id.contains('/') {
        return Err(Error::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

/// Parses and validates an absolute URI.
///
/// `url::Url` can only represent absolute URIs, so a successful parse is
/// sufficient; we additionally require a non-empty scheme so that
/// degenerate inputs like `"//host"` (which `Url` rejects anyway) are
/// never mistaken for valid.
pub(crate) fn parse_uri(raw: &str) -> Result<Url, Error> {
    let url = Url::parse(raw).map_err(|_| Error::InvalidUri(raw.to_string()))?;
    if url.scheme().is_empty() {
        return Err(Error::InvalidUri(raw.to_string()));
    }
    Ok(url)
}

/// Extracts the last path segment of a key, used to recover a node's `name`
/// from its `nodeKey` (§4.3).
pub(crate) fn name_from_key(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_slash_in_name() {
        assert!(Node::new("a/b", "http://host:80").is_err());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(Node::new("", "http://host:80").is_err());
    }

    #[test]
    fn rejects_relative_uri() {
        assert!(Node::new("n1", "/not-absolute").is_err());
    }

    #[test]
    fn accepts_absolute_uri() {
        let node = Node::new("n1", "http://a:80").unwrap();
        assert_eq!(node.name, "n1");
        assert_eq!(node.uri.as_str(), "http://a:80/");
    }

    #[test]
    fn name_from_key_takes_last_segment() {
        assert_eq!(name_from_key("svc/api/n1"), "n1");
        assert_eq!(name_from_key("n1"), "n1");
    }
}
