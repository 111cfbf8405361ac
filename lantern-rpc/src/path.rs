//! ABCI query path parsing and Merkle key paths.

use crate::error::{Result, RpcError};

/// Extract the store name from an ABCI query path.
///
/// The only accepted form is `/store/<name>/key`: a literal leading
/// slash, the literal segment `store`, the store name, and the literal
/// trailing segment `key`.
pub fn parse_query_store_path(path: &str) -> Result<String> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(RpcError::InvalidQueryPath(
            "expected path to start with /".to_string(),
        ));
    };

    let parts: Vec<&str> = rest.splitn(3, '/').collect();
    match parts.as_slice() {
        ["store", name, "key"] if !name.is_empty() => Ok((*name).to_string()),
        _ => Err(RpcError::InvalidQueryPath(format!(
            "expected format like /store/<storeName>/key, got {}",
            path
        ))),
    }
}

/// A slash-separated Merkle key path with URL-encoded segments.
///
/// Raw key bytes may contain slashes or non-printable bytes, so each
/// segment is percent-encoded on the way in and decoded during proof
/// verification.
#[derive(Debug, Clone, Default)]
pub struct KeyPath {
    keys: Vec<Vec<u8>>,
}

impl KeyPath {
    /// An empty key path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw key segment.
    pub fn append(mut self, key: &[u8]) -> Self {
        self.keys.push(key.to_vec());
        self
    }

    /// Parse an encoded key path back into raw segments.
    pub fn parse(path: &str) -> Result<Self> {
        let Some(rest) = path.strip_prefix('/') else {
            return Err(RpcError::InvalidQueryPath(
                "key path must start with /".to_string(),
            ));
        };
        let mut keys = Vec::new();
        for segment in rest.split('/') {
            if segment.is_empty() {
                return Err(RpcError::InvalidQueryPath("empty key path segment".to_string()));
            }
            keys.push(url_decode(segment)?);
        }
        Ok(Self { keys })
    }

    /// The raw segments, outermost first.
    pub fn into_keys(self) -> Vec<Vec<u8>> {
        self.keys
    }
}

impl std::fmt::Display for KeyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for key in &self.keys {
            write!(f, "/{}", url_encode(key))?;
        }
        Ok(())
    }
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~')
}

fn url_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn url_decode(segment: &str) -> Result<Vec<u8>> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex_pair = bytes.get(i + 1..i + 3).ok_or_else(|| {
                    RpcError::InvalidQueryPath("truncated percent escape".to_string())
                })?;
                let decoded = u8::from_str_radix(
                    std::str::from_utf8(hex_pair)
                        .map_err(|_| RpcError::InvalidQueryPath("bad percent escape".to_string()))?,
                    16,
                )
                .map_err(|_| RpcError::InvalidQueryPath("bad percent escape".to_string()))?;
                out.push(decoded);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_path_accepted() {
        assert_eq!(parse_query_store_path("/store/acc/key").unwrap(), "acc");
        assert_eq!(
            parse_query_store_path("/store/ibc-transfer/key").unwrap(),
            "ibc-transfer"
        );
    }

    #[test]
    fn test_store_path_rejected() {
        for bad in [
            "store/acc/key",
            "/acc",
            "/store/acc",
            "/store/acc/keys",
            "/stores/acc/key",
            "/store//key",
            "/",
            "",
        ] {
            assert!(
                matches!(
                    parse_query_store_path(bad),
                    Err(RpcError::InvalidQueryPath(_))
                ),
                "path {:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_key_path_roundtrip() {
        let path = KeyPath::new()
            .append(b"acc")
            .append(&[0x00, 0x2f, 0xff, b'a'])
            .to_string();
        assert_eq!(path, "/acc/%00%2F%FFa");

        let keys = KeyPath::parse(&path).unwrap().into_keys();
        assert_eq!(keys, vec![b"acc".to_vec(), vec![0x00, 0x2f, 0xff, b'a']]);
    }

    #[test]
    fn test_key_path_plain_segments() {
        let keys = KeyPath::parse("/acc/balance").unwrap().into_keys();
        assert_eq!(keys, vec![b"acc".to_vec(), b"balance".to_vec()]);
    }

    #[test]
    fn test_key_path_rejects_malformed() {
        assert!(KeyPath::parse("acc/balance").is_err());
        assert!(KeyPath::parse("/acc//balance").is_err());
        assert!(KeyPath::parse("/acc/%zz").is_err());
        assert!(KeyPath::parse("/acc/%f").is_err());
    }
}
