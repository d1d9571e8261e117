use std::{fmt, path::Path};

/// Broadcast channel identifier, the request path including its leading `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey(String);

impl TopicKey {
    /// Build a key from a request path, adding the leading slash if the router stripped it.
    pub fn from_path(path: &str) -> Self {
        if path.starts_with('/') {
            Self(path.to_string())
        } else {
            Self(format!("/{path}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key as shown in public listings, without the path prefix.
    pub fn display_name(&self) -> &str {
        self.0.strip_prefix('/').unwrap_or(&self.0)
    }

    /// Last path component, used to name archive files.
    ///
    /// Returns `None` for keys such as `/..` that do not end in a regular name.
    pub fn basename(&self) -> Option<&str> {
        Path::new(&self.0).file_name().and_then(|name| name.to_str())
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
