//! Detection of the GML namespace version used by a response.

use log::debug;

/// Namespace URI of GML 2 and 3.1.
pub const GML_NAMESPACE: &str = "http://www.opengis.net/gml";
/// Namespace URI of GML 3.2.
pub const GML32_NAMESPACE: &str = "http://www.opengis.net/gml/3.2";

/// The GML namespace flavour a stream uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GmlVersion {
    Gml2,
    Gml32,
}

impl GmlVersion {
    /// Identifies a GML namespace URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            GML_NAMESPACE => Some(GmlVersion::Gml2),
            GML32_NAMESPACE => Some(GmlVersion::Gml32),
            _ => None,
        }
    }

    #[must_use]
    pub fn uri(self) -> &'static str {
        match self {
            GmlVersion::Gml2 => GML_NAMESPACE,
            GmlVersion::Gml32 => GML32_NAMESPACE,
        }
    }
}

/// The GML namespace of a stream, locked in on first sight.
#[derive(Debug, Clone, Copy, Default)]
pub struct GmlNamespace {
    version: Option<GmlVersion>,
}

impl GmlNamespace {
    /// Locks the namespace if `uri` is a GML namespace and none was resolved
    /// yet. Returns the resolved version afterwards.
    pub fn observe(&mut self, uri: Option<&str>) -> Option<GmlVersion> {
        if self.version.is_none()
            && let Some(version) = uri.and_then(GmlVersion::from_uri)
        {
            debug!("GML namespace resolved to {}", version.uri());
            self.version = Some(version);
        }
        self.version
    }

    #[must_use]
    pub fn version(&self) -> Option<GmlVersion> {
        self.version
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.version.is_some()
    }

    /// True when `uri` is the resolved GML namespace.
    #[must_use]
    pub fn matches(&self, uri: Option<&str>) -> bool {
        match (self.version, uri) {
            (Some(version), Some(uri)) => version.uri() == uri,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_once() {
        let mut ns = GmlNamespace::default();
        assert!(!ns.matches(Some(GML_NAMESPACE)));
        assert_eq!(ns.observe(Some("http://www.opengis.net/wfs")), None);
        assert_eq!(ns.observe(Some(GML32_NAMESPACE)), Some(GmlVersion::Gml32));
        assert_eq!(ns.observe(Some(GML_NAMESPACE)), Some(GmlVersion::Gml32));
        assert!(ns.matches(Some(GML32_NAMESPACE)));
        assert!(!ns.matches(Some(GML_NAMESPACE)));
        assert!(!ns.matches(None));
    }

    #[test]
    fn version_uris() {
        assert_eq!(GmlVersion::from_uri(GML_NAMESPACE), Some(GmlVersion::Gml2));
        assert_eq!(GmlVersion::Gml32.uri(), GML32_NAMESPACE);
        assert_eq!(GmlVersion::from_uri("http://www.opengis.net/gml/3.3"), None);
    }
}
