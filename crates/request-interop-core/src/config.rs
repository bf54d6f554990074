//! Configuration for request normalization and mapping

use crate::body::DEFAULT_SPOOL_THRESHOLD;

/// Maximum nesting depth accepted by the body decoders (default: 512)
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Configuration shared by the request factory and the message mapper
///
/// # Example
///
/// ```
/// use request_interop_core::InteropConfig;
///
/// let config = InteropConfig::new()
///     .max_depth(64)
///     .method_override(false)
///     .spool_threshold(64 * 1024);
///
/// assert_eq!(config.max_depth, 64);
/// assert!(!config.method_override);
/// ```
#[derive(Debug, Clone)]
pub struct InteropConfig {
    /// Maximum nesting depth of decoded JSON or XML bodies; deeper documents
    /// decode to an empty map (default: 512)
    pub max_depth: usize,
    /// Honor `X-HTTP-Method-Override` on POST requests (default: true)
    pub method_override: bool,
    /// Bytes a temporary buffer keeps in memory before spilling to disk
    /// (default: 2 MiB)
    pub spool_threshold: usize,
}

impl Default for InteropConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            method_override: true,
            spool_threshold: DEFAULT_SPOOL_THRESHOLD,
        }
    }
}

impl InteropConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum decode depth
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Enable or disable the method override header
    pub fn method_override(mut self, enabled: bool) -> Self {
        self.method_override = enabled;
        self
    }

    /// Set the in-memory limit of temporary buffers
    pub fn spool_threshold(mut self, bytes: usize) -> Self {
        self.spool_threshold = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = InteropConfig::default();
        assert_eq!(config.max_depth, 512);
        assert!(config.method_override);
        assert_eq!(config.spool_threshold, 2 * 1024 * 1024);
    }
}
