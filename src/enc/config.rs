//! Emission configuration
//!
//! This module provides the options that control how much self-checking the delta
//! emitter performs and what it produces besides the metadata and IL streams.

/// Configuration for delta emission
///
/// Token and heap validation re-check every emitted delta against the baseline before it
/// is returned: a delta that would hand a committed token to a different symbol, or write
/// below a heap's committed size, aborts the emission instead of being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct EmitConfig {
    /// Verify that new tokens are above the baseline's high-water marks and that updated
    /// tokens still belong to the symbol they were committed for
    pub enable_token_validation: bool,

    /// Verify that every heap index written by the delta is either committed or appended
    /// by this delta
    pub enable_heap_validation: bool,

    /// Produce the debug-information delta (sequence points and local names)
    pub emit_debug_delta: bool,

    /// Maximum number of generations a session may reach (0 = unlimited)
    pub max_generations: u16,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            enable_token_validation: true,
            enable_heap_validation: true,
            emit_debug_delta: true,
            max_generations: 0,
        }
    }
}

impl EmitConfig {
    /// Creates a minimal configuration for maximum throughput
    ///
    /// Skips validation and the debug delta.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            enable_token_validation: false,
            enable_heap_validation: false,
            emit_debug_delta: false,
            max_generations: 0,
        }
    }

    /// Creates a configuration with all checks enabled
    ///
    /// Caps sessions at `u16::MAX` generations, the largest value the `Module` row can
    /// carry.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            enable_token_validation: true,
            enable_heap_validation: true,
            emit_debug_delta: true,
            max_generations: u16::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let minimal = EmitConfig::minimal();
        assert!(!minimal.enable_token_validation);
        assert!(!minimal.enable_heap_validation);
        assert!(!minimal.emit_debug_delta);

        let strict = EmitConfig::strict();
        assert!(strict.enable_token_validation);
        assert!(strict.enable_heap_validation);
        assert_eq!(strict.max_generations, u16::MAX);

        let default = EmitConfig::default();
        assert!(default.enable_token_validation);
        assert_eq!(default.max_generations, 0);
    }
}
