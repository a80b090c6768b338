use std::time::Duration;

use bon::Builder;

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for one invocation pipeline.
#[derive(Debug, Clone, Builder)]
pub struct PipelineConfig {
    /// Deadline applied to each of the function's `init` and `destroy` hooks.
    #[builder(default = DEFAULT_HOOK_TIMEOUT)]
    pub hook_timeout: Duration,

    /// Number of output signals buffered towards the transport before the output marshallers
    /// have to wait for it to catch up.
    #[builder(default = 16)]
    pub destination_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.hook_timeout, DEFAULT_HOOK_TIMEOUT);
        assert_eq!(config.destination_capacity, 16);
    }

    #[test]
    fn test_overrides() {
        let config = PipelineConfig::builder()
            .hook_timeout(Duration::from_millis(100))
            .destination_capacity(1)
            .build();
        assert_eq!(config.hook_timeout, Duration::from_millis(100));
        assert_eq!(config.destination_capacity, 1);
    }
}
