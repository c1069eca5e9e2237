use crate::config::Config;

pub struct PipelineConfig {
    /// Generation attempts per job, counting the first.
    pub max_attempts: u32,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}
