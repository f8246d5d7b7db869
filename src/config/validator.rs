use crate::config::Config;
use crate::error::{Result, SheafError, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_workers(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_vector(config, &mut errors);
        Self::validate_hybrid(config, &mut errors);
        Self::validate_timeouts(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SheafError::ConfigValidation { errors })
        }
    }

    fn validate_workers(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.workers.count == 0 {
            errors.push(ValidationError::new(
                "workers.count",
                "Worker count must be greater than 0",
            ));
        }

        if config.workers.max_attempts == 0 {
            errors.push(ValidationError::new(
                "workers.max_attempts",
                "Attempt ceiling must be greater than 0",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.chunking.size == 0 {
            errors.push(ValidationError::new(
                "chunking.size",
                "Chunk size must be greater than 0",
            ));
        }

        if config.chunking.overlap >= config.chunking.size {
            errors.push(ValidationError::new(
                "chunking.overlap",
                format!(
                    "Overlap ({}) must be smaller than chunk size ({})",
                    config.chunking.overlap, config.chunking.size
                ),
            ));
        }
    }

    fn validate_vector(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.vector.dimensions == 0 {
            errors.push(ValidationError::new(
                "vector.dimensions",
                "Vector dimensions must be greater than 0",
            ));
        }
    }

    fn validate_hybrid(config: &Config, errors: &mut Vec<ValidationError>) {
        match config.hybrid.default_method.as_str() {
            "rrf" | "weighted" | "adaptive" => {}
            other => errors.push(ValidationError::new(
                "hybrid.default_method",
                format!(
                    "Unknown fusion method '{}': expected rrf, weighted, or adaptive",
                    other
                ),
            )),
        }

        if !(0.0..=1.0).contains(&config.hybrid.alpha) {
            errors.push(ValidationError::new(
                "hybrid.alpha",
                format!("Alpha must be in [0, 1], got {}", config.hybrid.alpha),
            ));
        }

        if config.hybrid.rrf_k <= 0.0 {
            errors.push(ValidationError::new(
                "hybrid.rrf_k",
                "RRF constant must be positive",
            ));
        }

        if config.hybrid.consensus_boost < 1.0 {
            errors.push(ValidationError::new(
                "hybrid.consensus_boost",
                "Consensus boost must be at least 1.0",
            ));
        }
    }

    fn validate_timeouts(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.timeouts.base_secs == 0 {
            errors.push(ValidationError::new(
                "timeouts.base_secs",
                "Base timeout must be greater than 0",
            ));
        }
    }
}
