use crate::error::ConfigError;

pub const DEFAULT_DIMENSION: usize = 30;
pub const DEFAULT_PRECISION: f64 = 0.001;
pub const DEFAULT_WORKERS: usize = 1;

/// How a shared-memory worker reads the rows next to the one it is updating.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadMode {
    #[default]
    Relaxed,
    // 上下の行もロックし、逆順に解放する
    Protected,
}

/// When a shared-memory worker may stop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExitPolicy {
    #[default]
    Independent,
    // 全ワーカーの直近のパスが収束するまで待つ
    AwaitAll,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelaxConfig {
    dimension: usize,
    precision: f64,
    workers: usize,
    read_mode: ReadMode,
    exit_policy: ExitPolicy,
}

impl Default for RelaxConfig {
    fn default() -> Self {
        RelaxConfig {
            dimension: DEFAULT_DIMENSION,
            precision: DEFAULT_PRECISION,
            workers: DEFAULT_WORKERS,
            read_mode: ReadMode::Relaxed,
            exit_policy: ExitPolicy::Independent,
        }
    }
}

impl RelaxConfig {
    pub fn new(dimension: usize, precision: f64, workers: usize) -> Result<Self, ConfigError> {
        let config = RelaxConfig {
            dimension,
            precision,
            workers,
            read_mode: ReadMode::Relaxed,
            exit_policy: ExitPolicy::Independent,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_read_mode(mut self, read_mode: ReadMode) -> Self {
        self.read_mode = read_mode;
        self
    }

    pub fn with_exit_policy(mut self, exit_policy: ExitPolicy) -> Self {
        self.exit_policy = exit_policy;
        self
    }

    pub fn with_workers(self, workers: usize) -> Result<Self, ConfigError> {
        let config = RelaxConfig { workers, ..self };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_dimension(self.dimension)?;
        validate_precision(self.precision)?;
        if self.workers < 1 {
            return Err(ConfigError::Workers(self.workers));
        }
        Ok(())
    }

    /// `validate` plus the rank limit of the distributed engine.
    pub fn validate_distributed(&self) -> Result<(), ConfigError> {
        self.validate()?;
        validate_ranks(self.workers, self.dimension)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn precision(&self) -> f64 {
        self.precision
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn read_mode(&self) -> ReadMode {
        self.read_mode
    }

    pub fn exit_policy(&self) -> ExitPolicy {
        self.exit_policy
    }
}

pub fn validate_dimension(dimension: usize) -> Result<(), ConfigError> {
    if dimension < 3 {
        return Err(ConfigError::Dimension(dimension));
    }
    Ok(())
}

/// Every rank needs at least one row of its own to exchange.
pub fn validate_ranks(workers: usize, dimension: usize) -> Result<(), ConfigError> {
    if workers > dimension {
        return Err(ConfigError::TooManyWorkers { workers, dimension });
    }
    Ok(())
}

pub fn validate_precision(precision: f64) -> Result<(), ConfigError> {
    // NaN も範囲外として弾かれる
    if !(0.0..=1.0).contains(&precision) {
        return Err(ConfigError::Precision(precision));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_dimension_below_three() {
        assert_eq!(RelaxConfig::new(2, 0.001, 1), Err(ConfigError::Dimension(2)));
        assert!(RelaxConfig::new(3, 0.001, 1).is_ok());
    }

    #[test]
    fn rejects_precision_out_of_range() {
        assert!(matches!(RelaxConfig::new(10, -0.1, 1), Err(ConfigError::Precision(_))));
        assert!(matches!(RelaxConfig::new(10, 1.5, 1), Err(ConfigError::Precision(_))));
        assert!(matches!(RelaxConfig::new(10, f64::NAN, 1), Err(ConfigError::Precision(_))));
        assert!(RelaxConfig::new(10, 0.0, 1).is_ok());
        assert!(RelaxConfig::new(10, 1.0, 1).is_ok());
    }

    #[test]
    fn rejects_bad_worker_counts() {
        assert_eq!(RelaxConfig::new(10, 0.001, 0), Err(ConfigError::Workers(0)));
        let config = RelaxConfig::new(10, 0.001, 1).unwrap();
        assert!(config.with_workers(10).is_ok());
        assert!(config.with_workers(0).is_err());
    }

    #[test]
    fn more_workers_than_rows_only_limits_ranks() {
        let config = RelaxConfig::new(4, 0.001, 8).unwrap();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(
            config.validate_distributed(),
            Err(ConfigError::TooManyWorkers { workers: 8, dimension: 4 })
        );
        assert!(config.with_workers(4).unwrap().validate_distributed().is_ok());
    }
}
