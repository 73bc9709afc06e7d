use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown consistency model `{0}`, expected SC or TSO")]
    InvalidConsistencyModel(String),
    #[error("{name} must be at least 1, got {value}")]
    NotPositive { name: &'static str, value: usize },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConsistencyModel {
    /// Sequential consistency: writes are globally visible on completion.
    Sc,
    /// Total store order: writes are buffered per processor and become
    /// globally visible only at retirement.
    Tso,
}

impl fmt::Display for ConsistencyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyModel::Sc => write!(f, "SC"),
            ConsistencyModel::Tso => write!(f, "TSO"),
        }
    }
}

impl FromStr for ConsistencyModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SC" => Ok(Self::Sc),
            "TSO" => Ok(Self::Tso),
            _ => Err(ConfigError::InvalidConsistencyModel(s.to_string())),
        }
    }
}

/// Dimensions of the simulated system. Validated before any cache is built.
#[derive(Clone, Copy, Debug)]
pub struct SimConfig {
    pub num_processors: usize,
    pub num_cache_lines: usize,
    /// Addressable units per cache line. Power of two recommended; the
    /// div/mod address split is total for any size >= 1.
    pub line_size: usize,
    /// Retire-at-N threshold of the write buffer. Ignored under SC.
    pub retire_at: usize,
    pub model: ConsistencyModel,
}

impl SimConfig {
    pub fn validate(&self) -> Result<()> {
        let mut checks = vec![
            ("number_processors", self.num_processors),
            ("number_cache_lines", self.num_cache_lines),
            ("cache_line_size", self.line_size),
        ];
        if self.model == ConsistencyModel::Tso {
            checks.push(("retire_at", self.retire_at));
        }
        for (name, value) in checks {
            if value == 0 {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        Ok(())
    }
}
