use std::fmt::Display;
use std::io;
use thiserror::Error;

/// Fatal configuration problems (§7 ConfigError).
///
/// Reported before any discovery/generalization work begins.
#[derive(Error, Debug)]
pub enum ConfigError {
    Missing(String),
    Invalid { key: String, reason: String },
    Io(io::Error),
    Json(serde_json::Error),
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => {
                f.write_fmt(format_args!("missing required config key {:?}", key))
            }
            ConfigError::Invalid { key, reason } => f.write_fmt(format_args!(
                "invalid value for config key {:?}: {}",
                key, reason
            )),
            ConfigError::Io(e) => f.write_fmt(format_args!("could not read config: {:?}", e)),
            ConfigError::Json(e) => {
                f.write_fmt(format_args!("could not parse config JSON: {:?}", e))
            }
        }
    }
}

/// A requested instruction is not representable in the current scheme
/// universe (§7 IWHOError). Fatal for the command that raised it.
#[derive(Error, Debug)]
pub enum IwhoError {
    UnknownMnemonic(String),
    UnknownScheme(String),
    OperandMismatch { scheme: String, reason: String },
}

impl Display for IwhoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IwhoError::UnknownMnemonic(m) => {
                f.write_fmt(format_args!("mnemonic {:?} is not in the scheme universe", m))
            }
            IwhoError::UnknownScheme(s) => {
                f.write_fmt(format_args!("scheme {:?} is not in the scheme universe", s))
            }
            IwhoError::OperandMismatch { scheme, reason } => f.write_fmt(format_args!(
                "operand mismatch for scheme {:?}: {}",
                scheme, reason
            )),
        }
    }
}

/// An abstract block turned out to be unsatisfiable, or sampling from it
/// failed after the retry budget was exhausted (§7 SamplingError).
///
/// Always locally recoverable: the generalizer treats the offending
/// expansion as infeasible and continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplingError {
    EmptyConcretization { position: usize },
    OverconstrainedAliasing { reason: String },
    RetriesExhausted { attempts: u32 },
}

impl Display for SamplingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SamplingError::EmptyConcretization { position } => f.write_fmt(format_args!(
                "position {} has an empty concretization",
                position
            )),
            SamplingError::OverconstrainedAliasing { reason } => {
                f.write_fmt(format_args!("aliasing constraints are unsatisfiable: {}", reason))
            }
            SamplingError::RetriesExhausted { attempts } => f.write_fmt(format_args!(
                "gave up after {} sampling attempts",
                attempts
            )),
        }
    }
}

/// Per-block-per-predictor failure: non-positive TP, timeout or crash
/// (§7 PredictorError). Recorded as a failure value, never propagated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictorError {
    Timeout,
    Crashed(String),
    NonPositiveResult(f64),
    Unsupported,
}

impl Display for PredictorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredictorError::Timeout => f.write_str("predictor timed out"),
            PredictorError::Crashed(msg) => {
                f.write_fmt(format_args!("predictor crashed: {}", msg))
            }
            PredictorError::NonPositiveResult(v) => f.write_fmt(format_args!(
                "predictor returned non-positive TP {}",
                v
            )),
            PredictorError::Unsupported => f.write_str("block uses an unsupported instruction"),
        }
    }
}

/// Unrecoverable discovery-loop state, e.g. no satisfiable top block
/// (§7 DiscoveryError). The current campaign ends; the next one (if any)
/// starts normally.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    Sampling(SamplingError),
    NoSatisfiableTop { length: usize },
}

impl From<SamplingError> for DiscoveryError {
    fn from(e: SamplingError) -> Self {
        Self::Sampling(e)
    }
}

impl Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::Sampling(e) => {
                f.write_fmt(format_args!("discovery loop could not sample: {}", e))
            }
            DiscoveryError::NoSatisfiableTop { length } => f.write_fmt(format_args!(
                "no scheme is satisfiable at block length {}",
                length
            )),
        }
    }
}
