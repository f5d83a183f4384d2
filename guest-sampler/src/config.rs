use std::path::PathBuf;

use crate::error::ConfigError;

pub const DEFAULT_OUT: &str = "qemu-profile";
/// Delay between two samples in microseconds
pub const DEFAULT_DELAY_US: u64 = 10;

/// Options accepted at install time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Output file
    pub out: PathBuf,
    /// Delay between two samples in microseconds, `0` samples every event
    pub delay_us: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            out: PathBuf::from(DEFAULT_OUT),
            delay_us: DEFAULT_DELAY_US,
        }
    }
}

impl SamplerConfig {
    /// Parses host plugin arguments of the form `key=value`.
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = args.into_iter().collect::<Vec<_>>();
        let pairs = args
            .iter()
            .map(|arg| {
                let arg: &str = arg.as_ref();
                arg.split_once('=')
                    .ok_or_else(|| ConfigError::MissingValue(arg.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_options(pairs)
    }

    /// Builds a configuration from already split options.
    pub fn from_options<'a, I>(options: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();

        for (key, value) in options {
            match key {
                "out" => config.out = PathBuf::from(value),
                "delay" => {
                    config.delay_us =
                        value
                            .trim()
                            .parse()
                            .map_err(|source| ConfigError::InvalidDelay {
                                value: value.to_owned(),
                                source,
                            })?
                }
                _ => return Err(ConfigError::UnknownOption(key.to_owned())),
            }
        }

        Ok(config)
    }
}
