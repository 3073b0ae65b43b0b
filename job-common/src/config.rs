use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Loads a config struct from a TOML file, a default-derived baseline, and
/// environment variable overrides, in that order of increasing precedence.
///
/// Env vars use `__` as the nesting separator, e.g. `JOB_ORCHESTRATOR__DB__HOST`.
pub struct ConfigLoader<T> {
    path: PathBuf,
    env_prefix: &'static str,
    _marker: PhantomData<T>,
}

impl<T: Default + Serialize + DeserializeOwned> ConfigLoader<T> {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            env_prefix: "JOB_ORCHESTRATOR__",
            _marker: PhantomData,
        }
    }

    fn figment(&self) -> Figment {
        Figment::from(Serialized::defaults(T::default()))
            .merge(Toml::file(&self.path))
            .merge(Env::prefixed(self.env_prefix).split("__"))
    }

    pub fn load(&self) -> Result<T, figment::Error> {
        self.figment().extract()
    }

    /// Loads the config, or if `JOB_ORCHESTRATOR_DUMP_CONFIG` is set, prints the
    /// effective (redacted) config to stdout and exits the process. Intended to
    /// be called once at process startup, ahead of any other I/O.
    pub fn load_or_dump_config(&self) -> Result<T, figment::Error>
    where
        T: crate::SafeDisplay,
    {
        let config = self.load()?;
        if std::env::var("JOB_ORCHESTRATOR_DUMP_CONFIG").is_ok() {
            println!("{}", config.to_safe_string());
            std::process::exit(0);
        }
        Ok(config)
    }
}
