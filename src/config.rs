// Backend configuration

use std::env;

/// Environment variable overriding [`BackendConfig::client_name`].
pub const CLIENT_NAME_ENV: &str = "MIXER_CONTROL_CLIENT_NAME";

const DEFAULT_CLIENT_NAME: &str = "mixer-control";

/// Settings handed to a backend when it is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Name the engine announces to the sound server (PulseAudio's
    /// `application.name`). Unused by WASAPI.
    pub client_name: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            client_name: DEFAULT_CLIENT_NAME.to_string(),
        }
    }
}

impl BackendConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let client_name = lookup(CLIENT_NAME_ENV)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string());

        BackendConfig { client_name }
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        let config = BackendConfig::from_lookup(|_| None);
        assert_eq!(config, BackendConfig::default());
        assert_eq!(config.client_name, "mixer-control");
    }

    #[test]
    fn environment_overrides_client_name() {
        let config = BackendConfig::from_lookup(|key| {
            (key == CLIENT_NAME_ENV).then(|| " studio-panel ".to_string())
        });
        assert_eq!(config.client_name, "studio-panel");
    }

    #[test]
    fn blank_override_is_ignored() {
        let config = BackendConfig::from_lookup(|_| Some("   ".to_string()));
        assert_eq!(config.client_name, "mixer-control");
    }
}
