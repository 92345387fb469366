// Configuration - lue une fois depuis l'environnement au démarrage

use std::env;

use crate::error::MixerError;

/// Startup settings handed over by the controlling application through
/// the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Audio-server client name (`mx_client_id`).
    pub client_id: String,
    /// Number of microphone channels to host (`mx_mic_qty`).
    pub mic_qty: usize,
    /// Streaming client name, used to locate its input ports
    /// (`sc_client_id`).
    pub sc_client_id: String,
    /// Optional named JACK server (`jack_server_name`).
    pub jack_server_name: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, MixerError> {
        let client_id =
            env::var("mx_client_id").map_err(|_| MixerError::MissingEnv("mx_client_id"))?;
        let mic_qty = env::var("mx_mic_qty")
            .map_err(|_| MixerError::MissingEnv("mx_mic_qty"))?
            .parse::<usize>()
            .map_err(|_| MixerError::BadEnv("mx_mic_qty"))?;
        let sc_client_id =
            env::var("sc_client_id").map_err(|_| MixerError::MissingEnv("sc_client_id"))?;
        let jack_server_name = env::var("jack_server_name").ok().filter(|s| !s.is_empty());
        Ok(Self {
            client_id,
            mic_qty,
            sc_client_id,
            jack_server_name,
        })
    }

    /// libjack picks the server through its own environment variable.
    pub fn export_server_name(&self) {
        if let Some(name) = &self.jack_server_name {
            // set before the client opens, on the main thread
            unsafe { env::set_var("JACK_DEFAULT_SERVER", name) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // one test: the environment is process-global state
    #[test]
    fn test_environment_parsing() {
        unsafe {
            env::remove_var("mx_client_id");
            env::set_var("mx_mic_qty", "2");
            env::set_var("sc_client_id", "streamer");
            env::remove_var("jack_server_name");
        }
        assert!(matches!(
            Config::from_env(),
            Err(MixerError::MissingEnv("mx_client_id"))
        ));

        unsafe { env::set_var("mx_client_id", "mixer-test") };
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.client_id, "mixer-test");
        assert_eq!(cfg.mic_qty, 2);
        assert!(cfg.jack_server_name.is_none());

        unsafe { env::set_var("mx_mic_qty", "lots") };
        assert!(matches!(
            Config::from_env(),
            Err(MixerError::BadEnv("mx_mic_qty"))
        ));
        unsafe { env::set_var("mx_mic_qty", "2") };
    }
}
