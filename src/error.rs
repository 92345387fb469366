// Erreurs de démarrage

use thiserror::Error;

/// Anything that can stop the mixer from coming up. Runtime failure
/// paths never unwind through here: the callback always returns a
/// block and fatal conditions cascade through the shutdown flag.
#[derive(Debug, Error)]
pub enum MixerError {
    #[error("missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("unparseable environment variable: {0}")]
    BadEnv(&'static str),

    #[error("audio server client failed to open: {0}")]
    ClientOpen(#[from] jack::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type MixerResult<T> = Result<T, MixerError>;
