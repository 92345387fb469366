// Module audio - DSP, noyau de mixage et client JACK

pub mod alarm;
pub mod client;
pub mod db;
pub mod engine;
pub mod limiter;
pub mod normalizer;
pub mod peak;
pub mod ports;
pub mod smoothing;
