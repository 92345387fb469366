// Module lecteur - canaux de lecture et décodeurs

pub mod channel;
pub mod decoder;
pub mod fade;

pub use channel::{PlayerAudio, PlayerControl, create_player};
