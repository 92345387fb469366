// Lecture des métadonnées de fichiers média - réponses OIR
//
// Serves the media info request actions. The file is probed, never
// decoded; the reply block goes to stdout in the `OIR:` framing the
// controlling application scrapes.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use log::warn;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;

#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub length_secs: f64,
    pub replaygain: String,
}

/// Probe a media file for its tags and play length.
pub fn media_info(path: &str) -> Option<MediaInfo> {
    let p = Path::new(path);
    let file = File::open(p).ok()?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = p.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()?;

    let mut info = MediaInfo::default();
    let mut absorb = |rev: &symphonia::core::meta::MetadataRevision| {
        for tag in rev.tags() {
            match tag.std_key {
                Some(StandardTagKey::Artist) => info.artist = tag.value.to_string(),
                Some(StandardTagKey::TrackTitle) => info.title = tag.value.to_string(),
                Some(StandardTagKey::Album) => info.album = tag.value.to_string(),
                Some(StandardTagKey::ReplayGainTrackGain) => {
                    info.replaygain = tag.value.to_string()
                }
                _ => {}
            }
        }
    };
    if let Some(meta) = probed.metadata.get() {
        if let Some(rev) = meta.current() {
            absorb(rev);
        }
    }
    if let Some(rev) = probed.format.metadata().current() {
        absorb(rev);
    }

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)?;
    if let (Some(n_frames), Some(rate)) =
        (track.codec_params.n_frames, track.codec_params.sample_rate)
    {
        info.length_secs = n_frames as f64 / rate as f64;
    }
    Some(info)
}

/// Emit the `OIR:` reply block for an info request.
pub fn write_oir<W: Write>(out: &mut W, info: Option<&MediaInfo>) -> std::io::Result<()> {
    match info {
        Some(info) => {
            write!(
                out,
                "OIR:ARTIST={}\nOIR:TITLE={}\nOIR:ALBUM={}\nOIR:LENGTH={:.6}\nOIR:REPLAYGAIN_TRACK_GAIN={}\nOIR:end\n",
                info.artist, info.title, info.album, info.length_secs, info.replaygain
            )?;
        }
        None => {
            write!(out, "OIR:NOT VALID\n")?;
        }
    }
    out.flush()
}

/// Shared handler for the whole info-request action family.
pub fn handle_info_request<W: Write>(out: &mut W, path: &str) {
    let info = media_info(path);
    if info.is_none() {
        warn!("no readable media info in {}", path);
    }
    if let Err(e) = write_oir(out, info.as_ref()) {
        warn!("failed to write info reply: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_path_writes_not_valid() {
        let mut out = Vec::new();
        handle_info_request(&mut out, "/nonexistent/file.ogg");
        assert_eq!(String::from_utf8(out).unwrap(), "OIR:NOT VALID\n");
    }

    #[test]
    fn test_oir_block_layout() {
        let info = MediaInfo {
            artist: "The Ether".into(),
            title: "Carrier Wave".into(),
            album: "Night Shift".into(),
            length_secs: 192.5,
            replaygain: "-6.20 dB".into(),
        };
        let mut out = Vec::new();
        write_oir(&mut out, Some(&info)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("OIR:ARTIST=The Ether\n"));
        assert!(text.contains("OIR:LENGTH=192.500000\n"));
        assert!(text.ends_with("OIR:end\n"));
    }

    #[test]
    fn test_wav_length_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("len.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..16000 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
        let info = media_info(path.to_str().unwrap()).unwrap();
        assert!((info.length_secs - 2.0).abs() < 0.01);
    }
}
