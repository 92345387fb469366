// Analyseur du protocole de contrôle - enregistrements clé/valeur
//
// The controlling application writes one `KEY=value` pair per line.
// Keys are the 3-4 character names of the command dictionary; values
// run to the end of the line. A record is complete when its `ACTN`
// line arrives, which also names the handler to run. Values persist
// between records, so a command only needs to resend what changed.

use std::collections::HashMap;

/// A line that is not a `KEY=value` pair. The dispatcher treats this as
/// fatal and begins shutdown.
#[derive(Debug, PartialEq, Eq)]
pub struct ParseError {
    pub line: String,
}

pub struct RecordParser {
    values: HashMap<String, String>,
}

impl RecordParser {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Feed one input line. Returns the action name when the line
    /// completes a record.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<String>, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Ok(None);
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ParseError {
                line: line.to_string(),
            });
        };
        if key.is_empty() || key.len() > 4 || !key.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
            return Err(ParseError {
                line: line.to_string(),
            });
        }
        if key == "ACTN" {
            return Ok(Some(value.to_string()));
        }
        self.values.insert(key.to_string(), value.to_string());
        Ok(None)
    }

    /// Latest value seen for `key`, empty if never sent.
    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or("")
    }
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a `d<len>:<payload>` sequence (the protocol's length-prefixed
/// value framing, used by playlists) into its payloads.
pub fn parse_length_prefixed(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let bytes = input.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() && bytes[pos] == b'd' {
        pos += 1;
        let len_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos >= bytes.len() || bytes[pos] != b':' {
            break;
        }
        let Ok(len) = input[len_start..pos].parse::<usize>() else {
            break;
        };
        pos += 1;
        if pos + len > bytes.len() {
            break;
        }
        out.push(input[pos..pos + len].to_string());
        pos += len;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates_until_actn() {
        let mut p = RecordParser::new();
        assert_eq!(p.feed_line("PLRP=/music/track.ogg\n"), Ok(None));
        assert_eq!(p.feed_line("SEEK=0"), Ok(None));
        assert_eq!(p.feed_line("RGDB=-3.2"), Ok(None));
        let action = p.feed_line("ACTN=playleft").unwrap();
        assert_eq!(action.as_deref(), Some("playleft"));
        assert_eq!(p.get("PLRP"), "/music/track.ogg");
        assert_eq!(p.get("SEEK"), "0");
    }

    #[test]
    fn test_values_persist_between_records() {
        let mut p = RecordParser::new();
        p.feed_line("MIXR=:000:").unwrap();
        p.feed_line("ACTN=mixstats").unwrap();
        p.feed_line("ACTN=requestlevels").unwrap();
        assert_eq!(p.get("MIXR"), ":000:");
    }

    #[test]
    fn test_unknown_key_is_stored() {
        let mut p = RecordParser::new();
        assert_eq!(p.feed_line("JPT2=system:playback_1"), Ok(None));
        assert_eq!(p.get("JPT2"), "system:playback_1");
    }

    #[test]
    fn test_missing_value_is_empty() {
        let p = RecordParser::new();
        assert_eq!(p.get("OGGP"), "");
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        let mut p = RecordParser::new();
        assert!(p.feed_line("no separator here").is_err());
        assert!(p.feed_line("toolongkey=x").is_err());
        assert!(p.feed_line("=value").is_err());
    }

    #[test]
    fn test_value_may_contain_equals() {
        let mut p = RecordParser::new();
        p.feed_line("PLPL=d3:a=bd2:cc").unwrap();
        assert_eq!(p.get("PLPL"), "d3:a=bd2:cc");
    }

    #[test]
    fn test_length_prefixed_playlist() {
        let entries = parse_length_prefixed("d10:/a/one.oggd10:/b/two.mp3");
        assert_eq!(entries, vec!["/a/one.ogg", "/b/two.mp3"]);
    }

    #[test]
    fn test_length_prefixed_rejects_truncation() {
        let entries = parse_length_prefixed("d99:/short");
        assert!(entries.is_empty());
    }
}
