//! Playlist loading
//!
//! A playlist is a list of tracks, each naming the file to write, the term to
//! search for and the attributes to attach once the file is on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Opaque metadata attached to a downloaded file.
pub type Attributes = BTreeMap<String, String>;

/// Written next to the config when no playlist exists yet.
pub const PLAYLIST_EXAMPLE: &str = r#"# Each [[track]] is downloaded once.
# filename:    name of the file written into the download directory
# search_term: what to type into the site search
# attributes:  optional tags stored next to the file as <filename>.json
#
# playlist.xml files are not read. Move each entry into a [[track]] table
# here, or into a JSON array of the same fields.

[[track]]
filename = "Daft Punk - Around the World.mp3"
search_term = "daft punk around the world"

[track.attributes]
artist = "Daft Punk"
title = "Around the World"
album = "Homework"
"#;

#[derive(Error, Debug)]
pub enum PlaylistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported playlist format: {0} (use a .toml or .json playlist)")]
    UnsupportedFormat(String),

    #[error("Track {index} is invalid: {reason}")]
    InvalidTrack { index: usize, reason: String },
}

pub type PlaylistResult<T> = Result<T, PlaylistError>;

/// One unit of work for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub filename: String,
    pub search_term: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl DownloadRequest {
    pub fn new(filename: impl Into<String>, search_term: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            search_term: search_term.into(),
            attributes: Attributes::new(),
        }
    }

    #[cfg(test)]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistFile {
    #[serde(default)]
    track: Vec<DownloadRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonPlaylist {
    Tracks(Vec<DownloadRequest>),
    File(PlaylistFile),
}

/// Parses a TOML playlist (`[[track]]` tables).
pub fn parse_toml_playlist(content: &str) -> PlaylistResult<Vec<DownloadRequest>> {
    let file: PlaylistFile = toml::from_str(content)?;
    validate(file.track)
}

/// Parses a JSON playlist, either a bare array or `{"track": [...]}`.
pub fn parse_json_playlist(content: &str) -> PlaylistResult<Vec<DownloadRequest>> {
    let tracks = match serde_json::from_str::<JsonPlaylist>(content)? {
        JsonPlaylist::Tracks(tracks) => tracks,
        JsonPlaylist::File(file) => file.track,
    };
    validate(tracks)
}

/// Reads the playlist at `path`, choosing the format from its extension.
pub fn load_playlist(path: &Path) -> PlaylistResult<Vec<DownloadRequest>> {
    debug!("Reading playlist {}", path.display());
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if extension == "xml" {
        return Err(PlaylistError::UnsupportedFormat(path.display().to_string()));
    }

    let content = fs::read_to_string(path)?;
    let requests = if extension == "json" {
        parse_json_playlist(&content)?
    } else {
        parse_toml_playlist(&content)?
    };

    info!("Loaded {} tracks from {}", requests.len(), path.display());
    Ok(requests)
}

fn validate(tracks: Vec<DownloadRequest>) -> PlaylistResult<Vec<DownloadRequest>> {
    for (index, track) in tracks.iter().enumerate() {
        if track.filename.trim().is_empty() {
            return Err(PlaylistError::InvalidTrack {
                index,
                reason: "filename is empty".to_string(),
            });
        }
        if track.search_term.trim().is_empty() {
            return Err(PlaylistError::InvalidTrack {
                index,
                reason: "search_term is empty".to_string(),
            });
        }
    }
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_example_playlist_parses() {
        let tracks = parse_toml_playlist(PLAYLIST_EXAMPLE).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].search_term, "daft punk around the world");
        assert_eq!(tracks[0].attributes.get("album").map(String::as_str), Some("Homework"));
    }

    #[test]
    fn test_order_is_preserved() {
        let content = r#"
            [[track]]
            filename = "A"
            search_term = "qA"

            [[track]]
            filename = "B"
            search_term = "qB"

            [[track]]
            filename = "C"
            search_term = "qC"
        "#;
        let names: Vec<_> = parse_toml_playlist(content)
            .unwrap()
            .into_iter()
            .map(|t| t.filename)
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_json_array_and_object_forms() {
        let array = r#"[{"filename": "A", "search_term": "qA"}]"#;
        let object = r#"{"track": [{"filename": "A", "search_term": "qA", "attributes": {"k": "v"}}]}"#;

        let from_array = parse_json_playlist(array).unwrap();
        let from_object = parse_json_playlist(object).unwrap();

        assert_eq!(from_array[0], DownloadRequest::new("A", "qA"));
        assert_eq!(from_object[0], DownloadRequest::new("A", "qA").with_attribute("k", "v"));
    }

    #[test]
    fn test_empty_search_term_is_rejected() {
        let content = r#"
            [[track]]
            filename = "A"
            search_term = "  "
        "#;
        match parse_toml_playlist(content) {
            Err(PlaylistError::InvalidTrack { index, .. }) => assert_eq!(index, 0),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_load_picks_format_from_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("list.json");
        fs::write(&path, r#"[{"filename": "A", "search_term": "qA"}]"#).unwrap();

        let tracks = load_playlist(&path).unwrap();
        assert_eq!(tracks.len(), 1);
    }

    #[test]
    fn test_xml_playlist_is_rejected_with_a_hint() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("playlist.xml");
        std::fs::write(&path, "<playlist><track/></playlist>").unwrap();

        let err = load_playlist(&path).unwrap_err();
        assert!(matches!(err, PlaylistError::UnsupportedFormat(_)));
        assert!(err.to_string().contains(".toml or .json"));
    }
}
