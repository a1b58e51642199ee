//! Now-playing metadata decoding and duplicate detection.
//!
//! Players publish their metadata as an untyped `a{sv}` dictionary. The bus
//! adapter lowers each value into a [`PropertyValue`] and this module turns the
//! result into a [`TrackMetadata`] record, one field at a time, defaulting any
//! field whose value has the wrong type.

use std::collections::HashMap;
use std::fmt;

use log::warn;

use crate::errors::WatcherError;

const KEY_ALBUM: &str = "xesam:album";
const KEY_ALBUM_ARTIST: &str = "xesam:albumArtist";
const KEY_URL: &str = "xesam:url";
const KEY_ARTIST: &str = "xesam:artist";
const KEY_COMPOSER: &str = "xesam:composer";
const KEY_EXTERNAL_TRACK_ID: &str = "mb:trackId";
const KEY_TITLE: &str = "xesam:title";

/// A bus value reduced to the shapes the decoder understands.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(String),
    TextList(Vec<String>),
    Map(HashMap<String, PropertyValue>),
    /// Any other bus type. Kept so a type mismatch is visible to the decoder.
    Other,
}

impl PropertyValue {
    fn as_text(&self) -> Result<String, WatcherError> {
        match self {
            PropertyValue::Text(text) => Ok(text.clone()),
            _ => Err(WatcherError::InvalidType),
        }
    }

    fn as_text_list(&self) -> Result<Vec<String>, WatcherError> {
        match self {
            PropertyValue::TextList(items) => Ok(items.clone()),
            _ => Err(WatcherError::InvalidType),
        }
    }
}

/// Track description decoded from one player metadata snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub album: String,
    pub album_artists: Vec<String>,
    pub url: String,
    pub artists: Vec<String>,
    pub composers: Vec<String>,
    /// Industry-assigned identifier (MusicBrainz), not a storage id.
    pub external_track_id: String,
    pub title: String,
}

impl TrackMetadata {
    /// True when the record has neither a title nor a url to identify it.
    pub fn is_placeholder(&self) -> bool {
        self.title.is_empty() && self.url.is_empty()
    }

    /// Every credited person in album-artist, artist, composer order,
    /// without repeats or empty names.
    pub fn credited_people(&self) -> Vec<&str> {
        let mut people: Vec<&str> = Vec::new();
        for name in self
            .album_artists
            .iter()
            .chain(self.artists.iter())
            .chain(self.composers.iter())
        {
            if !name.is_empty() && !people.contains(&name.as_str()) {
                people.push(name.as_str());
            }
        }
        people
    }
}

impl fmt::Display for TrackMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Album: {}; Title: {}", self.album, self.title)
    }
}

/// Decodes a metadata dictionary. Never fails: mistyped fields stay empty,
/// and a mistyped title is additionally logged.
pub fn decode_metadata(entries: &HashMap<String, PropertyValue>) -> TrackMetadata {
    let mut metadata = TrackMetadata::default();
    for (key, value) in entries {
        match key.as_str() {
            KEY_ALBUM => metadata.album = value.as_text().unwrap_or_default(),
            KEY_ALBUM_ARTIST => metadata.album_artists = value.as_text_list().unwrap_or_default(),
            KEY_URL => metadata.url = value.as_text().unwrap_or_default(),
            KEY_ARTIST => metadata.artists = value.as_text_list().unwrap_or_default(),
            KEY_COMPOSER => metadata.composers = value.as_text_list().unwrap_or_default(),
            KEY_EXTERNAL_TRACK_ID => {
                metadata.external_track_id = value.as_text().unwrap_or_default()
            }
            KEY_TITLE => match value.as_text() {
                Ok(title) => metadata.title = title,
                Err(err) => {
                    warn!(
                        "Metadata: failed to extract title from track, assuming blank ({})",
                        err
                    );
                }
            },
            _ => {}
        }
    }
    metadata
}

/// Whether two records describe the same track for logging purposes.
///
/// Only url and title take part. Some players reuse one url for a whole
/// album, and a re-announced track may carry a different album or
/// external id without being a new play.
pub fn is_same_track(previous: &TrackMetadata, current: &TrackMetadata) -> bool {
    previous.url == current.url && previous.title == current.title
}
