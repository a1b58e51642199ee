//! Error taxonomy shared by the watcher, the bus adapter, and storage.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatcherError {
    /// A bus signal did not carry the body shape its member promises.
    #[error("invalid body for signal")]
    InvalidSignalBody,
    /// A property value did not have the type its field expects.
    #[error("invalid type for field")]
    InvalidType,
    /// A property change carried neither status nor usable metadata.
    #[error("failed to get metadata")]
    MetadataFailed,
    /// The synchronous metadata read on connect failed.
    #[error("failed to get metadata: {0}")]
    MetadataFetch(#[source] zbus::Error),
    /// Album resolution was attempted with an empty name.
    #[error("invalid album name")]
    InvalidAlbumName,
    #[error("bus error: {0}")]
    Bus(#[from] zbus::Error),
    #[error("bus daemon error: {0}")]
    BusDaemon(#[from] zbus::fdo::Error),
    #[error("invalid bus name: {0}")]
    BusName(#[from] zbus::names::Error),
    #[error("db error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
}
