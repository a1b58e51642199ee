//! Tracks which players are on the bus and what each last played.
//!
//! Players are addressed by their stable well-known name, while property
//! signals only carry the sender's unique connection name. The registry keeps
//! both directions of that mapping plus the last track seen per player.
//! It is owned by the watcher loop, which is its only reader and writer.

use std::collections::HashMap;

use log::{debug, warn};

use crate::{errors::WatcherError, metadata::TrackMetadata, session_bus::PlayerBus};

/// Players that mirror another player's metadata verbatim.
pub const DEFAULT_FILTERED_PLAYERS: [&str; 3] =
    ["playerctld", "plasma-browser-integration", "kdeconnect"];

#[derive(Debug, Default)]
pub struct PlayerRegistry {
    connections_by_service: HashMap<String, String>,
    services_by_connection: HashMap<String, String>,
    last_tracks: HashMap<String, TrackMetadata>,
    filtered_suffixes: Vec<String>,
}

impl PlayerRegistry {
    pub fn new(filtered_suffixes: Vec<String>) -> Self {
        Self {
            filtered_suffixes,
            ..Self::default()
        }
    }

    /// Looks up the current owner of `service` and records the mapping.
    /// Nothing is recorded when the lookup fails.
    pub async fn register<B: PlayerBus>(
        &mut self,
        bus: &B,
        service: &str,
    ) -> Result<(), WatcherError> {
        let connection = bus.name_owner(service).await?;
        self.insert(service, &connection);
        Ok(())
    }

    fn insert(&mut self, service: &str, connection: &str) {
        if let Some(previous) = self
            .connections_by_service
            .insert(service.to_string(), connection.to_string())
        {
            if previous != connection {
                self.remove_reverse_entry(&previous, service);
            }
        }
        // One connection maps to a single name; the newest registration wins.
        if let Some(displaced) = self
            .services_by_connection
            .insert(connection.to_string(), service.to_string())
        {
            if displaced != service {
                self.connections_by_service.remove(&displaced);
                self.last_tracks.remove(&displaced);
                debug!(
                    "PlayerRegistry: service={} replaced service={} on connection={}",
                    service, displaced, connection
                );
            }
        }
        debug!(
            "PlayerRegistry: registered service={} connection={}",
            service, connection
        );
    }

    fn remove_reverse_entry(&mut self, connection: &str, service: &str) {
        if self.services_by_connection.get(connection).map(String::as_str) == Some(service) {
            self.services_by_connection.remove(connection);
        }
    }

    /// Forgets `service`. Best effort: a missing entry is only logged.
    pub fn unregister(&mut self, service: &str) {
        self.last_tracks.remove(service);

        if let Some(connection) = self.connections_by_service.remove(service) {
            self.remove_reverse_entry(&connection, service);
            debug!(
                "PlayerRegistry: unregistered service={} connection={}",
                service, connection
            );
            return;
        }

        let stale: Vec<String> = self
            .services_by_connection
            .iter()
            .filter(|(_, owner)| owner.as_str() == service)
            .map(|(connection, _)| connection.clone())
            .collect();
        if stale.is_empty() {
            warn!(
                "PlayerRegistry: unregister for unknown service={}, nothing removed",
                service
            );
            return;
        }
        for connection in stale {
            self.services_by_connection.remove(&connection);
        }
    }

    /// Maps a signal sender back to the player's well-known name.
    pub fn resolve(&self, connection: &str) -> Option<&str> {
        self.services_by_connection
            .get(connection)
            .map(String::as_str)
    }

    pub fn is_filtered(&self, service: &str) -> bool {
        self.filtered_suffixes
            .iter()
            .any(|suffix| service.ends_with(suffix.as_str()))
    }

    pub fn last_track(&self, service: &str) -> Option<&TrackMetadata> {
        self.last_tracks.get(service)
    }

    /// Stores `track` as the player's last track and returns the one it replaced.
    pub fn replace_last_track(
        &mut self,
        service: &str,
        track: TrackMetadata,
    ) -> Option<TrackMetadata> {
        self.last_tracks.insert(service.to_string(), track)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.connections_by_service.is_empty() && self.services_by_connection.is_empty()
    }
}
