//! Typed bus events handed from the session bus adapter to the watcher.

use std::collections::HashMap;

use crate::metadata::PropertyValue;

pub const NAME_OWNER_CHANGED_SIGNAL: &str = "org.freedesktop.DBus.NameOwnerChanged";
pub const PROPERTIES_CHANGED_SIGNAL: &str = "org.freedesktop.DBus.Properties.PropertiesChanged";

/// Well-known name prefix shared by every MPRIS player.
pub const PLAYER_NAME_PREFIX: &str = "org.mpris.MediaPlayer2.";
pub const PLAYBACK_STATUS_PROPERTY: &str = "PlaybackStatus";
pub const METADATA_PROPERTY: &str = "Metadata";

/// A signal the watcher knows how to handle.
#[derive(Debug, Clone, PartialEq)]
pub enum BusSignal {
    NameOwnerChanged(OwnerChange),
    PropertiesChanged(PropertiesChange),
}

impl BusSignal {
    /// The player name or connection the signal is about, for log context.
    pub fn subject(&self) -> &str {
        match self {
            BusSignal::NameOwnerChanged(change) => &change.name,
            BusSignal::PropertiesChanged(change) => &change.sender,
        }
    }
}

/// Body of a `NameOwnerChanged` signal. Empty owners mean "no owner".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerChange {
    pub name: String,
    pub old_owner: String,
    pub new_owner: String,
}

/// What an ownership change means for a tracked name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Connected,
    Disconnected,
    /// Ownership moved between two connections, or the signal named no owner at all.
    Unchanged,
}

impl OwnerChange {
    pub fn presence(&self) -> Presence {
        match (self.old_owner.is_empty(), self.new_owner.is_empty()) {
            (true, false) => Presence::Connected,
            (false, true) => Presence::Disconnected,
            _ => Presence::Unchanged,
        }
    }

    pub fn is_player(&self) -> bool {
        self.name.starts_with(PLAYER_NAME_PREFIX)
    }
}

/// Body of a `PropertiesChanged` signal for the player interface.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertiesChange {
    /// Unique connection name of the emitting player.
    pub sender: String,
    pub changed: HashMap<String, PropertyValue>,
}

#[cfg(test)]
mod tests {
    use super::{OwnerChange, Presence};

    fn change(name: &str, old_owner: &str, new_owner: &str) -> OwnerChange {
        OwnerChange {
            name: name.to_string(),
            old_owner: old_owner.to_string(),
            new_owner: new_owner.to_string(),
        }
    }

    #[test]
    fn test_presence_is_derived_from_owner_fields() {
        let name = "org.mpris.MediaPlayer2.demo";
        assert_eq!(change(name, "", ":1.5").presence(), Presence::Connected);
        assert_eq!(change(name, ":1.5", "").presence(), Presence::Disconnected);
        assert_eq!(change(name, ":1.5", ":1.6").presence(), Presence::Unchanged);
        assert_eq!(change(name, "", "").presence(), Presence::Unchanged);
    }

    #[test]
    fn test_only_mpris_names_are_players() {
        assert!(change("org.mpris.MediaPlayer2.vlc", "", ":1.2").is_player());
        assert!(!change("org.freedesktop.Notifications", "", ":1.2").is_player());
        assert!(!change(":1.2", "", ":1.2").is_player());
    }
}
