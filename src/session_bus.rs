//! Session bus adapter.
//!
//! Owns the zbus connection: installs the two signal subscriptions, turns raw
//! bus messages into [`BusSignal`]s, and performs the synchronous calls the
//! watcher needs ("get name owner" and "get Metadata property").

use std::collections::HashMap;

use zbus::{
    fdo::DBusProxy,
    message::{Header, Type as MessageType},
    names::BusName,
    proxy::{self, CacheProperties},
    zvariant::{OwnedValue, Value},
    Connection, MatchRule, Message, MessageStream, Proxy,
};

use crate::{
    errors::WatcherError,
    metadata::{decode_metadata, PropertyValue, TrackMetadata},
    protocol::{
        BusSignal, OwnerChange, PropertiesChange, METADATA_PROPERTY, NAME_OWNER_CHANGED_SIGNAL,
        PROPERTIES_CHANGED_SIGNAL,
    },
};

const DBUS_INTERFACE: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
const PLAYER_PATH: &str = "/org/mpris/MediaPlayer2";
const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";

/// The synchronous bus calls the watcher depends on.
pub trait PlayerBus {
    /// Resolves a well-known player name to the unique name currently owning it.
    async fn name_owner(&self, service: &str) -> Result<String, WatcherError>;
    /// Reads and decodes the player's current `Metadata` property.
    async fn player_metadata(&self, service: &str) -> Result<TrackMetadata, WatcherError>;
}

/// Connection to the desktop session bus.
pub struct SessionBus {
    connection: Connection,
    dbus: DBusProxy<'static>,
}

impl SessionBus {
    pub async fn connect() -> Result<Self, WatcherError> {
        let connection = Connection::session().await?;
        let dbus = DBusProxy::new(&connection).await?;
        Ok(Self { connection, dbus })
    }

    /// Subscribes to player ownership and property changes and returns the
    /// stream the signals arrive on.
    pub async fn subscribe(&self) -> Result<MessageStream, WatcherError> {
        let stream = MessageStream::from(&self.connection);

        let owner_rule = MatchRule::builder()
            .msg_type(MessageType::Signal)
            .path(DBUS_PATH)?
            .interface(DBUS_INTERFACE)?
            .member("NameOwnerChanged")?
            .build();
        self.dbus.add_match_rule(owner_rule).await?;

        let properties_rule = MatchRule::builder()
            .msg_type(MessageType::Signal)
            .interface(PROPERTIES_INTERFACE)?
            .member("PropertiesChanged")?
            .arg(0, PLAYER_INTERFACE)?
            .build();
        self.dbus.add_match_rule(properties_rule).await?;

        Ok(stream)
    }
}

impl PlayerBus for SessionBus {
    async fn name_owner(&self, service: &str) -> Result<String, WatcherError> {
        let name = BusName::try_from(service)?;
        let owner = self.dbus.get_name_owner(name).await?;
        Ok(owner.as_str().to_string())
    }

    async fn player_metadata(&self, service: &str) -> Result<TrackMetadata, WatcherError> {
        let proxy = properties_proxy(&self.connection, service)
            .await
            .map_err(WatcherError::MetadataFetch)?;
        let reply = proxy
            .call_method("Get", &(PLAYER_INTERFACE, METADATA_PROPERTY))
            .await
            .map_err(WatcherError::MetadataFetch)?;
        let value: OwnedValue = reply
            .body()
            .deserialize()
            .map_err(WatcherError::MetadataFetch)?;
        Ok(decode_metadata(&metadata_entries(value)?))
    }
}

/// Properties proxy for a single `Get` call, so no property cache is set up.
async fn properties_proxy<'a>(
    connection: &Connection,
    service: &'a str,
) -> Result<Proxy<'a>, zbus::Error> {
    proxy::Builder::<Proxy<'a>>::new(connection)
        .destination(service)?
        .path(PLAYER_PATH)?
        .interface(PROPERTIES_INTERFACE)?
        .cache_properties(CacheProperties::No)
        .build()
        .await
}

/// Full `interface.member` name of a signal, if the header carries both.
pub fn signal_name(message: &Message) -> Option<String> {
    let header = message.header();
    let interface = header.interface()?;
    let member = header.member()?;
    Some(format!("{}.{}", interface, member))
}

pub fn signal_sender(message: &Message) -> String {
    sender_of(&message.header())
}

fn sender_of(header: &Header<'_>) -> String {
    header
        .sender()
        .map(|sender| sender.to_string())
        .unwrap_or_default()
}

/// Classifies a bus message and parses its body.
///
/// Returns `Ok(None)` for anything that is not one of the two watched signals.
pub fn parse_signal(message: &Message) -> Result<Option<BusSignal>, WatcherError> {
    if message.header().message_type() != MessageType::Signal {
        return Ok(None);
    }
    let Some(name) = signal_name(message) else {
        return Ok(None);
    };

    match name.as_str() {
        NAME_OWNER_CHANGED_SIGNAL => {
            let (name, old_owner, new_owner) = message
                .body()
                .deserialize::<(String, String, String)>()
                .map_err(|_| WatcherError::InvalidSignalBody)?;
            Ok(Some(BusSignal::NameOwnerChanged(OwnerChange {
                name,
                old_owner,
                new_owner,
            })))
        }
        PROPERTIES_CHANGED_SIGNAL => {
            let (_interface, changed, _invalidated) = message
                .body()
                .deserialize::<(String, HashMap<String, OwnedValue>, Vec<String>)>()
                .map_err(|_| WatcherError::InvalidSignalBody)?;
            Ok(Some(BusSignal::PropertiesChanged(PropertiesChange {
                sender: signal_sender(message),
                changed: changed_properties(changed),
            })))
        }
        _ => Ok(None),
    }
}

fn changed_properties(changed: HashMap<String, OwnedValue>) -> HashMap<String, PropertyValue> {
    changed
        .into_iter()
        .map(|(key, value)| {
            let lowered = if key == METADATA_PROPERTY {
                metadata_entries(value)
                    .map(PropertyValue::Map)
                    .unwrap_or(PropertyValue::Other)
            } else {
                PropertyValue::from(&*value)
            };
            (key, lowered)
        })
        .collect()
}

fn metadata_entries(value: OwnedValue) -> Result<HashMap<String, PropertyValue>, WatcherError> {
    let entries = HashMap::<String, OwnedValue>::try_from(value)
        .map_err(|_| WatcherError::MetadataFailed)?;
    Ok(entries
        .iter()
        .map(|(key, value)| (key.clone(), PropertyValue::from(&**value)))
        .collect())
}

impl From<&Value<'_>> for PropertyValue {
    fn from(value: &Value<'_>) -> Self {
        match value {
            Value::Value(inner) => PropertyValue::from(&**inner),
            Value::Str(text) => PropertyValue::Text(text.as_str().to_string()),
            Value::Array(array) => array
                .iter()
                .map(|item| match PropertyValue::from(item) {
                    PropertyValue::Text(text) => Some(text),
                    _ => None,
                })
                .collect::<Option<Vec<String>>>()
                .map_or(PropertyValue::Other, PropertyValue::TextList),
            _ => PropertyValue::Other,
        }
    }
}
