//! Bus watcher event loop.
//!
//! A single loop reads bus signals and shutdown signals and handles each bus
//! signal to completion before reading the next one. Handler failures are
//! logged and never stop the loop.

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::signal::unix::{signal, SignalKind};
use zbus::Message;

use crate::{
    errors::WatcherError,
    metadata::{decode_metadata, is_same_track, PropertyValue, TrackMetadata},
    player_registry::PlayerRegistry,
    protocol::{
        BusSignal, OwnerChange, Presence, PropertiesChange, METADATA_PROPERTY,
        PLAYBACK_STATUS_PROPERTY,
    },
    session_bus::{parse_signal, signal_name, signal_sender, PlayerBus, SessionBus},
};

/// Watches players on a bus and reports each newly played track.
pub struct PlayerWatcher<B> {
    bus: B,
    registry: PlayerRegistry,
}

impl<B: PlayerBus> PlayerWatcher<B> {
    pub fn new(bus: B, registry: PlayerRegistry) -> Self {
        Self { bus, registry }
    }

    /// Routes one parsed signal to its handler.
    ///
    /// `on_track` runs at most once, and only for a track that differs from the
    /// player's previous one. Its error is returned like any handler error.
    pub async fn dispatch<F>(
        &mut self,
        bus_signal: BusSignal,
        on_track: &mut F,
    ) -> Result<(), WatcherError>
    where
        F: FnMut(&TrackMetadata) -> Result<(), WatcherError>,
    {
        match bus_signal {
            BusSignal::NameOwnerChanged(change) => self.handle_owner_change(change, on_track).await,
            BusSignal::PropertiesChanged(change) => self.handle_properties_change(change, on_track),
        }
    }

    async fn handle_owner_change<F>(
        &mut self,
        change: OwnerChange,
        on_track: &mut F,
    ) -> Result<(), WatcherError>
    where
        F: FnMut(&TrackMetadata) -> Result<(), WatcherError>,
    {
        if !change.is_player() {
            return Ok(());
        }

        match change.presence() {
            Presence::Connected => {
                self.registry.register(&self.bus, &change.name).await?;
                if self.registry.is_filtered(&change.name) {
                    debug!(
                        "PlayerWatcher: ignoring filtered player service={}",
                        change.name
                    );
                    return Ok(());
                }
                let track = self.bus.player_metadata(&change.name).await?;
                info!(
                    "PlayerWatcher: player connected service={} ({})",
                    change.name, track
                );
                let result = on_track(&track);
                self.registry.replace_last_track(&change.name, track);
                result
            }
            Presence::Disconnected => {
                info!("PlayerWatcher: player disconnected service={}", change.name);
                self.registry.unregister(&change.name);
                Ok(())
            }
            Presence::Unchanged => Ok(()),
        }
    }

    fn handle_properties_change<F>(
        &mut self,
        change: PropertiesChange,
        on_track: &mut F,
    ) -> Result<(), WatcherError>
    where
        F: FnMut(&TrackMetadata) -> Result<(), WatcherError>,
    {
        let Some(service) = self.registry.resolve(&change.sender).map(str::to_string) else {
            warn!(
                "PlayerWatcher: property change from unknown sender={}, ignoring",
                change.sender
            );
            return Ok(());
        };
        if self.registry.is_filtered(&service) {
            return Ok(());
        }

        match change.changed.get(METADATA_PROPERTY) {
            Some(PropertyValue::Map(entries)) => {
                let track = decode_metadata(entries);
                let is_new = self
                    .registry
                    .last_track(&service)
                    .map_or(true, |previous| !is_same_track(previous, &track));
                let result = if is_new {
                    info!("PlayerWatcher: new track service={} ({})", service, track);
                    on_track(&track)
                } else {
                    debug!(
                        "PlayerWatcher: repeated metadata service={} ({})",
                        service, track
                    );
                    Ok(())
                };
                self.registry.replace_last_track(&service, track);
                result
            }
            Some(_) => Err(WatcherError::MetadataFailed),
            None if change.changed.contains_key(PLAYBACK_STATUS_PROPERTY) => {
                debug!("PlayerWatcher: playback status change service={}", service);
                Ok(())
            }
            None => Err(WatcherError::MetadataFailed),
        }
    }
}

impl PlayerWatcher<SessionBus> {
    /// Runs until SIGINT or SIGTERM. Fails only if subscribing does.
    pub async fn run<F>(&mut self, mut on_track: F) -> Result<(), WatcherError>
    where
        F: FnMut(&TrackMetadata) -> Result<(), WatcherError>,
    {
        let mut stream = self.bus.subscribe().await?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        info!("PlayerWatcher: watching for players");

        loop {
            tokio::select! {
                message = stream.next() => {
                    match message {
                        Some(Ok(message)) => self.process_message(&message, &mut on_track).await,
                        Some(Err(err)) => warn!("PlayerWatcher: failed to read bus message: {}", err),
                        None => {
                            warn!("PlayerWatcher: bus message stream closed");
                            return Ok(());
                        }
                    }
                }
                _ = interrupt.recv() => {
                    info!("PlayerWatcher: received shutdown signal");
                    return Ok(());
                }
                _ = terminate.recv() => {
                    info!("PlayerWatcher: received shutdown signal");
                    return Ok(());
                }
            }
        }
    }

    async fn process_message<F>(&mut self, message: &Message, on_track: &mut F)
    where
        F: FnMut(&TrackMetadata) -> Result<(), WatcherError>,
    {
        let result = match parse_signal(message) {
            Ok(Some(bus_signal)) => {
                let subject = bus_signal.subject().to_string();
                self.dispatch(bus_signal, on_track)
                    .await
                    .map_err(|err| (err, subject))
            }
            Ok(None) => Ok(()),
            Err(err) => Err((err, String::new())),
        };
        if let Err((err, subject)) = result {
            warn!(
                "PlayerWatcher: failed to handle signal={} sender={} subject={}: {}",
                signal_name(message).unwrap_or_default(),
                signal_sender(message),
                subject,
                err
            );
        }
    }
}
