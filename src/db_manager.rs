//! SQLite play-history store.
//!
//! Each accepted track is written in one transaction that resolves (or
//! creates) the album, track, and people it references and appends a play
//! log entry. Rows are never updated or deleted once written.

use std::path::Path;

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::{errors::WatcherError, metadata::TrackMetadata};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS Album (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS album_title ON Album (title);

    CREATE TABLE IF NOT EXISTS Track (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        externalTrackId TEXT NOT NULL,
        url TEXT NOT NULL,
        album INTEGER REFERENCES Album (id)
    );
    CREATE UNIQUE INDEX IF NOT EXISTS track_url_title ON Track (url, title);

    CREATE TABLE IF NOT EXISTS Person (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS person_name ON Person (name);

    CREATE TABLE IF NOT EXISTS TrackPerson (
        id INTEGER PRIMARY KEY,
        track INTEGER NOT NULL REFERENCES Track (id),
        person INTEGER NOT NULL REFERENCES Person (id)
    );

    CREATE TABLE IF NOT EXISTS PlayLog (
        id INTEGER PRIMARY KEY,
        track INTEGER NOT NULL REFERENCES Track (id),
        timestamp TEXT NOT NULL
    );
";

pub struct DbManager {
    conn: Connection,
}

/// One play log entry joined with its track, album, and credited people.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRecord {
    pub played_at: String,
    pub title: String,
    pub url: String,
    pub album: Option<String>,
    pub people: Vec<String>,
}

impl DbManager {
    /// Opens (creating if needed) the database at `path` and its parent directory.
    pub fn open(path: &Path) -> Result<Self, WatcherError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        info!("DbManager: opened play history at {}", path.display());
        Ok(db_manager)
    }

    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(SCHEMA)
    }

    /// Records one play of `track` and returns the new play log id.
    ///
    /// A record with neither title nor url is skipped and yields `None`.
    /// Any failure rolls back everything written for this play.
    pub fn store_play(&mut self, track: &TrackMetadata) -> Result<Option<i64>, WatcherError> {
        if track.is_placeholder() {
            info!("DbManager: received track with no title or url, skipping");
            return Ok(None);
        }

        let tx = self.conn.transaction()?;
        let track_id = get_or_create_track(&tx, track)?;
        for name in track.credited_people() {
            let person_id = get_or_create_person(&tx, name)?;
            tx.execute(
                "INSERT INTO TrackPerson (track, person) VALUES (?1, ?2)",
                params![track_id, person_id],
            )?;
        }
        tx.execute(
            "INSERT INTO PlayLog (track, timestamp) VALUES (?1, datetime('now', 'localtime'))",
            params![track_id],
        )?;
        let play_id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(
            "DbManager: logged play id={} track_id={} ({})",
            play_id, track_id, track
        );
        Ok(Some(play_id))
    }

    /// Most recent plays first, at most `limit` of them.
    pub fn play_history(&self, limit: usize) -> Result<Vec<PlayRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT PlayLog.timestamp, Track.id, Track.title, Track.url, Album.title
             FROM PlayLog
             JOIN Track ON PlayLog.track = Track.id
             LEFT JOIN Album ON Track.album = Album.id
             ORDER BY PlayLog.id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(1)?,
                PlayRecord {
                    played_at: row.get(0)?,
                    title: row.get(2)?,
                    url: row.get(3)?,
                    album: row.get(4)?,
                    people: Vec::new(),
                },
            ))
        })?;

        let mut people_stmt = self.conn.prepare(
            "SELECT Person.name
             FROM TrackPerson
             JOIN Person ON TrackPerson.person = Person.id
             WHERE TrackPerson.track = ?1
             GROUP BY Person.id
             ORDER BY MIN(TrackPerson.id)",
        )?;
        let mut history = Vec::new();
        for row in rows {
            let (track_id, mut record) = row?;
            let names = people_stmt.query_map(params![track_id], |row| row.get::<_, String>(0))?;
            for name in names {
                record.people.push(name?);
            }
            history.push(record);
        }
        Ok(history)
    }
}

// (url, title) identifies a track. An existing row is reused as-is, so its
// album and external id keep the values from the first play.
fn get_or_create_track(tx: &Transaction<'_>, track: &TrackMetadata) -> Result<i64, WatcherError> {
    let existing = tx
        .query_row(
            "SELECT id FROM Track WHERE url = ?1 AND title = ?2",
            params![track.url, track.title],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let album_id = if track.album.is_empty() {
        None
    } else {
        Some(get_or_create_album(tx, &track.album)?)
    };
    tx.execute(
        "INSERT INTO Track (title, externalTrackId, url, album) VALUES (?1, ?2, ?3, ?4)",
        params![track.title, track.external_track_id, track.url, album_id],
    )?;
    Ok(tx.last_insert_rowid())
}

fn get_or_create_album(tx: &Transaction<'_>, title: &str) -> Result<i64, WatcherError> {
    if title.is_empty() {
        return Err(WatcherError::InvalidAlbumName);
    }
    let existing = tx
        .query_row(
            "SELECT id FROM Album WHERE title = ?1",
            params![title],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    tx.execute("INSERT INTO Album (title) VALUES (?1)", params![title])?;
    Ok(tx.last_insert_rowid())
}

fn get_or_create_person(tx: &Transaction<'_>, name: &str) -> Result<i64, rusqlite::Error> {
    let existing = tx
        .query_row(
            "SELECT id FROM Person WHERE name = ?1",
            params![name],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    tx.execute("INSERT INTO Person (name) VALUES (?1)", params![name])?;
    Ok(tx.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::{get_or_create_album, DbManager};
    use crate::{errors::WatcherError, metadata::TrackMetadata};
    use rusqlite::params;

    fn count(db: &DbManager, table: &str) -> i64 {
        db.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .expect("count query should succeed")
    }

    fn track(title: &str, url: &str) -> TrackMetadata {
        TrackMetadata {
            title: title.to_string(),
            url: url.to_string(),
            ..TrackMetadata::default()
        }
    }

    #[test]
    fn test_placeholder_track_is_skipped() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");

        let stored = db
            .store_play(&TrackMetadata {
                album: "Only An Album".to_string(),
                artists: vec!["Someone".to_string()],
                ..TrackMetadata::default()
            })
            .expect("placeholder store should not fail");

        assert_eq!(stored, None);
        for table in ["Album", "Track", "Person", "TrackPerson", "PlayLog"] {
            assert_eq!(count(&db, table), 0, "{} should be empty", table);
        }
    }

    #[test]
    fn test_track_without_album_has_null_album_reference() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");

        db.store_play(&track("Song A", "file:///a.mp3"))
            .expect("store should succeed");

        let album: Option<i64> = db
            .conn
            .query_row(
                "SELECT album FROM Track WHERE title = 'Song A'",
                [],
                |row| row.get(0),
            )
            .expect("track row should exist");
        assert_eq!(album, None);
        assert_eq!(count(&db, "Album"), 0);
        assert_eq!(count(&db, "PlayLog"), 1);
        assert_eq!(count(&db, "Person"), 0);
    }

    #[test]
    fn test_same_url_and_title_reuse_the_first_track_row() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        let first = TrackMetadata {
            album: "Original".to_string(),
            external_track_id: "id-1".to_string(),
            ..track("Song", "file:///song.flac")
        };
        let second = TrackMetadata {
            album: "Deluxe Edition".to_string(),
            external_track_id: "id-2".to_string(),
            ..first.clone()
        };

        db.store_play(&first).expect("first store should succeed");
        db.store_play(&second).expect("second store should succeed");

        assert_eq!(count(&db, "Track"), 1);
        assert_eq!(count(&db, "PlayLog"), 2);
        let (external_id, album_title): (String, String) = db
            .conn
            .query_row(
                "SELECT Track.externalTrackId, Album.title
                 FROM Track JOIN Album ON Track.album = Album.id",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("joined row should exist");
        assert_eq!(external_id, "id-1");
        assert_eq!(album_title, "Original");
        let distinct_tracks: i64 = db
            .conn
            .query_row("SELECT COUNT(DISTINCT track) FROM PlayLog", [], |row| {
                row.get(0)
            })
            .expect("count query should succeed");
        assert_eq!(distinct_tracks, 1);
    }

    #[test]
    fn test_albums_are_shared_by_title() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");

        db.store_play(&TrackMetadata {
            album: "Kind of Blue".to_string(),
            ..track("So What", "file:///1.flac")
        })
        .expect("store should succeed");
        db.store_play(&TrackMetadata {
            album: "Kind of Blue".to_string(),
            ..track("Freddie Freeloader", "file:///2.flac")
        })
        .expect("store should succeed");

        assert_eq!(count(&db, "Album"), 1);
        assert_eq!(count(&db, "Track"), 2);
    }

    #[test]
    fn test_person_credited_in_two_roles_is_linked_once_per_play() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        let credited = TrackMetadata {
            artists: vec!["A. Composer".to_string()],
            composers: vec!["A. Composer".to_string()],
            ..track("Etude", "file:///etude.ogg")
        };

        db.store_play(&credited).expect("store should succeed");

        assert_eq!(count(&db, "Person"), 1);
        let links: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM TrackPerson
                 JOIN Person ON TrackPerson.person = Person.id
                 WHERE Person.name = ?1",
                params!["A. Composer"],
                |row| row.get(0),
            )
            .expect("count query should succeed");
        assert_eq!(links, 1);
    }

    #[test]
    fn test_repeated_plays_append_new_person_links() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        let credited = TrackMetadata {
            album_artists: vec!["Band".to_string()],
            artists: vec!["Singer".to_string()],
            ..track("Single", "file:///single.mp3")
        };

        db.store_play(&credited).expect("store should succeed");
        db.store_play(&credited).expect("store should succeed");

        assert_eq!(count(&db, "Person"), 2);
        assert_eq!(count(&db, "TrackPerson"), 4);
        assert_eq!(count(&db, "PlayLog"), 2);
    }

    #[test]
    fn test_failed_person_link_rolls_back_the_whole_play() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.conn
            .execute_batch(
                "CREATE TRIGGER reject_links BEFORE INSERT ON TrackPerson
                 BEGIN SELECT RAISE(ABORT, 'link rejected'); END;",
            )
            .expect("trigger should be created");

        let result = db.store_play(&TrackMetadata {
            album: "Doomed".to_string(),
            artists: vec!["Nobody".to_string()],
            ..track("Never Stored", "file:///never.mp3")
        });

        assert!(matches!(result, Err(WatcherError::Db(_))));
        for table in ["Album", "Track", "Person", "TrackPerson", "PlayLog"] {
            assert_eq!(count(&db, table), 0, "{} should be empty", table);
        }
    }

    #[test]
    fn test_empty_album_name_is_rejected() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        let tx = db.conn.transaction().expect("transaction should start");

        let result = get_or_create_album(&tx, "");

        assert!(matches!(result, Err(WatcherError::InvalidAlbumName)));
    }

    #[test]
    fn test_play_history_lists_latest_plays_with_credits() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.store_play(&TrackMetadata {
            album: "Album".to_string(),
            album_artists: vec!["Band".to_string()],
            artists: vec!["Singer".to_string(), "Band".to_string()],
            ..track("First", "file:///1.mp3")
        })
        .expect("store should succeed");
        db.store_play(&track("Second", "file:///2.mp3"))
            .expect("store should succeed");
        db.store_play(&track("First", "file:///1.mp3"))
            .expect("store should succeed");

        let history = db.play_history(2).expect("history query should succeed");

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].title, "First");
        assert_eq!(history[0].album.as_deref(), Some("Album"));
        assert_eq!(history[0].people, vec!["Band", "Singer"]);
        assert_eq!(history[1].title, "Second");
        assert_eq!(history[1].album, None);
        assert!(history[1].people.is_empty());
    }

    #[test]
    fn test_play_log_timestamp_comes_from_the_database_clock() {
        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");

        let play_id = db
            .store_play(&track("Song", "file:///song.mp3"))
            .expect("store should succeed")
            .expect("a play should be logged");

        let timestamp: String = db
            .conn
            .query_row(
                "SELECT timestamp FROM PlayLog WHERE id = ?1",
                params![play_id],
                |row| row.get(0),
            )
            .expect("play row should exist");
        assert_eq!(timestamp.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn test_open_creates_missing_directories_and_is_reopenable() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("nested").join("music-watcher").join("data.db");

        {
            let mut db = DbManager::open(&path).expect("first open should succeed");
            db.store_play(&track("Song", "file:///song.mp3"))
                .expect("store should succeed");
        }
        let db = DbManager::open(&path).expect("reopen should succeed");

        assert!(path.exists());
        assert_eq!(count(&db, "PlayLog"), 1);
    }
}
