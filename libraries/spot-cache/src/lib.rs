//! Durable local copy of the user's favorited spots.
//!
//! The registry stays the source of truth. This cache only lets a fresh session show the last known
//! favorites before the first snapshot arrives, and keeps the favorites screen usable offline.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tether::{Category, Coordinate, FavoriteRecord};

pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cache schema version {found} is newer than this build supports ({supported})")]
    UnsupportedVersion { found: i64, supported: i64 },
}

/// One row of the cache.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedSpot {
    pub row_id: i64,
    /// Rows written before spots had provider identifiers have none.
    pub place_id: Option<String>,
    pub name: String,
    pub address: String,
    pub category: Category,
    pub coordinate: Option<Coordinate>,
    pub cached_at: DateTime<Utc>,
}

impl CachedSpot {
    /// `None` for legacy rows without an identifier: nothing can be reconciled against them.
    pub fn to_record(&self) -> Option<FavoriteRecord> {
        let id = self.place_id.as_ref()?;
        Some(FavoriteRecord {
            id: id.clone(),
            name: self.name.clone(),
            address: self.address.clone(),
            category: self.category,
            coordinate: self.coordinate,
        })
    }
}

pub struct SpotCache {
    connection: Connection,
}

const CREATE_SPOTS: &str = "
    CREATE TABLE IF NOT EXISTS spots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        place_id TEXT UNIQUE ON CONFLICT REPLACE,
        name TEXT NOT NULL,
        address TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL,
        latitude REAL,
        longitude REAL,
        favorite INTEGER NOT NULL DEFAULT 1,
        cached_at TEXT NOT NULL,
        UNIQUE(name, latitude, longitude) ON CONFLICT REPLACE
    )";

const SELECT_SPOT: &str =
    "SELECT id, place_id, name, address, category, latitude, longitude, cached_at FROM spots";

impl SpotCache {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let connection = Connection::open(path.as_ref())?;
        log::debug!("Opened spot cache at {}", path.as_ref().display());
        Self::with_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> Result<Self, CacheError> {
        let cache = SpotCache { connection };
        cache.migrate()?;
        Ok(cache)
    }

    fn migrate(&self) -> Result<(), CacheError> {
        match self.schema_version()? {
            0 => {
                self.connection.execute_batch(CREATE_SPOTS)?;
                self.connection
                    .pragma_update(None, "user_version", SCHEMA_VERSION)?;
                log::info!("Created spot cache schema v{SCHEMA_VERSION}");
                Ok(())
            }
            SCHEMA_VERSION => Ok(()),
            found => Err(CacheError::UnsupportedVersion {
                found,
                supported: SCHEMA_VERSION,
            }),
        }
    }

    pub fn schema_version(&self) -> Result<i64, CacheError> {
        Ok(self
            .connection
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    /// Insert or replace the whole record. A row with the same identifier, or the same
    /// name at the same coordinates, is replaced.
    pub fn upsert(&self, record: &FavoriteRecord) -> Result<(), CacheError> {
        insert_record(&self.connection, record, Utc::now())
    }

    /// Upsert several records in a single transaction.
    pub fn upsert_all<'a>(
        &self,
        records: impl IntoIterator<Item = &'a FavoriteRecord>,
    ) -> Result<usize, CacheError> {
        let tx = self.connection.unchecked_transaction()?;
        let now = Utc::now();
        let mut count = 0;
        for record in records {
            insert_record(&tx, record, now)?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn get(&self, place_id: &str) -> Result<Option<CachedSpot>, CacheError> {
        let mut stmt = self
            .connection
            .prepare(&format!("{SELECT_SPOT} WHERE place_id = ?1"))?;
        Ok(stmt.query_row([place_id], spot_from_row).optional()?)
    }

    /// Every cached favorite, ordered by name ignoring case. Includes legacy rows.
    pub fn favorites(&self) -> Result<Vec<CachedSpot>, CacheError> {
        let mut stmt = self
            .connection
            .prepare(&format!("{SELECT_SPOT} WHERE favorite = 1 ORDER BY name COLLATE NOCASE"))?;
        let spots = stmt
            .query_map([], spot_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(spots)
    }

    /// Identified favorites as registry records, for the favorites screen fallback.
    pub fn favorite_records(&self) -> Result<Vec<FavoriteRecord>, CacheError> {
        Ok(self
            .favorites()?
            .iter()
            .filter_map(CachedSpot::to_record)
            .collect())
    }

    pub fn favorite_ids(&self) -> Result<Vec<String>, CacheError> {
        let mut stmt = self.connection.prepare(
            "SELECT place_id FROM spots WHERE favorite = 1 AND place_id IS NOT NULL",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Returns whether a row was removed.
    pub fn delete(&self, place_id: &str) -> Result<bool, CacheError> {
        let removed = self
            .connection
            .execute("DELETE FROM spots WHERE place_id = ?1", [place_id])?;
        Ok(removed > 0)
    }

    pub fn delete_all(&self) -> Result<usize, CacheError> {
        Ok(self.connection.execute("DELETE FROM spots", [])?)
    }

    /// Drop identified rows whose identifier is not in `place_ids`. Legacy rows stay.
    pub fn retain_only<'a>(
        &self,
        place_ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<usize, CacheError> {
        let keep: HashSet<&str> = place_ids.into_iter().collect();
        let tx = self.connection.unchecked_transaction()?;

        let stale: Vec<String> = {
            let mut stmt = tx.prepare("SELECT place_id FROM spots WHERE place_id IS NOT NULL")?;
            let cached = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            cached
                .into_iter()
                .filter(|id| !keep.contains(id.as_str()))
                .collect()
        };
        for id in &stale {
            tx.execute("DELETE FROM spots WHERE place_id = ?1", [id])?;
        }
        tx.commit()?;

        if !stale.is_empty() {
            log::debug!("Pruned {} spots no longer favorited", stale.len());
        }
        Ok(stale.len())
    }

    /// Identified favorites as a pretty-printed JSON array of records.
    pub fn export_json(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string_pretty(&self.favorite_records()?)?)
    }
}

fn insert_record(
    connection: &Connection,
    record: &FavoriteRecord,
    cached_at: DateTime<Utc>,
) -> Result<(), CacheError> {
    connection.execute(
        "INSERT INTO spots (place_id, name, address, category, latitude, longitude, favorite, cached_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
        params![
            record.id,
            record.name,
            record.address,
            record.category.as_str(),
            record.coordinate.map(|c| c.latitude),
            record.coordinate.map(|c| c.longitude),
            cached_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn spot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedSpot> {
    let category: String = row.get("category")?;
    let latitude: Option<f64> = row.get("latitude")?;
    let longitude: Option<f64> = row.get("longitude")?;
    let cached_at: String = row.get("cached_at")?;
    let cached_at = DateTime::parse_from_rfc3339(&cached_at)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(CachedSpot {
        row_id: row.get("id")?,
        place_id: row.get("place_id")?,
        name: row.get("name")?,
        address: row.get("address")?,
        category: Category::from_tag(&category),
        coordinate: latitude.zip(longitude).map(|(lat, lng)| Coordinate::new(lat, lng)),
        cached_at,
    })
}
