use std::{path::Path, sync::Mutex};

use anyhow::Result;
use log::debug;
#[cfg(test)]
use mockall::automock;
use rusqlite::{Connection, ErrorCode};

use crate::models::{FlushRecord, validate_camera_id};

/// Sink for closed minute windows.
#[cfg_attr(test, automock)]
pub trait RecordStore: Send + Sync {
    /// Persists one minute record.
    fn append(&self, record: &FlushRecord) -> Result<()>;
}

/// SQLite store keeping one history table per camera.
///
/// Lane arrays are stored as JSON text columns; `(date, time)` is unique per
/// table so a retried or irregular flush cannot double-write a minute.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open(path)?),
        })
    }

    /// Opens a fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Creates the camera's history table if it does not exist yet.
    pub fn ensure_camera(&self, camera_id: &str) -> Result<()> {
        let table = table_name(camera_id)?;
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY,
                    date TEXT NOT NULL,
                    time TEXT NOT NULL,
                    day_of_week TEXT NOT NULL,
                    lane_counts TEXT NOT NULL,
                    lane_avg_speeds TEXT NOT NULL,
                    UNIQUE (date, time)
                );
                "#
            )
            .as_str(),
        )?;
        Ok(())
    }

    /// The most recent `limit` records of a camera, newest first.
    pub fn recent(&self, camera_id: &str, limit: usize) -> Result<Vec<FlushRecord>> {
        let table = table_name(camera_id)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            format!(
                "SELECT date, time, day_of_week, lane_counts, lane_avg_speeds \
                 FROM {table} ORDER BY date DESC, time DESC LIMIT ?1;"
            )
            .as_str(),
        )?;
        let records = stmt
            .query_map([limit as i64], |row| {
                Ok(FlushRecord {
                    camera_id: camera_id.to_string(),
                    date: row.get(0)?,
                    time: row.get(1)?,
                    day_of_week: row.get(2)?,
                    lane_counts: serde_json::from_str(&row.get::<_, String>(3)?)
                        .unwrap_or_default(),
                    lane_avg_speeds: serde_json::from_str(&row.get::<_, String>(4)?)
                        .unwrap_or_default(),
                })
            })?
            .filter_map(|record| record.ok())
            .collect::<Vec<_>>();
        Ok(records)
    }
}

impl RecordStore for Database {
    /// Inserts the record, treating a duplicate minute as already persisted.
    fn append(&self, record: &FlushRecord) -> Result<()> {
        let table = table_name(&record.camera_id)?;
        let lane_counts = serde_json::to_string(&record.lane_counts)?;
        let lane_avg_speeds = serde_json::to_string(&record.lane_avg_speeds)?;
        let conn = self.conn.lock().unwrap();
        let stmt = format!(
            "INSERT INTO {table} (date, time, day_of_week, lane_counts, lane_avg_speeds) \
             VALUES (?1, ?2, ?3, ?4, ?5);"
        );
        let inserted = conn.execute(
            &stmt,
            (
                &record.date,
                &record.time,
                &record.day_of_week,
                &lane_counts,
                &lane_avg_speeds,
            ),
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(err) if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                debug!(
                    target: "database",
                    "{} already has a record for {} {}",
                    record.camera_id, record.date, record.time
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn table_name(camera_id: &str) -> Result<&str> {
    validate_camera_id(camera_id)?;
    Ok(camera_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(camera_id: &str, date: &str, time: &str, counts: Vec<u64>) -> FlushRecord {
        FlushRecord {
            camera_id: camera_id.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            day_of_week: "Monday".to_string(),
            lane_counts: counts,
            lane_avg_speeds: vec![0.0],
        }
    }

    #[test]
    fn append_and_recent_round_trip() {
        let database = Database::open_in_memory().unwrap();
        database.ensure_camera("CAM01_HW_I90").unwrap();

        database
            .append(&record("CAM01_HW_I90", "2024-05-06", "14:30", vec![3]))
            .unwrap();

        let records = database.recent("CAM01_HW_I90", 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, "2024-05-06");
        assert_eq!(records[0].time, "14:30");
        assert_eq!(records[0].lane_counts, vec![3]);
    }

    #[test]
    fn recent_returns_newest_first_across_days() {
        let database = Database::open_in_memory().unwrap();
        database.ensure_camera("CAM01_HW_I90").unwrap();

        database
            .append(&record("CAM01_HW_I90", "2024-05-06", "23:59", vec![1]))
            .unwrap();
        database
            .append(&record("CAM01_HW_I90", "2024-05-07", "00:00", vec![2]))
            .unwrap();
        database
            .append(&record("CAM01_HW_I90", "2024-05-07", "00:01", vec![3]))
            .unwrap();

        let records = database.recent("CAM01_HW_I90", 2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].lane_counts, vec![3]);
        assert_eq!(records[1].lane_counts, vec![2]);
    }

    #[test]
    fn duplicate_minute_is_tolerated() {
        let database = Database::open_in_memory().unwrap();
        database.ensure_camera("CAM01_HW_I90").unwrap();

        database
            .append(&record("CAM01_HW_I90", "2024-05-06", "14:30", vec![3]))
            .unwrap();
        database
            .append(&record("CAM01_HW_I90", "2024-05-06", "14:30", vec![9]))
            .unwrap();

        let records = database.recent("CAM01_HW_I90", 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lane_counts, vec![3]);
    }

    #[test]
    fn cameras_do_not_share_history() {
        let database = Database::open_in_memory().unwrap();
        database.ensure_camera("CAM01_HW_I90").unwrap();
        database.ensure_camera("CAM02_HW_I5").unwrap();

        database
            .append(&record("CAM01_HW_I90", "2024-05-06", "14:30", vec![3]))
            .unwrap();

        assert_eq!(database.recent("CAM01_HW_I90", 10).unwrap().len(), 1);
        assert!(database.recent("CAM02_HW_I5", 10).unwrap().is_empty());
    }

    #[test]
    fn append_rejects_invalid_camera_id() {
        let database = Database::open_in_memory().unwrap();

        let result = database.append(&record("bad id", "2024-05-06", "14:30", vec![3]));

        assert!(result.is_err());
    }
}
