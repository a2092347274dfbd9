//! Read-side aggregates over the message log.
//!
//! These queries feed the stats and propagation-analysis menus. They are pure
//! reads; nothing here is replicated or mutated by peers.

use rusqlite::{params, OptionalExtension};

use super::{Store, StoreError};

/// Rolled-up traffic numbers for a time window.
#[derive(Debug, Clone, Default)]
pub struct MessageStats {
    pub total: i64,
    /// (sender_short_name, message count), busiest first, capped at 10.
    pub top_senders: Vec<(String, i64)>,
    pub avg_snr: f64,
}

/// Average signal quality for one hour of the day.
#[derive(Debug, Clone)]
pub struct HourlySnr {
    pub hour: u8,
    pub avg_snr: f64,
    pub avg_rssi: f64,
    pub count: i64,
}

/// Reliability metrics for a single node over a window.
#[derive(Debug, Clone, Default)]
pub struct NodeReliability {
    pub message_count: i64,
    pub avg_snr: f64,
    pub min_snr: f64,
    pub max_snr: f64,
    pub avg_rssi: f64,
}

impl Store {
    /// Message count per channel index since `now - hours`.
    pub fn channel_activity(&self, now: i64, hours: i64) -> Result<Vec<(i64, i64)>, StoreError> {
        let cutoff = now - hours * 3600;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel_index, COUNT(*) AS count
                 FROM message_logs
                 WHERE timestamp >= ?1
                 GROUP BY channel_index
                 ORDER BY count DESC",
            )?;
            let rows = stmt.query_map(params![cutoff], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Total traffic, busiest senders, and average SNR since `now - hours`.
    pub fn message_stats(&self, now: i64, hours: i64) -> Result<MessageStats, StoreError> {
        let cutoff = now - hours * 3600;
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM message_logs WHERE timestamp >= ?1",
                params![cutoff],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT sender_short_name, COUNT(*) AS count
                 FROM message_logs
                 WHERE timestamp >= ?1
                 GROUP BY sender_short_name
                 ORDER BY count DESC
                 LIMIT 10",
            )?;
            let rows = stmt.query_map(params![cutoff], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut top_senders = Vec::new();
            for row in rows {
                top_senders.push(row?);
            }

            let avg_snr: Option<f64> = conn.query_row(
                "SELECT AVG(snr) FROM message_logs WHERE timestamp >= ?1 AND snr IS NOT NULL",
                params![cutoff],
                |row| row.get(0),
            )?;

            Ok(MessageStats {
                total,
                top_senders,
                avg_snr: avg_snr.unwrap_or(0.0),
            })
        })
    }

    /// Average SNR/RSSI grouped by UTC hour of day over the last `days`.
    /// Surfaces the best times of day to work the mesh.
    pub fn hourly_snr_trend(&self, now: i64, days: i64) -> Result<Vec<HourlySnr>, StoreError> {
        let cutoff = now - days * 86_400;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT
                     CAST(strftime('%H', datetime(timestamp, 'unixepoch')) AS INTEGER) AS hour,
                     AVG(snr) AS avg_snr,
                     AVG(rssi) AS avg_rssi,
                     COUNT(*) AS msg_count
                 FROM message_logs
                 WHERE timestamp >= ?1 AND snr IS NOT NULL
                 GROUP BY hour
                 ORDER BY hour ASC",
            )?;
            let rows = stmt.query_map(params![cutoff], |row| {
                Ok(HourlySnr {
                    hour: row.get::<_, i64>(0)? as u8,
                    avg_snr: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    avg_rssi: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    count: row.get(3)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Best and worst per-node peak SNR over the last `days`, each capped at 10.
    pub fn best_worst_snr(
        &self,
        now: i64,
        days: i64,
    ) -> Result<(Vec<(String, f64)>, Vec<(String, f64)>), StoreError> {
        let cutoff = now - days * 86_400;
        self.with_conn(|conn| {
            let mut best_stmt = conn.prepare(
                "SELECT sender_short_name, MAX(snr) AS best_snr
                 FROM message_logs
                 WHERE timestamp >= ?1 AND snr IS NOT NULL
                 GROUP BY sender_id
                 ORDER BY best_snr DESC
                 LIMIT 10",
            )?;
            let rows = best_stmt.query_map(params![cutoff], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            let mut best = Vec::new();
            for row in rows {
                best.push(row?);
            }

            let mut worst_stmt = conn.prepare(
                "SELECT sender_short_name, MIN(snr) AS worst_snr
                 FROM message_logs
                 WHERE timestamp >= ?1 AND snr IS NOT NULL
                 GROUP BY sender_id
                 ORDER BY worst_snr ASC
                 LIMIT 10",
            )?;
            let rows = worst_stmt.query_map(params![cutoff], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            let mut worst = Vec::new();
            for row in rows {
                worst.push(row?);
            }

            Ok((best, worst))
        })
    }

    /// Reliability metrics for one node over the last `days`.
    pub fn node_reliability(
        &self,
        node_id: &str,
        now: i64,
        days: i64,
    ) -> Result<NodeReliability, StoreError> {
        let cutoff = now - days * 86_400;
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT COUNT(*), AVG(snr), MIN(snr), MAX(snr), AVG(rssi)
                     FROM message_logs
                     WHERE sender_id = ?1 AND timestamp >= ?2",
                    params![node_id, cutoff],
                    |row| {
                        Ok(NodeReliability {
                            message_count: row.get(0)?,
                            avg_snr: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                            min_snr: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                            max_snr: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                            avg_rssi: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                        })
                    },
                )
                .optional()?;
            Ok(row.unwrap_or_default())
        })
    }
}
