//! Embedded store joining L1 and L2 sides of each withdrawal.
//!
//! `txs.uid` is the cross-chain join key. Header tables double as cursors:
//! `l2_headers` is what reorg rollback rewinds, `l1_headers` records what the
//! raw-block feed has ingested. All multi-row changes commit atomically.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::DbError;

#[derive(Debug, Clone)]
pub struct L1HeaderRow {
    pub height: u64,
    pub hash: String,
    pub version: i32,
    pub prev_hash: String,
    pub merkle_root: String,
    pub timestamp: u64,
    pub created_at: u64,
    pub bits: u32,
    pub nonce: u32,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct L1TxRow {
    pub uid: u64,
    pub txhash: String,
    pub height: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct L2HeaderRow {
    pub height: u64,
    pub hash: String,
    pub timestamp: u64,
    pub created_at: u64,
}

#[derive(Debug, Clone)]
pub struct L2EventRow {
    pub uid: u64,
    pub txhash: String,
    pub height: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default)]
pub struct JoinedTx {
    pub uid: u64,
    pub l2_txhash: Option<String>,
    pub l2_height: Option<u64>,
    pub l2_timestamp: Option<u64>,
    pub l1_txhash: Option<String>,
    pub l1_height: Option<u64>,
    pub l1_timestamp: Option<u64>,
}

impl JoinedTx {
    pub fn is_matched(&self) -> bool {
        self.l1_txhash.is_some() && self.l2_txhash.is_some()
    }
}

pub struct BridgeDb {
    conn: Connection,
}

impl BridgeDb {
    pub fn open(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).map_err(|err| DbError::Open {
            path: path.to_string(),
            reason: err.to_string(),
        })?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory().map_err(|err| DbError::Open {
            path: ":memory:".to_string(),
            reason: err.to_string(),
        })?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS l1_headers (
                height      INTEGER PRIMARY KEY,
                hash        TEXT NOT NULL,
                version     INTEGER NOT NULL,
                prev_hash   TEXT NOT NULL,
                merkle_root TEXT NOT NULL,
                timestamp   INTEGER NOT NULL,
                create_at   INTEGER NOT NULL,
                bits        INTEGER NOT NULL,
                nonce       INTEGER NOT NULL,
                size_bytes  INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS l2_headers (
                height    INTEGER PRIMARY KEY,
                hash      TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                create_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS txs (
                uid          INTEGER PRIMARY KEY,
                l2_txhash    TEXT,
                l2_height    INTEGER,
                l2_timestamp INTEGER,
                l1_txhash    TEXT,
                l1_height    INTEGER,
                l1_timestamp INTEGER
            );",
        )?;
        Ok(())
    }

    /// Persist one L1 block: header plus the matched outputs, atomically.
    pub fn insert_l1_block(
        &mut self,
        header: &L1HeaderRow,
        txs: &[L1TxRow],
    ) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO l1_headers
             (height, hash, version, prev_hash, merkle_root, timestamp, create_at, bits, nonce, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                header.height as i64,
                header.hash,
                header.version,
                header.prev_hash,
                header.merkle_root,
                header.timestamp as i64,
                header.created_at as i64,
                header.bits as i64,
                header.nonce as i64,
                header.size_bytes as i64,
            ],
        )?;
        for row in txs {
            tx.execute(
                "INSERT INTO txs (uid, l1_txhash, l1_height, l1_timestamp)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(uid) DO UPDATE SET
                     l1_txhash = excluded.l1_txhash,
                     l1_height = excluded.l1_height,
                     l1_timestamp = excluded.l1_timestamp",
                params![
                    row.uid as i64,
                    row.txhash,
                    row.height as i64,
                    row.timestamp as i64
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Persist one L2 block: withdrawal events plus the header, atomically.
    pub fn apply_l2_block(
        &mut self,
        header: &L2HeaderRow,
        events: &[L2EventRow],
    ) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        for row in events {
            tx.execute(
                "INSERT INTO txs (uid, l2_txhash, l2_height, l2_timestamp)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(uid) DO UPDATE SET
                     l2_txhash = excluded.l2_txhash,
                     l2_height = excluded.l2_height,
                     l2_timestamp = excluded.l2_timestamp",
                params![
                    row.uid as i64,
                    row.txhash,
                    row.height as i64,
                    row.timestamp as i64
                ],
            )?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO l2_headers (height, hash, timestamp, create_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                header.height as i64,
                header.hash,
                header.timestamp as i64,
                header.created_at as i64
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Rewind one L2 height: drop its header and clear the `l2_*` side of any
    /// rows tagged to it. One transaction so a crash cannot half-rewind.
    pub fn rollback_l2(&mut self, height: u64) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM l2_headers WHERE height = ?1",
            params![height as i64],
        )?;
        tx.execute(
            "UPDATE txs SET l2_txhash = NULL, l2_height = NULL, l2_timestamp = NULL
             WHERE l2_height = ?1",
            params![height as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn l2_header_at(&self, height: u64) -> Result<Option<L2HeaderRow>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT height, hash, timestamp, create_at FROM l2_headers WHERE height = ?1",
                params![height as i64],
                |row| {
                    Ok(L2HeaderRow {
                        height: row.get::<_, i64>(0)? as u64,
                        hash: row.get(1)?,
                        timestamp: row.get::<_, i64>(2)? as u64,
                        created_at: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn l1_header_at(&self, height: u64) -> Result<Option<L1HeaderRow>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT height, hash, version, prev_hash, merkle_root, timestamp, create_at,
                        bits, nonce, size_bytes
                 FROM l1_headers WHERE height = ?1",
                params![height as i64],
                |row| {
                    Ok(L1HeaderRow {
                        height: row.get::<_, i64>(0)? as u64,
                        hash: row.get(1)?,
                        version: row.get(2)?,
                        prev_hash: row.get(3)?,
                        merkle_root: row.get(4)?,
                        timestamp: row.get::<_, i64>(5)? as u64,
                        created_at: row.get::<_, i64>(6)? as u64,
                        bits: row.get::<_, i64>(7)? as u32,
                        nonce: row.get::<_, i64>(8)? as u32,
                        size_bytes: row.get::<_, i64>(9)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn joined_tx(&self, uid: u64) -> Result<Option<JoinedTx>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT uid, l2_txhash, l2_height, l2_timestamp, l1_txhash, l1_height, l1_timestamp
                 FROM txs WHERE uid = ?1",
                params![uid as i64],
                |row| {
                    Ok(JoinedTx {
                        uid: row.get::<_, i64>(0)? as u64,
                        l2_txhash: row.get(1)?,
                        l2_height: row.get::<_, Option<i64>>(2)?.map(|v| v as u64),
                        l2_timestamp: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
                        l1_txhash: row.get(4)?,
                        l1_height: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
                        l1_timestamp: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
