use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension as _, Row, params, params_from_iter};

use super::{
    OrderSide, RecordFilter, ReverseSwap, ReverseSwapFilter, ReverseSwapStatus, ReverseSwapUpdate,
    Swap, SwapFilter, SwapStatus, SwapUpdate,
};

/// Persistence seam used by the nursery.
///
/// `update_*` must be atomic per record and must refuse to write over a
/// record whose status changed since `swap` was read; the returned value is
/// the record as stored after the update.
#[async_trait]
pub trait SwapRepository: Send + Sync {
    async fn find_swaps(&self, filter: &SwapFilter) -> Result<Vec<Swap>>;
    async fn find_one_swap(&self, filter: &SwapFilter) -> Result<Option<Swap>>;
    async fn update_swap(&self, swap: &Swap, update: SwapUpdate) -> Result<Swap>;

    async fn find_reverse_swaps(&self, filter: &ReverseSwapFilter) -> Result<Vec<ReverseSwap>>;
    async fn find_one_reverse_swap(&self, filter: &ReverseSwapFilter)
    -> Result<Option<ReverseSwap>>;
    async fn update_reverse_swap(
        &self,
        reverse_swap: &ReverseSwap,
        update: ReverseSwapUpdate,
    ) -> Result<ReverseSwap>;
}

const SWAP_COLUMNS: &str = r#"
  id,
  pair,
  order_side,
  preimage_hash,
  status,
  timeout_block_height,
  expected_amount,
  invoice,
  lockup_transaction_id,
  lockup_transaction_vout,
  onchain_amount,
  miner_fee,
  failure_reason
"#;

const REVERSE_SWAP_COLUMNS: &str = r#"
  id,
  pair,
  order_side,
  preimage_hash,
  status,
  timeout_block_height,
  onchain_amount,
  invoice,
  transaction_id,
  transaction_vout,
  miner_fee,
  preimage,
  failure_reason,
  raw_tx
"#;

#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create swap store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store mutex poisoned"))
    }

    pub fn insert_swap(&self, swap: &Swap) -> Result<()> {
        self.conn()?
            .execute(
                r#"
INSERT INTO swaps (
  id,
  pair,
  order_side,
  preimage_hash,
  status,
  timeout_block_height,
  expected_amount,
  invoice,
  lockup_transaction_id,
  lockup_transaction_vout,
  onchain_amount,
  miner_fee,
  failure_reason
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13
)
"#,
                params![
                    &swap.id,
                    swap.pair.to_string(),
                    swap.order_side.as_str(),
                    &swap.preimage_hash,
                    swap.status.as_str(),
                    swap.timeout_block_height,
                    swap.expected_amount.map(to_sql_u64).transpose()?,
                    &swap.invoice,
                    &swap.lockup_transaction_id,
                    swap.lockup_transaction_vout,
                    swap.onchain_amount.map(to_sql_u64).transpose()?,
                    to_sql_u64(swap.miner_fee)?,
                    &swap.failure_reason,
                ],
            )
            .with_context(|| format!("insert swap {}", swap.id))?;
        Ok(())
    }

    pub fn insert_reverse_swap(&self, reverse_swap: &ReverseSwap) -> Result<()> {
        self.conn()?
            .execute(
                r#"
INSERT INTO reverse_swaps (
  id,
  pair,
  order_side,
  preimage_hash,
  status,
  timeout_block_height,
  onchain_amount,
  invoice,
  transaction_id,
  transaction_vout,
  miner_fee,
  preimage,
  failure_reason,
  raw_tx
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14
)
"#,
                params![
                    &reverse_swap.id,
                    reverse_swap.pair.to_string(),
                    reverse_swap.order_side.as_str(),
                    &reverse_swap.preimage_hash,
                    reverse_swap.status.as_str(),
                    reverse_swap.timeout_block_height,
                    to_sql_u64(reverse_swap.onchain_amount)?,
                    &reverse_swap.invoice,
                    &reverse_swap.transaction_id,
                    reverse_swap.transaction_vout,
                    to_sql_u64(reverse_swap.miner_fee)?,
                    &reverse_swap.preimage,
                    &reverse_swap.failure_reason,
                    &reverse_swap.raw_tx,
                ],
            )
            .with_context(|| format!("insert reverse swap {}", reverse_swap.id))?;
        Ok(())
    }

    pub fn get_swap(&self, id: &str) -> Result<Option<Swap>> {
        let conn = self.conn()?;
        select_swap_by_id(&conn, id)
    }

    pub fn get_reverse_swap(&self, id: &str) -> Result<Option<ReverseSwap>> {
        let conn = self.conn()?;
        select_reverse_swap_by_id(&conn, id)
    }

    pub fn select_swaps(&self, filter: &SwapFilter, limit: Option<u32>) -> Result<Vec<Swap>> {
        let (clause, values) = where_clause(filter, SwapStatus::as_str);
        let sql = format!(
            "SELECT {SWAP_COLUMNS} FROM swaps{clause} ORDER BY id{}",
            limit_clause(limit)
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).context("prepare select swaps")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), swap_from_row)
            .context("query swaps")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read swap row")?);
        }
        Ok(out)
    }

    pub fn select_reverse_swaps(
        &self,
        filter: &ReverseSwapFilter,
        limit: Option<u32>,
    ) -> Result<Vec<ReverseSwap>> {
        let (clause, values) = where_clause(filter, ReverseSwapStatus::as_str);
        let sql = format!(
            "SELECT {REVERSE_SWAP_COLUMNS} FROM reverse_swaps{clause} ORDER BY id{}",
            limit_clause(limit)
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).context("prepare select reverse swaps")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), reverse_swap_from_row)
            .context("query reverse swaps")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read reverse swap row")?);
        }
        Ok(out)
    }

    pub fn write_swap_update(&self, swap: &Swap, update: &SwapUpdate) -> Result<Swap> {
        if let Some(next) = update.status
            && next != swap.status
        {
            anyhow::ensure!(
                swap.status.can_transition_to(next),
                "illegal swap status transition for {}: {} -> {}",
                swap.id,
                swap.status,
                next
            );
        }

        let mut sets = Vec::new();
        let mut values = Vec::new();
        if let Some(status) = update.status {
            sets.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(txid) = &update.lockup_transaction_id {
            sets.push("lockup_transaction_id = ?");
            values.push(Value::Text(txid.clone()));
        }
        if let Some(vout) = update.lockup_transaction_vout {
            sets.push("lockup_transaction_vout = ?");
            values.push(Value::Integer(vout.into()));
        }
        if let Some(amount) = update.onchain_amount {
            sets.push("onchain_amount = ?");
            values.push(Value::Integer(to_sql_u64(amount)?));
        }
        if let Some(fee) = update.add_miner_fee {
            sets.push("miner_fee = miner_fee + ?");
            values.push(Value::Integer(to_sql_u64(fee)?));
        }
        if let Some(reason) = &update.failure_reason {
            sets.push("failure_reason = ?");
            values.push(Value::Text(reason.clone()));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction().context("begin swap update")?;
        compare_and_set(&tx, "swaps", &swap.id, swap.status.as_str(), &sets, values)
            .with_context(|| format!("update swap {}", swap.id))?;
        let updated = select_swap_by_id(&tx, &swap.id)?
            .with_context(|| format!("swap not found: {}", swap.id))?;
        tx.commit().context("commit swap update")?;
        Ok(updated)
    }

    pub fn write_reverse_swap_update(
        &self,
        reverse_swap: &ReverseSwap,
        update: &ReverseSwapUpdate,
    ) -> Result<ReverseSwap> {
        if let Some(next) = update.status
            && next != reverse_swap.status
        {
            anyhow::ensure!(
                reverse_swap.status.can_transition_to(next),
                "illegal reverse swap status transition for {}: {} -> {}",
                reverse_swap.id,
                reverse_swap.status,
                next
            );
        }

        let mut sets = Vec::new();
        let mut values = Vec::new();
        if let Some(status) = update.status {
            sets.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(txid) = &update.transaction_id {
            sets.push("transaction_id = ?");
            values.push(Value::Text(txid.clone()));
        }
        if let Some(vout) = update.transaction_vout {
            sets.push("transaction_vout = ?");
            values.push(Value::Integer(vout.into()));
        }
        if let Some(fee) = update.add_miner_fee {
            sets.push("miner_fee = miner_fee + ?");
            values.push(Value::Integer(to_sql_u64(fee)?));
        }
        if let Some(preimage) = &update.preimage {
            sets.push("preimage = ?");
            values.push(Value::Text(preimage.clone()));
        }
        if let Some(reason) = &update.failure_reason {
            sets.push("failure_reason = ?");
            values.push(Value::Text(reason.clone()));
        }
        if let Some(raw_tx) = &update.raw_tx {
            sets.push("raw_tx = ?");
            values.push(Value::Text(raw_tx.clone()));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction().context("begin reverse swap update")?;
        compare_and_set(
            &tx,
            "reverse_swaps",
            &reverse_swap.id,
            reverse_swap.status.as_str(),
            &sets,
            values,
        )
        .with_context(|| format!("update reverse swap {}", reverse_swap.id))?;
        let updated = select_reverse_swap_by_id(&tx, &reverse_swap.id)?
            .with_context(|| format!("reverse swap not found: {}", reverse_swap.id))?;
        tx.commit().context("commit reverse swap update")?;
        Ok(updated)
    }
}

#[async_trait]
impl SwapRepository for SqliteStore {
    async fn find_swaps(&self, filter: &SwapFilter) -> Result<Vec<Swap>> {
        self.select_swaps(filter, None)
    }

    async fn find_one_swap(&self, filter: &SwapFilter) -> Result<Option<Swap>> {
        Ok(self.select_swaps(filter, Some(1))?.into_iter().next())
    }

    async fn update_swap(&self, swap: &Swap, update: SwapUpdate) -> Result<Swap> {
        self.write_swap_update(swap, &update)
    }

    async fn find_reverse_swaps(&self, filter: &ReverseSwapFilter) -> Result<Vec<ReverseSwap>> {
        self.select_reverse_swaps(filter, None)
    }

    async fn find_one_reverse_swap(
        &self,
        filter: &ReverseSwapFilter,
    ) -> Result<Option<ReverseSwap>> {
        Ok(self
            .select_reverse_swaps(filter, Some(1))?
            .into_iter()
            .next())
    }

    async fn update_reverse_swap(
        &self,
        reverse_swap: &ReverseSwap,
        update: ReverseSwapUpdate,
    ) -> Result<ReverseSwap> {
        self.write_reverse_swap_update(reverse_swap, &update)
    }
}

/// Applies `sets` only while the row still has `expected_status`.
fn compare_and_set(
    conn: &Connection,
    table: &str,
    id: &str,
    expected_status: &str,
    sets: &[&str],
    mut values: Vec<Value>,
) -> Result<()> {
    if sets.is_empty() {
        return Ok(());
    }

    let sql = format!(
        "UPDATE {table} SET {} WHERE id = ? AND status = ?",
        sets.join(", ")
    );
    values.push(Value::Text(id.to_string()));
    values.push(Value::Text(expected_status.to_string()));

    let rows = conn
        .execute(&sql, params_from_iter(values.iter()))
        .context("execute update")?;
    if rows == 1 {
        return Ok(());
    }

    let current: Option<String> = conn
        .query_row(
            &format!("SELECT status FROM {table} WHERE id = ?1"),
            params![id],
            |row| row.get(0),
        )
        .optional()
        .context("read current status")?;
    match current {
        None => anyhow::bail!("record not found: {id}"),
        Some(status) => anyhow::bail!(
            "stale record {id}: expected status {expected_status}, found {status}"
        ),
    }
}

fn select_swap_by_id(conn: &Connection, id: &str) -> Result<Option<Swap>> {
    conn.query_row(
        &format!("SELECT {SWAP_COLUMNS} FROM swaps WHERE id = ?1"),
        params![id],
        swap_from_row,
    )
    .optional()
    .with_context(|| format!("get swap {id}"))
}

fn select_reverse_swap_by_id(conn: &Connection, id: &str) -> Result<Option<ReverseSwap>> {
    conn.query_row(
        &format!("SELECT {REVERSE_SWAP_COLUMNS} FROM reverse_swaps WHERE id = ?1"),
        params![id],
        reverse_swap_from_row,
    )
    .optional()
    .with_context(|| format!("get reverse swap {id}"))
}

fn where_clause<S: Copy>(
    filter: &RecordFilter<S>,
    status_str: fn(S) -> &'static str,
) -> (String, Vec<Value>) {
    let mut conds = Vec::new();
    let mut values = Vec::new();

    if let Some(hash) = &filter.preimage_hash {
        conds.push("preimage_hash = ?".to_string());
        values.push(Value::Text(hash.clone()));
    }
    if let Some(statuses) = &filter.status_in {
        if statuses.is_empty() {
            conds.push("0".to_string());
        } else {
            conds.push(format!("status IN ({})", placeholders(statuses.len())));
            values.extend(
                statuses
                    .iter()
                    .map(|s| Value::Text(status_str(*s).to_string())),
            );
        }
    }
    if let Some(statuses) = &filter.status_not_in
        && !statuses.is_empty()
    {
        conds.push(format!("status NOT IN ({})", placeholders(statuses.len())));
        values.extend(
            statuses
                .iter()
                .map(|s| Value::Text(status_str(*s).to_string())),
        );
    }
    if let Some(height) = filter.timeout_at_or_below {
        conds.push("timeout_block_height <= ?".to_string());
        values.push(Value::Integer(height.into()));
    }
    if let Some(height) = filter.timeout_at_or_above {
        conds.push("timeout_block_height >= ?".to_string());
        values.push(Value::Integer(height.into()));
    }

    if conds.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", conds.join(" AND ")), values)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn limit_clause(limit: Option<u32>) -> String {
    limit.map(|n| format!(" LIMIT {n}")).unwrap_or_default()
}

fn swap_from_row(row: &Row<'_>) -> rusqlite::Result<Swap> {
    Ok(Swap {
        id: row.get(0)?,
        pair: parse_col(row, 1)?,
        order_side: parse_col(row, 2)?,
        preimage_hash: row.get(3)?,
        status: parse_col(row, 4)?,
        timeout_block_height: row.get(5)?,
        expected_amount: opt_u64_col(row, 6)?,
        invoice: row.get(7)?,
        lockup_transaction_id: row.get(8)?,
        lockup_transaction_vout: row.get(9)?,
        onchain_amount: opt_u64_col(row, 10)?,
        miner_fee: u64_col(row, 11)?,
        failure_reason: row.get(12)?,
    })
}

fn reverse_swap_from_row(row: &Row<'_>) -> rusqlite::Result<ReverseSwap> {
    Ok(ReverseSwap {
        id: row.get(0)?,
        pair: parse_col(row, 1)?,
        order_side: parse_col::<OrderSide>(row, 2)?,
        preimage_hash: row.get(3)?,
        status: parse_col(row, 4)?,
        timeout_block_height: row.get(5)?,
        onchain_amount: u64_col(row, 6)?,
        invoice: row.get(7)?,
        transaction_id: row.get(8)?,
        transaction_vout: row.get(9)?,
        miner_fee: u64_col(row, 10)?,
        preimage: row.get(11)?,
        failure_reason: row.get(12)?,
        raw_tx: row.get(13)?,
    })
}

fn parse_col<T>(row: &Row<'_>, col: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = anyhow::Error>,
{
    let s: String = row.get(col)?;
    s.parse().map_err(|e: anyhow::Error| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            e.to_string().into(),
        )
    })
}

fn u64_col(row: &Row<'_>, col: usize) -> rusqlite::Result<u64> {
    let v: i64 = row.get(col)?;
    u64::try_from(v).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Integer,
            format!("invalid unsigned value {v}").into(),
        )
    })
}

fn opt_u64_col(row: &Row<'_>, col: usize) -> rusqlite::Result<Option<u64>> {
    let v: Option<i64> = row.get(col)?;
    v.map(|v| {
        u64::try_from(v).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                col,
                rusqlite::types::Type::Integer,
                format!("invalid unsigned value {v}").into(),
            )
        })
    })
    .transpose()
}

fn to_sql_u64(v: u64) -> Result<i64> {
    i64::try_from(v).with_context(|| format!("value out of sqlite range: {v}"))
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  id TEXT PRIMARY KEY,
  pair TEXT NOT NULL,
  order_side TEXT NOT NULL,
  preimage_hash TEXT NOT NULL UNIQUE,
  status TEXT NOT NULL,
  timeout_block_height INTEGER NOT NULL,
  expected_amount INTEGER,
  invoice TEXT,
  lockup_transaction_id TEXT,
  lockup_transaction_vout INTEGER,
  onchain_amount INTEGER,
  miner_fee INTEGER NOT NULL DEFAULT 0,
  failure_reason TEXT
);
CREATE INDEX IF NOT EXISTS swaps_status_idx ON swaps(status);
CREATE INDEX IF NOT EXISTS swaps_timeout_idx ON swaps(timeout_block_height);

CREATE TABLE IF NOT EXISTS reverse_swaps (
  id TEXT PRIMARY KEY,
  pair TEXT NOT NULL,
  order_side TEXT NOT NULL,
  preimage_hash TEXT NOT NULL UNIQUE,
  status TEXT NOT NULL,
  timeout_block_height INTEGER NOT NULL,
  onchain_amount INTEGER NOT NULL,
  invoice TEXT NOT NULL,
  transaction_id TEXT,
  transaction_vout INTEGER,
  miner_fee INTEGER NOT NULL DEFAULT 0,
  preimage TEXT,
  failure_reason TEXT,
  raw_tx TEXT
);
CREATE INDEX IF NOT EXISTS reverse_swaps_status_idx ON reverse_swaps(status);
CREATE INDEX IF NOT EXISTS reverse_swaps_timeout_idx ON reverse_swaps(timeout_block_height);
"#,
    )
    .context("create tables")?;
    Ok(())
}
