//! Postgres store.

use std::str::FromStr;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use super::{
    Checkpoint, CheckpointRecord, CheckpointStore, EventStore, StoreError, StoreOutcome, StoredId,
};
use crate::events::{DepositEvent, EventKind, WithdrawalEvent};

/// Store backed by a Postgres connection pool.
///
/// Uniqueness of commitments and nullifier hashes is enforced by the table
/// constraints, so several listener processes may share one database.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to the database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        info!("Connecting to database");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .connect(database_url)
            .await?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Applies the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Migrations completed successfully");
        Ok(())
    }

    /// Closes the pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Checks that the database answers queries.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    /// Returns row counts for startup diagnostics.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn stats(&self) -> Result<DatabaseStats, StoreError> {
        let deposit_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deposits")
            .fetch_one(&self.pool)
            .await?;

        let withdrawal_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM withdrawals")
            .fetch_one(&self.pool)
            .await?;

        let unpublished_count: i64 = sqlx::query_scalar(
            r#"
            SELECT
                (SELECT COUNT(*) FROM deposits WHERE published_at IS NULL) +
                (SELECT COUNT(*) FROM withdrawals WHERE published_at IS NULL)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let checkpoint_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_checkpoints")
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            deposit_count: deposit_count as u64,
            withdrawal_count: withdrawal_count as u64,
            unpublished_count: unpublished_count as u64,
            checkpoint_count: checkpoint_count as u64,
        })
    }

    /// Returns all checkpoints, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is malformed.
    pub async fn checkpoints(&self) -> Result<Vec<CheckpointRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT contract_address, chain_id, last_synced_block, updated_at
            FROM sync_checkpoints
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_checkpoint).collect()
    }

    /// Returns stored deposits, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is malformed.
    pub async fn recent_deposits(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DepositEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT contract_address, commitment, depositor, leaf_index,
                   on_chain_timestamp::TEXT AS on_chain_timestamp,
                   tx_hash, block_number, chain_id
            FROM deposits
            ORDER BY id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_deposit).collect()
    }

    /// Returns stored withdrawals, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is malformed.
    pub async fn recent_withdrawals(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WithdrawalEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT contract_address, nullifier_hash, recipient, relayer,
                   fee::TEXT AS fee, tx_hash, block_number, chain_id
            FROM withdrawals
            ORDER BY id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_withdrawal).collect()
    }

    async fn existing(
        &self,
        table: &'static str,
        key_column: &'static str,
        contract_address: &str,
        chain_id: i64,
        key: &str,
    ) -> Result<StoreOutcome, StoreError> {
        let query = format!(
            "SELECT id, published_at IS NOT NULL AS published FROM {} \
             WHERE contract_address = $1 AND chain_id = $2 AND {} = $3",
            table, key_column
        );

        let row = sqlx::query(&query)
            .bind(contract_address)
            .bind(chain_id)
            .bind(key)
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreOutcome::Duplicate {
            id: row.try_get("id")?,
            published: row.try_get("published")?,
        })
    }
}

#[async_trait]
impl CheckpointStore for PgStore {
    async fn get_checkpoint(
        &self,
        contract_address: Address,
        chain_id: u64,
    ) -> Result<Option<u64>, StoreError> {
        let block: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT last_synced_block
            FROM sync_checkpoints
            WHERE contract_address = $1 AND chain_id = $2
            "#,
        )
        .bind(address_text(&contract_address))
        .bind(chain_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(block.map(|b| b as u64))
    }

    async fn advance_checkpoint(
        &self,
        contract_address: Address,
        chain_id: u64,
        block_number: u64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (contract_address, chain_id, last_synced_block, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (contract_address, chain_id) DO UPDATE SET
                last_synced_block = GREATEST(sync_checkpoints.last_synced_block, excluded.last_synced_block),
                updated_at = NOW()
            "#,
        )
        .bind(address_text(&contract_address))
        .bind(chain_id as i64)
        .bind(block_number as i64)
        .execute(&self.pool)
        .await?;

        debug!(
            "Checkpoint {} on chain {} advanced to {}",
            contract_address, chain_id, block_number
        );

        Ok(())
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn store_deposit(&self, event: &DepositEvent) -> Result<StoreOutcome, StoreError> {
        let contract = address_text(&event.contract_address);
        let commitment = hash_text(&event.commitment);
        let chain_id = event.chain_id as i64;

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO deposits (
                contract_address, commitment, depositor, leaf_index,
                on_chain_timestamp, tx_hash, block_number, chain_id
            )
            VALUES ($1, $2, $3, $4, $5::NUMERIC, $6, $7, $8)
            ON CONFLICT (contract_address, chain_id, commitment) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&contract)
        .bind(&commitment)
        .bind(address_text(&event.depositor))
        .bind(i64::from(event.leaf_index))
        .bind(event.on_chain_timestamp.to_string())
        .bind(hash_text(&event.tx_hash))
        .bind(event.block_number as i64)
        .bind(chain_id)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(id) => Ok(StoreOutcome::Inserted(id)),
            None => {
                self.existing("deposits", "commitment", &contract, chain_id, &commitment)
                    .await
            }
        }
    }

    async fn store_withdrawal(&self, event: &WithdrawalEvent) -> Result<StoreOutcome, StoreError> {
        let contract = address_text(&event.contract_address);
        let nullifier = hash_text(&event.nullifier_hash);
        let chain_id = event.chain_id as i64;

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO withdrawals (
                contract_address, nullifier_hash, recipient, relayer,
                fee, tx_hash, block_number, chain_id
            )
            VALUES ($1, $2, $3, $4, $5::NUMERIC, $6, $7, $8)
            ON CONFLICT (contract_address, chain_id, nullifier_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&contract)
        .bind(&nullifier)
        .bind(address_text(&event.recipient))
        .bind(address_text(&event.relayer))
        .bind(event.fee.to_string())
        .bind(hash_text(&event.tx_hash))
        .bind(event.block_number as i64)
        .bind(chain_id)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(id) => Ok(StoreOutcome::Inserted(id)),
            None => {
                self.existing("withdrawals", "nullifier_hash", &contract, chain_id, &nullifier)
                    .await
            }
        }
    }

    async fn mark_published(&self, kind: EventKind, id: StoredId) -> Result<(), StoreError> {
        let query = match kind {
            EventKind::Deposit => "UPDATE deposits SET published_at = NOW() WHERE id = $1",
            EventKind::Withdrawal => "UPDATE withdrawals SET published_at = NOW() WHERE id = $1",
        };

        sqlx::query(query).bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

/// Row counts reported at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Stored deposits
    pub deposit_count: u64,

    /// Stored withdrawals
    pub withdrawal_count: u64,

    /// Events stored but not yet published
    pub unpublished_count: u64,

    /// Tracked checkpoints
    pub checkpoint_count: u64,
}

/// Formats an address as stored: EIP-55 checksummed.
pub(crate) fn address_text(address: &Address) -> String {
    address.to_checksum(None)
}

/// Formats a hash as stored: `0x`-prefixed lowercase hex.
pub(crate) fn hash_text(hash: &B256) -> String {
    format!("{:#x}", hash)
}

fn parse_column<T: FromStr>(row: &PgRow, table: &'static str, column: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    let text: String = row.try_get(column)?;
    text.parse::<T>().map_err(|e| StoreError::CorruptRow {
        table,
        reason: format!("{}: {}", column, e),
    })
}

fn parse_uint(row: &PgRow, table: &'static str, column: &str) -> Result<U256, StoreError> {
    let text: String = row.try_get(column)?;
    U256::from_str_radix(&text, 10).map_err(|e| StoreError::CorruptRow {
        table,
        reason: format!("{}: {}", column, e),
    })
}

fn parse_u64(row: &PgRow, table: &'static str, column: &str) -> Result<u64, StoreError> {
    let value: i64 = row.try_get(column)?;
    u64::try_from(value).map_err(|_| StoreError::CorruptRow {
        table,
        reason: format!("{}: negative value {}", column, value),
    })
}

fn row_to_checkpoint(row: &PgRow) -> Result<CheckpointRecord, StoreError> {
    const TABLE: &str = "sync_checkpoints";
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(CheckpointRecord {
        checkpoint: Checkpoint::new(
            parse_column(row, TABLE, "contract_address")?,
            parse_u64(row, TABLE, "chain_id")?,
            parse_u64(row, TABLE, "last_synced_block")?,
        ),
        updated_at,
    })
}

fn row_to_deposit(row: &PgRow) -> Result<DepositEvent, StoreError> {
    const TABLE: &str = "deposits";
    let leaf_index = parse_u64(row, TABLE, "leaf_index")?;

    Ok(DepositEvent {
        commitment: parse_column(row, TABLE, "commitment")?,
        depositor: parse_column(row, TABLE, "depositor")?,
        leaf_index: u32::try_from(leaf_index).map_err(|_| StoreError::CorruptRow {
            table: TABLE,
            reason: format!("leaf_index out of range: {}", leaf_index),
        })?,
        on_chain_timestamp: parse_uint(row, TABLE, "on_chain_timestamp")?,
        tx_hash: parse_column(row, TABLE, "tx_hash")?,
        block_number: parse_u64(row, TABLE, "block_number")?,
        contract_address: parse_column(row, TABLE, "contract_address")?,
        chain_id: parse_u64(row, TABLE, "chain_id")?,
    })
}

fn row_to_withdrawal(row: &PgRow) -> Result<WithdrawalEvent, StoreError> {
    const TABLE: &str = "withdrawals";

    Ok(WithdrawalEvent {
        recipient: parse_column(row, TABLE, "recipient")?,
        nullifier_hash: parse_column(row, TABLE, "nullifier_hash")?,
        relayer: parse_column(row, TABLE, "relayer")?,
        fee: parse_uint(row, TABLE, "fee")?,
        tx_hash: parse_column(row, TABLE, "tx_hash")?,
        block_number: parse_u64(row, TABLE, "block_number")?,
        contract_address: parse_column(row, TABLE, "contract_address")?,
        chain_id: parse_u64(row, TABLE, "chain_id")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    async fn test_store() -> PgStore {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL environment variable must be set");
        let store = PgStore::connect(&database_url, 2).await.unwrap();
        store.run_migrations().await.unwrap();
        store
    }

    /// A contract address no other run has used.
    fn fresh_contract() -> Address {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut bytes = [0x5au8; 20];
        bytes[12..].copy_from_slice(&nanos.to_be_bytes());
        Address::from(bytes)
    }

    fn deposit(contract: Address, byte: u8) -> DepositEvent {
        DepositEvent {
            commitment: B256::repeat_byte(byte),
            depositor: Address::repeat_byte(0x22),
            leaf_index: u32::from(byte),
            on_chain_timestamp: U256::from(1_700_000_000u64),
            tx_hash: B256::repeat_byte(0xaa),
            block_number: 100,
            contract_address: contract,
            chain_id: 2021,
        }
    }

    #[test]
    fn test_address_text_is_checksummed() {
        let addr = address!("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed");
        assert_eq!(
            address_text(&addr),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
    }

    #[test]
    fn test_hash_text_is_lowercase_prefixed() {
        let text = hash_text(&B256::repeat_byte(0xab));
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 66);
        assert_eq!(text, text.to_lowercase());
    }

    #[test]
    fn test_stored_text_parses_back() {
        let addr = Address::repeat_byte(0xde);
        let hash = B256::repeat_byte(0x42);

        assert_eq!(address_text(&addr).parse::<Address>().unwrap(), addr);
        assert_eq!(hash_text(&hash).parse::<B256>().unwrap(), hash);
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL environment variable
    async fn test_pg_store_deposit_idempotent() {
        let store = test_store().await;
        let contract = fresh_contract();
        let event = deposit(contract, 1);

        let first = store.store_deposit(&event).await.unwrap();
        let second = store.store_deposit(&event).await.unwrap();
        assert!(first.is_inserted());
        assert_eq!(
            second,
            StoreOutcome::Duplicate {
                id: first.id(),
                published: false
            }
        );

        store.mark_published(EventKind::Deposit, first.id()).await.unwrap();
        let third = store.store_deposit(&event).await.unwrap();
        assert!(!third.needs_publish());

        let recent = store.recent_deposits(50, 0).await.unwrap();
        assert!(recent.contains(&event));
        store.close().await;
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL environment variable
    async fn test_pg_store_withdrawal_idempotent() {
        let store = test_store().await;
        let event = WithdrawalEvent {
            recipient: Address::repeat_byte(0x33),
            nullifier_hash: B256::repeat_byte(9),
            relayer: Address::repeat_byte(0x44),
            fee: U256::from(10u64).pow(U256::from(30u64)),
            tx_hash: B256::repeat_byte(0xbb),
            block_number: 101,
            contract_address: fresh_contract(),
            chain_id: 2021,
        };

        assert!(store.store_withdrawal(&event).await.unwrap().is_inserted());
        assert!(!store.store_withdrawal(&event).await.unwrap().is_inserted());

        let recent = store.recent_withdrawals(50, 0).await.unwrap();
        assert!(recent.contains(&event));
        store.close().await;
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL environment variable
    async fn test_pg_checkpoint_monotonic() {
        let store = test_store().await;
        let contract = fresh_contract();

        assert_eq!(store.get_checkpoint(contract, 2021).await.unwrap(), None);
        store.advance_checkpoint(contract, 2021, 50).await.unwrap();
        store.advance_checkpoint(contract, 2021, 40).await.unwrap();
        assert_eq!(store.get_checkpoint(contract, 2021).await.unwrap(), Some(50));

        let records = store.checkpoints().await.unwrap();
        let record = records
            .iter()
            .find(|r| r.checkpoint.contract_address == contract)
            .unwrap();
        assert_eq!(record.checkpoint.last_synced_block, 50);

        store.health_check().await.unwrap();
        store.close().await;
    }

    #[test]
    fn test_uint_decimal_text() {
        let fee = U256::from(10u64).pow(U256::from(30u64));
        let text = fee.to_string();
        assert_eq!(U256::from_str_radix(&text, 10).unwrap(), fee);
    }
}
