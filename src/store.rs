use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy_primitives::{Address, U256};
use anyhow::{Context as _, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension as _, Row, ToSql, params};
use uuid::Uuid;

use crate::error::EngineError;
use crate::offer::{ActionState, ActionStatus, Offer, OfferAction, OfferState, SettlementMethod};
use crate::swap::{Swap, SwapAction, SwapState};

const METHODS: &str = "settlement_methods";
const PENDING_METHODS: &str = "pending_settlement_methods";

/// The store handle shared by the coordinator, services and key store. The
/// mutex is the single writer.
pub type SharedStore = Arc<Mutex<SqliteStore>>;

pub fn shared(store: SqliteStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

pub fn lock(store: &SharedStore) -> Result<MutexGuard<'_, SqliteStore>> {
    store
        .lock()
        .map_err(|_| anyhow::anyhow!("store mutex poisoned"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapFlag {
    RequiresFill,
    PaymentSent,
    PaymentReceived,
    BuyerClosed,
    SellerClosed,
}

impl SwapFlag {
    fn column(self) -> &'static str {
        match self {
            SwapFlag::RequiresFill => "requires_fill",
            SwapFlag::PaymentSent => "is_payment_sent",
            SwapFlag::PaymentReceived => "is_payment_received",
            SwapFlag::BuyerClosed => "has_buyer_closed",
            SwapFlag::SellerClosed => "has_seller_closed",
        }
    }
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Offers

    /// Inserts `offer` and its settlement methods. Returns `false` and changes
    /// nothing if an offer with the same id and chain id exists.
    pub fn store_offer(&mut self, offer: &Offer) -> Result<bool> {
        let id = offer.id.to_string();
        let tx = self.conn.transaction().context("begin store offer")?;
        let rows = tx
            .execute(
                r#"
INSERT INTO offers (
  id,
  chain_id,
  is_created,
  is_taken,
  maker,
  interface_id,
  stablecoin,
  amount_lower_bound,
  amount_upper_bound,
  security_deposit_amount,
  service_fee_rate,
  direction,
  protocol_version,
  is_user_maker,
  have_public_key,
  state,
  opening_state,
  opening_error,
  canceling_state,
  canceling_error,
  editing_state,
  editing_error,
  taking_state,
  taking_error
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
  ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
)
ON CONFLICT (id, chain_id) DO NOTHING
"#,
                params![
                    &id,
                    offer.chain_id,
                    offer.is_created,
                    offer.is_taken,
                    offer.maker.to_checksum(None),
                    hex::encode(&offer.interface_id),
                    offer.stablecoin.to_checksum(None),
                    offer.amount_lower_bound.to_string(),
                    offer.amount_upper_bound.to_string(),
                    offer.security_deposit_amount.to_string(),
                    offer.service_fee_rate.to_string(),
                    offer.direction.as_str(),
                    offer.protocol_version.to_string(),
                    offer.is_user_maker,
                    offer.have_public_key,
                    offer.state.as_str(),
                    offer.opening.state.as_str(),
                    &offer.opening.error,
                    offer.canceling.state.as_str(),
                    &offer.canceling.error,
                    offer.editing.state.as_str(),
                    &offer.editing.error,
                    offer.taking.state.as_str(),
                    &offer.taking.error,
                ],
            )
            .with_context(|| format!("insert offer {id}"))?;
        if rows == 1 {
            insert_methods_into(&tx, METHODS, &id, offer.chain_id, &offer.settlement_methods)?;
        }
        tx.commit().context("commit store offer")?;
        Ok(rows == 1)
    }

    pub fn get_offer(&self, id: Uuid, chain_id: u64) -> Result<Option<Offer>> {
        let offer = self
            .conn
            .query_row(
                "SELECT * FROM offers WHERE id = ?1 AND chain_id = ?2",
                params![id.to_string(), chain_id],
                offer_from_row,
            )
            .optional()
            .with_context(|| format!("get offer {id}"))?;
        match offer {
            Some(mut offer) => {
                offer.settlement_methods = self.get_settlement_methods(id, chain_id)?;
                Ok(Some(offer))
            }
            None => Ok(None),
        }
    }

    pub fn list_offers(&self) -> Result<Vec<Offer>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM offers ORDER BY chain_id, id")
            .context("prepare list offers")?;
        let rows = stmt
            .query_map([], offer_from_row)
            .context("query list offers")?;

        let mut out = Vec::new();
        for row in rows {
            let mut offer = row.context("read offer row")?;
            offer.settlement_methods = self.get_settlement_methods(offer.id, offer.chain_id)?;
            out.push(offer);
        }
        Ok(out)
    }

    /// Removes the offer and its settlement methods. Missing rows are not an error.
    pub fn delete_offer(&mut self, id: Uuid, chain_id: u64) -> Result<()> {
        let id = id.to_string();
        let tx = self.conn.transaction().context("begin delete offer")?;
        for table in [METHODS, PENDING_METHODS] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE owner_id = ?1 AND chain_id = ?2"),
                params![&id, chain_id],
            )
            .with_context(|| format!("delete {table} of offer {id}"))?;
        }
        tx.execute(
            "DELETE FROM offers WHERE id = ?1 AND chain_id = ?2",
            params![&id, chain_id],
        )
        .with_context(|| format!("delete offer {id}"))?;
        tx.commit().context("commit delete offer")?;
        Ok(())
    }

    pub fn update_offer_state(&mut self, id: Uuid, chain_id: u64, state: OfferState) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE offers SET state = ?3 WHERE id = ?1 AND chain_id = ?2",
                params![id.to_string(), chain_id, state.as_str()],
            )
            .with_context(|| format!("update offer state {id}"))?;
        anyhow::ensure!(rows == 1, "offer not found: {id}");
        Ok(())
    }

    /// Moves the offer to `next` only if it is currently in one of `expected`.
    pub fn advance_offer_state(
        &mut self,
        id: Uuid,
        chain_id: u64,
        expected: &[OfferState],
        next: OfferState,
    ) -> Result<bool> {
        let expected: Vec<&'static str> = expected.iter().map(|s| s.as_str()).collect();
        self.compare_and_set_state("offers", id, chain_id, &expected, next.as_str())
    }

    pub fn update_offer_have_public_key(
        &mut self,
        id: Uuid,
        chain_id: u64,
        have_public_key: bool,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE offers SET have_public_key = ?3 WHERE id = ?1 AND chain_id = ?2",
                params![id.to_string(), chain_id, have_public_key],
            )
            .with_context(|| format!("update offer have_public_key {id}"))?;
        anyhow::ensure!(rows == 1, "offer not found: {id}");
        Ok(())
    }

    pub fn update_offer_action(
        &mut self,
        id: Uuid,
        chain_id: u64,
        action: OfferAction,
        status: &ActionStatus,
    ) -> Result<()> {
        let col = offer_action_column(action);
        let rows = self
            .conn
            .execute(
                &format!(
                    "UPDATE offers SET {col}_state = ?3, {col}_error = ?4 WHERE id = ?1 AND chain_id = ?2"
                ),
                params![id.to_string(), chain_id, status.state.as_str(), &status.error],
            )
            .with_context(|| format!("update offer {col} state {id}"))?;
        anyhow::ensure!(rows == 1, "offer not found: {id}");
        Ok(())
    }

    pub fn replace_settlement_methods(
        &mut self,
        owner_id: Uuid,
        chain_id: u64,
        methods: &[SettlementMethod],
    ) -> Result<()> {
        self.replace_methods_in(METHODS, owner_id, chain_id, methods)
    }

    pub fn get_settlement_methods(
        &self,
        owner_id: Uuid,
        chain_id: u64,
    ) -> Result<Vec<SettlementMethod>> {
        self.methods_in(METHODS, owner_id, chain_id)
    }

    /// Methods submitted by an edit whose transaction is not confirmed yet.
    pub fn replace_pending_settlement_methods(
        &mut self,
        owner_id: Uuid,
        chain_id: u64,
        methods: &[SettlementMethod],
    ) -> Result<()> {
        self.replace_methods_in(PENDING_METHODS, owner_id, chain_id, methods)
    }

    pub fn get_pending_settlement_methods(
        &self,
        owner_id: Uuid,
        chain_id: u64,
    ) -> Result<Vec<SettlementMethod>> {
        self.methods_in(PENDING_METHODS, owner_id, chain_id)
    }

    fn replace_methods_in(
        &mut self,
        table: &'static str,
        owner_id: Uuid,
        chain_id: u64,
        methods: &[SettlementMethod],
    ) -> Result<()> {
        let owner = owner_id.to_string();
        let tx = self.conn.transaction().context("begin replace settlement methods")?;
        tx.execute(
            &format!("DELETE FROM {table} WHERE owner_id = ?1 AND chain_id = ?2"),
            params![&owner, chain_id],
        )
        .with_context(|| format!("clear {table} of {owner}"))?;
        insert_methods_into(&tx, table, &owner, chain_id, methods)?;
        tx.commit().context("commit replace settlement methods")?;
        Ok(())
    }

    fn methods_in(
        &self,
        table: &'static str,
        owner_id: Uuid,
        chain_id: u64,
    ) -> Result<Vec<SettlementMethod>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                r#"
SELECT currency, method, price, private_data
FROM {table}
WHERE owner_id = ?1 AND chain_id = ?2
ORDER BY position
"#
            ))
            .with_context(|| format!("prepare get {table}"))?;
        let rows = stmt
            .query_map(params![owner_id.to_string(), chain_id], |row| {
                Ok(SettlementMethod {
                    currency: row.get("currency")?,
                    method: row.get("method")?,
                    price: row.get("price")?,
                    private_data: row.get("private_data")?,
                })
            })
            .with_context(|| format!("query {table}"))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read settlement method row")?);
        }
        Ok(out)
    }

    // Swaps

    /// Inserts `swap`. Returns `false` and changes nothing if it already exists.
    pub fn store_swap(&mut self, swap: &Swap) -> Result<bool> {
        let id = swap.id.to_string();
        let rows = self
            .conn
            .execute(
                r#"
INSERT INTO swaps (
  id,
  chain_id,
  is_created,
  requires_fill,
  maker,
  maker_interface_id,
  taker,
  taker_interface_id,
  stablecoin,
  amount_lower_bound,
  amount_upper_bound,
  security_deposit_amount,
  taken_swap_amount,
  service_fee_amount,
  service_fee_rate,
  direction,
  settlement_currency,
  settlement_method,
  settlement_price,
  settlement_private_data,
  maker_private_data,
  taker_private_data,
  protocol_version,
  is_payment_sent,
  is_payment_received,
  has_buyer_closed,
  has_seller_closed,
  dispute_raiser,
  role,
  state,
  filling_state,
  filling_error,
  reporting_payment_sent_state,
  reporting_payment_sent_error,
  reporting_payment_received_state,
  reporting_payment_received_error,
  closing_state,
  closing_error
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
  ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25,
  ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38
)
ON CONFLICT (id, chain_id) DO NOTHING
"#,
                params![
                    &id,
                    swap.chain_id,
                    swap.is_created,
                    swap.requires_fill,
                    swap.maker.to_checksum(None),
                    hex::encode(&swap.maker_interface_id),
                    swap.taker.to_checksum(None),
                    hex::encode(&swap.taker_interface_id),
                    swap.stablecoin.to_checksum(None),
                    swap.amount_lower_bound.to_string(),
                    swap.amount_upper_bound.to_string(),
                    swap.security_deposit_amount.to_string(),
                    swap.taken_swap_amount.to_string(),
                    swap.service_fee_amount.to_string(),
                    swap.service_fee_rate.to_string(),
                    swap.direction.as_str(),
                    &swap.settlement_method.currency,
                    &swap.settlement_method.method,
                    &swap.settlement_method.price,
                    &swap.settlement_method.private_data,
                    &swap.maker_private_data,
                    &swap.taker_private_data,
                    swap.protocol_version.to_string(),
                    swap.is_payment_sent,
                    swap.is_payment_received,
                    swap.has_buyer_closed,
                    swap.has_seller_closed,
                    swap.dispute_raiser.to_string(),
                    swap.role.as_str(),
                    swap.state.as_str(),
                    swap.filling.state.as_str(),
                    &swap.filling.error,
                    swap.reporting_payment_sent.state.as_str(),
                    &swap.reporting_payment_sent.error,
                    swap.reporting_payment_received.state.as_str(),
                    &swap.reporting_payment_received.error,
                    swap.closing.state.as_str(),
                    &swap.closing.error,
                ],
            )
            .with_context(|| format!("insert swap {id}"))?;
        Ok(rows == 1)
    }

    pub fn get_swap(&self, id: Uuid, chain_id: u64) -> Result<Option<Swap>> {
        self.conn
            .query_row(
                "SELECT * FROM swaps WHERE id = ?1 AND chain_id = ?2",
                params![id.to_string(), chain_id],
                swap_from_row,
            )
            .optional()
            .with_context(|| format!("get swap {id}"))
    }

    pub fn list_swaps(&self) -> Result<Vec<Swap>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM swaps ORDER BY chain_id, id")
            .context("prepare list swaps")?;
        let rows = stmt.query_map([], swap_from_row).context("query list swaps")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read swap row")?);
        }
        Ok(out)
    }

    pub fn update_swap_state(&mut self, id: Uuid, chain_id: u64, state: SwapState) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE swaps SET state = ?3 WHERE id = ?1 AND chain_id = ?2",
                params![id.to_string(), chain_id, state.as_str()],
            )
            .with_context(|| format!("update swap state {id}"))?;
        anyhow::ensure!(rows == 1, "swap not found: {id}");
        Ok(())
    }

    /// Moves the swap to `next` only if it is currently in one of `expected`.
    pub fn advance_swap_state(
        &mut self,
        id: Uuid,
        chain_id: u64,
        expected: &[SwapState],
        next: SwapState,
    ) -> Result<bool> {
        let expected: Vec<&'static str> = expected.iter().map(|s| s.as_str()).collect();
        self.compare_and_set_state("swaps", id, chain_id, &expected, next.as_str())
    }

    pub fn update_swap_flag(
        &mut self,
        id: Uuid,
        chain_id: u64,
        flag: SwapFlag,
        value: bool,
    ) -> Result<()> {
        let col = flag.column();
        let rows = self
            .conn
            .execute(
                &format!("UPDATE swaps SET {col} = ?3 WHERE id = ?1 AND chain_id = ?2"),
                params![id.to_string(), chain_id, value],
            )
            .with_context(|| format!("update swap {col} {id}"))?;
        anyhow::ensure!(rows == 1, "swap not found: {id}");
        Ok(())
    }

    pub fn update_swap_action(
        &mut self,
        id: Uuid,
        chain_id: u64,
        action: SwapAction,
        status: &ActionStatus,
    ) -> Result<()> {
        let col = swap_action_column(action);
        let rows = self
            .conn
            .execute(
                &format!(
                    "UPDATE swaps SET {col}_state = ?3, {col}_error = ?4 WHERE id = ?1 AND chain_id = ?2"
                ),
                params![id.to_string(), chain_id, status.state.as_str(), &status.error],
            )
            .with_context(|| format!("update swap {col} state {id}"))?;
        anyhow::ensure!(rows == 1, "swap not found: {id}");
        Ok(())
    }

    pub fn update_swap_maker_private_data(
        &mut self,
        id: Uuid,
        chain_id: u64,
        data: Option<&str>,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE swaps SET maker_private_data = ?3 WHERE id = ?1 AND chain_id = ?2",
                params![id.to_string(), chain_id, data],
            )
            .with_context(|| format!("update swap maker private data {id}"))?;
        anyhow::ensure!(rows == 1, "swap not found: {id}");
        Ok(())
    }

    pub fn update_swap_taker_private_data(
        &mut self,
        id: Uuid,
        chain_id: u64,
        data: Option<&str>,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE swaps SET taker_private_data = ?3 WHERE id = ?1 AND chain_id = ?2",
                params![id.to_string(), chain_id, data],
            )
            .with_context(|| format!("update swap taker private data {id}"))?;
        anyhow::ensure!(rows == 1, "swap not found: {id}");
        Ok(())
    }

    // Keys

    pub fn store_public_key(&mut self, interface_id: &[u8], public_key: &[u8]) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "INSERT INTO public_keys (interface_id, public_key) VALUES (?1, ?2) ON CONFLICT (interface_id) DO NOTHING",
                params![hex::encode(interface_id), hex::encode(public_key)],
            )
            .context("insert public key")?;
        Ok(rows == 1)
    }

    pub fn get_public_key(&self, interface_id: &[u8]) -> Result<Option<Vec<u8>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT public_key FROM public_keys WHERE interface_id = ?1",
                params![hex::encode(interface_id)],
                |row| row.get(0),
            )
            .optional()
            .context("get public key")?;
        raw.map(|hex_key| hex::decode(hex_key).context("decode public key"))
            .transpose()
    }

    pub fn store_key_pair(
        &mut self,
        interface_id: &[u8],
        public_key: &[u8],
        private_key: &[u8],
    ) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                r#"
INSERT INTO key_pairs (interface_id, public_key, private_key) VALUES (?1, ?2, ?3)
ON CONFLICT (interface_id) DO NOTHING
"#,
                params![
                    hex::encode(interface_id),
                    hex::encode(public_key),
                    hex::encode(private_key)
                ],
            )
            .context("insert key pair")?;
        Ok(rows == 1)
    }

    /// Returns `(public_key, private_key)`.
    pub fn get_key_pair(&self, interface_id: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let raw: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT public_key, private_key FROM key_pairs WHERE interface_id = ?1",
                params![hex::encode(interface_id)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("get key pair")?;
        match raw {
            Some((public, private)) => Ok(Some((
                hex::decode(public).context("decode key pair public key")?,
                hex::decode(private).context("decode key pair private key")?,
            ))),
            None => Ok(None),
        }
    }

    // Listener cursor

    pub fn last_parsed_block(&self, chain_id: u64) -> Result<Option<u64>> {
        self.conn
            .query_row(
                "SELECT last_parsed_block FROM sync_state WHERE chain_id = ?1",
                params![chain_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .context("get last parsed block")?
            .map(|n| u64::try_from(n).with_context(|| format!("invalid last parsed block {n}")))
            .transpose()
    }

    pub fn set_last_parsed_block(&mut self, chain_id: u64, block: u64) -> Result<()> {
        self.conn
            .execute(
                r#"
INSERT INTO sync_state (chain_id, last_parsed_block) VALUES (?1, ?2)
ON CONFLICT (chain_id) DO UPDATE SET last_parsed_block = excluded.last_parsed_block
"#,
                params![chain_id, block],
            )
            .with_context(|| format!("set last parsed block {block}"))?;
        Ok(())
    }

    fn compare_and_set_state(
        &mut self,
        table: &'static str,
        id: Uuid,
        chain_id: u64,
        expected: &[&'static str],
        next: &'static str,
    ) -> Result<bool> {
        anyhow::ensure!(!expected.is_empty(), "no expected states given");
        let placeholders = (0..expected.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {table} SET state = ?1 WHERE id = ?2 AND chain_id = ?3 AND state IN ({placeholders})"
        );
        let id_str = id.to_string();
        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(expected.len() + 3);
        values.push(&next);
        values.push(&id_str);
        values.push(&chain_id);
        for state in expected {
            values.push(state);
        }
        let rows = self
            .conn
            .execute(&sql, values.as_slice())
            .with_context(|| format!("advance {table} state {id} to {next}"))?;
        Ok(rows == 1)
    }
}

fn offer_action_column(action: OfferAction) -> &'static str {
    match action {
        OfferAction::Opening => "opening",
        OfferAction::Canceling => "canceling",
        OfferAction::Editing => "editing",
        OfferAction::Taking => "taking",
    }
}

fn swap_action_column(action: SwapAction) -> &'static str {
    match action {
        SwapAction::Filling => "filling",
        SwapAction::ReportingPaymentSent => "reporting_payment_sent",
        SwapAction::ReportingPaymentReceived => "reporting_payment_received",
        SwapAction::Closing => "closing",
    }
}

fn insert_methods_into(
    conn: &Connection,
    table: &'static str,
    owner_id: &str,
    chain_id: u64,
    methods: &[SettlementMethod],
) -> Result<()> {
    for (position, method) in methods.iter().enumerate() {
        conn.execute(
            &format!(
                r#"
INSERT INTO {table} (owner_id, chain_id, position, currency, method, price, private_data)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#
            ),
            params![
                owner_id,
                chain_id,
                position as i64,
                &method.currency,
                &method.method,
                &method.price,
                &method.private_data,
            ],
        )
        .with_context(|| format!("insert {table} row {position} of {owner_id}"))?;
    }
    Ok(())
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS offers (
  id TEXT NOT NULL,
  chain_id INTEGER NOT NULL,
  is_created INTEGER NOT NULL,
  is_taken INTEGER NOT NULL,
  maker TEXT NOT NULL,
  interface_id TEXT NOT NULL,
  stablecoin TEXT NOT NULL,
  amount_lower_bound TEXT NOT NULL,
  amount_upper_bound TEXT NOT NULL,
  security_deposit_amount TEXT NOT NULL,
  service_fee_rate TEXT NOT NULL,
  direction TEXT NOT NULL,
  protocol_version TEXT NOT NULL,
  is_user_maker INTEGER NOT NULL,
  have_public_key INTEGER NOT NULL,
  state TEXT NOT NULL,
  opening_state TEXT NOT NULL,
  opening_error TEXT,
  canceling_state TEXT NOT NULL,
  canceling_error TEXT,
  editing_state TEXT NOT NULL,
  editing_error TEXT,
  taking_state TEXT NOT NULL,
  taking_error TEXT,
  PRIMARY KEY (id, chain_id)
);
CREATE TABLE IF NOT EXISTS settlement_methods (
  owner_id TEXT NOT NULL,
  chain_id INTEGER NOT NULL,
  position INTEGER NOT NULL,
  currency TEXT NOT NULL,
  method TEXT NOT NULL,
  price TEXT NOT NULL,
  private_data TEXT,
  PRIMARY KEY (owner_id, chain_id, position)
);
CREATE TABLE IF NOT EXISTS pending_settlement_methods (
  owner_id TEXT NOT NULL,
  chain_id INTEGER NOT NULL,
  position INTEGER NOT NULL,
  currency TEXT NOT NULL,
  method TEXT NOT NULL,
  price TEXT NOT NULL,
  private_data TEXT,
  PRIMARY KEY (owner_id, chain_id, position)
);
CREATE TABLE IF NOT EXISTS swaps (
  id TEXT NOT NULL,
  chain_id INTEGER NOT NULL,
  is_created INTEGER NOT NULL,
  requires_fill INTEGER NOT NULL,
  maker TEXT NOT NULL,
  maker_interface_id TEXT NOT NULL,
  taker TEXT NOT NULL,
  taker_interface_id TEXT NOT NULL,
  stablecoin TEXT NOT NULL,
  amount_lower_bound TEXT NOT NULL,
  amount_upper_bound TEXT NOT NULL,
  security_deposit_amount TEXT NOT NULL,
  taken_swap_amount TEXT NOT NULL,
  service_fee_amount TEXT NOT NULL,
  service_fee_rate TEXT NOT NULL,
  direction TEXT NOT NULL,
  settlement_currency TEXT NOT NULL,
  settlement_method TEXT NOT NULL,
  settlement_price TEXT NOT NULL,
  settlement_private_data TEXT,
  maker_private_data TEXT,
  taker_private_data TEXT,
  protocol_version TEXT NOT NULL,
  is_payment_sent INTEGER NOT NULL,
  is_payment_received INTEGER NOT NULL,
  has_buyer_closed INTEGER NOT NULL,
  has_seller_closed INTEGER NOT NULL,
  dispute_raiser TEXT NOT NULL,
  role TEXT NOT NULL,
  state TEXT NOT NULL,
  filling_state TEXT NOT NULL,
  filling_error TEXT,
  reporting_payment_sent_state TEXT NOT NULL,
  reporting_payment_sent_error TEXT,
  reporting_payment_received_state TEXT NOT NULL,
  reporting_payment_received_error TEXT,
  closing_state TEXT NOT NULL,
  closing_error TEXT,
  PRIMARY KEY (id, chain_id)
);
CREATE INDEX IF NOT EXISTS swaps_state_idx ON swaps(state);
CREATE TABLE IF NOT EXISTS public_keys (
  interface_id TEXT PRIMARY KEY,
  public_key TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS key_pairs (
  interface_id TEXT PRIMARY KEY,
  public_key TEXT NOT NULL,
  private_key TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sync_state (
  chain_id INTEGER PRIMARY KEY,
  last_parsed_block INTEGER NOT NULL
);
"#,
    )
    .context("create tables")?;
    Ok(())
}

fn offer_from_row(row: &Row<'_>) -> rusqlite::Result<Offer> {
    Ok(Offer {
        id: uuid_col(row, "id")?,
        chain_id: u64_col(row, "chain_id")?,
        is_created: row.get("is_created")?,
        is_taken: row.get("is_taken")?,
        maker: address_col(row, "maker")?,
        interface_id: bytes_col(row, "interface_id")?,
        stablecoin: address_col(row, "stablecoin")?,
        amount_lower_bound: u256_col(row, "amount_lower_bound")?,
        amount_upper_bound: u256_col(row, "amount_upper_bound")?,
        security_deposit_amount: u256_col(row, "security_deposit_amount")?,
        service_fee_rate: u256_col(row, "service_fee_rate")?,
        direction: parsed_col(row, "direction")?,
        settlement_methods: Vec::new(),
        protocol_version: u256_col(row, "protocol_version")?,
        is_user_maker: row.get("is_user_maker")?,
        have_public_key: row.get("have_public_key")?,
        state: parsed_col(row, "state")?,
        opening: action_col(row, "opening")?,
        canceling: action_col(row, "canceling")?,
        editing: action_col(row, "editing")?,
        taking: action_col(row, "taking")?,
    })
}

fn swap_from_row(row: &Row<'_>) -> rusqlite::Result<Swap> {
    Ok(Swap {
        id: uuid_col(row, "id")?,
        chain_id: u64_col(row, "chain_id")?,
        is_created: row.get("is_created")?,
        requires_fill: row.get("requires_fill")?,
        maker: address_col(row, "maker")?,
        maker_interface_id: bytes_col(row, "maker_interface_id")?,
        taker: address_col(row, "taker")?,
        taker_interface_id: bytes_col(row, "taker_interface_id")?,
        stablecoin: address_col(row, "stablecoin")?,
        amount_lower_bound: u256_col(row, "amount_lower_bound")?,
        amount_upper_bound: u256_col(row, "amount_upper_bound")?,
        security_deposit_amount: u256_col(row, "security_deposit_amount")?,
        taken_swap_amount: u256_col(row, "taken_swap_amount")?,
        service_fee_amount: u256_col(row, "service_fee_amount")?,
        service_fee_rate: u256_col(row, "service_fee_rate")?,
        direction: parsed_col(row, "direction")?,
        settlement_method: SettlementMethod {
            currency: row.get("settlement_currency")?,
            method: row.get("settlement_method")?,
            price: row.get("settlement_price")?,
            private_data: row.get("settlement_private_data")?,
        },
        maker_private_data: row.get("maker_private_data")?,
        taker_private_data: row.get("taker_private_data")?,
        protocol_version: u256_col(row, "protocol_version")?,
        is_payment_sent: row.get("is_payment_sent")?,
        is_payment_received: row.get("is_payment_received")?,
        has_buyer_closed: row.get("has_buyer_closed")?,
        has_seller_closed: row.get("has_seller_closed")?,
        dispute_raiser: u256_col(row, "dispute_raiser")?,
        role: parsed_col(row, "role")?,
        state: parsed_col(row, "state")?,
        filling: action_col(row, "filling")?,
        reporting_payment_sent: action_col(row, "reporting_payment_sent")?,
        reporting_payment_received: action_col(row, "reporting_payment_received")?,
        closing: action_col(row, "closing")?,
    })
}

fn conversion_failure(row: &Row<'_>, col: &str, ty: Type, msg: String) -> rusqlite::Error {
    let idx = row.as_ref().column_index(col).unwrap_or_default();
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn u64_col(row: &Row<'_>, col: &str) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(col)?;
    u64::try_from(raw)
        .map_err(|_| conversion_failure(row, col, Type::Integer, format!("invalid {col} {raw}")))
}

fn uuid_col(row: &Row<'_>, col: &str) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(col)?;
    Uuid::parse_str(&raw)
        .map_err(|e| conversion_failure(row, col, Type::Text, format!("invalid uuid {raw}: {e}")))
}

fn u256_col(row: &Row<'_>, col: &str) -> rusqlite::Result<U256> {
    let raw: String = row.get(col)?;
    U256::from_str_radix(&raw, 10)
        .map_err(|e| conversion_failure(row, col, Type::Text, format!("invalid {col} {raw}: {e}")))
}

fn address_col(row: &Row<'_>, col: &str) -> rusqlite::Result<Address> {
    let raw: String = row.get(col)?;
    Address::from_str(&raw)
        .map_err(|e| conversion_failure(row, col, Type::Text, format!("invalid {col} {raw}: {e}")))
}

fn bytes_col(row: &Row<'_>, col: &str) -> rusqlite::Result<Vec<u8>> {
    let raw: String = row.get(col)?;
    hex::decode(&raw)
        .map_err(|e| conversion_failure(row, col, Type::Text, format!("invalid {col} {raw}: {e}")))
}

fn parsed_col<T>(row: &Row<'_>, col: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = EngineError>,
{
    let raw: String = row.get(col)?;
    raw.parse::<T>()
        .map_err(|e| conversion_failure(row, col, Type::Text, e.to_string()))
}

fn action_col(row: &Row<'_>, prefix: &str) -> rusqlite::Result<ActionStatus> {
    let state: ActionState = parsed_col(row, &format!("{prefix}_state"))?;
    let error: Option<String> = row.get(format!("{prefix}_error").as_str())?;
    Ok(ActionStatus { state, error })
}
