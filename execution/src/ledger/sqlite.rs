use super::{clamp_delta, fresh_name, normalize_name, AccountStore, Ledger, LedgerError};
use busride_types::bus::{Account, UserId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tracing::{debug, error, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT UNIQUE NOT NULL,
    balance INTEGER NOT NULL CHECK (balance >= 0)
);
";

/// How long a statement waits on a locked database file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Ledger persisted in a SQLite database, one row per user.
///
/// Deltas run in their own transaction on a blocking thread. Balances are
/// stored as signed 64-bit integers, so they top out at `i64::MAX`.
pub struct Sqlite {
    starting_balance: u64,
    conn: Arc<Mutex<Connection>>,
}

impl Sqlite {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>, starting_balance: u64) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let ledger = Self::init(Connection::open(path)?, starting_balance)?;
        let accounts: i64 = ledger
            .lock()?
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        info!(path = %path.display(), accounts, "opened ledger database");
        Ok(ledger)
    }

    /// Database that lives only as long as the ledger.
    pub fn in_memory(starting_balance: u64) -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?, starting_balance)
    }

    fn init(conn: Connection, starting_balance: u64) -> Result<Self, LedgerError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            starting_balance,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn starting_balance(&self) -> u64 {
        self.starting_balance
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        lock(&self.conn)
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn blocking<T: Send + 'static>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, LedgerError> + Send + 'static,
    ) -> Result<T, LedgerError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&mut *lock(&conn)?))
            .await
            .map_err(|e| LedgerError::Unavailable(format!("ledger task failed: {e}")))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, LedgerError> {
    conn.lock().map_err(|e| {
        error!("Failed to acquire ledger lock: {}", e);
        LedgerError::Unavailable("ledger lock poisoned".to_string())
    })
}

fn to_db(balance: u64) -> i64 {
    i64::try_from(balance).unwrap_or(i64::MAX)
}

fn from_db(balance: i64) -> u64 {
    u64::try_from(balance).unwrap_or(0)
}

fn read_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account::new(
        UserId(row.get(0)?),
        row.get(1)?,
        from_db(row.get(2)?),
    ))
}

fn find(conn: &Connection, user: &UserId) -> Result<Option<Account>, LedgerError> {
    let account = conn
        .query_row(
            "SELECT id, username, balance FROM users WHERE id = ?1",
            params![user.as_str()],
            read_account,
        )
        .optional()?;
    Ok(account)
}

/// Whether `name` belongs to anyone other than `user`.
fn name_taken(conn: &Connection, name: &str, user: &UserId) -> Result<bool, LedgerError> {
    let taken = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1 AND id != ?2)",
        params![name, user.as_str()],
        |row| row.get(0),
    )?;
    Ok(taken)
}

fn entry(
    conn: &Connection,
    user: &UserId,
    starting_balance: u64,
) -> Result<(Account, bool), LedgerError> {
    if let Some(account) = find(conn, user)? {
        return Ok((account, false));
    }
    let name = fresh_name(user, |name| name_taken(conn, name, user))?;
    let balance = to_db(starting_balance);
    conn.execute(
        "INSERT INTO users (id, username, balance) VALUES (?1, ?2, ?3)",
        params![user.as_str(), name, balance],
    )?;
    info!(%user, %name, "created account");
    Ok((Account::new(user.clone(), name, from_db(balance)), true))
}

impl AccountStore for Sqlite {
    fn register(&self, user: &UserId) -> Result<(Account, bool), LedgerError> {
        entry(&*self.lock()?, user, self.starting_balance)
    }

    fn account(&self, user: &UserId) -> Result<Option<Account>, LedgerError> {
        find(&*self.lock()?, user)
    }

    fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        let conn = self.lock()?;
        let mut statement =
            conn.prepare("SELECT id, username, balance FROM users ORDER BY username")?;
        let accounts = statement
            .query_map([], read_account)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    fn rename(&self, user: &UserId, name: &str) -> Result<Account, LedgerError> {
        let name = normalize_name(name)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if name_taken(&tx, name, user)? {
            return Err(LedgerError::NameTaken(name.to_string()));
        }
        let (mut account, _) = entry(&tx, user, self.starting_balance)?;
        tx.execute(
            "UPDATE users SET username = ?1 WHERE id = ?2",
            params![name, user.as_str()],
        )?;
        tx.commit()?;
        account.display_name = name.to_string();
        Ok(account)
    }

    fn set_balance(&self, user: &UserId, balance: i64) -> Result<Option<Account>, LedgerError> {
        let conn = self.lock()?;
        let Some(mut account) = find(&conn, user)? else {
            return Ok(None);
        };
        let balance = balance.max(0);
        conn.execute(
            "UPDATE users SET balance = ?1 WHERE id = ?2",
            params![balance, user.as_str()],
        )?;
        account.balance = from_db(balance);
        info!(%user, balance = account.balance, "balance overwritten");
        Ok(Some(account))
    }
}

impl Ledger for Sqlite {
    async fn balance(&self, user: &UserId) -> Result<u64, LedgerError> {
        let user = user.clone();
        let starting_balance = self.starting_balance;
        self.blocking(move |conn| Ok(entry(conn, &user, starting_balance)?.0.balance))
            .await
    }

    async fn apply_delta(&self, user: &UserId, delta: i64) -> Result<u64, LedgerError> {
        let user = user.clone();
        let starting_balance = self.starting_balance;
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let (account, _) = entry(&tx, &user, starting_balance)?;
            let balance = to_db(clamp_delta(account.balance, delta));
            tx.execute(
                "UPDATE users SET balance = ?1 WHERE id = ?2",
                params![balance, user.as_str()],
            )?;
            tx.commit()?;
            debug!(%user, delta, previous = account.balance, balance, "applied delta");
            Ok(from_db(balance))
        })
        .await
    }
}
