//! Checked-out connections.
//!
//! A [`Connection`] is either a plain pooled connection (read path) or a
//! connection with an open transaction (write path). Dropping it returns the
//! connection to its pool; dropping an uncommitted transaction rolls it back.

use crate::drivers::{Engine, EnginePool};
use crate::error::{DaoError, DbResult, SqlFailure};
use crate::logging::DbContext;
use crate::models::{Dialect, Direction};
use sqlx::pool::PoolConnection;
use sqlx::{Database, MySql, Postgres, Sqlite, Transaction};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub(crate) enum Slot<DB: Database> {
    Plain(PoolConnection<DB>),
    Tx(Transaction<'static, DB>),
}

impl<DB: Database> Slot<DB> {
    pub(crate) fn conn(&mut self) -> &mut DB::Connection {
        match self {
            Self::Plain(conn) => &mut **conn,
            Self::Tx(tx) => &mut **tx,
        }
    }

    async fn commit(self) -> Result<(), sqlx::Error> {
        match self {
            Self::Plain(_) => Ok(()),
            Self::Tx(tx) => tx.commit().await,
        }
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        match self {
            Self::Plain(_) => Ok(()),
            Self::Tx(tx) => tx.rollback().await,
        }
    }

    fn is_transaction(&self) -> bool {
        matches!(self, Self::Tx(_))
    }
}

pub(crate) enum Link {
    Postgres(Slot<Postgres>),
    MySql(Slot<MySql>),
    Sqlite(Slot<Sqlite>),
}

/// A connection checked out from an [`Engine`].
pub struct Connection {
    id: Uuid,
    direction: Direction,
    context: Arc<DbContext>,
    link: Link,
}

fn acquire_error(direction: Direction, err: sqlx::Error) -> DaoError {
    let failure = SqlFailure::classify(&err);
    DaoError::relational(
        failure.code(direction),
        format!("Could not obtain {direction} connection: {err}"),
    )
    .with_source(err)
}

impl Connection {
    /// Check out a plain connection.
    pub async fn acquire(engine: &Engine, direction: Direction) -> DbResult<Self> {
        let link = match engine.pool() {
            EnginePool::Postgres(pool) => Link::Postgres(Slot::Plain(
                pool.acquire().await.map_err(|e| acquire_error(direction, e))?,
            )),
            EnginePool::MySql(pool) => Link::MySql(Slot::Plain(
                pool.acquire().await.map_err(|e| acquire_error(direction, e))?,
            )),
            EnginePool::Sqlite(pool) => Link::Sqlite(Slot::Plain(
                pool.acquire().await.map_err(|e| acquire_error(direction, e))?,
            )),
        };
        Ok(Self::wrap(engine, direction, link))
    }

    /// Check out a connection and open a transaction on it.
    pub async fn begin(engine: &Engine) -> DbResult<Self> {
        let direction = Direction::Write;
        let link = match engine.pool() {
            EnginePool::Postgres(pool) => Link::Postgres(Slot::Tx(
                pool.begin().await.map_err(|e| acquire_error(direction, e))?,
            )),
            EnginePool::MySql(pool) => Link::MySql(Slot::Tx(
                pool.begin().await.map_err(|e| acquire_error(direction, e))?,
            )),
            EnginePool::Sqlite(pool) => Link::Sqlite(Slot::Tx(
                pool.begin().await.map_err(|e| acquire_error(direction, e))?,
            )),
        };
        Ok(Self::wrap(engine, direction, link))
    }

    fn wrap(engine: &Engine, direction: Direction, link: Link) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            context: Arc::clone(engine.context()),
            link,
        }
    }

    /// Identity used to correlate statement logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn context(&self) -> &DbContext {
        &self.context
    }

    pub fn dialect(&self) -> Dialect {
        match self.link {
            Link::Postgres(_) => Dialect::Postgres,
            Link::MySql(_) => Dialect::MySql,
            Link::Sqlite(_) => Dialect::Sqlite,
        }
    }

    pub fn is_transaction(&self) -> bool {
        match &self.link {
            Link::Postgres(slot) => slot.is_transaction(),
            Link::MySql(slot) => slot.is_transaction(),
            Link::Sqlite(slot) => slot.is_transaction(),
        }
    }

    pub(crate) fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    /// Commit the open transaction. A no-op on plain connections.
    pub async fn commit(self) -> DbResult<()> {
        let direction = self.direction;
        let result = match self.link {
            Link::Postgres(slot) => slot.commit().await,
            Link::MySql(slot) => slot.commit().await,
            Link::Sqlite(slot) => slot.commit().await,
        };
        result.map_err(|e| {
            let failure = SqlFailure::classify(&e);
            DaoError::relational(failure.code(direction), format!("Commit failed: {e}"))
                .with_source(e)
        })
    }

    /// Roll back the open transaction. A no-op on plain connections.
    pub async fn rollback(self) -> DbResult<()> {
        let direction = self.direction;
        let result = match self.link {
            Link::Postgres(slot) => slot.rollback().await,
            Link::MySql(slot) => slot.rollback().await,
            Link::Sqlite(slot) => slot.rollback().await,
        };
        result.map_err(|e| {
            let failure = SqlFailure::classify(&e);
            DaoError::relational(failure.code(direction), format!("Rollback failed: {e}"))
                .with_source(e)
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("dialect", &self.dialect())
            .field("direction", &self.direction)
            .field("transaction", &self.is_transaction())
            .field("host", &self.context.host())
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} {} connection {} to {}>",
            self.dialect(),
            self.direction,
            self.id,
            self.context.host()
        )
    }
}
