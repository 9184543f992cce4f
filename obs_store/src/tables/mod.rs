//! The generic `Table<T>`/`Adapter<T>` contract (§4.G): each concrete table
//! below supplies an [`Adapter`] impl for its row type; [`Table`] is a thin
//! generic wrapper so callers never touch `diesel` directly.
//!
//! §4.G also names `selectids(condition)`/`selectrows(condition)`/
//! `remove(condition)`/`id(uniqueness_condition)`: these are realized ad hoc
//! per table (`config::get`/`set`'s domain+section+name lookup,
//! `metadata::fetch_for_image`, `image::find_by_filename`,
//! `tracking::append_point`/`start_run`, `instrument::components_for`)
//! rather than folded into this trait, because a single generic `condition`
//! type would need a `BoxableExpression` per table's own `diesel::table!`
//! schema — which throws away the compile-time query checking that is the
//! entire point of depending on `diesel` in the first place. `exists`/
//! `nextid`/`lastid` have no such obstacle (they're all just `id`
//! arithmetic), so they get real default implementations below.

use async_trait::async_trait;
use diesel::sql_types::{BigInt, Nullable};
use diesel::QueryableByName;
use diesel_async::RunQueryDsl;
use obs_core::error::DeviceError;

use crate::db::{diesel_err, DbConnection};

pub mod calibration;
pub mod config;
pub mod image;
pub mod instrument;
pub mod metadata;
pub mod task;
pub mod tracking;

#[derive(QueryableByName)]
struct MaxId {
    #[diesel(sql_type = Nullable<BigInt>)]
    max_id: Option<i64>,
}

#[async_trait]
pub trait Adapter<T>: Send + Sync {
    fn table_name(&self) -> &'static str;
    async fn add(&self, conn: &mut DbConnection, value: &T) -> Result<i64, DeviceError>;
    async fn update(&self, conn: &mut DbConnection, id: i64, value: &T) -> Result<(), DeviceError>;
    async fn by_id(&self, conn: &mut DbConnection, id: i64) -> Result<T, DeviceError>;
    async fn remove(&self, conn: &mut DbConnection, id: i64) -> Result<(), DeviceError>;
    async fn count(&self, conn: &mut DbConnection) -> Result<i64, DeviceError>;

    /// §4.G's `exists(id)`. Goes through `by_id` since every concrete
    /// adapter already has a `NotFound`-mapped lookup (`diesel_err` maps
    /// diesel's own `NotFound` straight through).
    async fn exists(&self, conn: &mut DbConnection, id: i64) -> Result<bool, DeviceError> {
        match self.by_id(conn, id).await {
            Ok(_) => Ok(true),
            Err(DeviceError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// §4.G's `lastid()`: the highest id currently in the table, `None` if
    /// it's empty. `table_name()` is always one of this crate's own
    /// compile-time-fixed names, never caller input.
    async fn lastid(&self, conn: &mut DbConnection) -> Result<Option<i64>, DeviceError> {
        let row: MaxId = diesel::sql_query(format!("SELECT MAX(id) AS max_id FROM {}", self.table_name()))
            .get_result(conn)
            .await
            .map_err(diesel_err)?;
        Ok(row.max_id)
    }

    /// §4.G's `nextid()`: the id the next `add` would assign.
    async fn nextid(&self, conn: &mut DbConnection) -> Result<i64, DeviceError> {
        Ok(self.lastid(conn).await?.unwrap_or(0) + 1)
    }
}

pub struct Table<A> {
    adapter: A,
}

impl<T, A: Adapter<T>> Table<A> {
    pub fn new(adapter: A) -> Self {
        Table { adapter }
    }

    pub fn name(&self) -> &'static str {
        self.adapter.table_name()
    }

    pub async fn add(&self, conn: &mut DbConnection, value: &T) -> Result<i64, DeviceError> {
        self.adapter.add(conn, value).await
    }

    pub async fn update(
        &self,
        conn: &mut DbConnection,
        id: i64,
        value: &T,
    ) -> Result<(), DeviceError> {
        self.adapter.update(conn, id, value).await
    }

    pub async fn by_id(&self, conn: &mut DbConnection, id: i64) -> Result<T, DeviceError> {
        self.adapter.by_id(conn, id).await
    }

    pub async fn remove(&self, conn: &mut DbConnection, id: i64) -> Result<(), DeviceError> {
        self.adapter.remove(conn, id).await
    }

    pub async fn count(&self, conn: &mut DbConnection) -> Result<i64, DeviceError> {
        self.adapter.count(conn).await
    }

    pub async fn exists(&self, conn: &mut DbConnection, id: i64) -> Result<bool, DeviceError> {
        self.adapter.exists(conn, id).await
    }

    pub async fn lastid(&self, conn: &mut DbConnection) -> Result<Option<i64>, DeviceError> {
        self.adapter.lastid(conn).await
    }

    pub async fn nextid(&self, conn: &mut DbConnection) -> Result<i64, DeviceError> {
        self.adapter.nextid(conn).await
    }
}
