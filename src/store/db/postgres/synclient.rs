use std::{future::Future, time::Duration};

use sqlx::{
    Database, Error, IntoArguments, PgPool, Postgres,
    postgres::{PgPoolOptions, PgRow},
};
use tokio::{runtime::Handle, task::block_in_place};

/// Blocking facade over an sqlx pool so collections can stay synchronous.
///
/// Must be used from a multi-threaded tokio runtime.
#[derive(Debug, Clone)]
pub struct SynClient {
    pool: PgPool,

    handle: Handle,
}

fn block_on<F: Future>(
    handle: &Handle,
    fut: F,
) -> F::Output {
    block_in_place(|| handle.block_on(fut))
}

impl SynClient {
    pub fn connect(
        db_url: &str,
        max_connections: u32,
    ) -> Result<Self, Error> {
        let handle = Handle::try_current().map_err(|e| Error::Configuration(Box::new(e)))?;
        let pool = block_on(&handle, async move {
            PgPoolOptions::new().acquire_timeout(Duration::from_secs(5)).max_connections(max_connections).connect(db_url).await
        })?;

        Ok(Self {
            pool,
            handle,
        })
    }

    pub fn query_one<'q, A>(
        &self,
        sql: &'q str,
        params: A,
    ) -> Result<PgRow, Error>
    where
        A: IntoArguments<'q, Postgres> + 'q,
    {
        block_on(&self.handle, async move {
            let mut conn = self.pool.acquire().await?;

            sqlx::query_with(sql, params).fetch_one(&mut *conn).await
        })
    }

    pub fn query_optional<'q, A>(
        &self,
        sql: &'q str,
        params: A,
    ) -> Result<Option<PgRow>, Error>
    where
        A: IntoArguments<'q, Postgres> + 'q,
    {
        block_on(&self.handle, async move {
            let mut conn = self.pool.acquire().await?;

            sqlx::query_with(sql, params).fetch_optional(&mut *conn).await
        })
    }

    pub fn query<'q, A>(
        &self,
        sql: &'q str,
        params: A,
    ) -> Result<Vec<PgRow>, Error>
    where
        A: IntoArguments<'q, Postgres> + 'q,
    {
        block_on(&self.handle, async move {
            let mut conn = self.pool.acquire().await?;

            sqlx::query_with(sql, params).fetch_all(&mut *conn).await
        })
    }

    pub fn execute<'q, A>(
        &self,
        sql: &'q str,
        params: A,
    ) -> Result<<Postgres as Database>::QueryResult, Error>
    where
        A: IntoArguments<'q, Postgres> + 'q,
    {
        block_on(&self.handle, async move {
            let mut conn = self.pool.acquire().await?;

            sqlx::query_with(sql, params).execute(&mut *conn).await
        })
    }

    pub fn batch_execute(
        &self,
        sqls: &[String],
    ) -> Result<(), Error> {
        block_on(&self.handle, async move {
            let mut tx = self.pool.begin().await?;

            for sql in sqls {
                sqlx::query(sql).execute(&mut *tx).await?;
            }
            tx.commit().await
        })
    }

    pub fn ping(&self) -> Result<(), Error> {
        block_on(&self.handle, async move {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
    }

    pub fn close(&self) {
        block_on(&self.handle, self.pool.close());
    }
}
