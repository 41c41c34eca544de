use std::{marker::PhantomData, sync::Arc};

use sea_query::{
    Alias as SeaAlias, ColumnDef, Condition, Expr as SeaExpr, Func as SeaFunc, Iden, Order as SeaOrder, PostgresQueryBuilder, Query as SeaQuery,
    SimpleExpr, Table, extension::postgres::PgExpr,
};
use sea_query_binder::SqlxBinder;
use sqlx::{Row, postgres::PgRow};

use crate::{
    Result, ScrapeflowError,
    store::{
        DbCollection, PageData,
        db::{DbDocument, postgres::DbInit},
        map_db_err,
        query::{self, CondOp},
    },
    utils,
};

use super::synclient::SynClient;

pub type DbConnection = Arc<SynClient>;

#[derive(Iden)]
enum DocIden {
    Id,
    Data,
    Timestamp,
}

/// A collection stored as `(id, data, timestamp)` rows where `data` holds
/// the serialized row and filters address its top-level json fields.
#[derive(Debug)]
pub struct DocCollection<T> {
    conn: DbConnection,
    table: &'static str,
    _marker: PhantomData<fn() -> T>,
}

/// `CAST(data AS jsonb) ->> field`, with the field name bound as a value.
fn json_field(field: &str) -> SimpleExpr {
    SeaExpr::col(DocIden::Data).cast_as(SeaAlias::new("jsonb")).cast_json_field(field)
}

/// Translates the backend-neutral query into a sea-query condition.
pub fn into_query(q: &query::Query) -> Condition {
    let mut cond = Condition::all();
    for c in q.conditions() {
        let text = query::text_of(&c.value);
        cond = match c.op {
            CondOp::Eq => cond.add(SeaExpr::expr(json_field(&c.field)).eq(text)),
            CondOp::Contains => cond.add(SeaExpr::expr(json_field(&c.field)).like(format!("%{}%", text))),
        };
    }
    cond
}

impl<T> DocCollection<T>
where
    T: DbDocument,
{
    pub fn new(
        conn: &DbConnection,
        table: &'static str,
    ) -> Self {
        Self {
            conn: conn.clone(),
            table,
            _marker: PhantomData,
        }
    }

    fn table(&self) -> SeaAlias {
        SeaAlias::new(self.table)
    }

    fn from_row(row: &PgRow) -> Result<T> {
        let data = row.try_get::<String, _>("data").map_err(map_db_err)?;
        Ok(serde_json::from_str::<T>(&data)?)
    }

    fn select(
        &self,
        q: &query::Query,
    ) -> sea_query::SelectStatement {
        let mut query = SeaQuery::select();
        query.column(DocIden::Data).from(self.table()).cond_where(into_query(q));
        for (field, rev) in q.order_by() {
            let order = if *rev {
                SeaOrder::Desc
            } else {
                SeaOrder::Asc
            };
            if field == "timestamp" {
                query.order_by(DocIden::Timestamp, order);
            } else {
                query.order_by_expr(json_field(field), order);
            }
        }
        query
    }
}

impl<T> DbCollection for DocCollection<T>
where
    T: DbDocument + Send + Sync,
{
    type Item = T;

    fn exists(
        &self,
        id: &str,
    ) -> Result<bool> {
        let (sql, values) = SeaQuery::select()
            .from(self.table())
            .expr(SeaFunc::count(SeaExpr::col(DocIden::Id)))
            .and_where(SeaExpr::col(DocIden::Id).eq(id))
            .build_sqlx(PostgresQueryBuilder);

        let count = self.conn.query_one(sql.as_str(), values).map(|row| row.get::<i64, usize>(0)).map_err(map_db_err)?;

        Ok(count > 0)
    }

    fn find(
        &self,
        id: &str,
    ) -> Result<Self::Item> {
        let (sql, values) =
            SeaQuery::select().from(self.table()).column(DocIden::Data).and_where(SeaExpr::col(DocIden::Id).eq(id)).build_sqlx(PostgresQueryBuilder);

        match self.conn.query_optional(&sql, values).map_err(map_db_err)? {
            Some(row) => Self::from_row(&row),
            None => Err(ScrapeflowError::Store(format!("cannot find '{}' in {}", id, self.table))),
        }
    }

    fn find_first(
        &self,
        q: &query::Query,
    ) -> Result<Option<Self::Item>> {
        let (sql, values) = self.select(q).limit(1).build_sqlx(PostgresQueryBuilder);
        self.conn.query_optional(&sql, values).map_err(map_db_err)?.map(|row| Self::from_row(&row)).transpose()
    }

    fn count(
        &self,
        q: &query::Query,
    ) -> Result<usize> {
        let (sql, values) =
            SeaQuery::select().from(self.table()).expr(SeaFunc::count(SeaExpr::col(DocIden::Id))).cond_where(into_query(q)).build_sqlx(PostgresQueryBuilder);
        let count = self.conn.query_one(sql.as_str(), values).map_err(map_db_err)?.get::<i64, usize>(0);
        Ok(count as usize)
    }

    fn query(
        &self,
        q: &query::Query,
    ) -> Result<PageData<Self::Item>> {
        let count = self.count(q)?;
        let (sql, values) = self.select(q).limit(q.limit() as u64).offset(q.offset() as u64).build_sqlx(PostgresQueryBuilder);
        let rows = self.conn.query(&sql, values).map_err(map_db_err)?.iter().map(Self::from_row).collect::<Result<Vec<_>>>()?;

        Ok(PageData {
            count,
            page_size: q.limit(),
            page_num: q.offset() / q.limit() + 1,
            page_count: count.div_ceil(q.limit()),
            rows,
        })
    }

    fn create(
        &self,
        data: &Self::Item,
    ) -> Result<bool> {
        let text = serde_json::to_string(data)?;
        let (sql, values) = SeaQuery::insert()
            .into_table(self.table())
            .columns([DocIden::Id, DocIden::Data, DocIden::Timestamp])
            .values([data.id().into(), text.into(), utils::time::time_millis().into()])
            .map_err(map_db_err)?
            .build_sqlx(PostgresQueryBuilder);

        let result = self.conn.execute(sql.as_str(), values).map_err(map_db_err)?;
        Ok(result.rows_affected() > 0)
    }

    fn update(
        &self,
        data: &Self::Item,
    ) -> Result<bool> {
        let text = serde_json::to_string(data)?;
        let (sql, values) = SeaQuery::update()
            .table(self.table())
            .values([(DocIden::Data, text.into())])
            .and_where(SeaExpr::col(DocIden::Id).eq(data.id()))
            .build_sqlx(PostgresQueryBuilder);

        let result = self.conn.execute(sql.as_str(), values).map_err(map_db_err)?;
        Ok(result.rows_affected() > 0)
    }

    fn delete(
        &self,
        id: &str,
    ) -> Result<bool> {
        let (sql, values) = SeaQuery::delete().from_table(self.table()).and_where(SeaExpr::col(DocIden::Id).eq(id)).build_sqlx(PostgresQueryBuilder);

        let result = self.conn.execute(sql.as_str(), values).map_err(map_db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

impl<T> DbInit for DocCollection<T>
where
    T: DbDocument,
{
    fn init(&self) -> Result<()> {
        let sql = [Table::create()
            .table(self.table())
            .if_not_exists()
            .col(ColumnDef::new(DocIden::Id).string().not_null().primary_key())
            .col(ColumnDef::new(DocIden::Data).text().not_null())
            .col(ColumnDef::new(DocIden::Timestamp).big_integer().default(0))
            .build(PostgresQueryBuilder)];
        self.conn.batch_execute(&sql).map_err(map_db_err)
    }
}

#[cfg(test)]
mod tests {
    use sea_query::{PostgresQueryBuilder, Value};

    use super::*;
    use crate::store::query::{Cond, Query};

    #[test]
    fn test_into_query_sql() {
        let q = Query::new().filter(Cond::eq("status", "error")).filter(Cond::contains("message", "timeout"));
        let select = SeaQuery::select().column(DocIden::Data).from(SeaAlias::new("processed")).cond_where(into_query(&q)).to_owned();

        let sql = select.to_string(PostgresQueryBuilder);
        assert!(sql.contains("->> 'status'"), "{}", sql);
        assert!(sql.contains("'error'"), "{}", sql);
        assert!(sql.contains("->> 'message'"), "{}", sql);
        assert!(sql.contains("LIKE '%timeout%'"), "{}", sql);
        assert!(!sql.contains('?'), "{}", sql);

        // field names travel as bound values next to the compared ones
        let (sql, values) = select.build(PostgresQueryBuilder);
        assert!(!sql.contains('?'), "{}", sql);
        assert!(sql.contains("->> $1"), "{}", sql);
        assert_eq!(values.0[..2], [Value::from("status"), Value::from("error")]);
        assert!(values.0.contains(&Value::from("message")));
    }
}
