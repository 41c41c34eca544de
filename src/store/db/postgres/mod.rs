mod collection;
mod database;
mod synclient;

pub use database::PostgresStore;

pub trait DbInit {
    fn init(&self) -> crate::Result<()>;
}
