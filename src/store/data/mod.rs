mod processed;
mod record;
mod run;
mod scraper;

pub use processed::{Processed, ProcessedStatus};
pub use record::Record;
pub use run::Run;
pub use scraper::Scraper;
