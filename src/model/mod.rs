mod action;
mod pipeline;
mod run;
mod scraper;

pub use action::ActionConfig;
pub use pipeline::{PipelineModel, Properties};
pub use run::RunStatus;
pub use scraper::{DaySpec, ScheduleEntry, ScraperModel};
