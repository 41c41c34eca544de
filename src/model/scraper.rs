use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::{
    Result, ScrapeflowError,
    model::{PipelineModel, Properties},
};

/// A scraper definition: identity, pipeline source and schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScraperModel {
    pub id: String,
    pub name: String,
    /// Free-form category used in notifications.
    #[serde(default)]
    pub kind: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Pipeline definition, yaml or json.
    pub source: String,
    #[serde(default)]
    pub schedules: Vec<ScheduleEntry>,
}

fn default_active() -> bool {
    true
}

impl ScraperModel {
    pub fn pipeline(&self) -> Result<PipelineModel> {
        PipelineModel::from_source(&self.source)
    }
}

/// When a scraper fires: day code(s), hour and minute.
///
/// `day` is empty or `*` for every day, otherwise a comma separated list of
/// two-letter codes `MO TU WE TH FR SA SU`. Runs started by the entry get
/// its `properties`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    #[serde(default)]
    pub day: String,
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaySpec {
    Any,
    Days(Vec<Weekday>),
}

impl DaySpec {
    pub fn parse(day: &str) -> Result<Self> {
        let day = day.trim();
        if day.is_empty() || day == "*" {
            return Ok(DaySpec::Any);
        }

        let days = day
            .split(',')
            .map(|code| match code.trim().to_ascii_uppercase().as_str() {
                "MO" => Ok(Weekday::Mon),
                "TU" => Ok(Weekday::Tue),
                "WE" => Ok(Weekday::Wed),
                "TH" => Ok(Weekday::Thu),
                "FR" => Ok(Weekday::Fri),
                "SA" => Ok(Weekday::Sat),
                "SU" => Ok(Weekday::Sun),
                other => Err(ScrapeflowError::Config(format!("unknown day code '{}'", other))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DaySpec::Days(days))
    }

    pub fn matches(
        &self,
        weekday: Weekday,
    ) -> bool {
        match self {
            DaySpec::Any => true,
            DaySpec::Days(days) => days.contains(&weekday),
        }
    }
}

impl ScheduleEntry {
    pub fn day_spec(&self) -> Result<DaySpec> {
        DaySpec::parse(&self.day)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 || self.minute > 59 {
            return Err(ScrapeflowError::Config(format!("invalid schedule time {:02}:{:02}", self.hour, self.minute)));
        }
        self.day_spec().map(|_| ())
    }
}
