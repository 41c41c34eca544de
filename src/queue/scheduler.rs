//! Cron-style triggers built on the tokio timer.
//!
//! Each trigger owns one task that sleeps until its next `(day, hour, minute)`
//! in local time, fires and computes the following occurrence.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Datelike, Days, Local, NaiveTime, TimeZone};
use serde::Serialize;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    Result, ScrapeflowError,
    model::{DaySpec, ScheduleEntry},
};

/// One registered schedule entry of a scraper.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub scraper_id: String,
    pub scraper_name: String,
    pub entry: ScheduleEntry,
    days: DaySpec,
}

impl Trigger {
    pub fn new(
        scraper_id: &str,
        scraper_name: &str,
        entry: ScheduleEntry,
    ) -> Result<Self> {
        entry.validate()?;
        Ok(Self {
            scraper_id: scraper_id.to_string(),
            scraper_name: scraper_name.to_string(),
            days: entry.day_spec()?,
            entry,
        })
    }

    /// First occurrence strictly after `after`.
    pub fn next_fire(
        &self,
        after: DateTime<Local>,
    ) -> Option<DateTime<Local>> {
        let time = NaiveTime::from_hms_opt(self.entry.hour, self.entry.minute, 0)?;
        (0..=7u64).filter_map(|offset| after.date_naive().checked_add_days(Days::new(offset))).find_map(|date| {
            if !self.days.matches(date.weekday()) {
                return None;
            }
            Local.from_local_datetime(&date.and_time(time)).earliest().filter(|at| *at > after)
        })
    }
}

/// A trigger and when it fires next, as listed to operators.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub scraper_id: String,
    pub scraper_name: String,
    pub day: String,
    pub hour: u32,
    pub minute: u32,
    pub next_run: Option<DateTime<Local>>,
}

pub type FireFn = Arc<dyn Fn(&Trigger) + Send + Sync>;

pub struct Scheduler {
    handle: Handle,
    /// how late a trigger may fire and still run
    grace: Duration,
    jobs: Mutex<Vec<(Trigger, JoinHandle<()>)>>,
}

impl Scheduler {
    pub fn new(
        handle: Handle,
        grace: Duration,
    ) -> Self {
        Self {
            handle,
            grace,
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Registers `trigger`; `fire` is called on every occurrence.
    pub fn add(
        &self,
        trigger: Trigger,
        fire: FireFn,
    ) -> Result<()> {
        let grace = self.grace;
        let job = trigger.clone();
        let task = self.handle.spawn(async move {
            loop {
                let Some(at) = job.next_fire(Local::now()) else {
                    warn!("schedule of '{}' never fires", job.scraper_name);
                    return;
                };
                debug!("'{}' fires next at {}", job.scraper_name, at);
                let wait = (at - Local::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;

                let late = (Local::now() - at).to_std().unwrap_or(Duration::ZERO);
                if late > grace {
                    warn!("skipping '{}' scheduled at {}: {}s late", job.scraper_name, at, late.as_secs());
                    continue;
                }
                info!("schedule fired for '{}'", job.scraper_name);
                fire(&job);
            }
        });
        self.jobs.lock().map_err(|_| ScrapeflowError::Queue("scheduler lock poisoned".into()))?.push((trigger, task));
        Ok(())
    }

    /// Cancels every registered trigger.
    pub fn clear(&self) {
        let jobs = match self.jobs.lock() {
            Ok(mut jobs) => std::mem::take(&mut *jobs),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for (_, task) in jobs {
            task.abort();
        }
    }

    pub fn jobs(&self) -> Vec<ScheduledJob> {
        let now = Local::now();
        let Ok(jobs) = self.jobs.lock() else {
            return Vec::new();
        };
        jobs.iter()
            .map(|(trigger, _)| ScheduledJob {
                scraper_id: trigger.scraper_id.clone(),
                scraper_name: trigger.scraper_name.clone(),
                day: trigger.entry.day.clone(),
                hour: trigger.entry.hour,
                minute: trigger.entry.minute,
                next_run: trigger.next_fire(now),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Timelike, Weekday};

    use super::*;

    fn trigger(
        day: &str,
        hour: u32,
        minute: u32,
    ) -> Trigger {
        Trigger::new(
            "s1",
            "jobs",
            ScheduleEntry {
                day: day.into(),
                hour,
                minute,
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn local(
        y: i32,
        m: u32,
        d: u32,
        h: u32,
        min: u32,
    ) -> DateTime<Local> {
        Local.from_local_datetime(&NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()).earliest().unwrap()
    }

    #[test]
    fn test_next_fire_same_day_and_rollover() {
        // 2024-05-15 is a Wednesday
        let now = local(2024, 5, 15, 10, 0);
        let every_day = trigger("", 12, 30);
        assert_eq!(every_day.next_fire(now), Some(local(2024, 5, 15, 12, 30)));

        let morning = trigger("*", 9, 0);
        assert_eq!(morning.next_fire(now), Some(local(2024, 5, 16, 9, 0)));

        let exactly_now = trigger("", 10, 0);
        assert_eq!(exactly_now.next_fire(now), Some(local(2024, 5, 16, 10, 0)));
    }

    #[test]
    fn test_next_fire_on_given_days() {
        let now = local(2024, 5, 15, 10, 0);
        let mondays = trigger("MO", 6, 0);
        let next = mondays.next_fire(now).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.date_naive(), NaiveDate::from_ymd_opt(2024, 5, 20).unwrap());

        let wednesdays = trigger("WE", 8, 0);
        assert_eq!(wednesdays.next_fire(now).unwrap().date_naive(), NaiveDate::from_ymd_opt(2024, 5, 22).unwrap());

        let weekend = trigger("SA,SU", 23, 59);
        let next = weekend.next_fire(now).unwrap();
        assert_eq!(next.weekday(), Weekday::Sat);
        assert_eq!((next.hour(), next.minute()), (23, 59));
    }

    #[test]
    fn test_invalid_entries_are_rejected() {
        let bad_hour = ScheduleEntry {
            day: "".into(),
            hour: 25,
            minute: 0,
            ..Default::default()
        };
        assert!(Trigger::new("s1", "jobs", bad_hour).is_err());
        let bad_day = ScheduleEntry {
            day: "XX".into(),
            hour: 1,
            minute: 0,
            ..Default::default()
        };
        assert!(Trigger::new("s1", "jobs", bad_day).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_add_and_clear() {
        let scheduler = Scheduler::new(Handle::current(), Duration::from_secs(60));
        scheduler.add(trigger("MO", 6, 0), Arc::new(|_: &Trigger| {})).unwrap();
        scheduler.add(trigger("", 7, 15), Arc::new(|_: &Trigger| {})).unwrap();
        let jobs = scheduler.jobs();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|job| job.next_run.is_some()));
        scheduler.clear();
        assert!(scheduler.is_empty());
    }
}
