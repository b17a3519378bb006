//! Time-of-day access policy.
//!
//! Maps a camera identity and a local wall-clock time to the access-violation
//! tags that apply. Everything here is pure: the same inputs always produce
//! the same tags, which keeps the schedule testable against literal times.

use crate::config::{ConfigValidationError, PolicyConfig};
use crate::types::CameraId;
use chrono::{DateTime, Datelike, Local, NaiveDateTime, Timelike, Utc, Weekday};
use std::collections::HashSet;

pub const TAG_BEFORE_HOURS: &str = "RESTRICTED_ACCESS_BEFORE_HOURS";
pub const TAG_AFTER_HOURS: &str = "RESTRICTED_ACCESS_AFTER_HOURS";

/// A time of day with minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HourMinute {
    pub hour: u32,
    pub minute: u32,
}

impl HourMinute {
    pub fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }

    /// True when `hour:minute` falls strictly before this time.
    fn is_later_than(&self, hour: u32, minute: u32) -> bool {
        hour < self.hour || (hour == self.hour && minute < self.minute)
    }

    /// True when `hour:minute` is this time or later.
    fn is_reached_by(&self, hour: u32, minute: u32) -> bool {
        hour > self.hour || (hour == self.hour && minute >= self.minute)
    }
}

/// Access schedule evaluated per camera.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    office_open: HourMinute,
    office_close: HourMinute,
    restricted_open: HourMinute,
    restricted_close: HourMinute,
    restricted_cameras: HashSet<String>,
    restricted_weekday: Weekday,
}

impl PolicyEngine {
    /// Build the engine from validated configuration.
    pub fn from_config(config: &PolicyConfig) -> Result<Self, ConfigValidationError> {
        Ok(Self {
            office_open: HourMinute::new(config.office_open_hour, config.office_open_minute),
            office_close: HourMinute::new(config.office_close_hour, config.office_close_minute),
            restricted_open: HourMinute::new(
                config.restricted_open_hour,
                config.restricted_open_minute,
            ),
            restricted_close: HourMinute::new(
                config.restricted_close_hour,
                config.restricted_close_minute,
            ),
            restricted_cameras: config.restricted_cameras.iter().cloned().collect(),
            restricted_weekday: config.weekday()?,
        })
    }

    /// Whether the camera is governed by the restricted-hours window.
    pub fn is_restricted_camera(&self, camera: &CameraId) -> bool {
        self.restricted_cameras.contains(camera.as_str())
    }

    /// Access-violation tags for `camera` at local wall-clock time `at`.
    pub fn evaluate(&self, camera: &CameraId, at: NaiveDateTime) -> Vec<String> {
        let hour = at.hour();
        let minute = at.minute();
        let mut tags = Vec::new();

        if self.is_restricted_camera(camera) {
            // The restricted window governs every day, weekday rule included.
            if self.restricted_open.is_later_than(hour, minute)
                || self.restricted_close.is_reached_by(hour, minute)
            {
                tags.push(format!("RESTRICTED_ACCESS_{}", camera));
            }
            return tags;
        }

        if at.weekday() == self.restricted_weekday {
            tags.push(weekday_tag(self.restricted_weekday));
        }

        if self.office_open.is_later_than(hour, minute) {
            tags.push(TAG_BEFORE_HOURS.to_string());
        } else if self.office_close.is_reached_by(hour, minute) {
            tags.push(TAG_AFTER_HOURS.to_string());
        }

        tags
    }
}

fn weekday_tag(weekday: Weekday) -> String {
    let name = match weekday {
        Weekday::Mon => "MONDAY",
        Weekday::Tue => "TUESDAY",
        Weekday::Wed => "WEDNESDAY",
        Weekday::Thu => "THURSDAY",
        Weekday::Fri => "FRIDAY",
        Weekday::Sat => "SATURDAY",
        Weekday::Sun => "SUNDAY",
    };
    format!("RESTRICTED_ACCESS_{}", name)
}

/// Converts UTC instants into the wall-clock time the schedule is written in.
#[derive(Debug, Clone, Copy)]
pub enum PolicyClock {
    /// Host local time
    Local,
    /// A fixed IANA zone
    Zone(chrono_tz::Tz),
}

impl PolicyClock {
    pub fn from_config(config: &PolicyConfig) -> Result<Self, ConfigValidationError> {
        Ok(config.tz()?.map(PolicyClock::Zone).unwrap_or(PolicyClock::Local))
    }

    pub fn wall_clock(&self, now: DateTime<Utc>) -> NaiveDateTime {
        match self {
            PolicyClock::Local => now.with_timezone(&Local).naive_local(),
            PolicyClock::Zone(tz) => now.with_timezone(tz).naive_local(),
        }
    }
}
