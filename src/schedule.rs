//! Group lesson calendar: weekday recurrence resolution and manual
//! transfer overlay. Pure date arithmetic, no storage access.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Canonical wire/storage format for calendar days.
pub const DAY_FORMAT: &str = "%Y-%m-%d";

pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DAY_FORMAT).ok()
}

pub fn format_day(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    UnknownWeekday(String),
    EmptyPattern,
}

impl Display for ScheduleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownWeekday(token) => write!(f, "unknown weekday token: {}", token),
            Self::EmptyPattern => write!(f, "group has no weekdays configured"),
        }
    }
}

impl Error for ScheduleError {}

/// Maps a domain weekday token to its chrono weekday. The table is
/// exhaustive by construction; any token outside it is a configuration
/// error for the owning group, never a silent no-match.
pub fn parse_weekday_token(token: &str) -> Result<Weekday, ScheduleError> {
    match token.trim().to_ascii_lowercase().as_str() {
        "monday" | "mon" => Ok(Weekday::Mon),
        "tuesday" | "tue" => Ok(Weekday::Tue),
        "wednesday" | "wed" => Ok(Weekday::Wed),
        "thursday" | "thu" => Ok(Weekday::Thu),
        "friday" | "fri" => Ok(Weekday::Fri),
        "saturday" | "sat" => Ok(Weekday::Sat),
        "sunday" | "sun" => Ok(Weekday::Sun),
        _ => Err(ScheduleError::UnknownWeekday(token.trim().to_string())),
    }
}

/// Parses the stored comma-separated weekday list for a group.
pub fn parse_weekday_list(raw: &str) -> Result<Vec<Weekday>, ScheduleError> {
    let mut out = Vec::new();
    for token in raw.split(',') {
        if token.trim().is_empty() {
            continue;
        }
        let day = parse_weekday_token(token)?;
        if !out.contains(&day) {
            out.push(day);
        }
    }
    if out.is_empty() {
        return Err(ScheduleError::EmptyPattern);
    }
    Ok(out)
}

/// Lazy, finite, restartable sequence of the calendar dates a group
/// meets on, clipped to the intersection of the group's date range and
/// the query window. `from > till` yields an empty sequence.
#[derive(Debug, Clone)]
pub struct GroupDays {
    candidate: Option<NaiveDate>,
    end: NaiveDate,
    mask: [bool; 7],
}

impl GroupDays {
    pub fn new(
        weekdays: &[Weekday],
        group_start: NaiveDate,
        group_end: NaiveDate,
        from: NaiveDate,
        till: NaiveDate,
    ) -> Self {
        let start = group_start.max(from);
        let end = group_end.min(till);
        let mut mask = [false; 7];
        for day in weekdays {
            mask[day.num_days_from_monday() as usize] = true;
        }
        Self {
            candidate: if start <= end { Some(start) } else { None },
            end,
            mask,
        }
    }
}

impl Iterator for GroupDays {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        while let Some(day) = self.candidate {
            if day > self.end {
                self.candidate = None;
                break;
            }
            self.candidate = day.succ_opt();
            if self.mask[day.weekday().num_days_from_monday() as usize] {
                return Some(day);
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonTransfer {
    pub original_date: NaiveDate,
    pub real_date: NaiveDate,
    pub created_at: NaiveDateTime,
}

/// One slot of the day axis: the nominal date, plus the substituted
/// date when a transfer rule matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonSlot {
    pub date: NaiveDate,
    pub transfer_date: Option<NaiveDate>,
}

/// Attaches transfer metadata to a resolved day sequence. The axis is
/// never lengthened or shortened. Duplicate rules for one original date
/// are a data inconsistency: the most recently created row wins and the
/// conflict is logged.
pub fn overlay_transfers(
    days: impl IntoIterator<Item = NaiveDate>,
    transfers: &[LessonTransfer],
) -> Vec<LessonSlot> {
    let mut by_original: HashMap<NaiveDate, &LessonTransfer> = HashMap::new();
    for transfer in transfers {
        match by_original.entry(transfer.original_date) {
            Entry::Occupied(mut slot) => {
                log::warn!(
                    "duplicate lesson transfer rows for original_date={}; keeping latest created_at",
                    transfer.original_date
                );
                if transfer.created_at > slot.get().created_at {
                    slot.insert(transfer);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(transfer);
            }
        }
    }

    days.into_iter()
        .map(|date| LessonSlot {
            date,
            transfer_date: by_original.get(&date).map(|t| t.real_date),
        })
        .collect()
}
