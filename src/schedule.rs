//! Relative time offsets for recheck scheduling.
//!
//! An offset is a run of `<integer><unit>` terms applied cumulatively to the
//! calendar fields of "now". Units are `Y` (years), `M` (months), `D` (days),
//! `h` (hours), `m` (minutes) and `s` (seconds), so `1h30m` is ninety minutes
//! from now. The result is normalized the way `mktime(3)` does it: `1M` from
//! January 31st lands on March 3rd (or 2nd in a leap year).
//!
//! A `D` term adds one day more than its numeral, so `2D` means three days.

use std::time::Duration;

use chrono::{
   DateTime, Datelike, Local, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeDelta, TimeZone,
   Timelike,
};

/// Errors produced while turning an offset specification into an interval.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
   #[error("numeral '{0}' is out of range")]
   Overflow(String),

   #[error("offset '{0}' does not resolve to a valid local time")]
   InvalidDate(String),

   #[error("offset '{spec}' yields a negative interval ({secs}s)")]
   Negative { spec: String, secs: i64 },
}

/// Calendar fields of a local time, widened so terms can overflow freely
/// before normalization.
#[derive(Debug, Clone, Copy)]
struct Fields {
   year:   i64,
   month0: i64,
   day:    i64,
   hour:   i64,
   minute: i64,
   second: i64,
}

impl Fields {
   fn from_datetime<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
      let local = now.naive_local();
      Self {
         year:   local.year() as i64,
         month0: local.month0() as i64,
         day:    local.day() as i64,
         hour:   local.hour() as i64,
         minute: local.minute() as i64,
         second: local.second() as i64,
      }
   }

   fn field_mut(&mut self, unit: u8) -> Option<&mut i64> {
      match unit {
         b'Y' => Some(&mut self.year),
         b'M' => Some(&mut self.month0),
         b'D' => Some(&mut self.day),
         b'h' => Some(&mut self.hour),
         b'm' => Some(&mut self.minute),
         b's' => Some(&mut self.second),
         _ => None,
      }
   }

   fn resolve<Tz: TimeZone>(self, tz: &Tz) -> Option<DateTime<Tz>> {
      let months = self.year.checked_mul(12)?.checked_add(self.month0)?;
      let year = i32::try_from(months.div_euclid(12)).ok()?;
      let month = months.rem_euclid(12) as u32 + 1;

      let secs = self
         .hour
         .checked_mul(3600)?
         .checked_add(self.minute.checked_mul(60)?)?
         .checked_add(self.second)?;

      let naive = NaiveDate::from_ymd_opt(year, month, 1)?
         .checked_add_signed(TimeDelta::try_days(self.day.checked_sub(1)?)?)?
         .and_hms_opt(0, 0, 0)?
         .checked_add_signed(TimeDelta::try_seconds(secs)?)?;

      match tz.from_local_datetime(&naive) {
         LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => Some(t),
         LocalResult::None => skip_gap(tz, naive),
      }
   }
}

/// Resolves a local time that falls into a skipped interval (spring
/// forward) by keeping the UTC offset in force before the gap, so 02:30 on
/// a 02:00 to 03:00 gap becomes 03:30.
fn skip_gap<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
   let before = naive.checked_sub_signed(TimeDelta::try_days(1)?)?;
   let offset = tz.from_local_datetime(&before).earliest()?.offset().fix();
   let utc = naive.checked_sub_signed(TimeDelta::try_seconds(offset.local_minus_utc().into())?)?;
   Some(tz.from_utc_datetime(&utc))
}

/// Parses `spec` relative to `now` and returns the offset in seconds.
///
/// Each numeral may be preceded by whitespace and a sign, as `strtoul`
/// accepts them; a negative numeral subtracts. Scanning stops at the first
/// position that holds no numeral. An unknown unit character is logged and
/// skipped together with its numeral; the rest of the specification still
/// applies.
pub fn parse_offset<Tz: TimeZone>(spec: &str, now: &DateTime<Tz>) -> Result<i64, ScheduleError> {
   let now = now
      .with_nanosecond(0)
      .ok_or_else(|| ScheduleError::InvalidDate(spec.to_string()))?;
   let mut fields = Fields::from_datetime(&now);

   let bytes = spec.as_bytes();
   let mut pos = 0;
   while pos < bytes.len() {
      let mut start = pos;
      while start < bytes.len() && bytes[start].is_ascii_whitespace() {
         start += 1;
      }
      let digits = match bytes.get(start) {
         Some(b'+' | b'-') => start + 1,
         _ => start,
      };
      pos = digits;
      while pos < bytes.len() && bytes[pos].is_ascii_digit() {
         pos += 1;
      }
      if pos == digits {
         break;
      }

      let numeral = &spec[start..pos];
      let value: i64 = numeral
         .parse()
         .map_err(|_| ScheduleError::Overflow(numeral.to_string()))?;

      match bytes.get(pos).copied() {
         Some(unit) => match fields.field_mut(unit) {
            Some(field) => {
               let delta = if unit == b'D' { value.checked_add(1) } else { Some(value) };
               *field = delta
                  .and_then(|d| field.checked_add(d))
                  .ok_or_else(|| ScheduleError::Overflow(numeral.to_string()))?;
               tracing::debug!("offset term {value}{}", unit as char);
            },
            None => {
               let shown = spec[pos..].chars().next().unwrap_or('?');
               tracing::error!("Invalid time specifier '{shown}'");
            },
         },
         None => tracing::error!("Missing time specifier after '{numeral}'"),
      }
      pos += 1;
   }

   let deadline = fields
      .resolve(&now.timezone())
      .ok_or_else(|| ScheduleError::InvalidDate(spec.to_string()))?;
   Ok((deadline - now).num_seconds())
}

/// Converts a recheck specification into an interval measured from now.
pub fn recheck_interval(spec: &str) -> Result<Duration, ScheduleError> {
   let secs = parse_offset(spec, &Local::now())?;
   let interval = u64::try_from(secs)
      .map(Duration::from_secs)
      .map_err(|_| ScheduleError::Negative { spec: spec.to_string(), secs })?;
   tracing::info!("Checking every {} secs", interval.as_secs());
   Ok(interval)
}
