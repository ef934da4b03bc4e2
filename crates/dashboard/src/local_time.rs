//! Valley-local calendar helpers. Offsets are resolved per instant from the
//! configured IANA zone, so a local day is 23 or 25 hours long across a
//! daylight saving change.

use log::warn;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};
use time_tz::{timezones, OffsetDateTimeExt, OffsetResult, PrimitiveDateTimeExt, Tz};
use valley_wx_core::{Tuning, DEFAULT_TIMEZONE};

pub fn local_zone(tuning: &Tuning) -> &'static Tz {
    match timezones::get_by_name(&tuning.timezone) {
        Some(zone) => zone,
        None => {
            warn!(
                "unknown timezone '{}', falling back to {}",
                tuning.timezone, DEFAULT_TIMEZONE
            );
            timezones::db::australia::MELBOURNE
        }
    }
}

fn earliest(result: OffsetResult<OffsetDateTime>) -> Option<OffsetDateTime> {
    match result {
        OffsetResult::Some(at) => Some(at),
        OffsetResult::Ambiguous(first, second) => Some(first.min(second)),
        OffsetResult::None => None,
    }
}

/// Instant of a local wall-clock time. Repeated wall times take the earlier
/// instant; a wall time skipped by a forward change maps to the instant the
/// clock jumped over it.
fn resolve(local: PrimitiveDateTime, zone: &Tz) -> OffsetDateTime {
    earliest(local.assume_timezone(zone))
        .or_else(|| earliest((local + Duration::hours(1)).assume_timezone(zone)))
        .unwrap_or_else(|| local.assume_utc())
        .to_offset(UtcOffset::UTC)
}

/// Instant of local `hour`:00 on `date`. Hours past 23 roll into the
/// following days, negative hours into the preceding ones.
pub fn local_instant(date: Date, hour: i64, zone: &Tz) -> OffsetDateTime {
    let day = date + Duration::days(hour.div_euclid(24));
    resolve(day.midnight() + Duration::hours(hour.rem_euclid(24)), zone)
}

/// `[date 00:00, next day 00:00)` local, in UTC
pub fn local_day_bounds(date: Date, zone: &Tz) -> (OffsetDateTime, OffsetDateTime) {
    (local_instant(date, 0, zone), local_instant(date, 24, zone))
}

/// `[prior day 19:00, date 08:00)` local, in UTC
pub fn overnight_bounds(date: Date, zone: &Tz) -> (OffsetDateTime, OffsetDateTime) {
    (local_instant(date, -5, zone), local_instant(date, 8, zone))
}

/// Local date and hour of an instant.
pub fn local_date_hour(now: OffsetDateTime, zone: &Tz) -> (Date, u8) {
    let local = now.to_timezone(zone);
    (local.date(), local.hour())
}

/// The most recent fully completed local day.
pub fn yesterday(now: OffsetDateTime, zone: &Tz) -> Date {
    let (today, _) = local_date_hour(now, zone);
    today.previous_day().unwrap_or(today)
}
