//! Reference dates of the MODIS composites.
//!
//! MOD10A2 (snow) is an 8-day composite and MOD13Q1 (NDVI) a 16-day composite,
//! both starting on day-of-year 1. The labels follow the composite starts of a
//! non-leap year and are reused for every year.

use chrono::{Datelike, Duration, NaiveDate};
use geo_core::{EeDate, ReferenceDate};

fn composite_starts(step_days: i64) -> Vec<ReferenceDate> {
    let Some(first) = NaiveDate::from_ymd_opt(2001, 1, 1) else {
        return Vec::new();
    };
    (0..)
        .map(|k| first + Duration::days(k * step_days))
        .take_while(|d| d.year() == 2001)
        .map(|d| ReferenceDate::new(d.day() as u8, d.month() as u8))
        .collect()
}

/// The 46 start dates of the 8-day snow composites.
#[must_use]
pub fn snow_dates() -> Vec<ReferenceDate> {
    composite_starts(8)
}

/// The 23 start dates of the 16-day NDVI composites.
#[must_use]
pub fn ndvi_dates() -> Vec<ReferenceDate> {
    composite_starts(16)
}

/// A search window of `half_width_days` on each side of `date`.
#[must_use]
pub fn window(date: NaiveDate, half_width_days: f64) -> (EeDate, EeDate) {
    let center = EeDate::from_date(date);
    (
        center.advance(-half_width_days, "day"),
        center.advance(half_width_days, "day"),
    )
}
