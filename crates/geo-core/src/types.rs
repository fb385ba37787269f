//! Core request and response types for geospatial analyses.
//!
//! This module defines the validated value types that flow from an inbound request
//! into the expression graph:
//!
//! - [`LatLng`] - A point given as `[lat, lng]`
//! - [`Ring`] - A polygon ring of `[lng, lat]` positions
//! - [`Name`] - A non-empty, trimmed name (province, department)
//! - [`AdminRegion`] - A department identified by province and department name
//! - [`Basin`] - A river basin asset name
//! - [`Year`] - A calendar year, accepted as a number or a numeric string
//! - [`Period`] - An inclusive date range
//! - [`ReferenceDate`] - A day/month pair used as a time series label
//! - [`TileUrl`] - A map tile URL template
//!
//! All types validate on deserialization, so a request that deserializes is a
//! request that can be dispatched.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AnalysisError;

/// A geographic point, supplied by clients as `[lat, lng]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 2]", into = "[f64; 2]")]
pub struct LatLng {
    /// Latitude in degrees, within `[-90, 90]`.
    pub lat: f64,
    /// Longitude in degrees, within `[-180, 180]`.
    pub lng: f64,
}

impl LatLng {
    /// Creates a validated point.
    pub fn new(lat: f64, lng: f64) -> Result<Self, AnalysisError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(AnalysisError::invalid(format!("latitude {lat} out of range")));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(AnalysisError::invalid(format!("longitude {lng} out of range")));
        }
        Ok(Self {
            lat: normalize_zero(lat),
            lng: normalize_zero(lng),
        })
    }

    /// Returns the position in Earth Engine order, `[lng, lat]`.
    #[must_use]
    pub const fn lng_lat(&self) -> [f64; 2] {
        [self.lng, self.lat]
    }
}

impl TryFrom<[f64; 2]> for LatLng {
    type Error = AnalysisError;

    fn try_from([lat, lng]: [f64; 2]) -> Result<Self, Self::Error> {
        Self::new(lat, lng)
    }
}

impl From<LatLng> for [f64; 2] {
    fn from(p: LatLng) -> Self {
        [p.lat, p.lng]
    }
}

impl fmt::Display for LatLng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lat, self.lng)
    }
}

// -0.0 and 0.0 must produce the same cache key.
fn normalize_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

/// Raw polygon input: either a bare ring or a ring wrapped in one outer array.
#[derive(Deserialize)]
#[serde(untagged)]
enum RingRepr {
    Bare(Vec<[f64; 2]>),
    Wrapped(Vec<Vec<[f64; 2]>>),
}

/// A polygon ring of `[lng, lat]` positions (Earth Engine order).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RingRepr", into = "Vec<[f64; 2]>")]
pub struct Ring(Vec<[f64; 2]>);

impl Ring {
    /// Creates a validated ring with at least three positions.
    pub fn new(positions: Vec<[f64; 2]>) -> Result<Self, AnalysisError> {
        if positions.len() < 3 {
            return Err(AnalysisError::invalid(format!(
                "polygon needs at least 3 positions, got {}",
                positions.len()
            )));
        }
        let positions = positions
            .into_iter()
            .map(|[lng, lat]| LatLng::new(lat, lng).map(|p| p.lng_lat()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(positions))
    }

    /// Returns the ring positions.
    #[must_use]
    pub fn positions(&self) -> &[[f64; 2]] {
        &self.0
    }
}

impl TryFrom<RingRepr> for Ring {
    type Error = AnalysisError;

    fn try_from(repr: RingRepr) -> Result<Self, Self::Error> {
        match repr {
            RingRepr::Bare(positions) => Self::new(positions),
            RingRepr::Wrapped(mut rings) if rings.len() == 1 => Self::new(rings.remove(0)),
            RingRepr::Wrapped(rings) => Err(AnalysisError::invalid(format!(
                "expected a single polygon ring, got {}",
                rings.len()
            ))),
        }
    }
}

impl From<Ring> for Vec<[f64; 2]> {
    fn from(ring: Ring) -> Self {
        ring.0
    }
}

/// A non-empty name with surrounding whitespace removed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(String);

impl Name {
    /// Creates a validated name.
    pub fn new(s: impl Into<String>) -> Result<Self, AnalysisError> {
        let s = s.into();
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AnalysisError::invalid("name must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Name {
    type Error = AnalysisError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Name> for String {
    fn from(n: Name) -> Self {
        n.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A department selected by province and department name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct AdminRegion {
    /// Province name, matched against the `PROVINCIA` property.
    pub province: Name,
    /// Department name, matched against the `DEPTO` property.
    pub department: Name,
}

impl AdminRegion {
    /// Creates a region from validated names.
    #[must_use]
    pub const fn new(province: Name, department: Name) -> Self {
        Self {
            province,
            department,
        }
    }
}

impl fmt::Display for AdminRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.department, self.province)
    }
}

/// A river basin, identified by the name of its feature collection asset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Basin(String);

impl Basin {
    /// Creates a validated basin name.
    ///
    /// Only ASCII letters, digits, `_` and `-` are accepted since the name
    /// becomes part of an asset path.
    pub fn new(s: impl Into<String>) -> Result<Self, AnalysisError> {
        let s = s.into();
        let s = s.trim();
        if s.is_empty() {
            return Err(AnalysisError::invalid("basin name must not be empty"));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AnalysisError::invalid(format!("invalid basin name: {s}")));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the basin name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Basin {
    type Error = AnalysisError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Basin> for String {
    fn from(b: Basin) -> Self {
        b.0
    }
}

impl fmt::Display for Basin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum YearRepr {
    Int(i64),
    Float(f64),
    Text(String),
}

/// A calendar year between 1970 and 2100.
///
/// Clients send it either as a JSON number or as a numeric string; both forms
/// produce the same value and therefore the same cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "YearRepr", into = "i32")]
pub struct Year(i32);

impl Year {
    /// Earliest accepted year.
    pub const MIN: i32 = 1970;
    /// Latest accepted year.
    pub const MAX: i32 = 2100;

    /// Creates a validated year.
    pub fn new(year: i64) -> Result<Self, AnalysisError> {
        if !(i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&year) {
            return Err(AnalysisError::invalid(format!("year {year} out of range")));
        }
        Ok(Self(year as i32))
    }

    /// Returns the year as an integer.
    #[must_use]
    pub const fn get(&self) -> i32 {
        self.0
    }

    /// Returns the last two digits, zero padded (`2024` -> `"24"`).
    #[must_use]
    pub fn two_digit(&self) -> String {
        format!("{:02}", self.0.rem_euclid(100))
    }
}

impl TryFrom<YearRepr> for Year {
    type Error = AnalysisError;

    fn try_from(repr: YearRepr) -> Result<Self, Self::Error> {
        match repr {
            YearRepr::Int(y) => Self::new(y),
            YearRepr::Float(f) if f.fract() == 0.0 && f.is_finite() => Self::new(f as i64),
            YearRepr::Float(f) => Err(AnalysisError::invalid(format!("year {f} is not an integer"))),
            YearRepr::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| AnalysisError::invalid(format!("year {s:?} is not a number")))
                .and_then(Self::new),
        }
    }
}

impl From<Year> for i32 {
    fn from(y: Year) -> Self {
        y.0
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An inclusive date range, supplied as `[start, end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[String; 2]", into = "[String; 2]")]
pub struct Period {
    /// First day of the period.
    pub start: NaiveDate,
    /// Last day of the period.
    pub end: NaiveDate,
}

impl Period {
    /// Creates a validated period.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AnalysisError> {
        if start > end {
            return Err(AnalysisError::invalid(format!(
                "period start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }
}

/// Parses `YYYY-MM-DD` or an RFC 3339 timestamp into a calendar date.
pub fn parse_date(s: &str) -> Result<NaiveDate, AnalysisError> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.date_naive()))
        .map_err(|_| AnalysisError::invalid(format!("invalid date: {s:?}")))
}

impl TryFrom<[String; 2]> for Period {
    type Error = AnalysisError;

    fn try_from([start, end]: [String; 2]) -> Result<Self, Self::Error> {
        Self::new(parse_date(&start)?, parse_date(&end)?)
    }
}

impl From<Period> for [String; 2] {
    fn from(p: Period) -> Self {
        [p.start.to_string(), p.end.to_string()]
    }
}

/// A day/month pair used as the label of one time series sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceDate {
    /// Month of the year, 1-12. Declared first so ordering is chronological.
    pub month: u8,
    /// Day of the month, 1-31.
    pub day: u8,
}

impl ReferenceDate {
    /// Creates a reference date. Validity is checked against a concrete year
    /// with [`ReferenceDate::in_year`].
    #[must_use]
    pub const fn new(day: u8, month: u8) -> Self {
        Self { month, day }
    }

    /// Returns the `dd/mm` label used by the frontend.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{:02}/{:02}", self.day, self.month)
    }

    /// Returns the `ddmm` form used in asset names.
    #[must_use]
    pub fn compact(&self) -> String {
        format!("{:02}{:02}", self.day, self.month)
    }

    /// Resolves this reference date in a given year.
    pub fn in_year(&self, year: Year) -> Result<NaiveDate, AnalysisError> {
        NaiveDate::from_ymd_opt(year.get(), u32::from(self.month), u32::from(self.day))
            .ok_or_else(|| AnalysisError::invalid(format!("{} does not exist in {year}", self.label())))
    }
}

impl fmt::Display for ReferenceDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// A map tile URL template with `{z}`, `{x}` and `{y}` placeholders.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileUrl(String);

impl TileUrl {
    /// Wraps a URL template.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// Returns the template as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
