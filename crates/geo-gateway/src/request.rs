//! Inbound routes and their validated parameters.
//!
//! Request bodies are plain JSON objects. Each route accepts a fixed set of
//! `funcion` values; the remaining fields deserialize into a typed parameter
//! struct. Deserialization is validation: every value type in [`geo_core`]
//! rejects malformed input, so an [`Operation`] is always dispatchable.

use geo_core::{AdminRegion, Basin, CacheKey, LatLng, Name, Period, Ring, Year};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, Result};

/// An analysis route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `POST /verificar-ubicacion`
    VerifyLocation,
    /// `POST /getMapIdCuenca`
    BasinSnow,
    /// `POST /getCuencaYearComparador`
    BasinComparator,
    /// `POST /getExtremosCuenca`
    BasinExtremes,
    /// `POST /getMapIdInu`
    Flood,
    /// `POST /getMapIdNdvi`
    NdviDepartment,
    /// `POST /getNdviYearComparador`
    NdviComparator,
    /// `POST /getPointNdvi`
    NdviPoint,
    /// `POST /getPolyNdvi`
    NdviPolygon,
    /// `POST /getMapIdAguaSuelo`
    SoilWater,
}

impl Endpoint {
    /// All analysis routes.
    pub const ALL: [Self; 10] = [
        Self::VerifyLocation,
        Self::BasinSnow,
        Self::BasinComparator,
        Self::BasinExtremes,
        Self::Flood,
        Self::NdviDepartment,
        Self::NdviComparator,
        Self::NdviPoint,
        Self::NdviPolygon,
        Self::SoilWater,
    ];

    /// Route name, as it appears in the URL path.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::VerifyLocation => "verificar-ubicacion",
            Self::BasinSnow => "getMapIdCuenca",
            Self::BasinComparator => "getCuencaYearComparador",
            Self::BasinExtremes => "getExtremosCuenca",
            Self::Flood => "getMapIdInu",
            Self::NdviDepartment => "getMapIdNdvi",
            Self::NdviComparator => "getNdviYearComparador",
            Self::NdviPoint => "getPointNdvi",
            Self::NdviPolygon => "getPolyNdvi",
            Self::SoilWater => "getMapIdAguaSuelo",
        }
    }

    /// URL path of the route.
    #[must_use]
    pub fn path(&self) -> String {
        format!("/{}", self.name())
    }

    /// Accepted `funcion` values. Empty when the route takes none.
    #[must_use]
    pub const fn functions(&self) -> &'static [&'static str] {
        match self {
            Self::VerifyLocation | Self::BasinExtremes => &[],
            Self::BasinComparator | Self::NdviComparator => &["graficoComparativo"],
            Self::NdviPolygon => &["graficoAnual", "graficoAnual2"],
            Self::BasinSnow | Self::Flood | Self::NdviDepartment | Self::NdviPoint | Self::SoilWater => {
                &["graficoAnual"]
            }
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters of the point-in-department check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationParams {
    /// Point to check, `[lat, lng]` like every other route. Earlier versions
    /// of this route took `[lng, lat]`; clients must send latitude first.
    pub point: LatLng,
    /// Province name.
    pub provincia: Name,
    /// Department name.
    pub localidad: Name,
}

impl LocationParams {
    /// The department to check against.
    #[must_use]
    pub fn region(&self) -> AdminRegion {
        AdminRegion::new(self.provincia.clone(), self.localidad.clone())
    }
}

/// A basin and a year.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BasinYearParams {
    /// Basin asset name.
    pub cuenca: Basin,
    /// Calendar year.
    #[serde(rename = "año", alias = "anio", alias = "year")]
    pub year: Year,
}

/// A basin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BasinParams {
    /// Basin asset name.
    pub cuenca: Basin,
}

/// A department and the periods before and after a flood.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FloodParams {
    /// Province name.
    pub provincia: Name,
    /// Department name.
    pub localidad: Name,
    /// Reference period before the event.
    #[serde(rename = "firstPeriodo")]
    pub before: Period,
    /// Period after the event.
    #[serde(rename = "secondPeriodo")]
    pub after: Period,
}

impl FloodParams {
    /// The department to analyse.
    #[must_use]
    pub fn region(&self) -> AdminRegion {
        AdminRegion::new(self.provincia.clone(), self.localidad.clone())
    }
}

/// A department, a point inside it and a year.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepartmentYearParams {
    /// Province name.
    pub provincia: Name,
    /// Department name.
    pub localidad: Name,
    /// Calendar year.
    #[serde(rename = "año", alias = "anio", alias = "year")]
    pub year: Year,
    /// Point of interest, `[lat, lng]`.
    pub point: LatLng,
}

impl DepartmentYearParams {
    /// The department to analyse.
    #[must_use]
    pub fn region(&self) -> AdminRegion {
        AdminRegion::new(self.provincia.clone(), self.localidad.clone())
    }
}

/// A point and a year.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointYearParams {
    /// Point of interest, `[lat, lng]`.
    pub point: LatLng,
    /// Calendar year.
    #[serde(rename = "año", alias = "anio", alias = "year")]
    pub year: Year,
}

/// A polygon and a year.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolygonYearParams {
    /// Area of interest.
    pub polygon: Ring,
    /// Calendar year.
    #[serde(rename = "año", alias = "anio", alias = "year")]
    pub year: Year,
}

/// A validated analysis request.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// Is the point inside the department?
    VerifyLocation(LocationParams),
    /// Basin snow cover series with tiles, every reference date kept.
    BasinAnnual(BasinYearParams),
    /// Basin snow cover series for year-over-year comparison.
    BasinComparator(BasinYearParams),
    /// Historic snow cover extremes per reference date.
    BasinExtremes(BasinParams),
    /// Flood map and flooded area of a department.
    Flood(FloodParams),
    /// Department NDVI series, tiles and anomaly classes.
    NdviDepartment(DepartmentYearParams),
    /// Point NDVI series for comparison.
    NdviComparator(PointYearParams),
    /// Point NDVI series with historic statistics.
    NdviPoint(PointYearParams),
    /// Polygon NDVI series with historic statistics.
    NdviPolygon(PolygonYearParams),
    /// Polygon NDVI series alone.
    NdviPolygonSeries(PolygonYearParams),
    /// Classified soil water layers of a department.
    SoilWater(DepartmentYearParams),
}

fn params<T: DeserializeOwned>(body: &Value) -> Result<T> {
    T::deserialize(body).map_err(GatewayError::validation)
}

impl Operation {
    /// Validates a request body for `endpoint`.
    ///
    /// The `funcion` discriminator is checked before any other field.
    pub fn parse(endpoint: Endpoint, body: &Value) -> Result<Self> {
        if !body.is_object() {
            return Err(GatewayError::validation("expected a JSON object"));
        }

        let accepted = endpoint.functions();
        let function = if accepted.is_empty() {
            None
        } else {
            match body.get("funcion") {
                Some(Value::String(f)) if accepted.contains(&f.as_str()) => Some(f.as_str()),
                Some(Value::String(f)) => return Err(GatewayError::UnknownFunction(f.clone())),
                Some(_) => return Err(GatewayError::validation("`funcion` must be a string")),
                None => return Err(GatewayError::validation("missing field `funcion`")),
            }
        };

        Ok(match (endpoint, function) {
            (Endpoint::VerifyLocation, _) => Self::VerifyLocation(params(body)?),
            (Endpoint::BasinSnow, _) => Self::BasinAnnual(params(body)?),
            (Endpoint::BasinComparator, _) => Self::BasinComparator(params(body)?),
            (Endpoint::BasinExtremes, _) => Self::BasinExtremes(params(body)?),
            (Endpoint::Flood, _) => Self::Flood(params(body)?),
            (Endpoint::NdviDepartment, _) => Self::NdviDepartment(params(body)?),
            (Endpoint::NdviComparator, _) => Self::NdviComparator(params(body)?),
            (Endpoint::NdviPoint, _) => Self::NdviPoint(params(body)?),
            (Endpoint::NdviPolygon, Some("graficoAnual2")) => {
                Self::NdviPolygonSeries(params(body)?)
            }
            (Endpoint::NdviPolygon, _) => Self::NdviPolygon(params(body)?),
            (Endpoint::SoilWater, _) => Self::SoilWater(params(body)?),
        })
    }

    /// Name of the operation: route plus `funcion`, when the route takes one.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::VerifyLocation(_) => "verificar-ubicacion",
            Self::BasinAnnual(_) => "getMapIdCuenca/graficoAnual",
            Self::BasinComparator(_) => "getCuencaYearComparador/graficoComparativo",
            Self::BasinExtremes(_) => "getExtremosCuenca",
            Self::Flood(_) => "getMapIdInu/graficoAnual",
            Self::NdviDepartment(_) => "getMapIdNdvi/graficoAnual",
            Self::NdviComparator(_) => "getNdviYearComparador/graficoComparativo",
            Self::NdviPoint(_) => "getPointNdvi/graficoAnual",
            Self::NdviPolygon(_) => "getPolyNdvi/graficoAnual",
            Self::NdviPolygonSeries(_) => "getPolyNdvi/graficoAnual2",
            Self::SoilWater(_) => "getMapIdAguaSuelo/graficoAnual",
        }
    }

    /// Cache key derived from the operation name and its typed parameters.
    pub fn cache_key(&self) -> Result<CacheKey> {
        let name = self.name();
        let key = match self {
            Self::VerifyLocation(p) => CacheKey::new(name, p),
            Self::BasinAnnual(p) | Self::BasinComparator(p) => CacheKey::new(name, p),
            Self::BasinExtremes(p) => CacheKey::new(name, p),
            Self::Flood(p) => CacheKey::new(name, p),
            Self::NdviDepartment(p) | Self::SoilWater(p) => CacheKey::new(name, p),
            Self::NdviComparator(p) | Self::NdviPoint(p) => CacheKey::new(name, p),
            Self::NdviPolygon(p) | Self::NdviPolygonSeries(p) => CacheKey::new(name, p),
        };
        Ok(key?)
    }
}
