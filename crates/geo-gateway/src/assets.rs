//! Project asset catalog.
//!
//! All project-owned assets (administrative boundaries, basins, precomputed
//! statistics) live under one configurable root. Public Earth Engine datasets
//! are referenced directly by the procedures that use them.

use geo_core::{AdminRegion, Basin, FeatureCollection, Filter, Image, ReferenceDate, Year};

/// Default asset root of the project.
pub const DEFAULT_ASSET_ROOT: &str = "projects/geosepa/assets";

/// Which historic NDVI statistic to load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NdviStatistic {
    /// Per-date historic maximum.
    Max,
    /// Per-date historic minimum.
    Min,
    /// Per-date historic mean.
    Mean,
}

/// Which snow cover extreme to load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnowExtreme {
    /// Largest snow cover observed for the date.
    Max,
    /// Smallest snow cover observed for the date.
    Min,
}

/// Resolves project asset ids under a root path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetCatalog {
    root: String,
}

impl Default for AssetCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_ASSET_ROOT)
    }
}

impl AssetCatalog {
    /// Create a catalog rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_end_matches('/').to_string(),
        }
    }

    /// Returns the root path.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    fn id(&self, path: &str) -> String {
        format!("{}/{}", self.root, path)
    }

    /// All departments of the country.
    #[must_use]
    pub fn departments(&self) -> FeatureCollection {
        FeatureCollection::load(&self.id("depart/departamentos"))
    }

    /// The department matching a province and department name.
    #[must_use]
    pub fn department(&self, region: &AdminRegion) -> FeatureCollection {
        self.departments().filter(&Filter::and(vec![
            Filter::equals("PROVINCIA", region.province.as_str()),
            Filter::equals("DEPTO", region.department.as_str()),
        ]))
    }

    /// A river basin outline.
    #[must_use]
    pub fn basin(&self, basin: &Basin) -> FeatureCollection {
        FeatureCollection::load(&self.id(&format!("cuencas/{basin}")))
    }

    /// Historic snow cover extreme for a reference date.
    #[must_use]
    pub fn snow_extreme(&self, extreme: SnowExtreme, date: ReferenceDate) -> Image {
        let kind = match extreme {
            SnowExtreme::Max => "max",
            SnowExtreme::Min => "min",
        };
        Image::load(&self.id(&format!(
            "extremosNieve/Snow_{kind}_{}",
            date.compact()
        )))
    }

    /// Historic NDVI statistic stack, one band per reference date.
    #[must_use]
    pub fn ndvi_history(&self, statistic: NdviStatistic) -> Image {
        let name = match statistic {
            NdviStatistic::Max => "NDVI_max",
            NdviStatistic::Min => "NDVI_min",
            NdviStatistic::Mean => "NDVI_med",
        };
        Image::load(&self.id(&format!("NDVI/{name}")))
    }

    /// Classified NDVI anomaly stack for a year, one band per reference date.
    #[must_use]
    pub fn ndvi_anomaly(&self, year: Year) -> Image {
        Image::load(&self.id(&format!("AnomaliaNdvi/Anomalia{year}")))
    }

    /// A soil water layer, e.g. `amj2405-1`.
    #[must_use]
    pub fn soil_water(&self, layer: &str) -> Image {
        Image::load(&self.id(&format!("AguaSuelo/{layer}")))
    }
}
