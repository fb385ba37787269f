//! Analysis procedures, one per operation.
//!
//! Each procedure builds expression graphs against the project assets, fans
//! per-date queries out through [`FanOut`] and shapes the results into the JSON
//! the frontend expects.

use std::sync::Arc;

use geo_core::{
    AnalysisClient, FanOut, FeatureCollection, Image, Result, TileUrl, Visualization,
};

use crate::assets::AssetCatalog;

pub(crate) mod flood;
pub(crate) mod location;
pub(crate) mod ndvi;
pub(crate) mod snow;
pub(crate) mod soil_water;

/// Everything a procedure needs to talk to the remote service.
#[derive(Clone, Debug)]
pub(crate) struct Analysis {
    pub(crate) client: Arc<dyn AnalysisClient>,
    pub(crate) assets: AssetCatalog,
    pub(crate) fanout: FanOut,
}

impl Analysis {
    pub(crate) const fn new(
        client: Arc<dyn AnalysisClient>,
        assets: AssetCatalog,
        fanout: FanOut,
    ) -> Self {
        Self {
            client,
            assets,
            fanout,
        }
    }

    /// Tile URL of the feature outlines, drawn 2px wide in `color`.
    pub(crate) async fn outline(&self, features: &FeatureCollection, color: &str) -> Result<TileUrl> {
        let image = Image::blank()
            .paint(features, 1.0, 2.0)
            .visualize(&Visualization::new(0.0, 1.0, &[color]));
        self.client.map_tiles(&image).await
    }
}
