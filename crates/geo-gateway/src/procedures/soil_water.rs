//! Classified soil water layers of a department.
//!
//! Two products, three layers each: `amj` (stored water, mm) and `pj`
//! (percent of field capacity), both for May of the requested year.

use std::collections::HashMap;

use geo_core::{Image, Result, TileUrl, Visualization, Year};
use serde::Serialize;
use tracing::{debug, instrument};

use super::Analysis;
use crate::request::DepartmentYearParams;

const MONTH: &str = "05";
const LAYERS_PER_PRODUCT: usize = 3;

/// A product's class breaks and the color of each class.
struct Classes {
    prefix: &'static str,
    breaks: &'static [f64],
    palette: &'static [&'static str],
}

const STORED_WATER: Classes = Classes {
    prefix: "amj",
    breaks: &[0.0, 20.0, 40.0, 60.0, 80.0, 100.0, 130.0, 160.0, 190.0, 220.0, 250.0],
    palette: &[
        "a10000", "f61e22", "f7611f", "f0e31c", "8ced4b", "5fc448", "43973b", "0a742d", "3c988f",
        "2879ac", "2f22cb",
    ],
};

const FIELD_CAPACITY: Classes = Classes {
    prefix: "pj",
    breaks: &[0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0],
    palette: &[
        "ff0000", "ffa500", "ffd600", "eff905", "00ff00", "4fc933", "00ffff", "3fe0d1", "2ba3ef",
        "0000ff",
    ],
};

impl Classes {
    fn layer_names(&self, year: Year) -> Vec<String> {
        (1..=LAYERS_PER_PRODUCT)
            .map(|i| format!("{}{}{MONTH}-{i}", self.prefix, year.two_digit()))
            .collect()
    }

    /// Class `i + 1` for values in `[breaks[i], breaks[i + 1])`, the last class
    /// for values at or above the last break. Masked where the input is.
    fn classify(&self, image: &Image) -> Image {
        let mask = image.mask();
        let mut classes = Image::constant(0.0).update_mask(&mask);
        for (i, pair) in self.breaks.windows(2).enumerate() {
            let in_range = image.gte(pair[0]).and(&image.lt(pair[1]));
            classes = classes.where_(&in_range, &Image::constant((i + 1) as f64));
        }
        if let Some(last) = self.breaks.last() {
            classes = classes.where_(
                &image.gte(*last),
                &Image::constant(self.breaks.len() as f64),
            );
        }
        classes.update_mask(&mask)
    }

    fn visualization(&self) -> Visualization {
        Visualization::new(1.0, self.palette.len() as f64, self.palette)
    }
}

/// Classified layers of both products, one slot per layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SoilWaterLayers {
    pub(crate) clasificacion_urls_amj: Vec<Option<TileUrl>>,
    pub(crate) clasificacion_urls_pj: Vec<Option<TileUrl>>,
    pub(crate) outline_url: TileUrl,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct SoilWaterReport {
    pub(crate) grafico: SoilWaterLayers,
}

/// Tile layers of the classified soil water products over a department.
///
/// A layer that fails keeps its slot as `null`; when every layer fails the
/// first layer's error is returned.
#[instrument(skip(ctx), fields(region = %params.region(), year = %params.year))]
pub(crate) async fn soil_water(ctx: &Analysis, params: &DepartmentYearParams) -> Result<SoilWaterReport> {
    let department = ctx.assets.department(&params.region());
    let region = department.geometry();

    let amj = STORED_WATER.layer_names(params.year);
    let pj = FIELD_CAPACITY.layer_names(params.year);
    let products: HashMap<String, &Classes> = amj
        .iter()
        .map(|name| (name.clone(), &STORED_WATER))
        .chain(pj.iter().map(|name| (name.clone(), &FIELD_CAPACITY)))
        .collect();

    let layers: Vec<String> = amj.iter().chain(&pj).cloned().collect();
    let batch = ctx
        .fanout
        .run(layers, |name| {
            let classes = products.get(&name).copied().unwrap_or(&STORED_WATER);
            let image = classes
                .classify(&ctx.assets.soil_water(&name).clip(&region))
                .visualize(&classes.visualization());
            async move { ctx.client.map_tiles(&image).await.map(Some) }
        })
        .await
        .require_any()?;
    debug!(layers = batch.len(), failed = batch.failed(), "Soil water layers ready");

    let urls: HashMap<String, TileUrl> = batch.into_entries().into_iter().collect();
    let slots = |names: &[String]| -> Vec<Option<TileUrl>> {
        names.iter().map(|n| urls.get(n).cloned()).collect()
    };

    Ok(SoilWaterReport {
        grafico: SoilWaterLayers {
            clasificacion_urls_amj: slots(&amj),
            clasificacion_urls_pj: slots(&pj),
            outline_url: ctx.outline(&department, "666666").await?,
        },
    })
}
