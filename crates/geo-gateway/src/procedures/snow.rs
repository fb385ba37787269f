//! Snow cover of a river basin from MODIS 8-day composites.
//!
//! A pixel counts as snow when `Maximum_Snow_Extent == 200`; the value of a
//! date is the number of snow pixels inside the basin at 500 m.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, Utc};
use geo_core::{
    AnalysisClientExt, Computed, EeDate, FeatureCollection, Geometry, Image, ImageCollection,
    ReferenceDate, Reducer, RegionReduction, Result, TileUrl, Visualization, Year,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::Analysis;
use crate::assets::SnowExtreme;
use crate::calendar::{snow_dates, window};
use crate::request::{BasinParams, BasinYearParams};

const COLLECTION: &str = "MODIS/061/MOD10A2";
const BAND: &str = "Maximum_Snow_Extent";
const SNOW: f64 = 200.0;
const WINDOW_DAYS: f64 = 7.0;

fn snow_vis() -> Visualization {
    Visualization::new(0.0, 1.0, &["ffffff", "1e90ff"])
}

fn basin_collection(basin: &FeatureCollection) -> ImageCollection {
    ImageCollection::load(COLLECTION)
        .select(BAND)
        .filter_bounds(&basin.geometry())
}

fn snow_pixels(image: &Image, geometry: &Geometry, max_pixels: f64) -> Computed {
    image
        .reduce_region(&RegionReduction::new(Reducer::sum(), geometry, 500.0).max_pixels(max_pixels))
        .get(BAND)
}

/// Images acquired within a week of the reference date.
fn images_near(collection: &ImageCollection, date: ReferenceDate, year: Year) -> Result<ImageCollection> {
    let (start, end) = window(date.in_year(year)?, WINDOW_DAYS);
    Ok(collection.filter_date(&start, &end))
}

/// The image closest in time to the reference date.
///
/// For the running year the window may be only partially filled, so its first
/// image is taken as is.
fn nearest(images: &ImageCollection, date: ReferenceDate, year: Year, current_year: i32) -> Result<Image> {
    if year.get() == current_year {
        return Ok(images.first());
    }
    let center = EeDate::from_date(date.in_year(year)?);
    Ok(images
        .map("image", |image| {
            let diff = image.date().abs_difference(&center, "day");
            image.set("diff", diff)
        })
        .sort("diff")
        .first())
}

/// A tile layer and the reference date it belongs to.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct DatedTile {
    pub(crate) url: TileUrl,
    pub(crate) fecha: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct YearTiles {
    pub(crate) urls_year: Vec<Option<DatedTile>>,
}

/// Basin series with one slot per reference date.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BasinAnnual {
    pub(crate) urls: YearTiles,
    pub(crate) outline_url: TileUrl,
    pub(crate) valores_de_nieve_por_fecha: Vec<Option<f64>>,
    pub(crate) fecha_grafico: Vec<String>,
}

/// Annual snow series of a basin with a tile layer per date.
///
/// Every reference date keeps its slot: dates without an image, or whose
/// nearest image was already used by an earlier date, hold `null`. Fails when
/// every date failed remotely.
#[instrument(skip(ctx), fields(basin = %params.cuenca, year = %params.year))]
pub(crate) async fn basin_annual(ctx: &Analysis, params: &BasinYearParams) -> Result<BasinAnnual> {
    let year = params.year;
    let current_year = Utc::now().year();
    let basin = ctx.assets.basin(&params.cuenca);
    let geometry = basin.geometry();
    let collection = basin_collection(&basin);
    let dates = snow_dates();

    let found = ctx
        .fanout
        .run(dates.clone(), |date| {
            let (client, collection, geometry) = (&ctx.client, &collection, &geometry);
            async move {
                let images = images_near(collection, date, year)?;
                let image = nearest(&images, date, year, current_year)?;
                let snow = image.clip(geometry).equals(SNOW);
                let probe = Computed::if_else(
                    &images.size().gt(0.0),
                    Computed::list(vec![image.id(), snow_pixels(&snow, geometry, 1e8)]),
                    Computed::null(),
                );
                client.fetch::<Option<(String, Option<f64>)>>(&probe).await
            }
        })
        .await
        .require_any()?;

    // One image can be nearest to two dates; the earlier date keeps it.
    let mut seen = HashSet::new();
    let kept: HashMap<ReferenceDate, Option<f64>> = found
        .into_entries()
        .into_iter()
        .filter(|(_, (id, _))| seen.insert(id.clone()))
        .map(|(date, (_, value))| (date, value))
        .collect();
    debug!(kept = kept.len(), total = dates.len(), "Basin images selected");

    let mut with_image: Vec<ReferenceDate> = kept.keys().copied().collect();
    with_image.sort();
    let tiles = ctx
        .fanout
        .run(with_image, |date| {
            let (client, collection, geometry) = (&ctx.client, &collection, &geometry);
            async move {
                let images = images_near(collection, date, year)?;
                let image = nearest(&images, date, year, current_year)?
                    .clip(geometry)
                    .equals(SNOW)
                    .visualize(&snow_vis());
                client.map_tiles(&image).await.map(Some)
            }
        })
        .await;
    let tiles: HashMap<ReferenceDate, TileUrl> = tiles.into_entries().into_iter().collect();

    let outline_url = ctx.outline(&basin, "666666").await?;

    Ok(BasinAnnual {
        urls: YearTiles {
            urls_year: dates
                .iter()
                .map(|d| {
                    tiles.get(d).map(|url| DatedTile {
                        url: url.clone(),
                        fecha: d.label(),
                    })
                })
                .collect(),
        },
        outline_url,
        valores_de_nieve_por_fecha: dates.iter().map(|d| kept.get(d).copied().flatten()).collect(),
        fecha_grafico: dates.iter().map(ReferenceDate::label).collect(),
    })
}

/// Snow series reduced to the dates that have data.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BasinSeries {
    pub(crate) valores_de_nieve_por_fecha: Vec<f64>,
    pub(crate) fecha_grafico: Vec<String>,
}

/// Snow series of a basin for comparing years. Dates without data are dropped;
/// the series fails only when every date failed remotely.
#[instrument(skip(ctx), fields(basin = %params.cuenca, year = %params.year))]
pub(crate) async fn basin_comparator(ctx: &Analysis, params: &BasinYearParams) -> Result<BasinSeries> {
    let year = params.year;
    let basin = ctx.assets.basin(&params.cuenca);
    let geometry = basin.geometry();
    let collection = basin_collection(&basin);

    let batch = ctx
        .fanout
        .run(snow_dates(), |date| {
            let (client, collection, geometry) = (&ctx.client, &collection, &geometry);
            async move {
                let images = images_near(collection, date, year)?;
                let snow = images.first().clip(geometry).equals(SNOW);
                let value = Computed::if_else(
                    &images.size().gt(0.0),
                    snow_pixels(&snow, geometry, 1e8),
                    Computed::null(),
                );
                client.fetch_number(&value).await
            }
        })
        .await
        .require_any()?;

    let (dates, values) = batch.unzip();
    Ok(BasinSeries {
        valores_de_nieve_por_fecha: values,
        fecha_grafico: dates.iter().map(ReferenceDate::label).collect(),
    })
}

/// One historic extreme: the year it occurred, its snow pixels and its layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct Extreme {
    pub(crate) anio: Value,
    pub(crate) nieve: f64,
    pub(crate) url: TileUrl,
}

/// Historic maximum and minimum snow cover of one reference date.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct DateExtremes {
    pub(crate) fecha: String,
    pub(crate) max: Extreme,
    pub(crate) min: Extreme,
}

async fn extreme(ctx: &Analysis, image: &Image, geometry: &Geometry) -> Result<Extreme> {
    let stats = Computed::list(vec![
        image
            .reduce_region(&RegionReduction::new(Reducer::sum(), geometry, 500.0).max_pixels(1e13))
            .get("nieve"),
        image.get("anio"),
    ]);
    let layer = image.visualize(&snow_vis());
    let ((nieve, anio), url) = futures::try_join!(
        ctx.client.fetch::<(Option<f64>, Value)>(&stats),
        ctx.client.map_tiles(&layer),
    )?;
    Ok(Extreme {
        anio,
        nieve: nieve.unwrap_or(0.0),
        url,
    })
}

/// Historic snow cover extremes of a basin for every reference date.
///
/// A date whose assets cannot be read is left out.
#[instrument(skip(ctx), fields(basin = %params.cuenca))]
pub(crate) async fn basin_extremes(ctx: &Analysis, params: &BasinParams) -> Result<Vec<DateExtremes>> {
    let geometry = ctx.assets.basin(&params.cuenca).geometry();

    let batch = ctx
        .fanout
        .run(snow_dates(), |date| {
            let geometry = &geometry;
            async move {
                let max = ctx.assets.snow_extreme(SnowExtreme::Max, date);
                let min = ctx.assets.snow_extreme(SnowExtreme::Min, date);
                let (max, min) =
                    futures::try_join!(extreme(ctx, &max, geometry), extreme(ctx, &min, geometry))?;
                Ok(Some(DateExtremes {
                    fecha: date.label(),
                    max,
                    min,
                }))
            }
        })
        .await
        .require_any()?;

    Ok(batch.unzip().1)
}
