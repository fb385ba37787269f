//! Sentinel-1 change detection flood mapping.
//!
//! VH backscatter drops sharply over open water. The after/before ratio of two
//! smoothed mosaics is thresholded, then permanent water, small speckle
//! clusters and slopes are masked out.

use geo_core::{
    AnalysisClientExt, AnalysisError, Computed, EeDate, Filter, Geometry, Image, ImageCollection,
    Period, Reducer, RegionReduction, Result, TileUrl, Visualization,
};
use num_format::{Locale, ToFormattedString};
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::Analysis;
use crate::request::FloodParams;

const POLARIZATION: &str = "VH";
const DIFFERENCE_THRESHOLD: f64 = 1.25;
const SMOOTHING_RADIUS_M: f64 = 50.0;
const MIN_CONNECTED_PIXELS: f64 = 8.0;
const MAX_SLOPE_DEG: f64 = 5.0;
const PERMANENT_WATER_MONTHS: f64 = 10.0;

/// Formats a number the way `es-AR` locales do, with exactly two decimals.
///
/// `1234567.891` becomes `"1.234.567,89"`.
pub(crate) fn format_es_ar(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let grouped = int
        .parse::<u64>()
        .map(|n| n.to_formatted_string(&Locale::es_AR))
        .unwrap_or_else(|_| int.to_string());
    let sign = if value < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };
    format!("{sign}{grouped},{frac}")
}

fn sentinel1(region: &Geometry) -> ImageCollection {
    ImageCollection::load("COPERNICUS/S1_GRD")
        .filter(&Filter::equals("instrumentMode", "IW"))
        .filter(&Filter::list_contains(
            "transmitterReceiverPolarisation",
            POLARIZATION,
        ))
        .filter(&Filter::equals("orbitProperties_pass", "DESCENDING"))
        .filter(&Filter::equals("resolution_meters", 10.0))
        .filter_bounds(region)
        .select(POLARIZATION)
}

fn in_period(collection: &ImageCollection, period: &Period) -> ImageCollection {
    collection.filter_date(
        &EeDate::from_date(period.start),
        &EeDate::from_date(period.end),
    )
}

/// Flooded pixels of the department, masked to `1`.
fn flooded(before: &ImageCollection, after: &ImageCollection, region: &Geometry) -> Image {
    let before = before
        .mosaic()
        .clip(region)
        .focal_mean(SMOOTHING_RADIUS_M);
    let after = after.mosaic().clip(region).focal_mean(SMOOTHING_RADIUS_M);
    let change = after.divide(&before).gt(DIFFERENCE_THRESHOLD);

    let seasonality = Image::load("JRC/GSW1_0/GlobalSurfaceWater").select("seasonality");
    let permanent = seasonality
        .gte(PERMANENT_WATER_MONTHS)
        .update_mask(&seasonality.gte(PERMANENT_WATER_MONTHS));
    let candidate = change.where_(&permanent, &Image::constant(0.0));
    let flooded = candidate.update_mask(&candidate);

    let flooded = flooded.update_mask(&flooded.connected_pixel_count().gte(MIN_CONNECTED_PIXELS));
    let slope = Image::terrain(&Image::load("WWF/HydroSHEDS/03VFDEM")).select("slope");
    flooded.update_mask(&slope.lt(MAX_SLOPE_DEG))
}

/// Flood layer, department outline and flooded area.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FloodMap {
    pub(crate) url_year: TileUrl,
    pub(crate) outline_url: TileUrl,
    #[serde(rename = "flood_area_ha")]
    pub(crate) flood_area_ha: String,
}

/// Maps the flooded area of a department between two periods.
///
/// Fails with [`AnalysisError::NotFound`] when either period has no
/// Sentinel-1 acquisitions over the department.
#[instrument(skip(ctx), fields(region = %params.region()))]
pub(crate) async fn flood_map(ctx: &Analysis, params: &FloodParams) -> Result<FloodMap> {
    let department = ctx.assets.department(&params.region());
    let region = department.geometry();
    let dataset = sentinel1(&region);
    let before = in_period(&dataset, &params.before);
    let after = in_period(&dataset, &params.after);

    let (before_count, after_count): (u64, u64) = ctx
        .client
        .fetch(&Computed::list(vec![before.size(), after.size()]))
        .await?;
    info!(before = before_count, after = after_count, "Sentinel-1 images selected");
    if before_count == 0 || after_count == 0 {
        return Err(AnalysisError::NotFound(format!(
            "No hay imágenes Sentinel-1 para {}: {before_count} antes, {after_count} después",
            params.region()
        )));
    }

    let flooded = flooded(&before, &after, &region);
    let area = flooded
        .select(POLARIZATION)
        .multiply_image(&Image::pixel_area())
        .reduce_region(&RegionReduction::new(Reducer::sum(), &region, 10.0).best_effort())
        .get(POLARIZATION);
    let layer = flooded.visualize(&Visualization::new(0.0, 1.0, &["0000FF"]));

    let (area_m2, url_year, outline_url) = futures::try_join!(
        ctx.client.fetch_number(&area),
        ctx.client.map_tiles(&layer),
        ctx.outline(&department, "FF0000"),
    )?;
    let hectares = area_m2.unwrap_or(0.0) / 10_000.0;
    debug!(hectares, "Flooded area computed");

    Ok(FloodMap {
        url_year,
        outline_url,
        flood_area_ha: format_es_ar(hectares),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetCatalog;
    use crate::testing::MockClient;
    use geo_core::{FanOut, Name, parse_date};
    use serde_json::json;
    use std::sync::Arc;

    fn params() -> FloodParams {
        let period = |a: &str, b: &str| Period::new(parse_date(a).unwrap(), parse_date(b).unwrap()).unwrap();
        FloodParams {
            provincia: Name::new("Buenos Aires").unwrap(),
            localidad: Name::new("Pergamino").unwrap(),
            before: period("2024-01-01", "2024-01-31"),
            after: period("2024-03-01", "2024-03-31"),
        }
    }

    #[test]
    fn test_format_es_ar() {
        assert_eq!(format_es_ar(1_234_567.891), "1.234.567,89");
        assert_eq!(format_es_ar(999.999), "1.000,00");
        assert_eq!(format_es_ar(0.0), "0,00");
        assert_eq!(format_es_ar(12.5), "12,50");
        assert_eq!(format_es_ar(-1500.0), "-1.500,00");
        assert_eq!(format_es_ar(-0.001), "0,00");
        assert_eq!(format_es_ar(123_456_789_012.0), "123.456.789.012,00");
    }

    #[tokio::test]
    async fn test_flood_map() {
        let client = Arc::new(MockClient::new().with_responder(|expr| {
            Ok(match expr {
                geo_core::Expr::Array(_) => json!([3, 2]),
                _ => json!(12_345_678.9),
            })
        }));
        let ctx = Analysis::new(client.clone(), AssetCatalog::default(), FanOut::default());

        let map = flood_map(&ctx, &params()).await.unwrap();

        assert_eq!(map.flood_area_ha, "1.234,57");
        assert_eq!(client.compute_calls(), 2);
        assert_eq!(client.map_calls(), 2);
        let json = serde_json::to_value(&map).unwrap();
        assert!(json["urlYear"].is_string());
        assert!(json["outlineUrl"].is_string());
        assert_eq!(json["flood_area_ha"], "1.234,57");
    }

    #[tokio::test]
    async fn test_empty_period_is_not_found() {
        let client = Arc::new(MockClient::new().with_responder(|_| Ok(json!([4, 0]))));
        let ctx = Analysis::new(client.clone(), AssetCatalog::default(), FanOut::default());

        let err = flood_map(&ctx, &params()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NotFound(_)));
        assert_eq!(client.compute_calls(), 1);
        assert_eq!(client.map_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_flooded_pixels_is_zero() {
        let client = Arc::new(MockClient::new().with_responder(|expr| {
            Ok(match expr {
                geo_core::Expr::Array(_) => json!([1, 1]),
                _ => serde_json::Value::Null,
            })
        }));
        let ctx = Analysis::new(client, AssetCatalog::default(), FanOut::default());

        let map = flood_map(&ctx, &params()).await.unwrap();
        assert_eq!(map.flood_area_ha, "0,00");
    }
}
