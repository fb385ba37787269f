//! NDVI series from MODIS 16-day composites.
//!
//! MOD13Q1 stores NDVI scaled by 10000; the historic stacks and the served
//! values are in percent, hence the `0.01` factors below.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use geo_core::{
    AnalysisClientExt, AnalysisError, Computed, EeDate, Geometry, ImageCollection, Reducer,
    ReferenceDate, RegionReduction, Result, TileUrl, Visualization, Year,
};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::Analysis;
use crate::assets::NdviStatistic;
use crate::calendar::{ndvi_dates, window};
use crate::request::{DepartmentYearParams, PointYearParams, PolygonYearParams};

const COLLECTION: &str = "MODIS/061/MOD13Q1";
const BAND: &str = "NDVI";
const WINDOW_DAYS: f64 = 15.0;
const SCALE: f64 = 0.01;

fn ndvi_vis() -> Visualization {
    Visualization::new(
        0.0,
        80.0,
        &[
            "1F12D4", "A903D6", "F80100", "C99811", "FFFE08", "7BF319", "0EE517", "2E9936",
        ],
    )
    .with_opacity(1.0)
}

fn anomaly_vis() -> Visualization {
    // Above max, above mean, mean, below mean, below min, no data.
    Visualization::new(
        1.0,
        6.0,
        &["255d2a", "00ff00", "ffffff", "f4a300", "b30000", "bfbfbf"],
    )
}

/// Images of the collection within 15 days of the reference date.
fn images_near(collection: &ImageCollection, date: ReferenceDate, year: Year) -> Result<ImageCollection> {
    let (start, end) = window(date.in_year(year)?, WINDOW_DAYS);
    Ok(collection.filter_date(&start, &end))
}

/// NDVI of the first image in the window, reduced over `region`, or `null`
/// when the window is empty.
fn ndvi_near(
    images: &ImageCollection,
    reducer: Reducer,
    region: &Geometry,
    scale: f64,
) -> Computed {
    let value = images
        .first()
        .reduce_region(&RegionReduction::new(reducer, region, scale).max_pixels(1e8))
        .get(BAND);
    Computed::if_else(&images.size().gt(0.0), value, Computed::null())
}

/// Historic NDVI statistics, one value per reference date.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct NdviHistory {
    pub(crate) maximos: Vec<Option<f64>>,
    pub(crate) minimos: Vec<Option<f64>>,
    pub(crate) media: Vec<Option<f64>>,
}

/// Orders `b1, b2, ..., b10` numerically rather than lexically.
fn by_band_number(values: BTreeMap<String, Option<f64>>) -> Vec<Option<f64>> {
    let mut bands: Vec<(u32, Option<f64>)> = values
        .into_iter()
        .filter_map(|(band, v)| {
            band.trim_start_matches('b')
                .parse::<u32>()
                .ok()
                .map(|n| (n, v))
        })
        .collect();
    bands.sort_by_key(|(n, _)| *n);
    bands.into_iter().map(|(_, v)| v).collect()
}

/// Historic max/min/mean at a region. A point is sampled with
/// [`Reducer::first`], a polygon averaged with [`Reducer::mean`].
async fn history(ctx: &Analysis, region: &Geometry, reducer: fn() -> Reducer) -> Result<NdviHistory> {
    let stat = |statistic| {
        let stack = ctx.assets.ndvi_history(statistic);
        let values = stack
            .reduce_region(&RegionReduction::new(reducer(), region, 250.0).max_pixels(1e13))
            .computed();
        async move {
            ctx.client
                .fetch::<BTreeMap<String, Option<f64>>>(&values)
                .await
                .map(by_band_number)
        }
    };
    let (maximos, minimos, media) = futures::try_join!(
        stat(NdviStatistic::Max),
        stat(NdviStatistic::Min),
        stat(NdviStatistic::Mean),
    )?;
    Ok(NdviHistory {
        maximos,
        minimos,
        media,
    })
}

/// Historic statistics are decoration; a failure leaves them out.
async fn history_or_none(ctx: &Analysis, region: &Geometry, reducer: fn() -> Reducer) -> Option<NdviHistory> {
    match history(ctx, region, reducer).await {
        Ok(history) => Some(history),
        Err(e) => {
            warn!(error = %e, "Historic NDVI unavailable");
            None
        }
    }
}

fn year_bounds(year: Year) -> Result<(EeDate, EeDate)> {
    let start = NaiveDate::from_ymd_opt(year.get(), 1, 1);
    let end = NaiveDate::from_ymd_opt(year.get() + 1, 1, 1);
    match (start, end) {
        (Some(start), Some(end)) => Ok((EeDate::from_date(start), EeDate::from_date(end))),
        _ => Err(AnalysisError::invalid(format!("year {year} out of range"))),
    }
}

/// Department NDVI for one year.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DepartmentNdvi {
    pub(crate) urls: Vec<TileUrl>,
    pub(crate) clasificacion_urls: Vec<TileUrl>,
    pub(crate) outline_url: TileUrl,
    pub(crate) fecha_grafico: Vec<String>,
    pub(crate) valores_ndvi_punto: Vec<f64>,
}

/// Department NDVI response: the yearly series and the historic statistics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct DepartmentNdviReport {
    pub(crate) grafico: DepartmentNdvi,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) promedio: Option<NdviHistory>,
}

/// Anomaly class layers of the year, one per band of the anomaly stack.
///
/// The layers are positional, so a partial set is useless: any failure yields
/// an empty list.
async fn anomaly_layers(ctx: &Analysis, year: Year, region: &Geometry) -> Vec<TileUrl> {
    let stack = ctx.assets.ndvi_anomaly(year);
    let bands: Vec<String> = match ctx.client.fetch(&stack.band_names()).await {
        Ok(bands) => bands,
        Err(e) => {
            warn!(error = %e, %year, "Anomaly stack unavailable");
            return Vec::new();
        }
    };

    let expected = bands.len();
    let batch = ctx
        .fanout
        .run(bands, |band| {
            let layer = stack.select(&band).clip(region).visualize(&anomaly_vis());
            async move { ctx.client.map_tiles(&layer).await.map(Some) }
        })
        .await;
    if batch.len() != expected {
        warn!(expected, produced = batch.len(), "Incomplete anomaly layers, dropping");
        return Vec::new();
    }
    batch.unzip().1
}

/// NDVI at a point through the year, with a clipped layer per date and the
/// anomaly classification of the department.
#[instrument(skip(ctx), fields(region = %params.region(), year = %params.year))]
pub(crate) async fn department_ndvi(ctx: &Analysis, params: &DepartmentYearParams) -> Result<DepartmentNdviReport> {
    let year = params.year;
    let department = ctx.assets.department(&params.region());
    let region = department.geometry();
    let point = Geometry::point(params.point);
    let (start, end) = year_bounds(year)?;
    let collection = ImageCollection::load(COLLECTION)
        .select(BAND)
        .filter_bounds(&region)
        .filter_date(&start, &end);

    let batch = ctx
        .fanout
        .run(ndvi_dates(), |date| {
            let (collection, region, point) = (&collection, &region, &point);
            async move {
                let images = images_near(collection, date, year)?;
                let value = ndvi_near(&images, Reducer::mean(), point, 250.0);
                let Some(value) = ctx.client.fetch_number(&value).await? else {
                    return Ok(None);
                };
                let layer = images
                    .first()
                    .clip(region)
                    .multiply(SCALE)
                    .visualize(&ndvi_vis());
                let url = ctx.client.map_tiles(&layer).await?;
                Ok(Some((value * SCALE, url)))
            }
        })
        .await
        .require_any()?;
    debug!(
        dates = batch.len(),
        discarded = batch.discarded(),
        failed = batch.failed(),
        "NDVI dates resolved"
    );

    let (clasificacion_urls, outline_url, promedio) = futures::join!(
        anomaly_layers(ctx, year, &region),
        ctx.outline(&department, "666666"),
        history_or_none(ctx, &point, Reducer::first),
    );

    let (dates, samples): (Vec<ReferenceDate>, Vec<(f64, TileUrl)>) = batch.unzip();
    let (valores_ndvi_punto, urls): (Vec<f64>, Vec<TileUrl>) = samples.into_iter().unzip();

    Ok(DepartmentNdviReport {
        grafico: DepartmentNdvi {
            urls,
            clasificacion_urls,
            outline_url: outline_url?,
            fecha_grafico: dates.iter().map(ReferenceDate::label).collect(),
            valores_ndvi_punto,
        },
        promedio,
    })
}

/// NDVI series at a point.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PointSeries {
    pub(crate) fecha_grafico: Vec<String>,
    pub(crate) valores_ndvi_punto: Vec<f64>,
}

/// NDVI series averaged over a polygon.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PolygonSeries {
    pub(crate) fecha_grafico: Vec<String>,
    pub(crate) valores_ndvi_poligono: Vec<f64>,
}

/// A series with the historic statistics of the same region.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct SeriesReport<T> {
    pub(crate) grafico: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) promedio: Option<NdviHistory>,
}

/// Dates with an NDVI value over `region`, in date order, scaled to percent.
///
/// Fails only when every date failed remotely.
async fn series(ctx: &Analysis, region: &Geometry, year: Year) -> Result<(Vec<String>, Vec<f64>)> {
    let collection = ImageCollection::load(COLLECTION)
        .select(BAND)
        .filter_bounds(region);
    let batch = ctx
        .fanout
        .run(ndvi_dates(), |date| {
            let collection = &collection;
            async move {
                let images = images_near(collection, date, year)?;
                let value = ndvi_near(&images, Reducer::mean(), region, 500.0);
                Ok(ctx.client.fetch_number(&value).await?.map(|v| v * SCALE))
            }
        })
        .await
        .require_any()?;
    let (dates, values) = batch.unzip();
    Ok((dates.iter().map(ReferenceDate::label).collect(), values))
}

/// NDVI series at a point.
#[instrument(skip(ctx), fields(point = %params.point, year = %params.year))]
pub(crate) async fn point_series(ctx: &Analysis, params: &PointYearParams) -> Result<PointSeries> {
    let (fecha_grafico, valores_ndvi_punto) =
        series(ctx, &Geometry::point(params.point), params.year).await?;
    Ok(PointSeries {
        fecha_grafico,
        valores_ndvi_punto,
    })
}

/// NDVI series at a point with the historic statistics at that point.
pub(crate) async fn point_report(ctx: &Analysis, params: &PointYearParams) -> Result<SeriesReport<PointSeries>> {
    let point = Geometry::point(params.point);
    let (grafico, promedio) = futures::join!(
        point_series(ctx, params),
        history_or_none(ctx, &point, Reducer::first),
    );
    Ok(SeriesReport {
        grafico: grafico?,
        promedio,
    })
}

/// NDVI series averaged over a polygon.
#[instrument(skip(ctx, params), fields(year = %params.year))]
pub(crate) async fn polygon_series(ctx: &Analysis, params: &PolygonYearParams) -> Result<PolygonSeries> {
    let (fecha_grafico, valores_ndvi_poligono) =
        series(ctx, &Geometry::polygon(&params.polygon), params.year).await?;
    Ok(PolygonSeries {
        fecha_grafico,
        valores_ndvi_poligono,
    })
}

/// NDVI series over a polygon, optionally with the historic statistics
/// averaged over the same polygon.
pub(crate) async fn polygon_report(
    ctx: &Analysis,
    params: &PolygonYearParams,
    with_history: bool,
) -> Result<SeriesReport<PolygonSeries>> {
    let polygon = Geometry::polygon(&params.polygon);
    if !with_history {
        return Ok(SeriesReport {
            grafico: polygon_series(ctx, params).await?,
            promedio: None,
        });
    }
    let (grafico, promedio) = futures::join!(
        polygon_series(ctx, params),
        history_or_none(ctx, &polygon, Reducer::mean),
    );
    Ok(SeriesReport {
        grafico: grafico?,
        promedio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetCatalog;
    use crate::testing::{MockClient, date_constant, mentions};
    use geo_core::{FanOut, LatLng, Name, Ring};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn ctx(client: &Arc<MockClient>) -> Analysis {
        Analysis::new(client.clone(), AssetCatalog::default(), FanOut::new(3))
    }

    const HISTORY_MAX: &str = "projects/geosepa/assets/NDVI/NDVI_max";

    #[test]
    fn test_bands_sorted_numerically() {
        let values: BTreeMap<String, Option<f64>> = [
            ("b10".to_string(), Some(10.0)),
            ("b2".to_string(), Some(2.0)),
            ("b1".to_string(), None),
        ]
        .into_iter()
        .collect();
        assert_eq!(by_band_number(values), [None, Some(2.0), Some(10.0)]);
    }

    #[tokio::test]
    async fn test_point_series_scales_and_orders() {
        let client = Arc::new(
            MockClient::new()
                .with_responder(|expr| {
                    Ok(match date_constant(expr).as_deref() {
                        Some("2022-01-01") => json!(7500.0),
                        Some("2022-01-17") => Value::Null,
                        Some("2022-02-02") => json!(6000.0),
                        Some("2022-02-18") => {
                            return Err(AnalysisError::upstream("Computation timed out."));
                        }
                        _ => Value::Null,
                    })
                })
                .with_compute_delay(std::time::Duration::from_millis(5)),
        );
        let params = PointYearParams {
            point: LatLng::new(-31.4, -64.2).unwrap(),
            year: Year::new(2022).unwrap(),
        };

        let series = point_series(&ctx(&client), &params).await.unwrap();

        assert_eq!(series.fecha_grafico, ["01/01", "02/02"]);
        assert_eq!(series.valores_ndvi_punto, [75.0, 60.0]);
        assert_eq!(client.compute_calls(), 23);
    }

    #[tokio::test]
    async fn test_polygon_report_history_is_optional() {
        let client = Arc::new(MockClient::new().with_responder(|expr| {
            if mentions(expr, HISTORY_MAX) {
                return Err(AnalysisError::NotFound("NDVI_max".into()));
            }
            if expr.invokes("Image.load") {
                return Ok(json!({"b2": 40.0, "b1": 30.0}));
            }
            Ok(match date_constant(expr).as_deref() {
                Some("2022-03-06") => json!(5000.0),
                _ => Value::Null,
            })
        }));
        let params = PolygonYearParams {
            polygon: Ring::new(vec![[-64.0, -31.0], [-63.0, -31.0], [-63.0, -32.0]]).unwrap(),
            year: Year::new(2022).unwrap(),
        };

        let report = polygon_report(&ctx(&client), &params, true).await.unwrap();
        assert_eq!(report.grafico.fecha_grafico, ["06/03"]);
        assert_eq!(report.grafico.valores_ndvi_poligono, [50.0]);
        assert!(report.promedio.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json, json!({"grafico": {"fechaGrafico": ["06/03"], "valoresNdviPoligono": [50.0]}}));
    }

    #[tokio::test]
    async fn test_point_report_includes_history() {
        let client = Arc::new(MockClient::new().with_responder(|expr| {
            if expr.invokes("Image.load") {
                return Ok(json!({"b10": 80.0, "b9": 70.0, "b1": 10.0}));
            }
            Ok(Value::Null)
        }));
        let params = PointYearParams {
            point: LatLng::new(-31.4, -64.2).unwrap(),
            year: Year::new(2022).unwrap(),
        };

        let report = point_report(&ctx(&client), &params).await.unwrap();
        let history = report.promedio.unwrap();
        assert_eq!(history.maximos, [Some(10.0), Some(70.0), Some(80.0)]);
        assert_eq!(history.media.len(), 3);
        assert!(report.grafico.fecha_grafico.is_empty());
    }

    #[tokio::test]
    async fn test_series_with_every_date_failed_is_an_error() {
        let client = Arc::new(MockClient::new().with_responder(|expr| {
            if expr.invokes("Image.load") {
                return Ok(json!({"b1": 50.0}));
            }
            Err(AnalysisError::RateLimited {
                service: "Earth Engine".into(),
                retry_after: None,
            })
        }));
        let params = PointYearParams {
            point: LatLng::new(-31.4, -64.2).unwrap(),
            year: Year::new(2022).unwrap(),
        };

        let err = point_report(&ctx(&client), &params).await.unwrap_err();
        assert!(matches!(err, AnalysisError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_series_without_data_is_empty() {
        let client = Arc::new(MockClient::new());
        let params = PolygonYearParams {
            polygon: Ring::new(vec![[-64.0, -31.0], [-63.0, -31.0], [-63.0, -32.0]]).unwrap(),
            year: Year::new(2022).unwrap(),
        };

        let series = polygon_series(&ctx(&client), &params).await.unwrap();
        assert!(series.fecha_grafico.is_empty());
        assert_eq!(client.compute_calls(), 23);
    }

    #[tokio::test]
    async fn test_department_ndvi() {
        let client = Arc::new(MockClient::new().with_responder(|expr| {
            if expr.function_name() == Some("Image.bandNames") {
                return Ok(json!(["b1", "b2", "b3"]));
            }
            if expr.invokes("Image.load") {
                return Ok(json!({"b1": 55.0}));
            }
            // The year filter also carries dates, so match on the window center.
            if mentions(expr, "2023-01-17") {
                Ok(json!(4200.0))
            } else if mentions(expr, "2023-12-19") {
                Ok(json!(3100.0))
            } else {
                Ok(Value::Null)
            }
        }));
        let params = DepartmentYearParams {
            provincia: Name::new("Córdoba").unwrap(),
            localidad: Name::new("Capital").unwrap(),
            year: Year::new(2023).unwrap(),
            point: LatLng::new(-31.4, -64.2).unwrap(),
        };

        let report = department_ndvi(&ctx(&client), &params).await.unwrap();

        let grafico = &report.grafico;
        assert_eq!(grafico.fecha_grafico, ["17/01", "19/12"]);
        assert_eq!(grafico.valores_ndvi_punto, [42.0, 31.0]);
        assert_eq!(grafico.urls.len(), 2);
        assert_eq!(grafico.clasificacion_urls.len(), 3);
        assert_eq!(report.promedio.as_ref().unwrap().media, [Some(55.0)]);
        // 2 dated layers, 3 anomaly layers, 1 outline.
        assert_eq!(client.map_calls(), 6);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["grafico"]["clasificacionUrls"].is_array());
        assert!(json["grafico"]["outlineUrl"].is_string());
        assert_eq!(json["grafico"]["valoresNdviPunto"], json!([42.0, 31.0]));
    }

    #[tokio::test]
    async fn test_missing_anomaly_stack_is_tolerated() {
        let client = Arc::new(MockClient::new().with_responder(|expr| {
            if expr.function_name() == Some("Image.bandNames") {
                return Err(AnalysisError::NotFound("Anomalia2023".into()));
            }
            Ok(Value::Null)
        }));
        let params = DepartmentYearParams {
            provincia: Name::new("Córdoba").unwrap(),
            localidad: Name::new("Capital").unwrap(),
            year: Year::new(2023).unwrap(),
            point: LatLng::new(-31.4, -64.2).unwrap(),
        };

        let report = department_ndvi(&ctx(&client), &params).await.unwrap();
        assert!(report.grafico.clasificacion_urls.is_empty());
        assert!(report.grafico.fecha_grafico.is_empty());
    }

    #[tokio::test]
    async fn test_department_ndvi_with_every_date_failed_is_an_error() {
        let client = Arc::new(
            MockClient::new().with_responder(|_| Err(AnalysisError::upstream("Computation timed out."))),
        );
        let params = DepartmentYearParams {
            provincia: Name::new("Córdoba").unwrap(),
            localidad: Name::new("Capital").unwrap(),
            year: Year::new(2023).unwrap(),
            point: LatLng::new(-31.4, -64.2).unwrap(),
        };

        let err = department_ndvi(&ctx(&client), &params).await.unwrap_err();
        assert_eq!(err, AnalysisError::upstream("Computation timed out."));
        assert_eq!(client.map_calls(), 0);
    }
}
