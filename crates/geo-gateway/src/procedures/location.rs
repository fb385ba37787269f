//! Point-in-department check.

use geo_core::{AnalysisClientExt, AnalysisError, Geometry, Result};
use tracing::{debug, instrument};

use super::Analysis;
use crate::request::LocationParams;

/// Whether the point lies inside the named department, within 1 m.
#[instrument(skip(ctx), fields(region = %params.region(), point = %params.point))]
pub(crate) async fn verify_location(ctx: &Analysis, params: &LocationParams) -> Result<bool> {
    let region = params.region();
    let department = ctx.assets.department(&region);

    let count: u64 = ctx.client.fetch(&department.size()).await?;
    if count == 0 {
        return Err(AnalysisError::NotFound(format!(
            "No se encontró el departamento: {}, provincia: {}",
            region.department, region.province
        )));
    }

    let inside: bool = ctx
        .client
        .fetch(&department.geometry().contains(&Geometry::point(params.point), 1.0))
        .await?;
    debug!(inside, "Location checked");
    Ok(inside)
}
