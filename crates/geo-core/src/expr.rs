//! Expression graph for remote analyses.
//!
//! Nothing here computes anything locally. Each builder call appends a named
//! function invocation to an [`Expr`] tree, and an [`AnalysisClient`] ships the
//! finished tree to the remote service for evaluation.
//!
//! The typed wrappers ([`Image`], [`ImageCollection`], [`FeatureCollection`],
//! [`Geometry`], [`Filter`], [`Reducer`], [`EeDate`], [`Dictionary`],
//! [`Computed`]) exist only to keep call chains type-correct; they all
//! serialize to their inner [`Expr`].
//!
//! [`AnalysisClient`]: crate::client::AnalysisClient

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::{LatLng, Ring};

/// A node in a remote expression graph.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// A JSON constant.
    Constant(Value),
    /// An ordered list of expressions.
    Array(Vec<Expr>),
    /// A string-keyed map of expressions.
    Dictionary(BTreeMap<String, Expr>),
    /// Invocation of a named remote function with named arguments.
    Invocation {
        /// Remote function name, e.g. `Image.reduceRegion`.
        function: String,
        /// Named arguments.
        args: BTreeMap<String, Expr>,
    },
    /// An anonymous function, used as the body of `map` calls.
    Function {
        /// Parameter names, referenced in the body with [`Expr::Argument`].
        params: Vec<String>,
        /// Function body.
        body: Box<Expr>,
    },
    /// Reference to a parameter of the enclosing [`Expr::Function`].
    Argument(String),
}

impl Expr {
    /// Builds a function invocation.
    pub fn call<'a>(function: &str, args: impl IntoIterator<Item = (&'a str, Self)>) -> Self {
        Self::Invocation {
            function: function.to_string(),
            args: args
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    /// Builds a function invocation without arguments.
    #[must_use]
    pub fn nullary(function: &str) -> Self {
        Self::Invocation {
            function: function.to_string(),
            args: BTreeMap::new(),
        }
    }

    /// Returns the function name if this node is an invocation.
    #[must_use]
    pub fn function_name(&self) -> Option<&str> {
        match self {
            Self::Invocation { function, .. } => Some(function),
            _ => None,
        }
    }

    /// Returns the named argument if this node is an invocation.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&Self> {
        match self {
            Self::Invocation { args, .. } => args.get(name),
            _ => None,
        }
    }

    /// Returns true if `function` is invoked anywhere in this tree.
    #[must_use]
    pub fn invokes(&self, function: &str) -> bool {
        match self {
            Self::Constant(_) | Self::Argument(_) => false,
            Self::Array(items) => items.iter().any(|e| e.invokes(function)),
            Self::Dictionary(map) => map.values().any(|e| e.invokes(function)),
            Self::Invocation {
                function: name,
                args,
            } => name == function || args.values().any(|e| e.invokes(function)),
            Self::Function { body, .. } => body.invokes(function),
        }
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Self::Constant(Value::from(v))
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Self::Constant(Value::from(v))
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Self::Constant(Value::from(v))
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        Self::Constant(Value::from(v))
    }
}

impl From<String> for Expr {
    fn from(v: String) -> Self {
        Self::Constant(Value::from(v))
    }
}

impl From<Vec<Self>> for Expr {
    fn from(v: Vec<Self>) -> Self {
        Self::Array(v)
    }
}

macro_rules! expr_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Serialize)]
        #[serde(transparent)]
        pub struct $name(Expr);

        impl $name {
            /// Wraps an expression without checking its type.
            #[must_use]
            pub const fn from_expr(expr: Expr) -> Self {
                Self(expr)
            }

            /// Returns the underlying expression.
            #[must_use]
            pub const fn expr(&self) -> &Expr {
                &self.0
            }
        }

        impl From<$name> for Expr {
            fn from(v: $name) -> Self {
                v.0
            }
        }
    };
}

expr_type!(
    /// A remote raster image.
    Image
);
expr_type!(
    /// A remote collection of images.
    ImageCollection
);
expr_type!(
    /// A remote collection of vector features.
    FeatureCollection
);
expr_type!(
    /// A remote geometry.
    Geometry
);
expr_type!(
    /// A remote collection filter.
    Filter
);
expr_type!(
    /// A remote reducer.
    Reducer
);
expr_type!(
    /// A remote date.
    EeDate
);
expr_type!(
    /// A remote dictionary, typically the output of `reduceRegion`.
    Dictionary
);
expr_type!(
    /// Any other remote value (number, string, list) to be fetched as JSON.
    Computed
);

impl Image {
    /// Loads an image asset.
    #[must_use]
    pub fn load(id: &str) -> Self {
        Self(Expr::call("Image.load", [("id", id.into())]))
    }

    /// A constant image.
    #[must_use]
    pub fn constant(value: f64) -> Self {
        Self(Expr::call("Image.constant", [("value", value.into())]))
    }

    /// A fully masked image, the canvas for [`Image::paint`].
    #[must_use]
    pub fn blank() -> Self {
        Self::constant(0.0).update_mask(&Self::constant(0.0))
    }

    /// An image whose pixels hold their own area in square meters.
    #[must_use]
    pub fn pixel_area() -> Self {
        Self(Expr::nullary("Image.pixelArea"))
    }

    /// Computes slope, aspect and hillshade from a DEM.
    #[must_use]
    pub fn terrain(dem: &Self) -> Self {
        Self(Expr::call("Terrain", [("input", dem.0.clone())]))
    }

    fn unary(&self, function: &str, arg: &str) -> Self {
        Self(Expr::call(function, [(arg, self.0.clone())]))
    }

    fn binary(&self, function: &str, other: Expr) -> Self {
        Self(Expr::call(
            function,
            [("image1", self.0.clone()), ("image2", other)],
        ))
    }

    /// Selects a single band.
    #[must_use]
    pub fn select(&self, band: &str) -> Self {
        Self(Expr::call(
            "Image.select",
            [
                ("input", self.0.clone()),
                ("bandSelectors", Expr::Array(vec![band.into()])),
            ],
        ))
    }

    /// Clips the image to a geometry.
    #[must_use]
    pub fn clip(&self, geometry: &Geometry) -> Self {
        Self(Expr::call(
            "Image.clip",
            [("input", self.0.clone()), ("geometry", geometry.0.clone())],
        ))
    }

    /// Multiplies every pixel by a constant.
    #[must_use]
    pub fn multiply(&self, factor: f64) -> Self {
        self.binary("Image.multiply", Self::constant(factor).0)
    }

    /// Multiplies pixel-wise by another image.
    #[must_use]
    pub fn multiply_image(&self, other: &Self) -> Self {
        self.binary("Image.multiply", other.0.clone())
    }

    /// Divides pixel-wise by another image.
    #[must_use]
    pub fn divide(&self, other: &Self) -> Self {
        self.binary("Image.divide", other.0.clone())
    }

    /// `1` where the pixel equals `value`, else `0`.
    #[must_use]
    pub fn equals(&self, value: f64) -> Self {
        self.binary("Image.eq", Self::constant(value).0)
    }

    /// `1` where the pixel is greater than `value`, else `0`.
    #[must_use]
    pub fn gt(&self, value: f64) -> Self {
        self.binary("Image.gt", Self::constant(value).0)
    }

    /// `1` where the pixel is greater than or equal to `value`, else `0`.
    #[must_use]
    pub fn gte(&self, value: f64) -> Self {
        self.binary("Image.gte", Self::constant(value).0)
    }

    /// `1` where the pixel is less than `value`, else `0`.
    #[must_use]
    pub fn lt(&self, value: f64) -> Self {
        self.binary("Image.lt", Self::constant(value).0)
    }

    /// Pixel-wise logical and.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        self.binary("Image.and", other.0.clone())
    }

    /// Returns the image mask.
    #[must_use]
    pub fn mask(&self) -> Self {
        self.unary("Image.mask", "image")
    }

    /// Masks out pixels where `mask` is zero.
    #[must_use]
    pub fn update_mask(&self, mask: &Self) -> Self {
        Self(Expr::call(
            "Image.updateMask",
            [("image", self.0.clone()), ("mask", mask.0.clone())],
        ))
    }

    /// Replaces pixels where `test` is non-zero with `value`.
    #[must_use]
    pub fn where_(&self, test: &Self, value: &Self) -> Self {
        Self(Expr::call(
            "Image.where",
            [
                ("input", self.0.clone()),
                ("test", test.0.clone()),
                ("value", value.0.clone()),
            ],
        ))
    }

    /// Focal mean over a circular kernel of `radius_m` meters.
    #[must_use]
    pub fn focal_mean(&self, radius_m: f64) -> Self {
        Self(Expr::call(
            "Image.focal_mean",
            [
                ("image", self.0.clone()),
                ("radius", radius_m.into()),
                ("kernelType", "circle".into()),
                ("units", "meters".into()),
            ],
        ))
    }

    /// Counts connected pixels of the same value.
    #[must_use]
    pub fn connected_pixel_count(&self) -> Self {
        self.unary("Image.connectedPixelCount", "input")
    }

    /// Paints feature outlines onto this image.
    #[must_use]
    pub fn paint(&self, features: &FeatureCollection, color: f64, width: f64) -> Self {
        Self(Expr::call(
            "Image.paint",
            [
                ("image", self.0.clone()),
                ("featureCollection", features.0.clone()),
                ("color", color.into()),
                ("width", width.into()),
            ],
        ))
    }

    /// Renders the image to RGB with the given visualization parameters.
    #[must_use]
    pub fn visualize(&self, vis: &Visualization) -> Self {
        let mut args = vec![
            ("image", self.0.clone()),
            ("min", vis.min.into()),
            ("max", vis.max.into()),
            (
                "palette",
                Expr::Array(vis.palette.iter().map(|c| c.as_str().into()).collect()),
            ),
        ];
        if let Some(opacity) = vis.opacity {
            args.push(("opacity", opacity.into()));
        }
        Self(Expr::call("Image.visualize", args))
    }

    /// Reduces the pixels inside a region to a dictionary keyed by band.
    #[must_use]
    pub fn reduce_region(&self, params: &RegionReduction) -> Dictionary {
        let mut args = vec![
            ("image", self.0.clone()),
            ("reducer", params.reducer.0.clone()),
            ("geometry", params.geometry.0.clone()),
            ("scale", params.scale.into()),
        ];
        if let Some(max_pixels) = params.max_pixels {
            args.push(("maxPixels", max_pixels.into()));
        }
        if params.best_effort {
            args.push(("bestEffort", true.into()));
        }
        Dictionary(Expr::call("Image.reduceRegion", args))
    }

    /// Lists the band names.
    #[must_use]
    pub fn band_names(&self) -> Computed {
        Computed(Expr::call("Image.bandNames", [("image", self.0.clone())]))
    }

    /// Reads a metadata property.
    #[must_use]
    pub fn get(&self, property: &str) -> Computed {
        Computed(Expr::call(
            "Element.get",
            [("object", self.0.clone()), ("property", property.into())],
        ))
    }

    /// The `system:id` of the image.
    #[must_use]
    pub fn id(&self) -> Computed {
        self.get("system:id")
    }

    /// Acquisition date of the image.
    #[must_use]
    pub fn date(&self) -> EeDate {
        EeDate(Expr::call("Image.date", [("image", self.0.clone())]))
    }

    /// Sets a metadata property.
    #[must_use]
    pub fn set(&self, key: &str, value: impl Into<Expr>) -> Self {
        Self(Expr::call(
            "Element.set",
            [
                ("object", self.0.clone()),
                ("key", key.into()),
                ("value", value.into()),
            ],
        ))
    }
}

/// Parameters for [`Image::reduce_region`].
#[derive(Clone, Debug, PartialEq)]
pub struct RegionReduction {
    /// Reducer to apply.
    pub reducer: Reducer,
    /// Region to reduce over.
    pub geometry: Geometry,
    /// Nominal scale in meters.
    pub scale: f64,
    /// Pixel cap, if any.
    pub max_pixels: Option<f64>,
    /// Let the service coarsen the scale instead of failing.
    pub best_effort: bool,
}

impl RegionReduction {
    /// Creates reduction parameters with no pixel cap.
    #[must_use]
    pub fn new(reducer: Reducer, geometry: &Geometry, scale: f64) -> Self {
        Self {
            reducer,
            geometry: geometry.clone(),
            scale,
            max_pixels: None,
            best_effort: false,
        }
    }

    /// Sets the pixel cap.
    #[must_use]
    pub const fn max_pixels(mut self, max_pixels: f64) -> Self {
        self.max_pixels = Some(max_pixels);
        self
    }

    /// Enables best-effort scaling.
    #[must_use]
    pub const fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
}

/// Visualization parameters for rendering an image to map tiles.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Visualization {
    /// Value mapped to the first palette color.
    pub min: f64,
    /// Value mapped to the last palette color.
    pub max: f64,
    /// Hex colors, with or without a leading `#`.
    pub palette: Vec<String>,
    /// Layer opacity in `[0, 1]`.
    pub opacity: Option<f64>,
}

impl Visualization {
    /// Creates visualization parameters with full opacity.
    #[must_use]
    pub fn new(min: f64, max: f64, palette: &[&str]) -> Self {
        Self {
            min,
            max,
            palette: palette.iter().map(|c| (*c).to_string()).collect(),
            opacity: None,
        }
    }

    /// Sets the opacity.
    #[must_use]
    pub const fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = Some(opacity);
        self
    }
}

impl ImageCollection {
    /// Loads an image collection asset.
    #[must_use]
    pub fn load(id: &str) -> Self {
        Self(Expr::call("ImageCollection.load", [("id", id.into())]))
    }

    /// Selects a single band from every image.
    #[must_use]
    pub fn select(&self, band: &str) -> Self {
        Self(Expr::call(
            "ImageCollection.select",
            [
                ("input", self.0.clone()),
                ("selectors", Expr::Array(vec![band.into()])),
            ],
        ))
    }

    /// Keeps the images matching a filter.
    #[must_use]
    pub fn filter(&self, filter: &Filter) -> Self {
        Self(Expr::call(
            "Collection.filter",
            [("collection", self.0.clone()), ("filter", filter.0.clone())],
        ))
    }

    /// Keeps the images intersecting a geometry.
    #[must_use]
    pub fn filter_bounds(&self, geometry: &Geometry) -> Self {
        self.filter(&Filter::bounds(geometry))
    }

    /// Keeps the images acquired in `[start, end)`.
    #[must_use]
    pub fn filter_date(&self, start: &EeDate, end: &EeDate) -> Self {
        self.filter(&Filter::date(start, end))
    }

    /// Applies `body` to every image. `param` names the mapped image inside `body`.
    #[must_use]
    pub fn map(&self, param: &str, body: impl FnOnce(Image) -> Image) -> Self {
        let body = body(Image(Expr::Argument(param.to_string())));
        Self(Expr::call(
            "Collection.map",
            [
                ("collection", self.0.clone()),
                (
                    "baseAlgorithm",
                    Expr::Function {
                        params: vec![param.to_string()],
                        body: Box::new(body.0),
                    },
                ),
            ],
        ))
    }

    /// Sorts ascending by a metadata property.
    #[must_use]
    pub fn sort(&self, property: &str) -> Self {
        Self(Expr::call(
            "Collection.limit",
            [("collection", self.0.clone()), ("key", property.into())],
        ))
    }

    /// The first image of the collection.
    #[must_use]
    pub fn first(&self) -> Image {
        Image(Expr::call("Collection.first", [("collection", self.0.clone())]))
    }

    /// Composites the collection, last image on top.
    #[must_use]
    pub fn mosaic(&self) -> Image {
        Image(Expr::call(
            "ImageCollection.mosaic",
            [("collection", self.0.clone())],
        ))
    }

    /// Number of images in the collection.
    #[must_use]
    pub fn size(&self) -> Computed {
        Computed(Expr::call("Collection.size", [("collection", self.0.clone())]))
    }
}

impl FeatureCollection {
    /// Loads a table asset.
    #[must_use]
    pub fn load(id: &str) -> Self {
        Self(Expr::call("Collection.loadTable", [("tableId", id.into())]))
    }

    /// Keeps the features matching a filter.
    #[must_use]
    pub fn filter(&self, filter: &Filter) -> Self {
        Self(Expr::call(
            "Collection.filter",
            [("collection", self.0.clone()), ("filter", filter.0.clone())],
        ))
    }

    /// The union of all feature geometries.
    #[must_use]
    pub fn geometry(&self) -> Geometry {
        Geometry(Expr::call(
            "Collection.geometry",
            [("collection", self.0.clone())],
        ))
    }

    /// Number of features in the collection.
    #[must_use]
    pub fn size(&self) -> Computed {
        Computed(Expr::call("Collection.size", [("collection", self.0.clone())]))
    }
}

impl Geometry {
    /// A point geometry.
    #[must_use]
    pub fn point(p: LatLng) -> Self {
        let [lng, lat] = p.lng_lat();
        Self(Expr::call(
            "GeometryConstructors.Point",
            [("coordinates", Expr::Array(vec![lng.into(), lat.into()]))],
        ))
    }

    /// A polygon geometry with a single outer ring.
    #[must_use]
    pub fn polygon(ring: &Ring) -> Self {
        let ring = ring
            .positions()
            .iter()
            .map(|[lng, lat]| Expr::Array(vec![(*lng).into(), (*lat).into()]))
            .collect();
        Self(Expr::call(
            "GeometryConstructors.Polygon",
            [("coordinates", Expr::Array(vec![Expr::Array(ring)]))],
        ))
    }

    /// Whether this geometry contains `other`, within `max_error` meters.
    #[must_use]
    pub fn contains(&self, other: &Self, max_error: f64) -> Computed {
        Computed(Expr::call(
            "Geometry.contains",
            [
                ("leftGeometry", self.0.clone()),
                ("rightGeometry", other.0.clone()),
                (
                    "maxError",
                    Expr::call("ErrorMargin", [("value", max_error.into())]),
                ),
            ],
        ))
    }
}

impl Filter {
    /// Property equals a constant.
    #[must_use]
    pub fn equals(property: &str, value: impl Into<Expr>) -> Self {
        Self(Expr::call(
            "Filter.equals",
            [("leftField", property.into()), ("rightValue", value.into())],
        ))
    }

    /// List property contains a constant.
    #[must_use]
    pub fn list_contains(property: &str, value: impl Into<Expr>) -> Self {
        Self(Expr::call(
            "Filter.listContains",
            [("leftField", property.into()), ("rightValue", value.into())],
        ))
    }

    /// All filters must match.
    #[must_use]
    pub fn and(filters: Vec<Self>) -> Self {
        Self(Expr::call(
            "Filter.and",
            [(
                "filters",
                Expr::Array(filters.into_iter().map(|f| f.0).collect()),
            )],
        ))
    }

    /// Element footprint intersects a geometry.
    #[must_use]
    pub fn bounds(geometry: &Geometry) -> Self {
        Self(Expr::call(
            "Filter.intersects",
            [("leftField", ".all".into()), ("rightValue", geometry.0.clone())],
        ))
    }

    /// Acquisition time falls in `[start, end)`.
    #[must_use]
    pub fn date(start: &EeDate, end: &EeDate) -> Self {
        Self(Expr::call(
            "Filter.dateRangeContains",
            [
                (
                    "leftValue",
                    Expr::call(
                        "DateRange",
                        [("start", start.0.clone()), ("end", end.0.clone())],
                    ),
                ),
                ("rightField", "system:time_start".into()),
            ],
        ))
    }
}

impl Reducer {
    /// Mean of the inputs.
    #[must_use]
    pub fn mean() -> Self {
        Self(Expr::nullary("Reducer.mean"))
    }

    /// Sum of the inputs.
    #[must_use]
    pub fn sum() -> Self {
        Self(Expr::nullary("Reducer.sum"))
    }

    /// First input.
    #[must_use]
    pub fn first() -> Self {
        Self(Expr::nullary("Reducer.first"))
    }
}

impl EeDate {
    /// A calendar date.
    #[must_use]
    pub fn from_date(date: NaiveDate) -> Self {
        Self(Expr::call(
            "Date",
            [("value", date.format("%Y-%m-%d").to_string().into())],
        ))
    }

    /// Shifts the date by `delta` units (`"day"`, `"month"`, ...).
    #[must_use]
    pub fn advance(&self, delta: f64, unit: &str) -> Self {
        Self(Expr::call(
            "Date.advance",
            [
                ("date", self.0.clone()),
                ("delta", delta.into()),
                ("unit", unit.into()),
            ],
        ))
    }

    /// Absolute difference to `other`, in `unit`s.
    #[must_use]
    pub fn abs_difference(&self, other: &Self, unit: &str) -> Computed {
        let diff = Expr::call(
            "Date.difference",
            [
                ("date", self.0.clone()),
                ("start", other.0.clone()),
                ("unit", unit.into()),
            ],
        );
        Computed(Expr::call("Number.abs", [("input", diff)]))
    }
}

impl Dictionary {
    /// Reads one entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Computed {
        Computed(Expr::call(
            "Dictionary.get",
            [("dictionary", self.0.clone()), ("key", key.into())],
        ))
    }

    /// The dictionary itself, to be fetched whole.
    #[must_use]
    pub fn computed(&self) -> Computed {
        Computed(self.0.clone())
    }
}

impl Computed {
    /// `1` if this number is greater than `value`, else `0`.
    #[must_use]
    pub fn gt(&self, value: f64) -> Self {
        Self(Expr::call(
            "Number.gt",
            [("left", self.0.clone()), ("right", value.into())],
        ))
    }

    /// Evaluates `then` when `condition` is truthy, otherwise `otherwise`.
    ///
    /// Only the selected branch is evaluated remotely, which makes this the way
    /// to guard computations on possibly empty collections.
    #[must_use]
    pub fn if_else(condition: &Self, then: impl Into<Expr>, otherwise: impl Into<Expr>) -> Self {
        Self(Expr::call(
            "Algorithms.If",
            [
                ("condition", condition.0.clone()),
                ("trueCase", then.into()),
                ("falseCase", otherwise.into()),
            ],
        ))
    }

    /// Bundles several values so they are fetched in one round trip.
    #[must_use]
    pub fn list(values: Vec<Self>) -> Self {
        Self(Expr::Array(values.into_iter().map(|v| v.0).collect()))
    }

    /// The JSON `null` constant.
    #[must_use]
    pub fn null() -> Self {
        Self(Expr::Constant(Value::Null))
    }
}
