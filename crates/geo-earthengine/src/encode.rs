//! Encoding of [`Expr`] graphs into the Earth Engine REST `Expression` format.
//!
//! Function invocations are hoisted into a flat `values` table and referenced
//! by key; identical subtrees share one entry. Function definitions must be
//! hoisted because their `body` is a table reference.

use geo_core::Expr;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

#[derive(Default)]
struct Encoder {
    values: Map<String, Value>,
    seen: HashMap<String, String>,
}

impl Encoder {
    fn intern(&mut self, node: Value) -> String {
        let fingerprint = node.to_string();
        if let Some(existing) = self.seen.get(&fingerprint) {
            return existing.clone();
        }
        let reference = self.values.len().to_string();
        self.values.insert(reference.clone(), node);
        self.seen.insert(fingerprint, reference.clone());
        reference
    }

    fn node(&mut self, expr: &Expr) -> Value {
        match expr {
            Expr::Constant(v) => json!({ "constantValue": v }),
            Expr::Array(items) => {
                let values: Vec<Value> = items.iter().map(|e| self.node(e)).collect();
                json!({ "arrayValue": { "values": values } })
            }
            Expr::Dictionary(map) => {
                let values: Map<String, Value> =
                    map.iter().map(|(k, e)| (k.clone(), self.node(e))).collect();
                json!({ "dictionaryValue": { "values": values } })
            }
            Expr::Argument(name) => json!({ "argumentReference": name }),
            Expr::Invocation { function, args } => {
                let arguments: Map<String, Value> =
                    args.iter().map(|(k, e)| (k.clone(), self.node(e))).collect();
                let reference = self.intern(json!({
                    "functionInvocationValue": {
                        "functionName": function,
                        "arguments": arguments,
                    }
                }));
                json!({ "valueReference": reference })
            }
            Expr::Function { params, body } => {
                let body = match self.node(body) {
                    Value::Object(mut obj) if obj.contains_key("valueReference") => obj
                        .remove("valueReference")
                        .unwrap_or(Value::Null),
                    inline => Value::String(self.intern(inline)),
                };
                let reference = self.intern(json!({
                    "functionDefinitionValue": {
                        "argumentNames": params,
                        "body": body,
                    }
                }));
                json!({ "valueReference": reference })
            }
        }
    }
}

/// Encodes an expression as `{ "result": ref, "values": { ref: node, ... } }`.
pub(crate) fn encode(expr: &Expr) -> Value {
    let mut encoder = Encoder::default();
    let root = encoder.node(expr);
    let result = match root {
        Value::Object(mut obj) if obj.contains_key("valueReference") => {
            obj.remove("valueReference").unwrap_or(Value::Null)
        }
        inline => Value::String(encoder.intern(inline)),
    };
    json!({ "result": result, "values": encoder.values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_core::{Geometry, Image, ImageCollection, LatLng, Reducer, RegionReduction};

    #[test]
    fn test_encode_constant_root() {
        let encoded = encode(&Expr::from(42.0));
        assert_eq!(encoded["result"], json!("0"));
        assert_eq!(encoded["values"]["0"], json!({ "constantValue": 42.0 }));
    }

    #[test]
    fn test_encode_invocation_references_arguments() {
        let encoded = encode(Image::load("MODIS/061/MOD13Q1").select("NDVI").expr());
        let values = &encoded["values"];
        let root = &values[encoded["result"].as_str().unwrap()]["functionInvocationValue"];

        assert_eq!(root["functionName"], json!("Image.select"));
        assert_eq!(
            root["arguments"]["bandSelectors"],
            json!({ "arrayValue": { "values": [{ "constantValue": "NDVI" }] } })
        );

        let input_ref = root["arguments"]["input"]["valueReference"].as_str().unwrap();
        assert_eq!(
            values[input_ref]["functionInvocationValue"]["functionName"],
            json!("Image.load")
        );
    }

    #[test]
    fn test_encode_shares_identical_subtrees() {
        let point = Geometry::point(LatLng::new(-31.0, -64.0).unwrap());
        let image = Image::load("x").clip(&point);
        let dict = image.reduce_region(&RegionReduction::new(Reducer::mean(), &point, 250.0));

        let encoded = encode(dict.expr());
        let points = encoded["values"]
            .as_object()
            .unwrap()
            .values()
            .filter(|v| {
                v["functionInvocationValue"]["functionName"] == json!("GeometryConstructors.Point")
            })
            .count();
        assert_eq!(points, 1);
    }

    #[test]
    fn test_encode_map_hoists_function_body() {
        let col = ImageCollection::load("MODIS/061/MOD10A2").map("img", |img| img.gt(1.0));
        let encoded = encode(col.expr());
        let values = &encoded["values"];
        let root = &values[encoded["result"].as_str().unwrap()]["functionInvocationValue"];
        assert_eq!(root["functionName"], json!("Collection.map"));

        let fn_ref = root["arguments"]["baseAlgorithm"]["valueReference"]
            .as_str()
            .unwrap();
        let def = &values[fn_ref]["functionDefinitionValue"];
        assert_eq!(def["argumentNames"], json!(["img"]));

        let body = &values[def["body"].as_str().unwrap()]["functionInvocationValue"];
        assert_eq!(body["functionName"], json!("Image.gt"));
        assert_eq!(
            body["arguments"]["image1"],
            json!({ "argumentReference": "img" })
        );
    }
}
