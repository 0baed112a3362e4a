//! The serialized graph description.
//!
//! A snapshot is the JSON interchange form of a whole network: project
//! node types, node instances with their non-default port values, the
//! connection list and free-form settings. [`Snapshot::from_json`]
//! upgrades older versions in place before decoding, so callers only
//! ever see the current shape.
//!
//! Version history:
//! - 1: port values were stored as bare JSON scalars; expression entries
//!   were `{"expression": ...}` objects without a tag.
//! - 2 (current): every port value is a tagged object, either
//!   `{"type": "value", "value": ...}` or
//!   `{"type": "expression", "expression": ...}`.

use crate::deps::CycleError;
use crate::node::Id;
use crate::value::{Color, Literal, Point, PortType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// The snapshot version this build reads and writes.
pub const VERSION: u32 = 2;

/// A snapshot could not be decoded or describes an impossible graph.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The JSON is invalid or does not match the snapshot shape.
    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The snapshot was written by a newer build.
    #[error("unsupported snapshot version {0}")]
    Version(u64),
    /// The connection list describes a dependency cycle.
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// A complete serialized network.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default)]
    pub nodes: Vec<NodeSnapshot>,
    #[serde(default)]
    pub connections: Vec<ConnectionSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<TypeSnapshot>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, serde_json::Value>,
}

/// One node instance. Only in-port values that differ from the declared
/// default (and are not fed by a connection) appear in `values`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub id: Id,
    pub name: String,
    #[serde(rename = "type")]
    pub type_id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, PortValueSnapshot>,
}

/// A stored in-port value: an assigned literal or expression text.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PortValueSnapshot {
    Value { value: serde_json::Value },
    Expression { expression: String },
}

/// One edge, referencing ports by name.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub out_node: Id,
    pub out_port: String,
    pub in_node: Id,
    pub in_port: String,
}

/// A project-level node type carried inside the snapshot.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TypeSnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub type_id: String,
    pub source: TypeSourceSnapshot,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Where a project type's behavior comes from: Steel source text, or a
/// reference to a built-in it was forked from and has not diverged from.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypeSourceSnapshot {
    Script(String),
    Builtin { builtin: String },
}

impl Snapshot {
    /// Decode a snapshot, upgrading older versions first. Snapshots
    /// without a `version` field are treated as version 1.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let mut raw: serde_json::Value = serde_json::from_str(json)?;
        let version = raw
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(1);
        if version > u64::from(VERSION) {
            return Err(SnapshotError::Version(version));
        }
        if version < u64::from(VERSION) {
            log::info!("upgrading snapshot from version {version} to {VERSION}");
            upgrade(&mut raw);
        }
        Ok(serde_json::from_value(raw)?)
    }

    /// Encode as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Rewrite a version 1 document into the version 2 shape.
fn upgrade(raw: &mut serde_json::Value) {
    if let Some(nodes) = raw
        .get_mut("nodes")
        .and_then(serde_json::Value::as_array_mut)
    {
        for node in nodes {
            let Some(values) = node
                .get_mut("values")
                .and_then(serde_json::Value::as_object_mut)
            else {
                continue;
            };
            for value in values.values_mut() {
                *value = upgraded_port_value(value.take());
            }
        }
    }
    if let Some(root) = raw.as_object_mut() {
        root.insert("version".into(), VERSION.into());
    }
}

fn upgraded_port_value(old: serde_json::Value) -> serde_json::Value {
    match old {
        serde_json::Value::Object(mut map) if map.contains_key("expression") => {
            map.insert("type".into(), "expression".into());
            serde_json::Value::Object(map)
        }
        bare => serde_json::json!({ "type": "value", "value": bare }),
    }
}

/// Decode a raw literal payload against the declared port type. Points
/// and colors accept both object and array forms.
pub(crate) fn literal_from_json(value: &serde_json::Value, ty: PortType) -> Option<Literal> {
    match ty {
        PortType::Number => value.as_f64().map(Literal::Number),
        PortType::Boolean => value.as_bool().map(Literal::Boolean),
        PortType::String => value.as_str().map(|s| Literal::String(s.into())),
        PortType::Choice => value.as_str().map(|s| Literal::Choice(s.into())),
        PortType::FilePath => value.as_str().map(|s| Literal::FilePath(s.into())),
        PortType::DirPath => value.as_str().map(|s| Literal::DirPath(s.into())),
        PortType::Point => {
            let (x, y) = match value {
                serde_json::Value::Object(map) => {
                    (map.get("x")?.as_f64()?, map.get("y")?.as_f64()?)
                }
                serde_json::Value::Array(items) => match items.as_slice() {
                    [x, y] => (x.as_f64()?, y.as_f64()?),
                    _ => return None,
                },
                _ => return None,
            };
            Some(Literal::Point(Point::new(x, y)))
        }
        PortType::Color => {
            let (r, g, b, a) = match value {
                serde_json::Value::Object(map) => (
                    map.get("r")?.as_f64()?,
                    map.get("g")?.as_f64()?,
                    map.get("b")?.as_f64()?,
                    map.get("a").and_then(serde_json::Value::as_f64).unwrap_or(1.0),
                ),
                serde_json::Value::Array(items) => match items.as_slice() {
                    [r, g, b] => (r.as_f64()?, g.as_f64()?, b.as_f64()?, 1.0),
                    [r, g, b, a] => (r.as_f64()?, g.as_f64()?, b.as_f64()?, a.as_f64()?),
                    _ => return None,
                },
                _ => return None,
            };
            Some(Literal::Color(Color::new(r, g, b, a)))
        }
        PortType::Trigger | PortType::Object | PortType::Image => None,
    }
}

/// Encode a literal for storage. Triggers and opaque handles have no
/// serialized form.
pub(crate) fn literal_to_json(value: &Literal) -> Option<serde_json::Value> {
    let json = match value {
        Literal::Trigger | Literal::Object(_) | Literal::Image(_) => return None,
        Literal::Boolean(b) => serde_json::json!(b),
        Literal::Number(n) => serde_json::json!(n),
        Literal::String(s) | Literal::Choice(s) | Literal::FilePath(s) | Literal::DirPath(s) => {
            serde_json::json!(s)
        }
        Literal::Point(p) => serde_json::json!({ "x": p.x, "y": p.y }),
        Literal::Color(c) => serde_json::json!({ "r": c.r, "g": c.g, "b": c.b, "a": c.a }),
    };
    Some(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structs_round_trip() {
        let snapshot = Snapshot {
            version: VERSION,
            nodes: vec![NodeSnapshot {
                id: 1,
                name: "Number".into(),
                type_id: "core.number".into(),
                x: 10.0,
                y: 20.0,
                values: [(
                    "value".to_string(),
                    PortValueSnapshot::Value {
                        value: serde_json::json!(42.0),
                    },
                )]
                .into(),
            }],
            connections: vec![ConnectionSnapshot {
                out_node: 1,
                out_port: "out".into(),
                in_node: 2,
                in_port: "value".into(),
            }],
            types: vec![TypeSnapshot {
                name: "Doubler".into(),
                type_id: "project.doubler".into(),
                source: TypeSourceSnapshot::Script("(define ports '())".into()),
                description: String::new(),
            }],
            settings: BTreeMap::new(),
        };
        let json = snapshot.to_json().unwrap();
        assert_eq!(Snapshot::from_json(&json).unwrap(), snapshot);
    }

    #[test]
    fn empty_sections_are_suppressed() {
        let snapshot = Snapshot {
            version: VERSION,
            nodes: Vec::new(),
            connections: Vec::new(),
            types: Vec::new(),
            settings: BTreeMap::new(),
        };
        let json = snapshot.to_json().unwrap();
        assert!(!json.contains("types"));
        assert!(!json.contains("settings"));
    }

    #[test]
    fn version_1_values_are_wrapped() {
        let json = r#"{
            "version": 1,
            "nodes": [{
                "id": 1, "name": "n", "type": "core.number", "x": 0, "y": 0,
                "values": {
                    "value": 42,
                    "rate": { "expression": "(* $TIME 2)" }
                }
            }],
            "connections": []
        }"#;
        let snapshot = Snapshot::from_json(json).unwrap();
        assert_eq!(snapshot.version, VERSION);
        let values = &snapshot.nodes[0].values;
        assert_eq!(
            values["value"],
            PortValueSnapshot::Value {
                value: serde_json::json!(42)
            }
        );
        assert_eq!(
            values["rate"],
            PortValueSnapshot::Expression {
                expression: "(* $TIME 2)".into()
            }
        );
    }

    #[test]
    fn missing_version_means_version_1() {
        let json = r#"{
            "nodes": [{
                "id": 1, "name": "n", "type": "core.number", "x": 0, "y": 0,
                "values": { "value": 7 }
            }],
            "connections": []
        }"#;
        let snapshot = Snapshot::from_json(json).unwrap();
        assert_eq!(snapshot.version, VERSION);
        assert_eq!(
            snapshot.nodes[0].values["value"],
            PortValueSnapshot::Value {
                value: serde_json::json!(7)
            }
        );
    }

    #[test]
    fn newer_versions_are_refused() {
        let err = Snapshot::from_json(r#"{ "version": 99 }"#).unwrap_err();
        assert!(matches!(err, SnapshotError::Version(99)));
    }

    #[test]
    fn oversized_versions_are_not_truncated() {
        let version = (1u64 << 32) + u64::from(VERSION);
        let json = format!(r#"{{ "version": {version} }}"#);
        let err = Snapshot::from_json(&json).unwrap_err();
        assert!(matches!(err, SnapshotError::Version(v) if v == version));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            Snapshot::from_json("not json"),
            Err(SnapshotError::Malformed(_))
        ));
        assert!(matches!(
            Snapshot::from_json(r#"{ "version": 2, "nodes": 5 }"#),
            Err(SnapshotError::Malformed(_))
        ));
    }

    #[test]
    fn type_sources_distinguish_script_and_builtin() {
        let script = TypeSourceSnapshot::Script("(define ports '())".into());
        let builtin = TypeSourceSnapshot::Builtin {
            builtin: "math.add".into(),
        };
        let json = serde_json::to_string(&script).unwrap();
        assert_eq!(serde_json::from_str::<TypeSourceSnapshot>(&json).unwrap(), script);
        let json = serde_json::to_string(&builtin).unwrap();
        assert_eq!(
            serde_json::from_str::<TypeSourceSnapshot>(&json).unwrap(),
            builtin
        );
    }

    #[test]
    fn literal_payloads_accept_both_geometry_forms() {
        let object = serde_json::json!({ "x": 1.0, "y": 2.0 });
        let array = serde_json::json!([1.0, 2.0]);
        let expected = Literal::Point(Point::new(1.0, 2.0));
        assert_eq!(literal_from_json(&object, PortType::Point), Some(expected.clone()));
        assert_eq!(literal_from_json(&array, PortType::Point), Some(expected));

        let rgb = serde_json::json!([0.5, 0.25, 0.0]);
        assert_eq!(
            literal_from_json(&rgb, PortType::Color),
            Some(Literal::Color(Color::new(0.5, 0.25, 0.0, 1.0)))
        );
    }

    #[test]
    fn unserializable_literals_produce_no_payload() {
        assert_eq!(literal_to_json(&Literal::Trigger), None);
        assert_eq!(
            literal_to_json(&Literal::Number(4.0)),
            Some(serde_json::json!(4.0))
        );
    }
}
