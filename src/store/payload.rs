//! Point construction for the vector index

use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{ListValue, PointStruct, Struct, Value as QdrantValue};
use qdrant_client::Payload;
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// One vector to store, keyed by image id
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub image_id: String,
    pub vector: Vec<f32>,
    pub metadata: Map<String, Value>,
}

impl EmbeddingRecord {
    pub fn new(image_id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            image_id: image_id.into(),
            vector,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Stable point id: the image id itself when it is a UUID, otherwise a
    /// UUID v5 derived from it, so re-upserting the same image overwrites.
    pub fn point_id(&self) -> Uuid {
        point_id_for(&self.image_id)
    }

    /// Payload map; always carries `image_id`
    pub fn to_qdrant_payload(&self) -> HashMap<String, QdrantValue> {
        let mut payload: HashMap<String, QdrantValue> = self
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), json_to_qdrant(v)))
            .collect();
        payload.insert(
            "image_id".to_string(),
            json_to_qdrant(&Value::String(self.image_id.clone())),
        );
        payload
    }

    pub fn to_point_struct(&self) -> PointStruct {
        PointStruct::new(
            self.point_id().to_string(),
            self.vector.clone(),
            Payload::from(self.to_qdrant_payload()),
        )
    }
}

pub fn point_id_for(image_id: &str) -> Uuid {
    Uuid::try_parse(image_id)
        .unwrap_or_else(|_| Uuid::new_v5(&Uuid::NAMESPACE_OID, image_id.as_bytes()))
}

fn json_to_qdrant(value: &Value) -> QdrantValue {
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(json_to_qdrant).collect(),
        }),
        Value::Object(map) => Kind::StructValue(Struct {
            fields: map.iter().map(|(k, v)| (k.clone(), json_to_qdrant(v))).collect(),
        }),
    };
    QdrantValue { kind: Some(kind) }
}

/// Convert Qdrant value to serde_json Value
pub(crate) fn json_from_qdrant_value(v: QdrantValue) -> Value {
    match v.kind {
        Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(json_from_qdrant_value).collect())
        }
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
        None => Value::Null,
    }
}
