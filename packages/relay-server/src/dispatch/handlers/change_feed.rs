//! Table change-feed batches.
//!
//! Stream records carry typed attribute values (`{"S": "..."}`,
//! `{"N": "1"}`, ...). They are unmarshalled into plain JSON before the
//! listener sees them.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::ExecutionContext;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::RecordListener;
use crate::config::ServiceConfig;
use crate::dispatch::batch::map_bounded;
use crate::dispatch::classify::EventKind;
use crate::dispatch::handler::{DispatchError, EventHandler, InboundEvent};
use crate::traits::ErrorReporter;

#[derive(Debug, Deserialize)]
struct StreamBatch {
    #[serde(rename = "Records")]
    records: Vec<StreamRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamRecord {
    #[serde(default)]
    event_name: String,
    #[serde(rename = "eventSourceARN", default)]
    event_source_arn: Option<String>,
    #[serde(default)]
    dynamodb: StreamImages,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StreamImages {
    #[serde(default)]
    keys: Map<String, Value>,
    #[serde(default)]
    new_image: Option<Map<String, Value>>,
    #[serde(default)]
    old_image: Option<Map<String, Value>>,
}

/// One row change, with plain JSON images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// `INSERT`, `MODIFY` or `REMOVE`.
    pub event: String,
    pub table: Option<String>,
    pub keys: Map<String, Value>,
    pub new_image: Option<Map<String, Value>>,
    pub old_image: Option<Map<String, Value>>,
}

impl From<StreamRecord> for ChangeRecord {
    fn from(record: StreamRecord) -> Self {
        Self {
            event: record.event_name,
            table: record.event_source_arn.as_deref().and_then(table_of),
            keys: unmarshal_map(&record.dynamodb.keys),
            new_image: record.dynamodb.new_image.as_ref().map(unmarshal_map),
            old_image: record.dynamodb.old_image.as_ref().map(unmarshal_map),
        }
    }
}

/// `arn:aws:dynamodb:<region>:<account>:table/<name>/stream/<label>`
fn table_of(arn: &str) -> Option<String> {
    let resource = arn.splitn(6, ':').nth(5)?;
    let mut parts = resource.split('/');
    match (parts.next(), parts.next()) {
        (Some("table"), Some(name)) if !name.is_empty() => Some(name.to_string()),
        _ => None,
    }
}

#[must_use]
pub fn unmarshal_map(item: &Map<String, Value>) -> Map<String, Value> {
    item.iter()
        .map(|(name, value)| (name.clone(), unmarshal(value)))
        .collect()
}

/// Plain JSON for one typed attribute value. Unknown shapes pass through.
#[must_use]
pub fn unmarshal(value: &Value) -> Value {
    let Some((tag, inner)) = value
        .as_object()
        .filter(|o| o.len() == 1)
        .and_then(|o| o.iter().next())
    else {
        return value.clone();
    };
    match (tag.as_str(), inner) {
        ("S" | "B", Value::String(_)) | ("BOOL", Value::Bool(_)) => inner.clone(),
        ("N", Value::String(n)) => number(n),
        ("NULL", _) => Value::Null,
        ("M", Value::Object(map)) => Value::Object(unmarshal_map(map)),
        ("L", Value::Array(items)) => items.iter().map(unmarshal).collect(),
        ("SS" | "BS", Value::Array(items)) => Value::Array(items.clone()),
        ("NS", Value::Array(items)) => items
            .iter()
            .map(|n| n.as_str().map_or_else(|| n.clone(), number))
            .collect(),
        _ => value.clone(),
    }
}

fn number(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map_or_else(|| Value::String(raw.to_string()), Value::Number)
}

/// Change-feed batches, one record at a time by default so row order holds.
pub struct ChangeFeedHandler {
    listener: Arc<dyn RecordListener<ChangeRecord>>,
    reporter: Arc<dyn ErrorReporter>,
    width: usize,
}

impl ChangeFeedHandler {
    #[must_use]
    pub fn new(
        config: &ServiceConfig,
        listener: Arc<dyn RecordListener<ChangeRecord>>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            listener,
            reporter,
            width: config.change_feed_concurrency,
        }
    }
}

#[async_trait]
impl EventHandler for ChangeFeedHandler {
    fn kind(&self) -> EventKind {
        EventKind::ChangeFeed
    }

    async fn handle(
        &self,
        event: InboundEvent,
        context: ExecutionContext,
    ) -> Result<Value, DispatchError> {
        let batch: StreamBatch = event.decode(EventKind::ChangeFeed)?;
        let records = batch.records.into_iter().map(ChangeRecord::from).collect();
        let results = map_bounded(
            records,
            self.width,
            "change-feed.record",
            self.reporter.as_ref(),
            |record| self.listener.on_record(record, &context),
        )
        .await;
        Ok(Value::Array(results))
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::dispatch::handlers::listener_fn;
    use crate::testing::RecordingReporter;

    #[test]
    fn unmarshals_every_attribute_type() {
        let item = json!({
            "name": {"S": "lemon"},
            "age": {"N": "3"},
            "ratio": {"N": "0.5"},
            "active": {"BOOL": true},
            "gone": {"NULL": true},
            "tags": {"SS": ["a", "b"]},
            "scores": {"NS": ["1", "2.5"]},
            "blob": {"B": "AAE="},
            "blobs": {"BS": ["AAE="]},
            "profile": {"M": {"city": {"S": "Seoul"}, "zip": {"N": "04524"}}},
            "history": {"L": [{"S": "x"}, {"N": "-7"}, {"M": {}}]}
        });
        let plain = unmarshal_map(item.as_object().unwrap());
        assert_eq!(
            Value::Object(plain),
            json!({
                "name": "lemon",
                "age": 3,
                "ratio": 0.5,
                "active": true,
                "gone": null,
                "tags": ["a", "b"],
                "scores": [1, 2.5],
                "blob": "AAE=",
                "blobs": ["AAE="],
                "profile": {"city": "Seoul", "zip": 4524},
                "history": ["x", -7, {}]
            })
        );
    }

    #[test]
    fn unknown_shapes_pass_through() {
        assert_eq!(unmarshal(&json!("raw")), json!("raw"));
        assert_eq!(unmarshal(&json!({"X": 1})), json!({"X": 1}));
        assert_eq!(unmarshal(&json!({"S": "a", "N": "1"})), json!({"S": "a", "N": "1"}));
    }

    #[test]
    fn table_name_comes_from_source_arn() {
        assert_eq!(
            table_of("arn:aws:dynamodb:ap-northeast-2:111:table/Users/stream/2020-01-01T00:00:00.000"),
            Some("Users".to_string())
        );
        assert_eq!(table_of("arn:aws:sqs:ap-northeast-2:111:queue"), None);
    }

    #[tokio::test]
    async fn hands_unmarshalled_records_to_listener_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = listener_fn(move |record: ChangeRecord, _ctx| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(record.event.clone());
                if record.event == "REMOVE" {
                    anyhow::bail!("cannot remove {}", record.keys["id"]);
                }
                Ok(json!(record.new_image))
            }
        });
        let handler = ChangeFeedHandler::new(
            &ServiceConfig::default(),
            listener,
            Arc::new(RecordingReporter::default()),
        );
        let arn = "arn:aws:dynamodb:ap-northeast-2:111:table/Users/stream/label";
        let event = json!({"Records": [
            {
                "eventName": "INSERT",
                "eventSourceARN": arn,
                "dynamodb": {"Keys": {"id": {"S": "u1"}}, "NewImage": {"id": {"S": "u1"}, "n": {"N": "1"}}}
            },
            {
                "eventName": "REMOVE",
                "eventSourceARN": arn,
                "dynamodb": {"Keys": {"id": {"S": "u2"}}, "OldImage": {"id": {"S": "u2"}}}
            }
        ]});

        let out = handler
            .handle(InboundEvent::new(event), ExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(out, json!([{"id": "u1", "n": 1}, "ERROR - cannot remove \"u2\""]));
        assert_eq!(*seen.lock(), vec!["INSERT".to_string(), "REMOVE".to_string()]);
    }
}
