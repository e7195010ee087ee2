mod field;
mod payload;
mod target;

pub use self::field::Field;
pub use self::payload::Payload;
pub use self::target::Target;

use std::collections::HashMap;

use redis::{self, FromRedisValue};
use serde_derive::{Deserialize, Serialize};

/// Generic data structure for containing a subset of job metadata.
///
/// Used as a convenient way of dealing with getting/mapping Redis data that
/// might be missing.
#[derive(Debug)]
pub struct JobMeta {
    map: HashMap<Field, redis::Value>,
}

impl JobMeta {
    /// Construct an instance of `JobMeta` from given fields and a raw
    /// `redis::Value`, typically the reply to an `HMGET` for those fields.
    pub fn from_redis_value(fields: &[Field], v: &redis::Value) -> redis::RedisResult<Self> {
        match v {
            redis::Value::Bulk(items) => {
                let mut map = HashMap::with_capacity(fields.len());
                for (field, item) in fields.iter().zip(items) {
                    match item {
                        redis::Value::Nil => (),
                        data => {
                            map.insert(field.clone(), data.to_owned());
                        }
                    }
                }
                Ok(Self { map })
            }
            item @ redis::Value::Data(_) => {
                let mut map = HashMap::with_capacity(1);
                map.insert(fields[0].clone(), item.to_owned());
                Ok(Self { map })
            }
            redis::Value::Nil => Ok(Self { map: HashMap::new() }),
            _ => Err((redis::ErrorKind::TypeError, "Unhandled response type for JobMeta").into()),
        }
    }

    /// Get an optional field value from this struct's map.
    fn get_optional_field<T: redis::FromRedisValue>(&self, field: &Field) -> Option<T> {
        self.map
            .get(field)
            .map(|v| redis::from_redis_value(v).unwrap())
    }
}

/// Subset of job metadata read by the finish and retry procedures.
pub struct FinishMeta(JobMeta);

impl FromRedisValue for FinishMeta {
    fn from_redis_value(v: &redis::Value) -> redis::RedisResult<Self> {
        Ok(FinishMeta(JobMeta::from_redis_value(FinishMeta::fields(), v)?))
    }
}

impl FinishMeta {
    pub fn fields() -> &'static [Field] {
        static FIELDS: [Field; 5] = [
            Field::ParentKey,
            Field::Parent,
            Field::DebounceId,
            Field::AttemptsMade,
            Field::Priority,
        ];
        &FIELDS
    }

    /// Full Redis key of the parent job, if this job has one.
    pub fn parent_key(&self) -> Option<String> {
        self.0.get_optional_field(&Field::ParentKey)
    }

    /// Decoded parent descriptor. Written once at enqueue time, so a parse
    /// failure means the hash was corrupted externally.
    pub fn parent(&self) -> Option<ParentData> {
        self.0
            .get_optional_field::<String>(&Field::Parent)
            .map(|s| serde_json::from_str(&s).unwrap())
    }

    pub fn debounce_id(&self) -> Option<String> {
        self.0.get_optional_field(&Field::DebounceId)
    }

    pub fn attempts_made(&self) -> u64 {
        self.0.get_optional_field(&Field::AttemptsMade).unwrap_or(0)
    }

    pub fn priority(&self) -> u64 {
        self.0.get_optional_field(&Field::Priority).unwrap_or(0)
    }
}

/// Decoded form of the `parent` job hash field: the parent's identity plus
/// the failure-propagation flags the child was enqueued with.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ParentData {
    pub id: String,

    /// Key prefix of the queue the parent lives in. The parent may belong to
    /// a different queue than the child; all parent-side keys are derived
    /// from this prefix.
    #[serde(rename = "queueKey")]
    pub queue_key: String,

    /// Fail the parent as soon as this child fails.
    #[serde(default, rename = "fpof")]
    pub fail_parent_on_failure: bool,

    /// Treat this child's failure as a satisfied dependency.
    #[serde(default, rename = "idof")]
    pub ignore_dependency_on_failure: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parent_data_decoding() {
        let parent: ParentData =
            serde_json::from_str(r#"{"id":"p1","queueKey":"uca:other","fpof":true}"#).unwrap();
        assert_eq!(parent.id, "p1");
        assert_eq!(parent.queue_key, "uca:other");
        assert!(parent.fail_parent_on_failure);
        assert!(!parent.ignore_dependency_on_failure);
    }

    #[test]
    fn finish_meta_defaults() {
        let meta = FinishMeta(JobMeta::from_redis_value(FinishMeta::fields(), &redis::Value::Nil).unwrap());
        assert_eq!(meta.parent_key(), None);
        assert_eq!(meta.attempts_made(), 0);
        assert_eq!(meta.priority(), 0);
    }
}
