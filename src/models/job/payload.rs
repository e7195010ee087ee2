use std::collections::HashMap;

use serde_derive::Serialize;

use super::Field;

/// Job definition handed to a worker when finishing one job also claims the
/// next, saving the worker a second round trip.
#[derive(Debug, PartialEq, Serialize)]
pub struct Payload {
    id: String,
    data: HashMap<String, String>,
}

impl Payload {
    pub fn new<S: Into<String>>(id: S, data: HashMap<String, String>) -> Self {
        Self { id: id.into(), data }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw job hash fields, exactly as stored.
    pub fn data(&self) -> &HashMap<String, String> {
        &self.data
    }

    pub fn field(&self, field: &Field) -> Option<&str> {
        self.data.get(field.as_ref()).map(String::as_str)
    }
}
