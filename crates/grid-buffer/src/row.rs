use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field values of a row keyed by field name (`field_<id>`).
pub type FieldValues = serde_json::Map<String, Value>;

/// Server-assigned row identity. `0` marks a row that has not been persisted yet.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl RowId {
    pub const UNSAVED: RowId = RowId(0);

    pub fn is_unsaved(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub u64);

/// Local handle for a row held by a buffer. Unlike [`RowId`] it is unique for
/// unsaved rows too. `RowKey::default()` means "not yet placed in a buffer".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(pub(crate) u64);

impl RowKey {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Client-only state that is never sent to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowEphemeral {
    pub key: RowKey,
    pub loading: bool,
    pub hover: bool,
    /// Set when an optimistic create was rejected by the server.
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub id: RowId,
    /// Decimal ordinal kept as the server's string so no precision is lost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(flatten)]
    pub values: FieldValues,
    #[serde(skip)]
    pub ephemeral: RowEphemeral,
}

impl Row {
    pub fn new(id: RowId, values: FieldValues) -> Self {
        Self {
            id,
            order: None,
            values,
            ephemeral: RowEphemeral::default(),
        }
    }

    /// Unsaved row shown while a create request is in flight.
    pub fn placeholder(values: FieldValues) -> Self {
        let mut row = Self::new(RowId::UNSAVED, values);
        row.ephemeral.loading = true;
        row
    }

    pub fn key(&self) -> RowKey {
        self.ephemeral.key
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Sets a field and returns the previous value, if it had one.
    pub fn set_value(&mut self, field: &str, value: Value) -> Option<Value> {
        self.values.insert(field.to_string(), value)
    }

    /// Puts back a value taken by [`Row::set_value`]; `None` removes the field.
    pub fn restore_value(&mut self, field: &str, previous: Option<Value>) {
        match previous {
            Some(value) => {
                self.values.insert(field.to_string(), value);
            }
            None => {
                self.values.remove(field);
            }
        }
    }

    /// Copies server state from `other` into this row, keeping local state.
    pub fn merge_from(&mut self, other: &Row) {
        if !other.id.is_unsaved() {
            self.id = other.id;
        }
        if other.order.is_some() {
            self.order = other.order.clone();
        }
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value.clone());
        }
    }
}

/// One page of rows returned by the row service.
#[derive(Debug, Clone, PartialEq)]
pub struct RowPage {
    pub offset: usize,
    pub limit: usize,
    /// Total row count reported by the server at the time of the fetch.
    pub count: usize,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    LongText,
    Url,
    Email,
    PhoneNumber,
    Number,
    Rating,
    Boolean,
    Date,
    LinkRow,
    File,
    SingleSelect,
    MultipleSelect,
    Formula,
}

impl FieldKind {
    /// Value given to a fresh row for a field of this kind.
    pub fn empty_value(self) -> Value {
        match self {
            FieldKind::Text
            | FieldKind::LongText
            | FieldKind::Url
            | FieldKind::Email
            | FieldKind::PhoneNumber => Value::String(String::new()),
            FieldKind::Boolean => Value::Bool(false),
            FieldKind::LinkRow | FieldKind::File | FieldKind::MultipleSelect => {
                Value::Array(Vec::new())
            }
            FieldKind::Number
            | FieldKind::Rating
            | FieldKind::Date
            | FieldKind::SingleSelect
            | FieldKind::Formula => Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: u64,
    pub kind: FieldKind,
}

impl Field {
    pub fn new(id: u64, kind: FieldKind) -> Self {
        Self { id, kind }
    }

    pub fn name(&self) -> String {
        format!("field_{}", self.id)
    }
}

/// Fills every field missing from `overrides` with its empty value.
pub fn values_with_defaults(fields: &[Field], overrides: FieldValues) -> FieldValues {
    let mut values = overrides;
    for field in fields {
        values
            .entry(field.name())
            .or_insert_with(|| field.kind.empty_value());
    }
    values
}
