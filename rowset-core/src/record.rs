use crate::Value;
use indexmap::IndexMap;
use std::{cell::RefCell, rc::Rc};

/// Insertion-ordered `field name → value` mapping. The unit of storage:
/// entities expose one, collections store one per key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

/// The aliasable storage handle. An entity obtained from a collection for
/// key *k* holds the same `SharedRecord` as the collection's store entry
/// for *k*: writes through either view are visible through the other.
pub type SharedRecord = Rc<RefCell<Record>>;

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Direct write. Inserting keeps the field's original position when it
    /// already exists, appends otherwise.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Removes the field preserving the order of the remaining ones.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.shift_remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn has_all<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> bool {
        fields.into_iter().all(|f| self.fields.contains_key(f))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Shallow merge: copies from `other` only the fields absent here, in
    /// `other`'s order. Existing fields always win. This is the primitive
    /// behind join, merge and the implicitly-merged lazy sources.
    pub fn merge_missing(&mut self, other: &Record) {
        for (field, value) in other.iter() {
            if !self.fields.contains_key(field) {
                self.fields.insert(field.to_owned(), value.clone());
            }
        }
    }

    /// Recursive flattening: nested records flatten in place, nested
    /// collections become lists of flattened records.
    pub fn to_flat(&self) -> Record {
        let mut flat = Record::new();
        for (field, value) in self.iter() {
            flat.set(field, value.flattened());
        }
        flat
    }

    pub fn into_shared(self) -> SharedRecord {
        Rc::new(RefCell::new(self))
    }
}

impl Value {
    pub(crate) fn flattened(&self) -> Value {
        match self {
            Value::Record(record) => Value::Record(record.to_flat()),
            Value::Collection(collection) => Value::List(
                collection
                    .to_array_deep()
                    .into_values()
                    .map(Value::Record)
                    .collect(),
            ),
            Value::List(values) => Value::List(values.iter().map(Value::flattened).collect()),
            other => other.clone(),
        }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(pairs: T) -> Self {
        Self {
            fields: pairs.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a str, &'a Value);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a Value)> + 'a>;
    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Builds a [`Record`] from field literals.
///
/// ```rust,ignore
/// let row = record! { "id" => 1, "name" => "A" };
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::Record::new()
    };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::Record::new();
        $(record.set($field, $value);)+
        record
    }};
}
