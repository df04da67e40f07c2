use crate::{
    ConfigurationError, DataError, Entity, EntityClass, IterationMode, Key, LazySource,
    META_JOIN, META_ON_FIELD, META_SOURCE_FIELD, Order, PersistenceDelegate, Record, Result,
    ServiceLocator, SharedRecord, SortDirective, ValidatorResolver, Value,
};
use indexmap::IndexMap;
use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::HashMap,
    fmt,
    rc::Rc,
};

/// Declared primary-key definition of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Primary {
    /// Positional integer keys assigned on append.
    #[default]
    None,
    /// Keys taken from a single field of each record.
    Field(String),
    /// Synthetic keys hashed from an ordered field tuple.
    Composite(Vec<String>),
}

/// What a collection accepts on insert.
pub enum Item {
    Record(Record),
    Entity(Entity),
}

impl From<Record> for Item {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<Entity> for Item {
    fn from(entity: Entity) -> Self {
        Self::Entity(entity)
    }
}

/// Predicate of [`Collection::find`]: equality against one value or
/// membership in a set.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    Equals(Value),
    OneOf(Vec<Value>),
}

impl Matcher {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Equals(target) => value == target,
            Self::OneOf(targets) => targets.contains(value),
        }
    }
}

impl From<Value> for Matcher {
    fn from(value: Value) -> Self {
        Self::Equals(value)
    }
}

impl From<Vec<Value>> for Matcher {
    fn from(values: Vec<Value>) -> Self {
        Self::OneOf(values)
    }
}

macro_rules! matcher_from_scalar {
    ($($type:ty),+ $(,)?) => {
        $(impl From<$type> for Matcher {
            fn from(value: $type) -> Self {
                Self::Equals(value.into())
            }
        })+
    };
}

matcher_from_scalar!(bool, i32, i64, u32, u64, f64, &str, String);

/// Key selector for projections and keyed assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyBy {
    /// The collection's own key (the declared primary, or positional).
    Primary,
    /// A key derived from the named field of each record.
    Field(String),
}

pub(crate) struct Inner {
    class: Rc<EntityClass>,
    primary: Primary,
    store: IndexMap<Key, SharedRecord>,
    order: Vec<Key>,
    wrapped: HashMap<Key, Entity>,
    next_position: i64,
    delegate: Option<Rc<dyn PersistenceDelegate>>,
    locator: Option<Rc<dyn ServiceLocator>>,
    validators: Option<Rc<dyn ValidatorResolver>>,
    meta: Option<Record>,
}

/// Ordered, optionally keyed set of records with relational-style
/// operations, wrapping records into entities on demand.
///
/// Two parallel structures cover the same key space at all times: the store
/// (key → record) and the iteration order (ordered keys). Entities wrapped
/// for a key share the store's record storage; a `Collection` itself is a
/// handle, and cloning it shares the underlying state.
#[derive(Clone)]
pub struct Collection {
    inner: Rc<RefCell<Inner>>,
}

fn split_item(item: Item) -> (SharedRecord, Option<Entity>) {
    match item {
        Item::Record(record) => (record.into_shared(), None),
        Item::Entity(entity) => (entity.linked_data(), Some(entity)),
    }
}

fn missing_component<'a>(record: &Record, primary: &'a Primary) -> Option<&'a str> {
    match primary {
        Primary::None => None,
        Primary::Field(field) => (!record.contains(field)).then_some(field.as_str()),
        Primary::Composite(fields) => fields
            .iter()
            .find(|field| !record.contains(field))
            .map(String::as_str),
    }
}

fn derive_key(record: &Record, primary: &Primary) -> Result<Key> {
    match primary {
        Primary::None => Err(DataError::new("cannot derive a key without a primary").into()),
        Primary::Field(field) => {
            let Some(value) = record.get(field) else {
                return Err(DataError::new(format!("record lacks key field `{field}`")).into());
            };
            Key::from_value(value)
        }
        Primary::Composite(fields) => {
            let mut components = Vec::with_capacity(fields.len());
            for field in fields {
                let Some(value) = record.get(field) else {
                    return Err(
                        DataError::new(format!("record lacks key component `{field}`")).into()
                    );
                };
                components.push(value.clone());
            }
            Key::composite(components.iter())
        }
    }
}

fn truthy(value: &Value) -> bool {
    !value.is_null() && !matches!(value, Value::Boolean(Some(false)))
}

impl Collection {
    pub fn new(class: Rc<EntityClass>) -> Self {
        Self::with_inner(Inner {
            class,
            primary: Primary::None,
            store: IndexMap::new(),
            order: Vec::new(),
            wrapped: HashMap::new(),
            next_position: 0,
            delegate: None,
            locator: None,
            validators: None,
            meta: None,
        })
    }

    /// Builds a collection over raw records with the given class and
    /// primary definition.
    pub fn factory(
        records: impl IntoIterator<Item = Record>,
        class: Rc<EntityClass>,
        primary: Primary,
    ) -> Result<Self> {
        let collection = Self::new(class);
        collection.set_primary(primary)?;
        for record in records {
            collection.add_item(record)?;
        }
        Ok(collection)
    }

    fn with_inner(inner: Inner) -> Self {
        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    pub(crate) fn from_inner(inner: Rc<RefCell<Inner>>) -> Self {
        Self { inner }
    }

    pub fn with_delegate(self, delegate: Rc<dyn PersistenceDelegate>) -> Self {
        self.inner.borrow_mut().delegate = Some(delegate);
        self
    }

    pub fn with_locator(self, locator: Rc<dyn ServiceLocator>) -> Self {
        self.inner.borrow_mut().locator = Some(locator);
        self
    }

    pub fn with_validators(self, validators: Rc<dyn ValidatorResolver>) -> Self {
        self.inner.borrow_mut().validators = Some(validators);
        self
    }

    pub fn with_meta(self, meta: Record) -> Self {
        self.inner.borrow_mut().meta = Some(meta);
        self
    }

    pub fn class(&self) -> Rc<EntityClass> {
        self.inner.borrow().class.clone()
    }

    /// Swaps the entity class used when wrapping. An incompatible change
    /// discards the wrapped-entity cache; the stale entities themselves are
    /// left untouched for whoever still holds them.
    pub fn set_class(&self, class: Rc<EntityClass>) {
        let mut inner = self.inner.borrow_mut();
        if !Rc::ptr_eq(&inner.class, &class) && !inner.wrapped.is_empty() {
            log::debug!(
                "entity class changed to `{}`: discarding {} wrapped entities",
                class.name(),
                inner.wrapped.len()
            );
            inner.wrapped.clear();
        }
        inner.class = class;
    }

    pub fn primary(&self) -> Primary {
        self.inner.borrow().primary.clone()
    }

    pub fn meta(&self) -> Option<Record> {
        self.inner.borrow().meta.clone()
    }

    pub fn set_meta(&self, meta: Record) {
        self.inner.borrow_mut().meta = Some(meta);
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().store.is_empty()
    }

    /// Count of records carrying every one of the given fields.
    pub fn count_with(&self, fields: &[&str]) -> usize {
        let inner = self.inner.borrow();
        inner
            .order
            .iter()
            .filter(|key| inner.store[*key].borrow().has_all(fields.iter().copied()))
            .count()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.inner.borrow().order.clone()
    }

    pub fn contains_key(&self, key: impl Into<Key>) -> bool {
        self.inner.borrow().store.contains_key(&key.into())
    }

    /// Declares (or re-declares) the primary and re-indexes every current
    /// record. Records lacking a required component are a
    /// [`ConfigurationError`] and leave the collection unchanged. Records
    /// whose component tuples coincide hash to the same synthetic key; the
    /// later record overwrites the former in the earlier one's slot.
    pub fn set_primary(&self, primary: Primary) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !matches!(primary, Primary::None) {
            for key in &inner.order {
                let record = inner.store[key].borrow();
                if let Some(field) = missing_component(&record, &primary) {
                    return Err(ConfigurationError::new(format!(
                        "record `{key}` lacks primary component `{field}`"
                    ))
                    .into());
                }
            }
        }
        let mut store = IndexMap::with_capacity(inner.store.len());
        let mut order = Vec::with_capacity(inner.order.len());
        let mut wrapped = HashMap::new();
        let mut next_position = 0i64;
        for key in inner.order.clone() {
            let handle = inner.store[&key].clone();
            let new_key = match &primary {
                Primary::None => {
                    let positional = Key::Int(next_position);
                    next_position += 1;
                    positional
                }
                primary => derive_key(&handle.borrow(), primary)?,
            };
            if store.insert(new_key.clone(), handle).is_some() {
                log::warn!("key collision on `{new_key}`: the later record replaces the earlier");
                wrapped.remove(&new_key);
            } else {
                order.push(new_key.clone());
            }
            if let Some(entity) = inner.wrapped.get(&key) {
                wrapped.insert(new_key, entity.clone());
            }
        }
        inner.store = store;
        inner.order = order;
        inner.wrapped = wrapped;
        inner.next_position = next_position;
        inner.primary = primary;
        Ok(())
    }

    /// Appends an item. Without a primary the item gets the next positional
    /// key; with one, the item must already carry the key fields
    /// ([`DataError`] otherwise) and an equal key replaces the existing
    /// record.
    pub fn add_item(&self, item: impl Into<Item>) -> Result<Key> {
        let (handle, entity) = split_item(item.into());
        let mut inner = self.inner.borrow_mut();
        let key = if matches!(inner.primary, Primary::None) {
            let positional = Key::Int(inner.next_position);
            inner.next_position += 1;
            positional
        } else {
            let primary = inner.primary.clone();
            let record = handle.borrow();
            if let Some(field) = missing_component(&record, &primary) {
                return Err(DataError::new(format!("item lacks key field `{field}`")).into());
            }
            derive_key(&record, &primary)?
        };
        Self::insert_entry(&mut inner, &self.inner, key.clone(), handle, entity);
        Ok(key)
    }

    /// Inserts or replaces under an explicit key. With a primary declared,
    /// the item must still carry the key fields.
    pub fn set_item(&self, key: impl Into<Key>, item: impl Into<Item>) -> Result<()> {
        let (handle, entity) = split_item(item.into());
        let mut inner = self.inner.borrow_mut();
        if !matches!(inner.primary, Primary::None) {
            let primary = inner.primary.clone();
            let record = handle.borrow();
            if let Some(field) = missing_component(&record, &primary) {
                return Err(DataError::new(format!("item lacks key field `{field}`")).into());
            }
        }
        Self::insert_entry(&mut inner, &self.inner, key.into(), handle, entity);
        Ok(())
    }

    fn insert_entry(
        inner: &mut Inner,
        rc: &Rc<RefCell<Inner>>,
        key: Key,
        handle: SharedRecord,
        entity: Option<Entity>,
    ) {
        if inner.store.insert(key.clone(), handle).is_some() {
            inner.wrapped.remove(&key);
        } else {
            inner.order.push(key.clone());
        }
        if let Some(entity) = entity {
            entity.adopt(Rc::downgrade(rc));
            inner.wrapped.insert(key, entity);
        }
    }

    /// Returns the cached entity for the key, wrapping the raw record first
    /// when needed. Absent keys read as `None`.
    pub fn get_item(&self, key: impl Into<Key>) -> Option<Entity> {
        let key = key.into();
        let mut inner = self.inner.borrow_mut();
        if let Some(entity) = inner.wrapped.get(&key) {
            return Some(entity.clone());
        }
        let record = inner.store.get(&key)?.clone();
        let entity = Entity::wrapped(
            inner.class.clone(),
            record,
            inner.delegate.clone(),
            inner.locator.clone(),
            inner.validators.clone(),
            Rc::downgrade(&self.inner),
        );
        inner.wrapped.insert(key, entity.clone());
        Some(entity)
    }

    pub fn first_item(&self) -> Option<Entity> {
        let key = self.inner.borrow().order.first().cloned()?;
        self.get_item(key)
    }

    pub fn last_item(&self) -> Option<Entity> {
        let key = self.inner.borrow().order.last().cloned()?;
        self.get_item(key)
    }

    /// Removes the key from the store, the order and the wrapped cache,
    /// returning the record handle (still alive for anyone aliasing it).
    pub fn remove_item(&self, key: impl Into<Key>) -> Option<SharedRecord> {
        let key = key.into();
        let mut inner = self.inner.borrow_mut();
        let removed = inner.store.shift_remove(&key)?;
        inner.order.retain(|k| k != &key);
        inner.wrapped.remove(&key);
        Some(removed)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.store.clear();
        inner.order.clear();
        inner.wrapped.clear();
        inner.next_position = 0;
    }

    /// Stable multi-key sort over the iteration order only; the store is
    /// untouched. Directives are `"field"`, `"field ASC"` or `"field DESC"`.
    /// Records missing a sort field order as nulls, first.
    pub fn sort(&self, spec: &[&str]) -> Result<()> {
        let directives = SortDirective::parse_all(spec)?;
        if directives.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        let mut order = std::mem::take(&mut inner.order);
        order.sort_by(|a, b| {
            let (Some(left), Some(right)) = (inner.store.get(a), inner.store.get(b)) else {
                return Ordering::Equal;
            };
            let (left, right) = (left.borrow(), right.borrow());
            let null = Value::Null;
            for directive in &directives {
                let ordering = left
                    .get(&directive.field)
                    .unwrap_or(&null)
                    .compare(right.get(&directive.field).unwrap_or(&null));
                let ordering = match directive.order {
                    Order::ASC => ordering,
                    Order::DESC => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        inner.order = order;
        Ok(())
    }

    /// Rewrites the iteration order as a (sub)permutation of the current
    /// key set, independent of [`sort`](Self::sort).
    pub fn set_iteration_mode(&self, mode: IterationMode) {
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        match mode {
            IterationMode::Straight => {
                inner.order = inner.store.keys().cloned().collect();
            }
            IterationMode::Reverse => inner.order.reverse(),
            IterationMode::Even => {
                let kept: Vec<Key> = inner.order.iter().step_by(2).cloned().collect();
                inner.order = kept;
            }
            IterationMode::Odd => {
                let kept: Vec<Key> = inner.order.iter().skip(1).step_by(2).cloned().collect();
                inner.order = kept;
            }
        }
    }

    /// Linear scan in iteration order keeping records whose field matches,
    /// up to `limit`. Returns a same-shape collection (class, primary,
    /// attached collaborators) preserving keys, relative order and, where
    /// already wrapped, entity identity. Records missing the field are
    /// skipped.
    pub fn find(&self, field: &str, matcher: impl Into<Matcher>, limit: Option<usize>) -> Self {
        let matcher = matcher.into();
        let result = self.same_shape();
        {
            let inner = self.inner.borrow();
            let mut out = result.inner.borrow_mut();
            let mut max_position = -1i64;
            for key in &inner.order {
                if limit.is_some_and(|limit| out.order.len() >= limit) {
                    break;
                }
                let handle = &inner.store[key];
                let matched = handle
                    .borrow()
                    .get(field)
                    .is_some_and(|value| matcher.matches(value));
                if !matched {
                    continue;
                }
                out.store.insert(key.clone(), handle.clone());
                out.order.push(key.clone());
                if let Some(entity) = inner.wrapped.get(key) {
                    out.wrapped.insert(key.clone(), entity.clone());
                }
                if let Key::Int(position) = key {
                    max_position = max_position.max(*position);
                }
            }
            out.next_position = max_position + 1;
        }
        result
    }

    /// Contiguous slice of the iteration order starting at `offset`, as a
    /// same-shape collection.
    pub fn chunk(&self, size: usize, offset: usize) -> Self {
        let result = self.same_shape();
        {
            let inner = self.inner.borrow();
            let mut out = result.inner.borrow_mut();
            let mut max_position = -1i64;
            let end = offset.saturating_add(size).min(inner.order.len());
            for key in inner.order.get(offset..end).unwrap_or_default() {
                out.store.insert(key.clone(), inner.store[key].clone());
                out.order.push(key.clone());
                if let Some(entity) = inner.wrapped.get(key) {
                    out.wrapped.insert(key.clone(), entity.clone());
                }
                if let Key::Int(position) = key {
                    max_position = max_position.max(*position);
                }
            }
            out.next_position = max_position + 1;
        }
        result
    }

    fn same_shape(&self) -> Self {
        let inner = self.inner.borrow();
        Self::with_inner(Inner {
            class: inner.class.clone(),
            primary: inner.primary.clone(),
            store: IndexMap::new(),
            order: Vec::new(),
            wrapped: HashMap::new(),
            next_position: 0,
            delegate: inner.delegate.clone(),
            locator: inner.locator.clone(),
            validators: inner.validators.clone(),
            meta: None,
        })
    }

    /// Shallow-merges matching `source` records into this collection's
    /// records; existing fields win. The source is consulted through a
    /// private index keyed by `source_field` (defaulting to `on_field`), so
    /// the caller's source is never re-keyed. Empty source is a no-op;
    /// repeating the join with an unchanged source changes nothing.
    pub fn join(
        &self,
        source: &Collection,
        on_field: &str,
        source_field: Option<&str>,
    ) -> Result<()> {
        let source_field = source_field.unwrap_or(on_field);
        if source.is_empty() {
            return Ok(());
        }
        let keyed: IndexMap<Key, Record> = {
            let src = source.inner.borrow();
            let already_keyed =
                matches!(&src.primary, Primary::Field(field) if field == source_field);
            let mut keyed = IndexMap::with_capacity(src.store.len());
            for key in &src.order {
                let record = src.store[key].borrow();
                let entry_key = if already_keyed {
                    key.clone()
                } else {
                    match record.get(source_field).map(Key::from_value) {
                        Some(Ok(derived)) => derived,
                        _ => continue,
                    }
                };
                keyed.insert(entry_key, record.clone());
            }
            keyed
        };
        let inner = self.inner.borrow();
        for key in &inner.order {
            let mut record = inner.store[key].borrow_mut();
            let Some(link) = record.get(on_field).map(Key::from_value).and_then(Result::ok)
            else {
                continue;
            };
            if let Some(source_record) = keyed.get(&link) {
                record.merge_missing(source_record);
            }
        }
        Ok(())
    }

    /// Unions the source into this collection. Without a primary the source
    /// records are appended positionally (count-additive). With one, the
    /// source is re-indexed to this collection's key definition
    /// ([`ConfigurationError`] when a source record cannot carry it),
    /// existing values win on collision and the iteration order is rebuilt.
    pub fn merge(&self, source: &Collection) -> Result<()> {
        let snapshot: Vec<(SharedRecord, Option<Entity>)> = {
            let src = source.inner.borrow();
            src.order
                .iter()
                .map(|key| (src.store[key].clone(), src.wrapped.get(key).cloned()))
                .collect()
        };
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        if matches!(inner.primary, Primary::None) {
            for (handle, entity) in snapshot {
                let key = Key::Int(inner.next_position);
                inner.next_position += 1;
                inner.store.insert(key.clone(), handle);
                inner.order.push(key.clone());
                if let Some(entity) = entity {
                    inner.wrapped.insert(key, entity);
                }
            }
        } else {
            let primary = inner.primary.clone();
            for (handle, entity) in snapshot {
                let key = {
                    let record = handle.borrow();
                    if let Some(field) = missing_component(&record, &primary) {
                        return Err(ConfigurationError::new(format!(
                            "merge source record lacks primary component `{field}`"
                        ))
                        .into());
                    }
                    derive_key(&record, &primary)?
                };
                if inner.store.contains_key(&key) {
                    continue;
                }
                inner.store.insert(key.clone(), handle);
                if let Some(entity) = entity {
                    inner.wrapped.insert(key.clone(), entity);
                }
            }
            inner.order = inner.store.keys().cloned().collect();
        }
        Ok(())
    }

    /// Projects the field across all records in iteration order, skipping
    /// records that miss it.
    pub fn column_values(&self, field: &str, unique: bool) -> Vec<Value> {
        let inner = self.inner.borrow();
        let mut values = Vec::new();
        for key in &inner.order {
            let record = inner.store[key].borrow();
            let Some(value) = record.get(field) else {
                continue;
            };
            if unique && values.contains(value) {
                continue;
            }
            values.push(value.clone());
        }
        values
    }

    /// Keyed projection: field values keyed by the collection key or by a
    /// key derived from another field. Records missing either side are
    /// skipped.
    pub fn column_map(&self, value_field: &str, key_by: KeyBy) -> IndexMap<Key, Value> {
        let inner = self.inner.borrow();
        let mut map = IndexMap::new();
        for key in &inner.order {
            let record = inner.store[key].borrow();
            let Some(value) = record.get(value_field) else {
                continue;
            };
            let entry_key = match &key_by {
                KeyBy::Primary => key.clone(),
                KeyBy::Field(field) => match record.get(field).map(Key::from_value) {
                    Some(Ok(derived)) => derived,
                    _ => continue,
                },
            };
            map.insert(entry_key, value.clone());
        }
        map
    }

    /// Broadcast assignment. With `overwrite` unset only records currently
    /// missing the field receive the value.
    pub fn set_field(&self, field: &str, value: impl Into<Value>, overwrite: bool) {
        let value = value.into();
        let inner = self.inner.borrow();
        for key in &inner.order {
            let mut record = inner.store[key].borrow_mut();
            if overwrite || !record.contains(field) {
                record.set(field, value.clone());
            }
        }
    }

    /// Per-record assignment from a keyed mapping matched against each
    /// record's `key_by` key.
    pub fn set_field_keyed(
        &self,
        field: &str,
        values: &IndexMap<Key, Value>,
        key_by: KeyBy,
        overwrite: bool,
    ) {
        let inner = self.inner.borrow();
        for key in &inner.order {
            let mut record = inner.store[key].borrow_mut();
            let entry_key = match &key_by {
                KeyBy::Primary => key.clone(),
                KeyBy::Field(lookup) => match record.get(lookup).map(Key::from_value) {
                    Some(Ok(derived)) => derived,
                    _ => continue,
                },
            };
            let Some(value) = values.get(&entry_key) else {
                continue;
            };
            if overwrite || !record.contains(field) {
                record.set(field, value.clone());
            }
        }
    }

    /// Populates a declared cascade-many field for every record: runs the
    /// registered set resolver (which must produce a collection,
    /// [`DataError`] otherwise), determines the join-field pair from the
    /// result's metadata side-record, the declared source-field override or
    /// this collection's single-field primary ([`ConfigurationError`] when
    /// none applies), then either joins the result in (metadata `join`
    /// flag) or assigns each record its matching sub-collection.
    pub fn populate(&self, field: &str) -> Result<()> {
        let (resolver, override_field, primary) = {
            let inner = self.inner.borrow();
            let class = inner.class.clone();
            let primary = inner.primary.clone();
            match class.source(field) {
                Some(LazySource::CascadeMany {
                    resolver,
                    source_field,
                }) => (resolver.clone(), source_field.clone(), primary),
                _ => {
                    return Err(ConfigurationError::new(format!(
                        "field `{field}` is not declared as a cascade-many source"
                    ))
                    .into());
                }
            }
        };
        let source = match resolver(self)? {
            Value::Collection(collection) => *collection,
            other => {
                return Err(DataError::new(format!(
                    "cascade resolver for `{field}` must produce a collection, got {other}"
                ))
                .into());
            }
        };
        let meta = source.meta();
        let meta_text = |name: &str| {
            meta.as_ref()
                .and_then(|meta| meta.get(name))
                .and_then(|value| match value {
                    Value::Varchar(Some(text)) => Some(text.clone()),
                    _ => None,
                })
        };
        let on_field = meta_text(META_ON_FIELD).or_else(|| match &primary {
            Primary::Field(field) => Some(field.clone()),
            _ => None,
        });
        let Some(on_field) = on_field else {
            return Err(ConfigurationError::new(format!(
                "cannot determine the join field pair for `{field}`"
            ))
            .into());
        };
        let source_field = override_field
            .or_else(|| meta_text(META_SOURCE_FIELD))
            .unwrap_or_else(|| on_field.clone());
        let join_in = meta
            .as_ref()
            .and_then(|meta| meta.get(META_JOIN))
            .is_some_and(truthy);
        if join_in {
            self.join(&source, &on_field, Some(&source_field))?;
        } else {
            let groups: IndexMap<Key, Collection> = {
                let src = source.inner.borrow();
                let mut groups: IndexMap<Key, Collection> = IndexMap::new();
                for key in &src.order {
                    let handle = src.store[key].clone();
                    let link = match handle.borrow().get(&source_field).map(Key::from_value) {
                        Some(Ok(derived)) => derived,
                        _ => continue,
                    };
                    groups
                        .entry(link)
                        .or_insert_with(|| Collection::new(src.class.clone()))
                        .append_handle(handle);
                }
                groups
            };
            let inner = self.inner.borrow();
            for key in &inner.order {
                let mut record = inner.store[key].borrow_mut();
                let Some(link) = record.get(&on_field).map(Key::from_value).and_then(Result::ok)
                else {
                    continue;
                };
                let children = groups
                    .get(&link)
                    .cloned()
                    .unwrap_or_else(|| Collection::new(inner.class.clone()));
                record.set(field, children);
            }
        }
        let wrapped: Vec<Entity> = self.inner.borrow().wrapped.values().cloned().collect();
        for entity in wrapped {
            entity.mark_resolved(field);
        }
        Ok(())
    }

    /// Positional adoption of an existing record handle, aliasing included.
    pub(crate) fn append_handle(&self, handle: SharedRecord) {
        let mut inner = self.inner.borrow_mut();
        let key = Key::Int(inner.next_position);
        inner.next_position += 1;
        inner.store.insert(key.clone(), handle);
        inner.order.push(key);
    }

    /// Ordered mapping of key → wrapped entity.
    pub fn to_array(&self) -> IndexMap<Key, Entity> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get_item(key.clone()).map(|entity| (key, entity)))
            .collect()
    }

    /// Ordered mapping of key → recursively flattened record.
    pub fn to_array_deep(&self) -> IndexMap<Key, Record> {
        let inner = self.inner.borrow();
        inner
            .order
            .iter()
            .map(|key| (key.clone(), inner.store[key].borrow().to_flat()))
            .collect()
    }

    /// Iterates wrapped entities in iteration order. The order is
    /// snapshotted up front; records inserted during iteration are not
    /// visited.
    pub fn iter(&self) -> Entities {
        Entities {
            collection: self.clone(),
            keys: self.keys(),
            position: 0,
        }
    }
}

pub struct Entities {
    collection: Collection,
    keys: Vec<Key>,
    position: usize,
}

impl Iterator for Entities {
    type Item = Entity;

    fn next(&mut self) -> Option<Self::Item> {
        while self.position < self.keys.len() {
            let key = self.keys[self.position].clone();
            self.position += 1;
            if let Some(entity) = self.collection.get_item(key) {
                return Some(entity);
            }
        }
        None
    }
}

impl IntoIterator for &Collection {
    type Item = Entity;
    type IntoIter = Entities;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        let (left, right) = (self.inner.borrow(), other.inner.borrow());
        left.order.len() == right.order.len()
            && left
                .order
                .iter()
                .zip(right.order.iter())
                .all(|(lk, rk)| lk == rk && *left.store[lk].borrow() == *right.store[rk].borrow())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Collection")
            .field("class", &inner.class.name())
            .field("primary", &inner.primary)
            .field("len", &inner.store.len())
            .finish()
    }
}
