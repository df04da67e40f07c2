use crate::{
    Collection, ConfigurationError, DataError, EntityClass, LazySource, PersistenceDelegate,
    Record, Result, ServiceLocator, SharedRecord, ValidatorResolver, Value,
    collection::Inner,
};
use indexmap::IndexMap;
use std::{
    cell::RefCell,
    collections::HashSet,
    rc::{Rc, Weak},
};

/// Metadata field naming the local side of a join-key pair.
pub const META_ON_FIELD: &str = "on_field";
/// Metadata field naming the source side of a join-key pair.
pub const META_SOURCE_FIELD: &str = "source_field";
/// Metadata flag: a truthy value asks the consuming collection to join the
/// carrying result in instead of grouping it per key.
pub const META_JOIN: &str = "join";

#[derive(Default)]
struct EntityFlags {
    resolved: HashSet<String>,
    force_insert: bool,
    meta: Option<Record>,
    messages: IndexMap<String, Vec<String>>,
    owner: Option<Weak<RefCell<Inner>>>,
}

/// One record's view: direct and lazily resolved field access, validation,
/// persistence delegation.
///
/// An `Entity` is a handle. Clones share the record, the resolved-field set
/// and the metadata side-record, so a clone is the same entity, not a copy.
/// All mutation goes through the shared record; the engine is single
/// threaded by contract.
#[derive(Clone)]
pub struct Entity {
    class: Rc<EntityClass>,
    record: SharedRecord,
    flags: Rc<RefCell<EntityFlags>>,
    delegate: Option<Rc<dyn PersistenceDelegate>>,
    locator: Option<Rc<dyn ServiceLocator>>,
    validators: Option<Rc<dyn ValidatorResolver>>,
}

impl Entity {
    pub fn new(class: Rc<EntityClass>) -> Self {
        Self::from_record(class, Record::new())
    }

    pub fn from_record(class: Rc<EntityClass>, record: Record) -> Self {
        Self::from_shared(class, record.into_shared())
    }

    /// Builds an entity over storage that may already be aliased elsewhere.
    pub fn from_shared(class: Rc<EntityClass>, record: SharedRecord) -> Self {
        Self {
            class,
            record,
            flags: Rc::default(),
            delegate: None,
            locator: None,
            validators: None,
        }
    }

    /// Constructor used by a collection wrapping one of its records.
    pub(crate) fn wrapped(
        class: Rc<EntityClass>,
        record: SharedRecord,
        delegate: Option<Rc<dyn PersistenceDelegate>>,
        locator: Option<Rc<dyn ServiceLocator>>,
        validators: Option<Rc<dyn ValidatorResolver>>,
        owner: Weak<RefCell<Inner>>,
    ) -> Self {
        let entity = Self {
            class,
            record,
            flags: Rc::default(),
            delegate,
            locator,
            validators,
        };
        entity.flags.borrow_mut().owner = Some(owner);
        entity
    }

    pub fn with_delegate(mut self, delegate: Rc<dyn PersistenceDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn with_locator(mut self, locator: Rc<dyn ServiceLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn with_validators(mut self, validators: Rc<dyn ValidatorResolver>) -> Self {
        self.validators = Some(validators);
        self
    }

    pub fn class(&self) -> &Rc<EntityClass> {
        &self.class
    }

    pub fn locator(&self) -> Option<&Rc<dyn ServiceLocator>> {
        self.locator.as_ref()
    }

    /// Hands out the aliasable record itself, not a copy. The persistence
    /// layer reads and writes through this handle.
    pub fn linked_data(&self) -> SharedRecord {
        self.record.clone()
    }

    /// Swaps this handle onto different storage. Clones made earlier keep
    /// aliasing the previous record.
    pub fn set_linked_data(&mut self, record: SharedRecord) {
        self.record = record;
    }

    /// Owned snapshot of the current record.
    pub fn to_record(&self) -> Record {
        self.record.borrow().clone()
    }

    pub fn has(&self, field: &str) -> bool {
        self.record.borrow().contains(field)
    }

    /// Field read. A missing field triggers lazy resolution for that field,
    /// then the record is consulted again; still unresolved reads as
    /// `None`. Resolution failures are swallowed here and logged at debug
    /// level; call [`initialize`](Self::initialize) to surface them.
    pub fn get(&self, field: &str) -> Option<Value> {
        if let Some(value) = self.record.borrow().get(field) {
            return Some(value.clone());
        }
        if let Err(error) = self.initialize_field(field) {
            log::debug!("lazy resolution of `{field}` failed: {error:#}");
        }
        self.record.borrow().get(field).cloned()
    }

    /// Direct write, bypassing lazy sources.
    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) {
        self.record.borrow_mut().set(field, value);
    }

    /// Removes the field. The resolved marker, if any, stays; clear it
    /// explicitly with [`clear_resolved`](Self::clear_resolved).
    pub fn unset(&self, field: &str) -> Option<Value> {
        self.record.borrow_mut().remove(field)
    }

    pub fn is_resolved(&self, field: &str) -> bool {
        self.flags.borrow().resolved.contains(field)
    }

    pub fn clear_resolved(&self, field: &str) {
        self.flags.borrow_mut().resolved.remove(field);
    }

    pub(crate) fn mark_resolved(&self, field: &str) {
        self.flags.borrow_mut().resolved.insert(field.to_owned());
    }

    /// Ties this entity (and every clone of it) to the collection that now
    /// holds its record.
    pub(crate) fn adopt(&self, owner: Weak<RefCell<Inner>>) {
        self.flags.borrow_mut().owner = Some(owner);
    }

    /// Resolves the named lazy field, or every declared field not yet
    /// resolved when `field` is `None`. A field without a registered source
    /// is a silent no-op; re-resolving a resolved field is a no-op.
    pub fn initialize(&self, field: Option<&str>) -> Result<()> {
        match field {
            Some(field) => self.initialize_field(field),
            None => {
                let declared: Vec<String> =
                    self.class.lazy_fields().map(str::to_owned).collect();
                for field in declared {
                    self.initialize_field(&field)?;
                }
                Ok(())
            }
        }
    }

    fn initialize_field(&self, field: &str) -> Result<()> {
        if self.is_resolved(field) {
            return Ok(());
        }
        let class = self.class.clone();
        let Some(source) = class.source(field) else {
            return Ok(());
        };
        // Marked up front so a resolver reading its own field terminates;
        // rolled back if the resolver fails.
        self.mark_resolved(field);
        let outcome = self.run_source(field, source);
        if outcome.is_err() {
            self.clear_resolved(field);
        }
        outcome
    }

    fn run_source(&self, field: &str, source: &LazySource) -> Result<()> {
        match source {
            LazySource::Plain(resolver) | LazySource::Join(resolver) => {
                match resolver(self)? {
                    Value::Null => {}
                    Value::Record(incoming) => {
                        self.record.borrow_mut().merge_missing(&incoming);
                    }
                    other => {
                        return Err(DataError::new(format!(
                            "resolver for `{field}` produced {other} where a record was expected"
                        ))
                        .into());
                    }
                }
                Ok(())
            }
            LazySource::Cascade(resolver) => {
                let resolved = resolver(self)?;
                self.record.borrow_mut().set(field, resolved);
                Ok(())
            }
            LazySource::CascadeMany { .. } => {
                let owner = self.flags.borrow().owner.clone();
                let Some(inner) = owner.as_ref().and_then(Weak::upgrade) else {
                    return Err(ConfigurationError::new(format!(
                        "field `{field}` cascades over a collection, but the entity is not owned by one"
                    ))
                    .into());
                };
                Collection::from_inner(inner).populate(field)
            }
        }
    }

    /// Runs the declared validator rules (all of them, or only those for
    /// the given fields) against current field values. Returns the overall
    /// outcome; per-field failure messages accumulate and are retrievable
    /// via [`messages`](Self::messages). A missing validator resolver or an
    /// unknown validator name is a [`ConfigurationError`].
    pub fn is_valid(&self, fields: Option<&[&str]>) -> Result<bool> {
        let Some(resolver) = self.validators.as_ref() else {
            return Err(ConfigurationError::new("no validator resolver attached").into());
        };
        self.flags.borrow_mut().messages.clear();
        let mut pass = true;
        for rule in self.class.rules() {
            if let Some(wanted) = fields
                && !wanted.contains(&rule.field.as_str())
            {
                continue;
            }
            let validator = if rule.args.is_empty() {
                resolver.by_name(&rule.name)
            } else {
                resolver.by_name_and_args(&rule.name, &rule.args)
            };
            let Some(validator) = validator else {
                return Err(ConfigurationError::new(format!(
                    "validator `{}` declared for field `{}` is not available",
                    rule.name, rule.field
                ))
                .into());
            };
            let value = self
                .record
                .borrow()
                .get(&rule.field)
                .cloned()
                .unwrap_or(Value::Null);
            if !validator.is_valid(&value) {
                pass = false;
                self.flags
                    .borrow_mut()
                    .messages
                    .entry(rule.field.clone())
                    .or_default()
                    .extend(validator.messages());
            }
        }
        Ok(pass)
    }

    /// Per-field failure messages accumulated by the last
    /// [`is_valid`](Self::is_valid) run.
    pub fn messages(&self) -> IndexMap<String, Vec<String>> {
        self.flags.borrow().messages.clone()
    }

    pub fn save(&self) -> Result<bool> {
        let Some(delegate) = self.delegate.as_ref() else {
            return Err(ConfigurationError::new("no persistence delegate attached").into());
        };
        delegate.save(self)
    }

    pub fn remove(&self) -> Result<bool> {
        let Some(delegate) = self.delegate.as_ref() else {
            return Err(ConfigurationError::new("no persistence delegate attached").into());
        };
        delegate.remove(self)
    }

    pub fn force_insert(&self) -> bool {
        self.flags.borrow().force_insert
    }

    pub fn set_force_insert(&self, force: bool) {
        self.flags.borrow_mut().force_insert = force;
    }

    /// The auxiliary side-record carrying hints (join key names and the
    /// like) between a resolver result and the collection consuming it.
    pub fn meta(&self) -> Option<Record> {
        self.flags.borrow().meta.clone()
    }

    pub fn set_meta(&self, meta: Record) {
        self.flags.borrow_mut().meta = Some(meta);
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("class", &self.class.name())
            .field("record", &self.record.borrow())
            .finish()
    }
}
