use crate::{Collection, Entity, Result, Value};
use indexmap::IndexMap;
use std::{fmt, rc::Rc};

/// Resolver producing one lazy field's value from the owning entity.
pub type FieldResolver = Rc<dyn Fn(&Entity) -> Result<Value>>;

/// Resolver producing a whole related set for a cascade-many field. Invoked
/// by the owning collection, never by a single entity, and expected to
/// return a [`Value::Collection`].
pub type SetResolver = Rc<dyn Fn(&Collection) -> Result<Value>>;

/// Registered source of one lazily resolved field.
///
/// `Plain` is the undeclared-mode form: the resolver's record is shallow
/// merged into the entity, exactly like `Join`. `Cascade` stores the
/// resolver result verbatim under the field. `CascadeMany` defers to the
/// owning collection, optionally overriding the source-side join field.
#[derive(Clone)]
pub enum LazySource {
    Plain(FieldResolver),
    Join(FieldResolver),
    Cascade(FieldResolver),
    CascadeMany {
        resolver: SetResolver,
        source_field: Option<String>,
    },
}

/// One declared validation rule: which validator checks which field, with
/// which arguments.
#[derive(Clone, Debug)]
pub struct ValidatorRule {
    pub field: String,
    pub name: String,
    pub args: Vec<Value>,
}

/// Explicit per-class registration table, built once at class definition
/// time: lazy field sources and validator rules. Collections use the class
/// when wrapping raw records into entities; swapping a collection's class
/// discards its wrapped-entity cache.
pub struct EntityClass {
    name: String,
    lazy: IndexMap<String, LazySource>,
    rules: Vec<ValidatorRule>,
}

impl EntityClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lazy: IndexMap::new(),
            rules: Vec::new(),
        }
    }

    /// Registers a conventionally resolved field: no declared mode, result
    /// implicitly merged.
    pub fn with_source(
        mut self,
        field: impl Into<String>,
        resolver: impl Fn(&Entity) -> Result<Value> + 'static,
    ) -> Self {
        self.lazy
            .insert(field.into(), LazySource::Plain(Rc::new(resolver)));
        self
    }

    pub fn with_join(
        mut self,
        field: impl Into<String>,
        resolver: impl Fn(&Entity) -> Result<Value> + 'static,
    ) -> Self {
        self.lazy
            .insert(field.into(), LazySource::Join(Rc::new(resolver)));
        self
    }

    pub fn with_cascade(
        mut self,
        field: impl Into<String>,
        resolver: impl Fn(&Entity) -> Result<Value> + 'static,
    ) -> Self {
        self.lazy
            .insert(field.into(), LazySource::Cascade(Rc::new(resolver)));
        self
    }

    pub fn with_many(
        mut self,
        field: impl Into<String>,
        source_field: Option<&str>,
        resolver: impl Fn(&Collection) -> Result<Value> + 'static,
    ) -> Self {
        self.lazy.insert(
            field.into(),
            LazySource::CascadeMany {
                resolver: Rc::new(resolver),
                source_field: source_field.map(str::to_owned),
            },
        );
        self
    }

    pub fn with_rule(
        mut self,
        field: impl Into<String>,
        validator: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        self.rules.push(ValidatorRule {
            field: field.into(),
            name: validator.into(),
            args,
        });
        self
    }

    pub fn into_rc(self) -> Rc<Self> {
        Rc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self, field: &str) -> Option<&LazySource> {
        self.lazy.get(field)
    }

    pub fn lazy_fields(&self) -> impl Iterator<Item = &str> {
        self.lazy.keys().map(String::as_str)
    }

    pub fn rules(&self) -> &[ValidatorRule] {
        &self.rules
    }
}

impl fmt::Debug for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityClass")
            .field("name", &self.name)
            .field("lazy", &self.lazy.keys().collect::<Vec<_>>())
            .field("rules", &self.rules.len())
            .finish()
    }
}
