use crate::{Entity, Result, Value};
use std::{any::Any, rc::Rc};

/// Persistence collaborator an [`Entity`] delegates `save` / `remove` to.
/// The engine never implements this itself; whoever constructs entities
/// attaches one.
pub trait PersistenceDelegate {
    fn save(&self, entity: &Entity) -> Result<bool>;
    fn remove(&self, entity: &Entity) -> Result<bool>;
}

/// Named-service locator handed to entities so resolvers and validators can
/// reach surrounding services without the engine knowing their types.
pub trait ServiceLocator {
    fn get(&self, id: &str) -> Option<Rc<dyn Any>>;
    fn has(&self, id: &str) -> bool;
}

/// A single validation check. `messages` describes the most recent failure
/// in caller-presentable terms.
pub trait Validator {
    fn is_valid(&self, value: &Value) -> bool;
    fn messages(&self) -> Vec<String>;
}

/// Resolves declared validator names (optionally specialized by arguments)
/// to [`Validator`] instances. Attached to entities by their constructor;
/// validating without one is a configuration error.
pub trait ValidatorResolver {
    fn by_name(&self, name: &str) -> Option<Rc<dyn Validator>>;
    fn by_name_and_args(&self, name: &str, args: &[Value]) -> Option<Rc<dyn Validator>>;
}
