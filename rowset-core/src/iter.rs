//! Lazy entity iteration over external record sources.
//!
//! A [`RecordSource`] is a forward-only cursor owned by someone else (a
//! store scan, a decoded batch, a test vector). [`EntityIter`] adapts it
//! into a sequence of entities one record at a time, without buffering:
//!
//! 1. [`RecordSource`] — the raw cursor: valid / current / advance /
//!    restart / position
//! 2. [`EntityIter`] — wraps each current record into a fresh [`Entity`]
//! 3. [`EntityIter::drain_to_collection`] — explicit materialization step

use crate::{
    Collection, Entity, EntityClass, PersistenceDelegate, Primary, Record, Result,
    ServiceLocator, ValidatorResolver,
};
use std::rc::Rc;

/// Forward-only external record sequence.
///
/// `restart` is only honored by sources that can actually rewind; others
/// return an error and the cursor stays where it was. `size` reports the
/// total number of records when the source knows it.
pub trait RecordSource {
    fn valid(&self) -> bool;
    fn current(&self) -> Option<&Record>;
    fn advance(&mut self);
    fn restart(&mut self) -> Result<()>;
    fn position(&self) -> usize;
    fn size(&self) -> Option<usize> {
        None
    }
}

/// In-memory finite source over owned records. Restartable.
pub struct VecRecords {
    records: Vec<Record>,
    position: usize,
}

impl VecRecords {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            position: 0,
        }
    }
}

impl RecordSource for VecRecords {
    fn valid(&self) -> bool {
        self.position < self.records.len()
    }
    fn current(&self) -> Option<&Record> {
        self.records.get(self.position)
    }
    fn advance(&mut self) {
        self.position += 1;
    }
    fn restart(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
    fn position(&self) -> usize {
        self.position
    }
    fn size(&self) -> Option<usize> {
        Some(self.records.len())
    }
}

/// Lazy adapter turning a [`RecordSource`] into a sequence of entities.
///
/// Every [`current`](Self::current) call constructs a fresh entity over the
/// source's current raw record; nothing is cached, so two calls at the same
/// position hand out distinct entities over the same data.
pub struct EntityIter<S: RecordSource> {
    source: S,
    class: Rc<EntityClass>,
    delegate: Option<Rc<dyn PersistenceDelegate>>,
    locator: Option<Rc<dyn ServiceLocator>>,
    validators: Option<Rc<dyn ValidatorResolver>>,
}

impl<S: RecordSource> EntityIter<S> {
    pub fn new(source: S, class: Rc<EntityClass>) -> Self {
        Self {
            source,
            class,
            delegate: None,
            locator: None,
            validators: None,
        }
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

    pub fn valid(&self) -> bool {
        self.source.valid()
    }

    pub fn position(&self) -> usize {
        self.source.position()
    }

    pub fn advance(&mut self) {
        self.source.advance();
    }

    pub fn restart(&mut self) -> Result<()> {
        self.source.restart()
    }

    /// Total record count when the wrapped source reports one.
    pub fn count(&self) -> Option<usize> {
        self.source.size()
    }

    /// Fresh entity over the current raw record.
    pub fn current(&self) -> Option<Entity> {
        let record = self.source.current()?.clone();
        Some(self.make_entity(record))
    }

    fn make_entity(&self, record: Record) -> Entity {
        let mut entity = Entity::from_record(self.class.clone(), record);
        if let Some(delegate) = &self.delegate {
            entity = entity.with_delegate(delegate.clone());
        }
        if let Some(locator) = &self.locator {
            entity = entity.with_locator(locator.clone());
        }
        if let Some(validators) = &self.validators {
            entity = entity.with_validators(validators.clone());
        }
        entity
    }

    /// Consumes the remainder of the source (from the current position —
    /// restart first for a full read) into a collection. Only safe over
    /// finite sources.
    pub fn drain_to_collection(&mut self, primary: Primary) -> Result<Collection> {
        let collection = Collection::new(self.class.clone());
        collection.set_primary(primary)?;
        while self.source.valid() {
            let Some(record) = self.source.current().cloned() else {
                break;
            };
            collection.add_item(record)?;
            self.source.advance();
        }
        Ok(collection)
    }

    /// Consumes the remainder of the source into owned records.
    pub fn drain_to_records(&mut self) -> Vec<Record> {
        let mut records = match self.source.size() {
            Some(size) => Vec::with_capacity(size.saturating_sub(self.source.position())),
            None => Vec::new(),
        };
        while self.source.valid() {
            let Some(record) = self.source.current().cloned() else {
                break;
            };
            records.push(record);
            self.source.advance();
        }
        records
    }
}

impl<S: RecordSource> Iterator for EntityIter<S> {
    type Item = Entity;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.source.valid() {
            return None;
        }
        let entity = self.current();
        self.source.advance();
        entity
    }
}
