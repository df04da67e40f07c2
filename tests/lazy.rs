#[cfg(test)]
mod tests {
    use rowset::{
        AsValue, Collection, ConfigurationError, DataError, Entity, EntityClass, EntityIter, Key,
        META_JOIN, META_ON_FIELD, META_SOURCE_FIELD, PersistenceDelegate, Primary, Validator,
        ValidatorResolver, Value, VecRecords, record,
    };
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn plain_source_is_implicitly_merged() {
        let class = EntityClass::new("customer")
            .with_source("profile", |_| {
                Ok(Value::Record(
                    record! { "city" => "Oslo", "name" => "from-resolver" },
                ))
            })
            .into_rc();
        let entity = Entity::from_record(class, record! { "name" => "A" });
        entity.initialize(None).unwrap();
        assert_eq!(entity.get("city"), Some(Value::from("Oslo")));
        // existing fields take precedence over resolver output
        assert_eq!(entity.get("name"), Some(Value::from("A")));
        assert!(entity.is_resolved("profile"));
    }

    #[test]
    fn resolution_runs_once_per_field() {
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        let class = EntityClass::new("customer")
            .with_cascade("address", move |_| {
                *counter.borrow_mut() += 1;
                Ok(Value::Record(record! { "street" => "Main" }))
            })
            .into_rc();
        let entity = Entity::from_record(class, record! { "id" => 1 });
        assert_eq!(
            entity.get("address"),
            Some(Value::Record(record! { "street" => "Main" }))
        );
        entity.initialize(Some("address")).unwrap();
        entity.initialize(None).unwrap();
        assert_eq!(*calls.borrow(), 1);

        // removing the field does not clear the marker...
        entity.unset("address");
        assert_eq!(entity.get("address"), None);
        assert_eq!(*calls.borrow(), 1);
        // ...clearing it explicitly does
        entity.clear_resolved("address");
        assert!(entity.get("address").is_some());
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn undeclared_fields_resolve_to_nothing() {
        let class = EntityClass::new("customer").into_rc();
        let entity = Entity::from_record(class, record! { "id" => 1 });
        assert_eq!(entity.get("phantom"), None);
        entity.initialize(Some("phantom")).unwrap();
    }

    #[test]
    fn resolver_failures_surface_through_initialize_only() {
        let class = EntityClass::new("customer")
            .with_cascade("boom", |_| Err(DataError::new("backend gone").into()))
            .into_rc();
        let entity = Entity::from_record(class, record! { "id" => 1 });
        assert_eq!(entity.get("boom"), None);
        assert!(entity.initialize(Some("boom")).is_err());
        // a failed resolution is not marked resolved
        assert!(!entity.is_resolved("boom"));
    }

    #[test]
    fn join_mode_resolver_must_produce_a_record() {
        let class = EntityClass::new("customer")
            .with_join("extra", |_| Ok(Value::from(5)))
            .into_rc();
        let entity = Entity::from_record(class, record! { "id" => 1 });
        let error = entity.initialize(Some("extra")).unwrap_err();
        assert!(error.is::<DataError>());
    }

    #[test]
    fn cascade_many_outside_a_collection_is_a_configuration_error() {
        let class = EntityClass::new("customer")
            .with_many("orders", None, |_| Ok(Value::Null))
            .into_rc();
        let entity = Entity::from_record(class, record! { "id" => 1 });
        let error = entity.initialize(Some("orders")).unwrap_err();
        assert!(error.is::<ConfigurationError>());
    }

    #[test]
    fn cascade_many_groups_children_per_parent() {
        let class = EntityClass::new("customer")
            .with_many("orders", Some("customer_id"), |_| {
                let children = Collection::factory(
                    [
                        record! { "customer_id" => 1, "sku" => "a" },
                        record! { "customer_id" => 1, "sku" => "b" },
                        record! { "customer_id" => 2, "sku" => "c" },
                    ],
                    EntityClass::new("order").into_rc(),
                    Primary::None,
                )?;
                Ok(Value::from(children))
            })
            .into_rc();
        let customers = Collection::factory(
            [record! { "id" => 1 }, record! { "id" => 2 }],
            class,
            Primary::Field("id".into()),
        )
        .unwrap();

        let first = customers.get_item(1).unwrap();
        let Some(Value::Collection(orders)) = first.get("orders") else {
            panic!("expected a populated sub-collection");
        };
        assert_eq!(orders.len(), 2);
        assert_eq!(
            orders.column_values("sku", false),
            vec![Value::from("a"), Value::from("b")]
        );

        // the whole collection was populated in one pass; the second entity
        // reads its sub-collection straight from the record
        let second = customers.get_item(2).unwrap();
        let Some(Value::Collection(orders)) = second.get("orders") else {
            panic!("expected a populated sub-collection");
        };
        assert_eq!(orders.column_values("sku", false), vec![Value::from("c")]);
    }

    #[test]
    fn cascade_many_join_hint_widens_parent_records() {
        let class = EntityClass::new("customer")
            .with_many("tiers", None, |_| {
                let tiers = Collection::factory(
                    [
                        record! { "customer_id" => 1, "tier" => "gold" },
                        record! { "customer_id" => 2, "tier" => "silver" },
                    ],
                    EntityClass::new("tier").into_rc(),
                    Primary::None,
                )?;
                tiers.set_meta(record! {
                    META_ON_FIELD => "id",
                    META_SOURCE_FIELD => "customer_id",
                    META_JOIN => true,
                });
                Ok(Value::from(tiers))
            })
            .into_rc();
        let customers = Collection::factory(
            [record! { "id" => 1 }, record! { "id" => 2 }],
            class,
            Primary::Field("id".into()),
        )
        .unwrap();
        customers.populate("tiers").unwrap();
        assert_eq!(
            customers.get_item(1).unwrap().get("tier"),
            Some(Value::from("gold"))
        );
        assert_eq!(
            customers.get_item(2).unwrap().get("tier"),
            Some(Value::from("silver"))
        );
    }

    #[test]
    fn cascade_many_resolver_must_produce_a_collection() {
        let class = EntityClass::new("customer")
            .with_many("orders", Some("customer_id"), |_| Ok(Value::from(5)))
            .into_rc();
        let customers = Collection::factory(
            [record! { "id" => 1 }],
            class,
            Primary::Field("id".into()),
        )
        .unwrap();
        let error = customers.populate("orders").unwrap_err();
        assert!(error.is::<DataError>());
    }

    #[test]
    fn cascade_many_without_a_determinable_join_field_fails() {
        let class = EntityClass::new("row")
            .with_many("children", None, |_| {
                Ok(Value::from(
                    Collection::factory(
                        [record! { "k" => 1 }],
                        EntityClass::new("child").into_rc(),
                        Primary::None,
                    )
                    .unwrap(),
                ))
            })
            .into_rc();
        // no primary, no metadata hints, no override
        let rows = Collection::factory([record! { "k" => 1 }], class, Primary::None).unwrap();
        let error = rows.populate("children").unwrap_err();
        assert!(error.is::<ConfigurationError>());
    }

    struct NotEmpty;

    impl Validator for NotEmpty {
        fn is_valid(&self, value: &Value) -> bool {
            matches!(value, Value::Varchar(Some(text)) if !text.is_empty())
        }
        fn messages(&self) -> Vec<String> {
            vec!["value must not be empty".into()]
        }
    }

    struct MinLength(usize);

    impl Validator for MinLength {
        fn is_valid(&self, value: &Value) -> bool {
            matches!(value, Value::Varchar(Some(text)) if text.len() >= self.0)
        }
        fn messages(&self) -> Vec<String> {
            vec![format!("value must be at least {} characters", self.0)]
        }
    }

    struct Registry;

    impl ValidatorResolver for Registry {
        fn by_name(&self, name: &str) -> Option<Rc<dyn Validator>> {
            match name {
                "not_empty" => Some(Rc::new(NotEmpty)),
                _ => None,
            }
        }
        fn by_name_and_args(&self, name: &str, args: &[Value]) -> Option<Rc<dyn Validator>> {
            match (name, args) {
                ("min_length", [Value::Int64(Some(min))]) => {
                    Some(Rc::new(MinLength(*min as usize)))
                }
                _ => None,
            }
        }
    }

    fn validated_class() -> Rc<EntityClass> {
        EntityClass::new("customer")
            .with_rule("name", "not_empty", vec![])
            .with_rule("name", "min_length", vec![Value::from(3i64)])
            .into_rc()
    }

    #[test]
    fn validation_accumulates_per_field_messages() {
        let entity = Entity::from_record(validated_class(), record! { "name" => "ab" })
            .with_validators(Rc::new(Registry));
        assert_eq!(entity.is_valid(None).unwrap(), false);
        let messages = entity.messages();
        assert_eq!(messages["name"].len(), 1);

        entity.set("name", "abcdef");
        assert_eq!(entity.is_valid(None).unwrap(), true);
        assert!(entity.messages().is_empty());

        // restricting to other fields skips the failing rule
        entity.set("name", "");
        assert_eq!(entity.is_valid(Some(&["city"])).unwrap(), true);
    }

    #[test]
    fn missing_validator_wiring_is_a_configuration_error() {
        let entity = Entity::from_record(validated_class(), record! { "name" => "ok" });
        let error = entity.is_valid(None).unwrap_err();
        assert!(error.is::<ConfigurationError>());

        let unknown = EntityClass::new("customer")
            .with_rule("name", "no_such_validator", vec![])
            .into_rc();
        let entity =
            Entity::from_record(unknown, record! { "name" => "ok" }).with_validators(Rc::new(Registry));
        let error = entity.is_valid(None).unwrap_err();
        assert!(error.is::<ConfigurationError>());
    }

    struct Journal {
        saved: RefCell<Vec<String>>,
        removed: RefCell<Vec<String>>,
    }

    impl PersistenceDelegate for Journal {
        fn save(&self, entity: &Entity) -> rowset::Result<bool> {
            let name = String::try_from_value(entity.get("name").unwrap_or(Value::Null))?;
            self.saved.borrow_mut().push(name);
            Ok(true)
        }
        fn remove(&self, entity: &Entity) -> rowset::Result<bool> {
            let name = String::try_from_value(entity.get("name").unwrap_or(Value::Null))?;
            self.removed.borrow_mut().push(name);
            Ok(true)
        }
    }

    #[test]
    fn persistence_is_delegated() {
        let journal = Rc::new(Journal {
            saved: RefCell::new(Vec::new()),
            removed: RefCell::new(Vec::new()),
        });
        let class = EntityClass::new("customer").into_rc();
        let entity = Entity::from_record(class.clone(), record! { "name" => "A" })
            .with_delegate(journal.clone());
        assert!(entity.save().unwrap());
        assert!(entity.remove().unwrap());
        assert_eq!(*journal.saved.borrow(), vec!["A".to_string()]);
        assert_eq!(*journal.removed.borrow(), vec!["A".to_string()]);

        let detached = Entity::from_record(class, record! { "name" => "B" });
        let error = detached.save().unwrap_err();
        assert!(error.is::<ConfigurationError>());
    }

    #[test]
    fn collection_attaches_its_delegate_when_wrapping() {
        let journal = Rc::new(Journal {
            saved: RefCell::new(Vec::new()),
            removed: RefCell::new(Vec::new()),
        });
        let customers = Collection::factory(
            [record! { "id" => 1, "name" => "A" }],
            EntityClass::new("customer").into_rc(),
            Primary::Field("id".into()),
        )
        .unwrap()
        .with_delegate(journal.clone());
        assert!(customers.get_item(1).unwrap().save().unwrap());
        assert_eq!(*journal.saved.borrow(), vec!["A".to_string()]);
    }

    #[test]
    fn entity_iter_is_lazy_and_restartable() {
        let class = EntityClass::new("customer").into_rc();
        let mut records = EntityIter::new(
            VecRecords::new(vec![
                record! { "id" => 1 },
                record! { "id" => 2 },
                record! { "id" => 3 },
            ]),
            class,
        );
        assert_eq!(EntityIter::count(&records), Some(3));
        assert!(records.valid());
        assert_eq!(records.position(), 0);

        // a fresh entity over the same raw record on every call
        let first = records.current().unwrap();
        let again = records.current().unwrap();
        assert!(!Rc::ptr_eq(&first.linked_data(), &again.linked_data()));
        assert_eq!(first.get("id"), again.get("id"));

        records.advance();
        assert_eq!(records.position(), 1);
        // draining starts from the current position, not the beginning
        let rest = records.drain_to_records();
        assert_eq!(rest.len(), 2);
        assert!(!records.valid());

        records.restart().unwrap();
        let all = records
            .drain_to_collection(Primary::Field("id".into()))
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.keys(), vec![Key::Int(1), Key::Int(2), Key::Int(3)]);
    }

    #[test]
    fn entity_iter_drives_for_loops() {
        let class = EntityClass::new("customer").into_rc();
        let records = EntityIter::new(
            VecRecords::new(vec![record! { "id" => 1 }, record! { "id" => 2 }]),
            class,
        );
        let ids: Vec<_> = records
            .map(|entity| entity.get("id").unwrap())
            .collect();
        assert_eq!(ids, vec![Value::from(1), Value::from(2)]);
    }
}
