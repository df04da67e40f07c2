#[cfg(test)]
mod tests {
    use rowset::{
        Collection, ConfigurationError, EntityClass, Key, Primary, Value, record,
    };
    use std::rc::Rc;

    fn class(name: &str) -> Rc<EntityClass> {
        EntityClass::new(name).into_rc()
    }

    fn orders() -> Collection {
        Collection::factory(
            [
                record! { "order_id" => 10, "customer_id" => 1, "status" => "open" },
                record! { "order_id" => 11, "customer_id" => 2, "status" => "open" },
                record! { "order_id" => 12, "customer_id" => 9, "status" => "open" },
            ],
            class("order"),
            Primary::Field("order_id".into()),
        )
        .unwrap()
    }

    fn customers() -> Collection {
        Collection::factory(
            [
                record! { "customer_id" => 1, "name" => "A", "status" => "vip" },
                record! { "customer_id" => 2, "name" => "B", "status" => "vip" },
            ],
            class("customer"),
            Primary::Field("customer_id".into()),
        )
        .unwrap()
    }

    #[test]
    fn join_merges_matching_records_existing_fields_win() {
        let orders = orders();
        orders.join(&customers(), "customer_id", None).unwrap();
        let first = orders.get_item(10).unwrap();
        assert_eq!(first.get("name"), Some(Value::from("A")));
        // "status" already existed on the order: untouched
        assert_eq!(first.get("status"), Some(Value::from("open")));
        // order 12 has no matching customer: unchanged
        assert_eq!(orders.get_item(12).unwrap().get("name"), None);
    }

    #[test]
    fn join_is_idempotent() {
        let orders = orders();
        let source = customers();
        orders.join(&source, "customer_id", None).unwrap();
        let snapshot = orders.to_array_deep();
        orders.join(&source, "customer_id", None).unwrap();
        assert_eq!(orders.to_array_deep(), snapshot);
    }

    #[test]
    fn join_reindexes_the_source_on_a_private_copy() {
        let orders = orders();
        let people = Collection::factory(
            [
                record! { "person_id" => 50, "customer_id" => 1, "name" => "A" },
                record! { "person_id" => 51, "customer_id" => 2, "name" => "B" },
            ],
            class("person"),
            Primary::Field("person_id".into()),
        )
        .unwrap();
        orders.join(&people, "customer_id", None).unwrap();
        assert_eq!(
            orders.get_item(10).unwrap().get("name"),
            Some(Value::from("A"))
        );
        // the caller's source keeps its own primary and keys
        assert_eq!(people.primary(), Primary::Field("person_id".into()));
        assert_eq!(people.keys(), vec![Key::Int(50), Key::Int(51)]);
    }

    #[test]
    fn join_with_differing_field_names() {
        let orders = orders();
        let accounts = Collection::factory(
            [record! { "account" => 1, "balance" => 100 }],
            class("account"),
            Primary::Field("account".into()),
        )
        .unwrap();
        orders
            .join(&accounts, "customer_id", Some("account"))
            .unwrap();
        assert_eq!(
            orders.get_item(10).unwrap().get("balance"),
            Some(Value::from(100))
        );
        assert_eq!(orders.get_item(11).unwrap().get("balance"), None);
    }

    #[test]
    fn join_with_empty_source_is_a_no_op() {
        let orders = orders();
        let snapshot = orders.to_array_deep();
        orders
            .join(&Collection::new(class("customer")), "customer_id", None)
            .unwrap();
        assert_eq!(orders.to_array_deep(), snapshot);
    }

    #[test]
    fn merge_without_primary_is_count_additive() {
        let left = Collection::new(class("row"));
        left.add_item(record! { "v" => 1 }).unwrap();
        left.add_item(record! { "v" => 2 }).unwrap();
        let right = Collection::new(class("row"));
        right.add_item(record! { "v" => 3 }).unwrap();
        left.merge(&right).unwrap();
        assert_eq!(left.len(), 3);
        assert_eq!(left.keys(), vec![Key::Int(0), Key::Int(1), Key::Int(2)]);
    }

    #[test]
    fn merge_with_primary_keeps_existing_values() {
        let left = customers();
        let right = Collection::factory(
            [
                record! { "customer_id" => 2, "name" => "B-updated" },
                record! { "customer_id" => 3, "name" => "C" },
            ],
            class("customer"),
            Primary::Field("customer_id".into()),
        )
        .unwrap();
        left.merge(&right).unwrap();
        assert_eq!(left.len(), 3);
        // collision: this collection's value wins
        assert_eq!(
            left.get_item(2).unwrap().get("name"),
            Some(Value::from("B"))
        );
        assert_eq!(
            left.get_item(3).unwrap().get("name"),
            Some(Value::from("C"))
        );
        assert_eq!(left.keys(), vec![Key::Int(1), Key::Int(2), Key::Int(3)]);
    }

    #[test]
    fn merge_source_lacking_a_component_is_a_configuration_error() {
        let left = customers();
        let right = Collection::new(class("customer"));
        right.add_item(record! { "name" => "no key" }).unwrap();
        let error = left.merge(&right).unwrap_err();
        assert!(error.is::<ConfigurationError>());
    }

    #[test]
    fn composite_primary_indexes_by_hashed_tuple() {
        let rows = Collection::factory(
            [
                record! { "a" => 1, "b" => 2, "name" => "first" },
                record! { "a" => 1, "b" => 3, "name" => "second" },
            ],
            class("row"),
            Primary::Composite(vec!["a".into(), "b".into()]),
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        for key in rows.keys() {
            assert!(matches!(key, Key::Composite(_)));
        }
        // identical tuples address the same entry across collections
        let probe = Key::composite([&Value::from(1), &Value::from(2)]).unwrap();
        assert_eq!(
            rows.get_item(probe).unwrap().get("name"),
            Some(Value::from("first"))
        );
    }

    #[test]
    fn composite_key_collision_is_last_write_wins() {
        let _ = env_logger::builder().is_test(true).try_init();
        let rows = Collection::factory(
            [
                record! { "a" => 1, "b" => 2, "name" => "X" },
                record! { "a" => 1, "b" => 2, "name" => "Y" },
            ],
            class("row"),
            Primary::None,
        )
        .unwrap();
        rows.set_primary(Primary::Composite(vec!["a".into(), "b".into()]))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.keys().len(), 1);
        assert_eq!(
            rows.first_item().unwrap().get("name"),
            Some(Value::from("Y"))
        );
    }

    #[test]
    fn set_primary_missing_component_is_a_configuration_error() {
        let rows = Collection::new(class("row"));
        rows.add_item(record! { "a" => 1 }).unwrap();
        let error = rows
            .set_primary(Primary::Composite(vec!["a".into(), "b".into()]))
            .unwrap_err();
        assert!(error.is::<ConfigurationError>());
        // failed re-index leaves the collection untouched
        assert_eq!(rows.keys(), vec![Key::Int(0)]);
        assert_eq!(rows.primary(), Primary::None);
    }

    #[test]
    fn edits_after_indexing_do_not_rekey() {
        let rows = customers();
        let entity = rows.get_item(1).unwrap();
        entity.set("customer_id", 77);
        // still addressed by the key computed when it was added
        assert_eq!(rows.keys(), vec![Key::Int(1), Key::Int(2)]);
        assert_eq!(
            rows.get_item(1).unwrap().get("customer_id"),
            Some(Value::from(77))
        );
    }
}
