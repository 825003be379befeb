//! Property-based tests for the synchronized collection

use contact_sync::{ChangeEvent, ContactFilter, ContactRecord, ContactType, SynchronizedCollection};
use proptest::prelude::*;
use std::collections::HashSet;

use crate::common::{contact, only};

fn arb_type() -> impl Strategy<Value = ContactType> {
    prop::sample::select(vec![ContactType::Lead, ContactType::Client, ContactType::Partner])
}

fn arb_id() -> impl Strategy<Value = String> {
    (0u8..6).prop_map(|n| format!("c{}", n))
}

fn arb_record() -> impl Strategy<Value = ContactRecord> {
    (arb_id(), arb_type(), 0i64..40).prop_map(|(id, contact_type, secs)| contact(&id, contact_type, secs))
}

fn arb_event() -> impl Strategy<Value = ChangeEvent> {
    prop_oneof![
        arb_record().prop_map(ChangeEvent::Inserted),
        arb_record().prop_map(ChangeEvent::Updated),
        arb_id().prop_map(ChangeEvent::Deleted),
    ]
}

fn arb_filter() -> impl Strategy<Value = ContactFilter> {
    prop_oneof![Just(ContactFilter::all()), arb_type().prop_map(only)]
}

fn check_invariants(collection: &SynchronizedCollection) -> Result<(), TestCaseError> {
    let snapshot = collection.snapshot();
    let mut seen = HashSet::new();
    for record in &snapshot {
        prop_assert!(collection.filter().matches(record), "{} out of scope", record.id);
        prop_assert!(seen.insert(record.id.clone()), "duplicate id {}", record.id);
    }
    for pair in snapshot.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        prop_assert!(a.updated_at > b.updated_at || (a.updated_at == b.updated_at && a.id < b.id));
    }
    prop_assert_eq!(snapshot.len(), collection.size());
    Ok(())
}

proptest! {
    #[test]
    fn test_seed_is_idempotent(filter in arb_filter(), records in prop::collection::vec(arb_record(), 0..20)) {
        let mut once = SynchronizedCollection::new(filter.clone());
        once.seed(records.clone());

        let mut twice = SynchronizedCollection::new(filter);
        twice.seed(records.clone());
        twice.seed(records);

        prop_assert_eq!(once.snapshot(), twice.snapshot());
    }

    #[test]
    fn test_invariants_hold_after_any_events(
        filter in arb_filter(),
        seed in prop::collection::vec(arb_record(), 0..10),
        events in prop::collection::vec(arb_event(), 0..40),
    ) {
        let mut collection = SynchronizedCollection::new(filter);
        collection.seed(seed);
        check_invariants(&collection)?;

        for event in events {
            collection.apply_event(event).unwrap();
            check_invariants(&collection)?;
        }
    }

    #[test]
    fn test_last_writer_wins_regardless_of_arrival(stamps in prop::collection::vec(0i64..100, 1..20)) {
        let mut collection = SynchronizedCollection::new(ContactFilter::all());
        for secs in &stamps {
            let record = contact("c0", ContactType::Lead, *secs);
            collection.apply_event(ChangeEvent::Updated(record)).unwrap();
        }

        let newest = stamps.iter().copied().max().unwrap();
        prop_assert_eq!(collection.get("c0").map(|r| r.updated_at.timestamp()), Some(newest));
    }

    #[test]
    fn test_insert_behaves_like_update(
        filter in arb_filter(),
        records in prop::collection::vec(arb_record(), 0..30),
    ) {
        let mut inserted = SynchronizedCollection::new(filter.clone());
        let mut updated = SynchronizedCollection::new(filter);
        for record in records {
            let a = inserted.apply_event(ChangeEvent::Inserted(record.clone())).unwrap();
            let b = updated.apply_event(ChangeEvent::Updated(record)).unwrap();
            prop_assert_eq!(a, b);
        }
        prop_assert_eq!(inserted.snapshot(), updated.snapshot());
    }

    #[test]
    fn test_delete_wins_over_older_updates(deleted_at in 0i64..50, late in 0i64..50) {
        prop_assume!(late <= deleted_at);
        let mut collection = SynchronizedCollection::new(ContactFilter::all());
        collection.seed(vec![contact("c0", ContactType::Lead, deleted_at)]);

        collection.apply_event(ChangeEvent::Deleted("c0".to_string())).unwrap();
        collection
            .apply_event(ChangeEvent::Updated(contact("c0", ContactType::Lead, late)))
            .unwrap();

        prop_assert!(!collection.contains("c0"));
    }

    #[test]
    fn test_reconcile_without_new_writes_equals_seed(
        filter in arb_filter(),
        earlier in prop::collection::vec(arb_event(), 0..20),
        records in prop::collection::vec(arb_record(), 0..20),
    ) {
        // Fetched rows are newer than anything applied before the fetch.
        let records: Vec<ContactRecord> = records
            .into_iter()
            .map(|mut record| {
                record.updated_at += chrono::Duration::seconds(100);
                record
            })
            .collect();
        let mut seeded = SynchronizedCollection::new(filter.clone());
        seeded.seed(records.clone());

        let mut reconciled = SynchronizedCollection::new(filter);
        for event in earlier {
            reconciled.apply_event(event).unwrap();
        }
        let since = reconciled.generation();
        reconciled.reconcile(records, since);

        prop_assert_eq!(seeded.snapshot(), reconciled.snapshot());
    }
}
