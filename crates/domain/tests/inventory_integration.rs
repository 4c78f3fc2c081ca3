//! Integration tests for the inventory item aggregate.
//!
//! These tests drive the service over an in-memory store and check what
//! actually lands in the event log.

use common::AggregateId;
use domain::{
    Aggregate, AggregateRepository, CheckInItems, Command, CreateInventoryItem,
    DeactivateInventoryItem, DomainError, InventoryError, InventoryEvent, InventoryItem,
    InventoryService, RemoveItems, RenameInventoryItem,
};
use event_store::{EventStore, EventStoreExt, EventStoreToken, InMemoryEventStore, Version};

fn create_service() -> (InventoryService<InMemoryEventStore>, InMemoryEventStore) {
    let store = InMemoryEventStore::new();
    (InventoryService::new(store.clone()), store)
}

mod item_lifecycle {
    use super::*;

    #[tokio::test]
    async fn full_lifecycle() {
        let (service, store) = create_service();

        let cmd = CreateInventoryItem::named("Widget");
        let item_id = cmd.item_id;
        let stream = cmd.stream_name();
        let result = service.create_item(cmd).await.unwrap();
        assert_eq!(result.new_version, Version::first());
        assert_eq!(result.aggregate.id(), Some(item_id));

        service
            .check_in(CheckInItems::new(item_id, 10))
            .await
            .unwrap();
        service
            .remove(RemoveItems::new(item_id, 4))
            .await
            .unwrap();
        let result = service
            .rename_item(RenameInventoryItem::new(item_id, "Gadget"))
            .await
            .unwrap();
        assert_eq!(result.new_version, Version::new(4));

        let item = service.get_item(item_id).await.unwrap();
        assert_eq!(item.name(), "Gadget");
        assert_eq!(item.count(), 6);
        assert!(item.is_active());

        service
            .deactivate(DeactivateInventoryItem::new(item_id))
            .await
            .unwrap();
        let item = service.get_item(item_id).await.unwrap();
        assert!(!item.is_active());
        assert_eq!(item.version(), Version::new(5));

        assert_eq!(stream, format!("InventoryItem-{item_id}"));
        let types: Vec<String> = store
            .read_stream_to_end(&stream, false)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                "InventoryItemCreated",
                "ItemsCheckedIn",
                "ItemsRemoved",
                "InventoryItemRenamed",
                "InventoryItemDeactivated",
            ]
        );
    }

    #[tokio::test]
    async fn no_op_rename_appends_nothing() {
        let (service, store) = create_service();
        let cmd = CreateInventoryItem::named("Widget");
        let item_id = cmd.item_id;
        service.create_item(cmd).await.unwrap();

        let result = service
            .rename_item(RenameInventoryItem::new(item_id, "Widget"))
            .await
            .unwrap();
        assert!(result.is_noop());
        assert_eq!(result.new_version, Version::first());
        assert_eq!(store.event_count().await, 1);
    }
}

mod business_rules {
    use super::*;

    #[tokio::test]
    async fn rejected_command_appends_nothing() {
        let (service, store) = create_service();
        let cmd = CreateInventoryItem::named("Widget");
        let item_id = cmd.item_id;
        service.create_item(cmd).await.unwrap();

        let err = service
            .remove(RemoveItems::new(item_id, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Inventory(InventoryError::InsufficientStock {
                available: 0,
                requested: 1
            })
        ));
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn commands_on_unknown_item_fail() {
        let (service, store) = create_service();
        let err = service
            .check_in(CheckInItems::new(AggregateId::new(), 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Inventory(InventoryError::NotCreated)
        ));
        assert_eq!(store.event_count().await, 0);

        let err = service.get_item(AggregateId::new()).await.unwrap_err();
        assert!(matches!(err, DomainError::AggregateNotFound { .. }));
    }

    #[tokio::test]
    async fn creating_same_id_twice_fails() {
        let (service, _) = create_service();
        let cmd = CreateInventoryItem::named("Widget");
        service.create_item(cmd.clone()).await.unwrap();

        let err = service.create_item(cmd).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::Inventory(InventoryError::AlreadyCreated)
        ));
    }
}

mod concurrency {
    use super::*;

    #[tokio::test]
    async fn concurrent_modifications_detected() {
        let store = InMemoryEventStore::new();
        let repo: AggregateRepository<_, InventoryItem> = AggregateRepository::new(store.clone());
        let service = InventoryService::new(store.clone());

        let cmd = CreateInventoryItem::named("Widget");
        let item_id = cmd.item_id;
        service.create_item(cmd).await.unwrap();

        // Two writers load the same version
        let mut first = repo.get(item_id).await.unwrap();
        let mut second = repo.get(item_id).await.unwrap();

        let events = first.state().check_in(5).unwrap();
        first.record(events);
        repo.save(&mut first).await.unwrap();

        let events = second.state().check_in(7).unwrap();
        second.record(events);
        let err = repo.save(&mut second).await.unwrap_err();
        assert!(err.is_concurrency_conflict());

        // The loser retries with fresh state
        let mut retry = repo.get(item_id).await.unwrap();
        let events = retry.state().check_in(7).unwrap();
        retry.record(events);
        assert_eq!(repo.save(&mut retry).await.unwrap(), Version::new(3));
        assert_eq!(service.get_item(item_id).await.unwrap().count(), 12);
    }

    #[tokio::test]
    async fn events_get_global_tokens_across_items() {
        let (service, store) = create_service();
        let a = CreateInventoryItem::named("A");
        let b = CreateInventoryItem::named("B");
        let (a_id, b_id) = (a.item_id, b.item_id);

        service.create_item(a).await.unwrap();
        service.create_item(b).await.unwrap();
        service.check_in(CheckInItems::new(a_id, 1)).await.unwrap();
        service.check_in(CheckInItems::new(b_id, 2)).await.unwrap();

        let page = store
            .get_all_events(EventStoreToken::Initial, 100, true)
            .await
            .unwrap();
        let tokens: Vec<_> = page.events.iter().map(|e| e.token).collect();
        assert_eq!(
            tokens,
            (1..=4).map(EventStoreToken::Position).collect::<Vec<_>>()
        );

        let decoded: InventoryEvent = page.events[3].json_body().unwrap();
        assert_eq!(decoded, InventoryEvent::items_checked_in(2));
    }
}
