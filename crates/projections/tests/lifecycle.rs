//! Projection lifecycle: master and rebuilder runs against an in-memory
//! store, registry and document store.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use common::CodeVersion;
use event_store::{
    DocumentStore, EventRecord, EventStoreExt, EventStoreToken, ExpectedVersion,
    InMemoryDocumentStore, InMemoryEventStore, StopHandle,
};
use projections::{
    CoordinatorOptions, Projection, ProjectionCoordinator, ProjectionReader, ProjectionRegistry,
    ProjectionStatus, ReaderSelector, Role, RunOutcome,
};

const STREAM: &str = "log";

/// Something a test projection does to its own run after applying an event.
#[derive(Clone)]
enum Interrupt {
    Cancel(Arc<dyn ProjectionRegistry>),
    Stop(StopHandle),
}

/// Appends `handler:body` for every event to a string document named after
/// the instance. A events go to handler 1, B events to handler 2.
struct ContentsProjection {
    documents: InMemoryDocumentStore,
    version: CodeVersion,
    instance: String,
    buffer: Vec<String>,
    calls: Arc<Mutex<Vec<String>>>,
    interrupt: Option<(String, Interrupt)>,
}

impl ContentsProjection {
    fn new(documents: &InMemoryDocumentStore, version: &str) -> Self {
        Self {
            documents: documents.clone(),
            version: version.parse().unwrap(),
            instance: String::new(),
            buffer: Vec::new(),
            calls: Arc::default(),
            interrupt: None,
        }
    }

    fn interrupt_after(mut self, body: &str, interrupt: Interrupt) -> Self {
        self.interrupt = Some((body.to_string(), interrupt));
        self
    }

    fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    async fn flush(&mut self) -> projections::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut parts: Vec<String> = match self.documents.get_document(&self.instance).await? {
            Some(document) => document.decode::<Vec<String>>()?,
            None => Vec::new(),
        };
        parts.append(&mut self.buffer);
        self.documents
            .put_document(&self.instance, serde_json::to_value(parts)?)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Projection for ContentsProjection {
    fn name(&self) -> &str {
        "contents"
    }

    fn version(&self) -> CodeVersion {
        self.version
    }

    fn minimal_reader(&self) -> CodeVersion {
        CodeVersion::new(1, 0)
    }

    fn event_types(&self) -> Vec<String> {
        vec!["A".to_string(), "B".to_string()]
    }

    fn generate_instance_name(&self, current_best: Option<&str>) -> String {
        match current_best {
            Some(name) => format!("{name}-next"),
            None => "contents".to_string(),
        }
    }

    fn set_instance_name(&mut self, name: &str) {
        self.instance = name.to_string();
    }

    async fn start_rebuild(&mut self, continuation: bool) -> projections::Result<()> {
        self.log(format!("start:{continuation}"));
        if !continuation {
            self.buffer.clear();
            self.documents.delete_document(&self.instance).await?;
        }
        Ok(())
    }

    async fn handle(&mut self, event: &EventRecord) -> projections::Result<()> {
        let handler = if event.event_type == "A" { 1 } else { 2 };
        let body = String::from_utf8_lossy(event.body.as_deref().unwrap_or_default()).to_string();
        self.buffer.push(format!("{handler}:{body}"));

        if let Some((trigger, interrupt)) = &self.interrupt
            && *trigger == body
        {
            match interrupt {
                Interrupt::Cancel(registry) => {
                    registry
                        .update_status(&self.instance, ProjectionStatus::CancelledBuild)
                        .await?;
                }
                Interrupt::Stop(handle) => handle.stop(),
            }
        }
        Ok(())
    }

    async fn partial_commit(&mut self) -> projections::Result<()> {
        self.log("partial");
        self.flush().await
    }

    async fn commit_rebuild(&mut self) -> projections::Result<()> {
        self.log("commit");
        self.flush().await
    }

    async fn stop_rebuild(&mut self) -> projections::Result<()> {
        self.log("stop");
        Ok(())
    }
}

/// Appends e1..e4 as A, B, A, A with one X in between: tokens 1, 2, 4, 5.
async fn seed_log() -> InMemoryEventStore {
    let store = InMemoryEventStore::new();
    for (event_type, body) in [("A", "e1"), ("B", "e2"), ("X", "x"), ("A", "e3"), ("A", "e4")] {
        let mut event = EventRecord::new(event_type, "text", body.as_bytes().to_vec());
        store
            .append_event(STREAM, &mut event, ExpectedVersion::Any)
            .await
            .unwrap();
    }
    store
}

async fn contents(documents: &InMemoryDocumentStore, instance: &str) -> String {
    match documents.get_document(instance).await.unwrap() {
        Some(document) => document.decode::<Vec<String>>().unwrap().join(","),
        None => String::new(),
    }
}

fn options(role: Role) -> CoordinatorOptions {
    CoordinatorOptions {
        role,
        node_name: Some("node-1".to_string()),
        ..CoordinatorOptions::default()
    }
}

fn registry() -> Arc<dyn ProjectionRegistry> {
    Arc::new(projections::InMemoryProjectionRegistry::new("contents"))
}

async fn status(registry: &Arc<dyn ProjectionRegistry>, name: &str) -> ProjectionStatus {
    registry.get_metadata(name).await.unwrap().unwrap().status
}

async fn run_until_caught_up(
    store: &InMemoryEventStore,
    registry: &Arc<dyn ProjectionRegistry>,
    projection: ContentsProjection,
    role: Role,
) -> String {
    let mut handle = ProjectionCoordinator::new(
        store.clone(),
        Arc::clone(registry),
        projection,
        options(role),
    )
    .spawn();
    assert!(handle.caught_up().await);
    let instance = handle.instance_name().unwrap();
    assert_eq!(handle.stop().await.unwrap(), RunOutcome::Stopped);
    instance
}

mod master {
    use super::*;

    #[tokio::test]
    async fn builds_first_instance_from_the_whole_log() {
        let store = seed_log().await;
        let registry = registry();
        let documents = InMemoryDocumentStore::new();

        let projection = ContentsProjection::new(&documents, "1.0");
        let calls = projection.calls();
        let instance = run_until_caught_up(&store, &registry, projection, Role::Master).await;

        assert_eq!(instance, "contents");
        assert_eq!(contents(&documents, "contents").await, "1:e1,2:e2,1:e3,1:e4");

        let all = registry.get_all_metadata().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, ProjectionStatus::Running);
        assert_eq!(all[0].node_name.as_deref(), Some("node-1"));
        assert_eq!(
            registry.get_token("contents").await.unwrap(),
            EventStoreToken::Position(5)
        );
        assert_eq!(*calls.lock().unwrap(), vec!["start:false", "commit"]);
    }

    #[tokio::test]
    async fn continues_an_unfinished_build_of_the_same_version() {
        let store = seed_log().await;
        let registry = registry();
        let documents = InMemoryDocumentStore::new();
        let v1 = CodeVersion::new(1, 0);

        registry
            .build_new_instance("contents", None, v1, v1)
            .await
            .unwrap();
        registry
            .set_token("contents", EventStoreToken::Position(2))
            .await
            .unwrap();
        documents
            .put_document("contents", serde_json::json!(["1:e1", "2:e2"]))
            .await
            .unwrap();

        let projection = ContentsProjection::new(&documents, "1.0");
        let calls = projection.calls();
        let instance = run_until_caught_up(&store, &registry, projection, Role::Master).await;

        assert_eq!(instance, "contents");
        assert_eq!(contents(&documents, "contents").await, "1:e1,2:e2,1:e3,1:e4");
        assert_eq!(status(&registry, "contents").await, ProjectionStatus::Running);
        assert_eq!(calls.lock().unwrap()[0], "start:true");
    }

    #[tokio::test]
    async fn rebuilds_an_older_instance_in_place() {
        let store = seed_log().await;
        let registry = registry();
        let documents = InMemoryDocumentStore::new();

        let instance = run_until_caught_up(
            &store,
            &registry,
            ContentsProjection::new(&documents, "1.0"),
            Role::Master,
        )
        .await;
        documents
            .put_document(&instance, serde_json::json!(["stale"]))
            .await
            .unwrap();

        let instance = run_until_caught_up(
            &store,
            &registry,
            ContentsProjection::new(&documents, "2.0"),
            Role::Master,
        )
        .await;

        assert_eq!(instance, "contents");
        assert_eq!(contents(&documents, "contents").await, "1:e1,2:e2,1:e3,1:e4");
        let metadata = registry.get_metadata("contents").await.unwrap().unwrap();
        assert_eq!(metadata.version, CodeVersion::new(2, 0));
        assert_eq!(metadata.status, ProjectionStatus::Running);
        assert_eq!(registry.get_all_metadata().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resumes_running_instance_and_follows_live_appends() {
        let store = seed_log().await;
        let registry = registry();
        let documents = InMemoryDocumentStore::new();
        run_until_caught_up(
            &store,
            &registry,
            ContentsProjection::new(&documents, "1.0"),
            Role::Master,
        )
        .await;

        let projection = ContentsProjection::new(&documents, "1.0");
        let calls = projection.calls();
        let mut handle = ProjectionCoordinator::new(
            store.clone(),
            registry.clone(),
            projection,
            options(Role::Master),
        )
        .spawn();
        assert!(handle.caught_up().await);

        let mut event = EventRecord::new("B", "text", b"e5".to_vec());
        store
            .append_event(STREAM, &mut event, ExpectedVersion::Any)
            .await
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while registry.get_token("contents").await.unwrap() != EventStoreToken::Position(6) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        handle.stop().await.unwrap();

        assert_eq!(
            contents(&documents, "contents").await,
            "1:e1,2:e2,1:e3,1:e4,2:e5"
        );
        // No rebuild hooks for a current instance.
        assert_eq!(*calls.lock().unwrap(), vec!["partial"]);
    }
}

mod rebuilder {
    use super::*;

    #[tokio::test]
    async fn cuts_over_new_instance_before_retiring_old_one() {
        let store = seed_log().await;
        let registry = registry();
        let documents = InMemoryDocumentStore::new();
        run_until_caught_up(
            &store,
            &registry,
            ContentsProjection::new(&documents, "1.0"),
            Role::Master,
        )
        .await;

        let transitions = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&transitions);
        let _sub = registry.register_for_changes(
            None,
            Arc::new(move |new, _| {
                log.lock()
                    .unwrap()
                    .push(format!("{}={}", new.name, new.status));
            }),
        );

        let instance = run_until_caught_up(
            &store,
            &registry,
            ContentsProjection::new(&documents, "2.0"),
            Role::Rebuilder,
        )
        .await;

        assert_eq!(instance, "contents-next");
        assert_eq!(
            *transitions.lock().unwrap(),
            vec![
                "contents-next=NewBuild",
                "contents-next=Running",
                "contents=Legacy"
            ]
        );
        assert_eq!(
            contents(&documents, "contents-next").await,
            "1:e1,2:e2,1:e3,1:e4"
        );
        assert_eq!(
            registry.get_metadata("contents-next").await.unwrap().unwrap().version,
            CodeVersion::new(2, 0)
        );
    }

    #[tokio::test]
    async fn cancelled_build_stops_without_promotion() {
        let store = seed_log().await;
        let registry = registry();
        let documents = InMemoryDocumentStore::new();
        run_until_caught_up(
            &store,
            &registry,
            ContentsProjection::new(&documents, "1.0"),
            Role::Master,
        )
        .await;

        let projection = ContentsProjection::new(&documents, "2.0")
            .interrupt_after("e2", Interrupt::Cancel(registry.clone()));
        let calls = projection.calls();
        let outcome = ProjectionCoordinator::new(
            store.clone(),
            registry.clone(),
            projection,
            options(Role::Rebuilder),
        )
        .spawn()
        .join()
        .await
        .unwrap();

        assert_eq!(outcome, RunOutcome::Revoked);
        assert_eq!(
            status(&registry, "contents-next").await,
            ProjectionStatus::CancelledBuild
        );
        assert_eq!(status(&registry, "contents").await, ProjectionStatus::Running);
        // Durable up to the last applied event, not the whole log.
        assert_eq!(
            registry.get_token("contents-next").await.unwrap(),
            EventStoreToken::Position(2)
        );
        assert_eq!(contents(&documents, "contents-next").await, "1:e1,2:e2");
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["start:false", "partial", "stop"]
        );
    }

    #[tokio::test]
    async fn stopped_build_is_continued_by_the_next_run() {
        let store = seed_log().await;
        let registry = registry();
        let documents = InMemoryDocumentStore::new();

        let stop = StopHandle::new();
        let projection = ContentsProjection::new(&documents, "1.0")
            .interrupt_after("e2", Interrupt::Stop(stop.clone()));
        let outcome = ProjectionCoordinator::new(
            store.clone(),
            registry.clone(),
            projection,
            options(Role::Rebuilder),
        )
        .run(stop.signal())
        .await
        .unwrap();

        assert_eq!(outcome, RunOutcome::Stopped);
        assert_eq!(status(&registry, "contents").await, ProjectionStatus::NewBuild);
        assert_eq!(
            registry.get_token("contents").await.unwrap(),
            EventStoreToken::Position(2)
        );

        let projection = ContentsProjection::new(&documents, "1.0");
        let calls = projection.calls();
        let instance = run_until_caught_up(&store, &registry, projection, Role::Rebuilder).await;

        assert_eq!(instance, "contents");
        assert_eq!(calls.lock().unwrap()[0], "start:true");
        assert_eq!(status(&registry, "contents").await, ProjectionStatus::Running);
        assert_eq!(contents(&documents, "contents").await, "1:e1,2:e2,1:e3,1:e4");
    }
}

mod selection {
    use super::*;

    struct NamedReader {
        instance: RwLock<Option<String>>,
    }

    impl ProjectionReader for NamedReader {
        fn projection_name(&self) -> &str {
            "contents"
        }

        fn version(&self) -> CodeVersion {
            CodeVersion::new(1, 0)
        }

        fn minimal_reader(&self) -> CodeVersion {
            CodeVersion::new(1, 0)
        }

        fn use_instance(&self, instance: Option<&str>) {
            *self.instance.write().unwrap() = instance.map(str::to_string);
        }
    }

    #[tokio::test]
    async fn selector_follows_rebuilder_cutover() {
        let store = seed_log().await;
        let registry = registry();
        let documents = InMemoryDocumentStore::new();

        let v10 = CodeVersion::new(1, 0);
        registry.build_new_instance("old", None, v10, v10).await.unwrap();
        registry
            .update_status("old", ProjectionStatus::Discontinued)
            .await
            .unwrap();
        run_until_caught_up(
            &store,
            &registry,
            ContentsProjection::new(&documents, "1.1"),
            Role::Master,
        )
        .await;

        let reader = Arc::new(NamedReader {
            instance: RwLock::new(None),
        });
        let readers: Vec<Arc<dyn ProjectionReader>> = vec![reader.clone()];
        let selector = ReaderSelector::start(registry.as_ref(), readers)
            .await
            .unwrap();
        assert_eq!(reader.instance.read().unwrap().as_deref(), Some("contents"));

        run_until_caught_up(
            &store,
            &registry,
            ContentsProjection::new(&documents, "1.2"),
            Role::Rebuilder,
        )
        .await;

        assert_eq!(
            reader.instance.read().unwrap().as_deref(),
            Some("contents-next")
        );
        assert_eq!(
            selector.selected().unwrap().instance_version,
            CodeVersion::new(1, 2)
        );
        assert_eq!(status(&registry, "contents").await, ProjectionStatus::Legacy);
    }
}
