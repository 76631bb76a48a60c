use common::{Context, EntityId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    DEFAULT_GRAPH_NAME, Graph, GraphEvent, Node, StoreRepository, TransactionalRepository,
    UnitOfWork, UserId, extract_keywords,
};
use store::InMemoryStore;

const CONTENT: &str = "Ownership moves values between bindings; borrowing lends access \
    without moving. Lifetimes describe how long borrowed references stay valid, and the \
    borrow checker enforces ownership rules at compile time.";

fn bench_node_validation(c: &mut Criterion) {
    let owner = UserId::new("bench").unwrap();
    let graph_id = EntityId::new();

    c.bench_function("domain/node_new_with_extracted_keywords", |b| {
        b.iter(|| {
            let keywords = extract_keywords(CONTENT, 8);
            Node::new(graph_id, owner.clone(), CONTENT, keywords).unwrap()
        });
    });
}

fn bench_commit_node_with_events(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let owner = UserId::new("bench").unwrap();

    c.bench_function("domain/uow_commit_graph_node_and_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryStore::new();
                let graphs: StoreRepository<_, Graph> = StoreRepository::new(store.clone());
                let nodes: StoreRepository<_, Node> = StoreRepository::new(store.clone());
                let mut uow = UnitOfWork::new(store);
                let ctx = Context::new();

                let graph = Graph::new(owner.clone(), DEFAULT_GRAPH_NAME);
                let node = Node::new(graph.id, owner.clone(), CONTENT, ["rust"]).unwrap();

                uow.begin(&ctx).unwrap();
                graphs.register_save(&mut uow, &graph).unwrap();
                nodes.register_save(&mut uow, &node).unwrap();
                uow.register_event(&GraphEvent::graph_created(&graph)).unwrap();
                uow.register_event(&GraphEvent::node_created(&node)).unwrap();
                uow.commit(&ctx).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_node_validation, bench_commit_node_with_events);
criterion_main!(benches);
