//! End-to-end integration: declare tables, plan their placement, and route
//! a keyed batch through materialized storage.

use recshard::{
    DType, Device, EmbeddingCollection, EmbeddingTableSpec, Error, JaggedSequence,
    KeyedJaggedCollection, PlanConstraints, Pooling, ShardingPlan, ShardingPlanner,
    ShardingStrategy, TableSet, Topology,
};

fn retail_tables() -> TableSet {
    TableSet::new(vec![
        EmbeddingTableSpec {
            name: "products".to_string(),
            capacity: 1_000_000,
            width: 128,
            feature_names: vec!["viewed".to_string(), "purchased".to_string()],
            pooling: Pooling::Sum,
            dtype: DType::F32,
        },
        EmbeddingTableSpec {
            name: "categories".to_string(),
            capacity: 10_000,
            width: 32,
            feature_names: vec!["category".to_string()],
            pooling: Pooling::Mean,
            dtype: DType::F32,
        },
    ])
    .unwrap()
}

fn retail_batch() -> KeyedJaggedCollection<u64> {
    KeyedJaggedCollection::from_groups(vec![
        (
            "viewed",
            JaggedSequence::from_lengths(vec![10, 20, 30, 40], vec![2, 1, 1]).unwrap(),
        ),
        (
            "purchased",
            JaggedSequence::from_lengths(vec![50], vec![0, 1, 0]).unwrap(),
        ),
        (
            "category",
            JaggedSequence::from_lengths(vec![7, 8, 9], vec![1, 2, 0]).unwrap(),
        ),
    ])
    .unwrap()
}

#[test]
fn plan_route_and_persist() {
    let set = retail_tables();
    let topology = Topology::new(4, 8 << 30).unwrap();
    let planner = ShardingPlanner::new(topology);

    let plan = planner.plan(&set, &PlanConstraints::none()).unwrap();
    plan.validate(&set, &topology).unwrap();

    // the big table splits across the fleet, the small one stays whole
    assert_eq!(
        plan.placement("products").unwrap().strategy,
        ShardingStrategy::RowWise
    );
    assert_eq!(
        plan.placement("categories").unwrap().strategy,
        ShardingStrategy::TableWise
    );

    // persisted form round-trips and still validates
    let json = plan.to_json().unwrap();
    let restored = ShardingPlan::from_json(&json).unwrap();
    restored.validate(&set, &topology).unwrap();
    assert_eq!(restored, plan);

    // all bytes land somewhere in the fleet
    let totals = plan.device_memory_bytes(topology.world_size());
    assert_eq!(totals.iter().sum::<usize>(), set.total_size_in_bytes());

    // route a batch through zero-initialized storage
    let collection = EmbeddingCollection::zeros(&set, Device::Host);
    let outputs = collection.forward(&retail_batch()).unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].0, "products");
    assert_eq!(outputs[0].1.rows(), 3);
    assert_eq!(outputs[0].1.cols(), 128);
    assert_eq!(outputs[1].0, "categories");
    assert_eq!(outputs[1].1.cols(), 32);
}

#[test]
fn every_process_derives_the_same_plan() {
    // simulate four ranks planning independently: all must agree byte for
    // byte without communicating
    let set = retail_tables();
    let topology = Topology::new(4, 8 << 30).unwrap();

    let serialized: Vec<String> = (0..4)
        .map(|_| {
            ShardingPlanner::new(topology)
                .plan(&set, &PlanConstraints::none())
                .unwrap()
                .to_json()
                .unwrap()
        })
        .collect();
    assert!(serialized.iter().all(|json| json == &serialized[0]));
}

#[test]
fn table_specs_round_trip_through_json() {
    let set = retail_tables();
    let json = set.to_json().unwrap();
    let restored = TableSet::from_json(&json).unwrap();
    assert_eq!(restored, set);

    // a plan built from the restored set matches one built from the original
    let topology = Topology::new(2, 8 << 30).unwrap();
    let planner = ShardingPlanner::new(topology);
    assert_eq!(
        planner.plan(&set, &PlanConstraints::none()).unwrap(),
        planner.plan(&restored, &PlanConstraints::none()).unwrap()
    );
}

#[test]
fn batch_survives_demux_and_device_moves() {
    let batch = retail_batch();

    let rebuilt = KeyedJaggedCollection::from_groups(batch.to_groups()).unwrap();
    assert_eq!(rebuilt, batch);

    let moved = batch.to_device(Device::Accelerator(2));
    assert_eq!(moved.device(), Device::Accelerator(2));
    assert_eq!(batch.device(), Device::Host);
    assert_eq!(moved.values(), batch.values());
}

#[test]
fn routing_rejects_incomplete_batches() {
    let set = retail_tables();
    let collection = EmbeddingCollection::zeros(&set, Device::Host);

    // batch missing the "category" feature
    let partial = KeyedJaggedCollection::from_groups(vec![
        (
            "viewed",
            JaggedSequence::from_lengths(vec![1u64, 2], vec![2]).unwrap(),
        ),
        (
            "purchased",
            JaggedSequence::from_lengths(vec![3], vec![1]).unwrap(),
        ),
    ])
    .unwrap();

    let err = collection.forward(&partial).unwrap_err();
    assert!(matches!(err, Error::MissingKey(key) if key == "category"));
}
