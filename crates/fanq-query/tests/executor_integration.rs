use async_trait::async_trait;
use fanq_core::{DataResponse, ExecutionConfig, Frame, QueryId, Region, TimeRange};
use fanq_query::{
    partition, BoxError, CallError, ExecutionContext, FanOutExecutor, MetricQuery, MetricsBackend,
    PartitionedBatch, QueryError,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// What a region does when the executor drives it
#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    Delay(Duration),
    ClientFails,
    TranslateFails,
    BuildFails,
    RequestFailure,
    TransportFails,
    ParseFails,
    ShapeFails,
    /// Sleeps well past any test deadline unless cancelled
    Hang,
    Panic(&'static str),
    PanicOpaque,
    /// Succeeds, but the shaper embeds an error for this query
    EmbedErrorFor(&'static str),
    /// Succeeds, but the shaper also returns entries under these ids
    ShapeExtra(&'static [&'static str]),
}

struct ScriptedBackend {
    behaviors: HashMap<Region, Behavior>,
    /// Regions whose remote call was started
    calls: Mutex<Vec<Region>>,
}

impl ScriptedBackend {
    fn new(behaviors: &[(&str, Behavior)]) -> Self {
        Self {
            behaviors: behaviors
                .iter()
                .map(|(r, b)| (Region::new(*r), b.clone()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn behavior(&self, region: &Region) -> Behavior {
        self.behaviors.get(region).cloned().unwrap_or(Behavior::Succeed)
    }

    fn region_of(queries: &[MetricQuery]) -> Region {
        queries[0].region.clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl MetricsBackend for ScriptedBackend {
    type Client = Region;
    type NativeQuery = MetricQuery;
    type Request = Vec<MetricQuery>;
    type Response = Vec<MetricQuery>;
    type ResultSet = (QueryId, f64);

    fn resolve_client(&self, region: &Region, _ctx: &ExecutionContext) -> Result<Region, BoxError> {
        match self.behavior(region) {
            Behavior::ClientFails => Err("no credentials for region".into()),
            _ => Ok(region.clone()),
        }
    }

    fn translate(&self, queries: &[MetricQuery]) -> Result<Vec<MetricQuery>, BoxError> {
        match self.behavior(&Self::region_of(queries)) {
            Behavior::TranslateFails => Err("unsupported expression".into()),
            _ => Ok(queries.to_vec()),
        }
    }

    fn build_request(&self, _time_range: &TimeRange, queries: &[MetricQuery]) -> Result<Vec<MetricQuery>, BoxError> {
        match self.behavior(&Self::region_of(queries)) {
            Behavior::BuildFails => Err("too many metric data queries".into()),
            _ => Ok(queries.to_vec()),
        }
    }

    async fn execute(
        &self,
        _cancel: &CancellationToken,
        client: &Region,
        request: Vec<MetricQuery>,
    ) -> Result<Vec<MetricQuery>, CallError> {
        self.calls.lock().push(client.clone());

        match self.behavior(client) {
            Behavior::Delay(d) => {
                tokio::time::sleep(d).await;
                Ok(request)
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(request)
            }
            Behavior::RequestFailure => Err(CallError::RequestFailure {
                status_code: 400,
                request_id: "3f1c-req".to_string(),
                message: "Rate exceeded".to_string(),
            }),
            Behavior::TransportFails => Err(CallError::Transport("connection reset".to_string())),
            Behavior::Panic(msg) => {
                tokio::task::yield_now().await;
                panic!("{}", msg);
            }
            Behavior::PanicOpaque => {
                tokio::task::yield_now().await;
                std::panic::panic_any(42u32);
            }
            _ => Ok(request),
        }
    }

    fn parse(&self, response: Vec<MetricQuery>, _queries: &[MetricQuery]) -> Result<Vec<(QueryId, f64)>, BoxError> {
        match self.behavior(&Self::region_of(&response)) {
            Behavior::ParseFails => Err("malformed metric data results".into()),
            _ => Ok(response.iter().map(|q| (q.id.clone(), 42.0)).collect()),
        }
    }

    fn shape(
        &self,
        results: Vec<(QueryId, f64)>,
        queries: &[MetricQuery],
        time_range: &TimeRange,
    ) -> Result<HashMap<QueryId, DataResponse>, BoxError> {
        let region = Self::region_of(queries);
        let behavior = self.behavior(&region);
        if let Behavior::ShapeFails = behavior {
            return Err("frame conversion failed".into());
        }

        let mut shaped: HashMap<QueryId, DataResponse> = results
            .into_iter()
            .map(|(id, value)| {
                if let Behavior::EmbedErrorFor(failing) = &behavior {
                    if id.as_str() == *failing {
                        return (id, DataResponse::error("metric not found"));
                    }
                }
                let mut frame = Frame::new(id.to_string()).with_label("region", region.as_str());
                frame.push(time_range.start, value);
                (id, DataResponse::with_frames(vec![frame]))
            })
            .collect();

        if let Behavior::ShapeExtra(extra) = &behavior {
            for id in extra.iter() {
                shaped.insert(QueryId::new(*id), DataResponse::with_frames(Vec::new()));
            }
        }
        Ok(shaped)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("fanq_query=debug")
        .try_init();
}

fn query(id: &str, region: &str) -> MetricQuery {
    MetricQuery::builder(id)
        .region(region)
        .time_range(1_700_000_000_000, 1_700_003_600_000)
        .metric("AWS/EC2", "CPUUtilization")
        .dimension("InstanceId", format!("i-{}", id.to_lowercase()))
        .build()
        .unwrap()
}

fn scenario_batch() -> Vec<MetricQuery> {
    vec![
        query("A", "us-east-1"),
        query("B", "us-east-1"),
        query("C", "eu-west-1"),
    ]
}

fn context() -> ExecutionContext {
    ExecutionContext::new(1, "cloudwatch-prod")
}

fn executor(backend: ScriptedBackend) -> FanOutExecutor<ScriptedBackend> {
    FanOutExecutor::new(Arc::new(backend))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_success_returns_every_query() {
    init_tracing();
    let executor = executor(ScriptedBackend::new(&[]));

    let response = executor
        .execute(&context(), scenario_batch(), CancellationToken::new())
        .await
        .unwrap();

    let ids: HashSet<_> = response.responses.keys().map(|id| id.to_string()).collect();
    assert_eq!(ids, HashSet::from(["A".to_string(), "B".to_string(), "C".to_string()]));

    let c = response.get("C").unwrap();
    assert!(!c.is_error());
    assert_eq!(c.frames[0].labels[0].value, "eu-west-1");
    assert_eq!(c.frames[0].values, vec![42.0]);

    let stats = executor.stats();
    assert_eq!(stats.tasks_spawned, 2);
    assert_eq!(stats.tasks_completed, 2);
    assert_eq!(stats.results_emitted, 3);
    assert_eq!(stats.batches_succeeded, 1);
    assert_eq!(executor.backend().call_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_regions_yield_exactly_one_entry_per_query() {
    let regions = ["us-east-1", "us-west-2", "eu-west-1", "ap-south-1"];
    let queries: Vec<_> = (0..12)
        .map(|i| query(&format!("Q{}", i), regions[i % regions.len()]))
        .collect();

    let executor = executor(ScriptedBackend::new(&[
        ("us-west-2", Behavior::Delay(Duration::from_millis(150))),
        ("ap-south-1", Behavior::Delay(Duration::from_millis(50))),
    ]));

    let response = executor
        .execute(&context(), queries, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.len(), 12);
    for i in 0..12 {
        assert!(response.get(&format!("Q{}", i)).is_some(), "missing Q{}", i);
    }

    // The slowest region was waited for
    let stats = executor.stats();
    assert_eq!(stats.tasks_spawned, 4);
    assert_eq!(stats.tasks_finished(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_failure_fails_batch_and_emits_fault() {
    init_tracing();
    let executor = executor(ScriptedBackend::new(&[("eu-west-1", Behavior::RequestFailure)]));

    let err = executor
        .execute(&context(), scenario_batch(), CancellationToken::new())
        .await
        .expect_err("request failure must fail the batch");

    assert!(err.is_request_failure());
    assert_eq!(err.region(), Some(&Region::new("eu-west-1")));
    assert!(err.to_string().contains("Rate exceeded"));

    let stats = executor.stats();
    assert_eq!(stats.fault_results_emitted, 1);
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.tasks_spawned, 2);
    assert_eq!(stats.tasks_finished(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_failure_fault_can_be_disabled() {
    let backend = ScriptedBackend::new(&[("eu-west-1", Behavior::RequestFailure)]);
    let config = ExecutionConfig::new().with_request_failure_fault(false);
    let executor = FanOutExecutor::with_config(Arc::new(backend), config);

    let err = executor
        .execute(&context(), scenario_batch(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_request_failure());
    assert_eq!(executor.stats().fault_results_emitted, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transport_failure_does_not_emit_fault() {
    let executor = executor(ScriptedBackend::new(&[("eu-west-1", Behavior::TransportFails)]));

    let err = executor
        .execute(&context(), scenario_batch(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        QueryError::Call {
            source: CallError::Transport(_),
            ..
        }
    ));
    assert_eq!(executor.stats().fault_results_emitted, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ordinary_error_cancels_in_flight_siblings() {
    let executor = executor(ScriptedBackend::new(&[
        ("us-east-1", Behavior::Hang),
        ("eu-west-1", Behavior::ClientFails),
    ]));

    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        executor.execute(&context(), scenario_batch(), CancellationToken::new()),
    )
    .await
    .expect("sibling was not cancelled");

    let err = result.unwrap_err();
    assert!(matches!(err, QueryError::ClientResolution { ref region, .. } if region.as_str() == "eu-west-1"));
    assert!(started.elapsed() < Duration::from_secs(10));

    // Both tasks ended in error: the failing one and the cancelled sibling
    let stats = executor.stats();
    assert_eq!(stats.tasks_aborted, 2);
    assert_eq!(stats.tasks_completed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn each_stage_failure_names_its_stage() {
    let cases = [
        (Behavior::ClientFails, "Client resolution failed"),
        (Behavior::TranslateFails, "Query translation failed"),
        (Behavior::BuildFails, "Request build failed"),
        (Behavior::TransportFails, "Metric request failed"),
        (Behavior::ParseFails, "Response parse failed"),
        (Behavior::ShapeFails, "Result shaping failed"),
    ];

    for (behavior, prefix) in cases {
        let executor = executor(ScriptedBackend::new(&[("eu-west-1", behavior.clone())]));
        let err = executor
            .execute(&context(), vec![query("C", "eu-west-1")], CancellationToken::new())
            .await
            .unwrap_err();

        assert!(
            err.to_string().starts_with(prefix),
            "{:?}: unexpected message {}",
            behavior,
            err
        );
        assert_eq!(err.region().map(Region::as_str), Some("eu-west-1"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panic_is_isolated_to_its_region() {
    init_tracing();
    let executor = executor(ScriptedBackend::new(&[(
        "us-east-1",
        Behavior::Panic("index out of range"),
    )]));

    let response = executor
        .execute(&context(), scenario_batch(), CancellationToken::new())
        .await
        .expect("a panic must not fail the batch");

    // Sibling results are intact; the fault has no key to live under
    assert_eq!(response.len(), 1);
    assert!(response.get("C").is_some());
    assert!(response.get("A").is_none());
    assert!(response.get("").is_none());

    let stats = executor.stats();
    assert_eq!(stats.tasks_faulted, 1);
    assert_eq!(stats.tasks_completed, 1);
    assert_eq!(stats.fault_results_emitted, 1);
    assert_eq!(stats.dropped_faults, 1);
    assert_eq!(stats.batches_succeeded, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opaque_panic_payload_is_dropped() {
    let executor = executor(ScriptedBackend::new(&[("us-east-1", Behavior::PanicOpaque)]));

    let response = executor
        .execute(&context(), scenario_batch(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.len(), 1);
    let stats = executor.stats();
    assert_eq!(stats.tasks_faulted, 1);
    assert_eq!(stats.fault_results_emitted, 0);
    assert_eq!(stats.dropped_faults, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_query_error_is_embedded_not_fatal() {
    let executor = executor(ScriptedBackend::new(&[(
        "us-east-1",
        Behavior::EmbedErrorFor("B"),
    )]));

    let response = executor
        .execute(&context(), scenario_batch(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.len(), 3);
    assert_eq!(response.error_count(), 1);
    assert_eq!(response.get("B").unwrap().error.as_deref(), Some("metric not found"));
    assert!(!response.get("A").unwrap().is_error());
}

#[tokio::test]
async fn empty_batch_is_rejected_without_tasks() {
    let executor = executor(ScriptedBackend::new(&[]));

    let err = executor
        .execute(&context(), Vec::new(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(executor.stats().tasks_spawned, 0);
}

#[tokio::test]
async fn invalid_time_range_is_rejected_without_tasks() {
    let executor = executor(ScriptedBackend::new(&[]));
    let mut queries = scenario_batch();
    for q in &mut queries {
        q.time_range = TimeRange::new(5_000, 1_000);
    }

    let err = executor
        .execute(&context(), queries, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::InvalidTimeRange { start: 5_000, end: 1_000 }));
    assert_eq!(executor.stats().tasks_spawned, 0);
    assert_eq!(executor.backend().call_count(), 0);
}

#[tokio::test]
async fn empty_partition_returns_empty_response() {
    let executor = executor(ScriptedBackend::new(&[]));

    let response = executor
        .execute_groups(
            &context(),
            PartitionedBatch::empty(TimeRange::new(0, 1_000)),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(response.is_empty());
    assert_eq!(executor.stats().tasks_spawned, 0);
    assert_eq!(executor.stats().batches_succeeded, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn prepartitioned_batch_executes() {
    let executor = executor(ScriptedBackend::new(&[]));
    let batch = partition(scenario_batch(), None).unwrap();
    assert_eq!(batch.region_count(), 2);

    let response = executor
        .execute_groups(&context(), batch, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn default_region_is_resolved_from_context() {
    let executor = executor(ScriptedBackend::new(&[]));
    let ctx = context().with_default_region("us-west-2");

    let response = executor
        .execute(
            &ctx,
            vec![query("A", "default"), query("B", "us-west-2")],
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.len(), 2);
    assert_eq!(executor.stats().tasks_spawned, 1);
    assert_eq!(response.get("A").unwrap().frames[0].labels[0].value, "us-west-2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn caller_cancellation_stops_the_batch() {
    let executor = Arc::new(executor(ScriptedBackend::new(&[
        ("us-east-1", Behavior::Hang),
        ("eu-west-1", Behavior::Hang),
    ])));
    let cancel = CancellationToken::new();

    let handle = {
        let executor = Arc::clone(&executor);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let ctx = context();
            executor.execute(&ctx, scenario_batch(), cancel).await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("batch ignored caller cancellation")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, QueryError::Cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_deadline_times_out() {
    let backend = ScriptedBackend::new(&[("eu-west-1", Behavior::Hang)]);
    let config = ExecutionConfig::new().with_query_timeout_secs(1);
    let executor = FanOutExecutor::with_config(Arc::new(backend), config);

    let err = executor
        .execute(&context(), scenario_batch(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Timeout(1)));

    // The hanging region is cut short and still reaches a terminal counter
    let stats = executor.stats();
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.tasks_spawned, 2);
    assert_eq!(stats.tasks_completed, 1);
    assert_eq!(stats.tasks_aborted, 1);
    assert_eq!(stats.tasks_finished(), stats.tasks_spawned);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shaper_returning_more_entries_than_queries_fails_region() {
    // One query gives a channel of three slots; four entries would not fit
    let executor = executor(ScriptedBackend::new(&[(
        "eu-west-1",
        Behavior::ShapeExtra(&["X", "Y", "Z"]),
    )]));

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute(&context(), vec![query("C", "eu-west-1")], CancellationToken::new()),
    )
    .await
    .expect("batch did not finish")
    .unwrap_err();

    assert!(matches!(err, QueryError::Shape { ref region, .. } if region.as_str() == "eu-west-1"));
    assert!(err.to_string().contains("not in this region's group"));
    assert_eq!(executor.stats().results_emitted, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shaper_returning_another_regions_id_fails_batch() {
    let executor = executor(ScriptedBackend::new(&[("us-east-1", Behavior::ShapeExtra(&["C"]))]));

    let err = executor
        .execute(&context(), scenario_batch(), CancellationToken::new())
        .await
        .expect_err("a foreign id must not overwrite eu-west-1's entry");

    assert!(matches!(err, QueryError::Shape { ref region, .. } if region.as_str() == "us-east-1"));
    assert!(err.to_string().contains("\"C\""));
    assert_eq!(executor.stats().batches_failed, 1);
}
