//! In-process cluster of brute-force agents.
//!
//! Used by the integration tests and the `simulate` command. Every agent keeps
//! its objects in a map and answers searches with an exact L2 scan. Faults
//! (errors, latency, hangs, empty answers) can be injected per agent, and the
//! gateway counts concurrent calls so tests can check concurrency bounds.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{ErrorCode, Result};
use crate::gateway::{AgentError, AgentRequest, AgentResponse, Gateway};
use crate::stats::{IndexCount, IndexStatsSnapshot, MedianSketch, StatValue};
use crate::types::{AgentTarget, Candidate, ObjectLocation, ObjectVector, Operation};

/// Number of buckets in the vector norm histogram.
const NORM_BUCKETS: usize = 10;

/// Behavior injected into one agent.
#[derive(Debug, Clone, Default)]
pub struct AgentFault {
    /// Fail every call with this code.
    pub code: Option<ErrorCode>,
    /// Sleep before answering.
    pub delay: Option<Duration>,
    /// Never answer.
    pub hang: bool,
    /// Answer this many search calls with zero candidates.
    pub empty_searches: usize,
}

impl AgentFault {
    pub fn error(code: ErrorCode) -> Self {
        Self {
            code: Some(code),
            ..Default::default()
        }
    }

    pub fn delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn empty_searches(count: usize) -> Self {
        Self {
            empty_searches: count,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct MemoryAgent {
    target: AgentTarget,
    objects: RwLock<HashMap<String, ObjectVector>>,
    fault: RwLock<AgentFault>,
    calls: AtomicUsize,
}

impl MemoryAgent {
    fn new(index: usize) -> Self {
        Self {
            target: AgentTarget::new(
                format!("agent-{index}"),
                format!("10.0.0.{}:8081", index + 1),
            ),
            objects: RwLock::new(HashMap::new()),
            fault: RwLock::new(AgentFault::default()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Consume one injected empty search answer, if any are left.
    fn take_empty_search(&self) -> bool {
        let mut fault = self.fault.write();
        if fault.empty_searches > 0 {
            fault.empty_searches -= 1;
            true
        } else {
            false
        }
    }

    fn location(&self, id: &str) -> ObjectLocation {
        ObjectLocation {
            uuid: id.to_string(),
            name: self.target.name.clone(),
            ips: vec![self.target.address.clone()],
        }
    }

    fn search(
        &self,
        query: &[f32],
        num: u32,
        radius: f32,
    ) -> std::result::Result<Vec<Candidate>, AgentError> {
        let objects = self.objects.read();
        let mut results = Vec::with_capacity(objects.len());
        for object in objects.values() {
            if object.vector.len() != query.len() {
                return Err(AgentError::new(
                    ErrorCode::InvalidArgument,
                    format!(
                        "dimension mismatch: query has {}, index has {}",
                        query.len(),
                        object.vector.len()
                    ),
                ));
            }
            let distance = l2_distance(query, &object.vector);
            if radius > 0.0 && distance > radius {
                continue;
            }
            results.push(Candidate::new(object.id.clone(), distance));
        }
        results.sort_by(|a, b| a.rank_cmp(b));
        results.truncate(num as usize);
        Ok(results)
    }

    fn vector_of(&self, id: &str) -> std::result::Result<Vec<f32>, AgentError> {
        self.objects
            .read()
            .get(id)
            .map(|o| o.vector.clone())
            .ok_or_else(|| AgentError::not_found(format!("object {id} not found")))
    }

    fn handle(&self, request: AgentRequest) -> std::result::Result<AgentResponse, AgentError> {
        match request {
            AgentRequest::Search { vector, num, radius, .. } => {
                self.search(&vector, num, radius).map(AgentResponse::Candidates)
            }
            AgentRequest::LinearSearch { vector, num } => {
                self.search(&vector, num, -1.0).map(AgentResponse::Candidates)
            }
            AgentRequest::SearchById { id, num, radius, .. } => {
                let vector = self.vector_of(&id)?;
                self.search(&vector, num, radius).map(AgentResponse::Candidates)
            }
            AgentRequest::LinearSearchById { id, num } => {
                let vector = self.vector_of(&id)?;
                self.search(&vector, num, -1.0).map(AgentResponse::Candidates)
            }
            AgentRequest::Insert(object) => {
                let mut objects = self.objects.write();
                if objects.contains_key(&object.id) {
                    return Err(AgentError::new(
                        ErrorCode::AlreadyExists,
                        format!("object {} already exists", object.id),
                    ));
                }
                let location = self.location(&object.id);
                objects.insert(object.id.clone(), object);
                Ok(AgentResponse::Location(location))
            }
            AgentRequest::Update(object) => {
                let mut objects = self.objects.write();
                if !objects.contains_key(&object.id) {
                    return Err(AgentError::not_found(format!("object {} not found", object.id)));
                }
                let location = self.location(&object.id);
                objects.insert(object.id.clone(), object);
                Ok(AgentResponse::Location(location))
            }
            AgentRequest::Remove { id, .. } => match self.objects.write().remove(&id) {
                Some(_) => Ok(AgentResponse::Location(self.location(&id))),
                None => Err(AgentError::not_found(format!("object {id} not found"))),
            },
            AgentRequest::Exists { id } => {
                if self.objects.read().contains_key(&id) {
                    Ok(AgentResponse::Id(id))
                } else {
                    Err(AgentError::not_found(format!("object {id} not found")))
                }
            }
            AgentRequest::GetObject { id } => self
                .objects
                .read()
                .get(&id)
                .cloned()
                .map(AgentResponse::Object)
                .ok_or_else(|| AgentError::not_found(format!("object {id} not found"))),
            AgentRequest::IndexInfo => Ok(AgentResponse::IndexCount(IndexCount {
                stored: self.objects.read().len() as u64,
                ..Default::default()
            })),
            AgentRequest::IndexStatistics => Ok(AgentResponse::Statistics(self.statistics())),
            AgentRequest::IndexProperty => {
                let dimension = self
                    .objects
                    .read()
                    .values()
                    .next()
                    .map(|o| o.vector.len())
                    .unwrap_or(0);
                let mut property = BTreeMap::new();
                property.insert("agent".to_string(), self.target.name.clone());
                property.insert("algorithm".to_string(), "brute_force".to_string());
                property.insert("distance".to_string(), "l2".to_string());
                property.insert("dimension".to_string(), dimension.to_string());
                Ok(AgentResponse::Property(property))
            }
        }
    }

    fn statistics(&self) -> IndexStatsSnapshot {
        let objects = self.objects.read();
        if objects.is_empty() {
            return IndexStatsSnapshot::invalid();
        }

        let norms: Vec<f32> = objects.values().map(|o| l2_norm(&o.vector)).collect();
        let mut histogram = vec![0u64; NORM_BUCKETS];
        for norm in &norms {
            let bucket = (norm.max(0.0) as usize).min(NORM_BUCKETS - 1);
            histogram[bucket] += 1;
        }
        let millis: Vec<u64> = norms.iter().map(|n| (n * 1000.0).round() as u64).collect();
        let sum: f64 = norms.iter().map(|n| *n as f64).sum();
        let max = norms.iter().copied().fold(f32::MIN, f32::max);
        let min = norms.iter().copied().fold(f32::MAX, f32::min);

        IndexStatsSnapshot::new()
            .with_count("indices", norms.len() as u64)
            .with_histogram("norm_histogram", histogram)
            .with("norm_median_milli", StatValue::Median(MedianSketch::from_samples(millis)))
            .with_mean("mean_norm", sum, norms.len() as u64)
            .with("max_norm", StatValue::Gauge(max as f64))
            .with("min_norm", StatValue::Gauge(min as f64))
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Decrements the in-flight counter when a call finishes or is dropped.
struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A [`Gateway`] over in-memory agents.
#[derive(Debug)]
pub struct MemoryGateway {
    agents: Vec<MemoryAgent>,
    write_replica: usize,
    next_write: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    total_calls: AtomicUsize,
}

impl MemoryGateway {
    /// Cluster of `agents` empty agents named `agent-0`, `agent-1`, ...
    pub fn new(agents: usize) -> Self {
        Self {
            agents: (0..agents).map(MemoryAgent::new).collect(),
            write_replica: 1,
            next_write: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            total_calls: AtomicUsize::new(0),
        }
    }

    /// Number of agents each write is sent to.
    pub fn with_write_replica(mut self, replica: usize) -> Self {
        self.write_replica = replica.max(1);
        self
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.target.name.clone()).collect()
    }

    fn agent(&self, name: &str) -> Option<&MemoryAgent> {
        self.agents.iter().find(|a| a.target.name == name)
    }

    pub fn set_fault(&self, agent: &str, fault: AgentFault) {
        if let Some(agent) = self.agent(agent) {
            *agent.fault.write() = fault;
        }
    }

    pub fn clear_faults(&self) {
        for agent in &self.agents {
            *agent.fault.write() = AgentFault::default();
        }
    }

    /// Spread objects over the agents, one copy each.
    pub fn seed_sharded<I: IntoIterator<Item = ObjectVector>>(&self, objects: I) {
        if self.agents.is_empty() {
            return;
        }
        for (i, object) in objects.into_iter().enumerate() {
            let agent = &self.agents[i % self.agents.len()];
            agent.objects.write().insert(object.id.clone(), object);
        }
    }

    /// Put a copy of every object on every agent.
    pub fn seed_replicated<I: IntoIterator<Item = ObjectVector>>(&self, objects: I) {
        for object in objects {
            for agent in &self.agents {
                agent.objects.write().insert(object.id.clone(), object.clone());
            }
        }
    }

    /// Insert objects on one agent only.
    pub fn seed_agent<I: IntoIterator<Item = ObjectVector>>(&self, agent: &str, objects: I) {
        if let Some(agent) = self.agent(agent) {
            let mut map = agent.objects.write();
            for object in objects {
                map.insert(object.id.clone(), object);
            }
        }
    }

    pub fn object_count(&self, agent: &str) -> usize {
        self.agent(agent).map(|a| a.objects.read().len()).unwrap_or(0)
    }

    pub fn calls_to(&self, agent: &str) -> usize {
        self.agent(agent)
            .map(|a| a.calls.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.peak_in_flight.store(0, Ordering::SeqCst);
        self.total_calls.store(0, Ordering::SeqCst);
        for agent in &self.agents {
            agent.calls.store(0, Ordering::SeqCst);
        }
    }

    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            counter: &self.in_flight,
        }
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn targets(&self, op: Operation) -> Result<Vec<AgentTarget>> {
        let all = || self.agents.iter().map(|a| a.target.clone());
        let targets = match op {
            Operation::Write => {
                let n = self.agents.len();
                if n == 0 {
                    return Ok(Vec::new());
                }
                let start = self.next_write.fetch_add(1, Ordering::Relaxed) % n;
                all().cycle().skip(start).take(self.write_replica.min(n)).collect()
            }
            Operation::Search | Operation::Read | Operation::Info => all().collect(),
        };
        Ok(targets)
    }

    async fn call(
        &self,
        target: &AgentTarget,
        request: AgentRequest,
    ) -> std::result::Result<AgentResponse, AgentError> {
        let agent = self
            .agent(&target.name)
            .ok_or_else(|| AgentError::unavailable(format!("unknown agent {}", target.name)))?;
        let _guard = self.enter();
        agent.calls.fetch_add(1, Ordering::SeqCst);

        let fault = agent.fault.read().clone();
        if let Some(delay) = fault.delay {
            tokio::time::sleep(delay).await;
        }
        if fault.hang {
            std::future::pending::<()>().await;
        }
        if let Some(code) = fault.code {
            return Err(AgentError::new(code, format!("injected {code} fault")));
        }

        let is_search = matches!(
            request,
            AgentRequest::Search { .. }
                | AgentRequest::SearchById { .. }
                | AgentRequest::LinearSearch { .. }
                | AgentRequest::LinearSearchById { .. }
        );
        if is_search && agent.take_empty_search() {
            return Ok(AgentResponse::Candidates(Vec::new()));
        }

        agent.handle(request)
    }

    fn agent_count(&self) -> usize {
        self.agents.len()
    }
}
