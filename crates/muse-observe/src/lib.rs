//! muse-observe: vendor-neutral observability ABI.
//!
//! Engine crates depend only on these traits and event types. Backends
//! (Prometheus exporters, dashboards) live with the serving layer.

pub trait Counter: Send + Sync {
    fn inc(&self, v: u64);
}
pub trait Gauge: Send + Sync {
    fn set(&self, v: i64);
}
pub trait Histogram: Send + Sync {
    fn observe(&self, v: f64);
}

pub trait Meter: Send + Sync + 'static {
    fn counter(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter>;
    fn gauge(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge>;
    fn histo(
        &self,
        name: &'static str,
        _buckets: &'static [f64],
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram>;
    fn emit(&self, evt: EngineEvent);
}

/// A do-nothing meter for tests and users who don't care about telemetry.
#[derive(Clone, Default)]
pub struct NoopMeter;
struct NoopC;
impl Counter for NoopC {
    fn inc(&self, _v: u64) {}
}
struct NoopG;
impl Gauge for NoopG {
    fn set(&self, _v: i64) {}
}
struct NoopH;
impl Histogram for NoopH {
    fn observe(&self, _v: f64) {}
}
impl Meter for NoopMeter {
    fn counter(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        Box::new(NoopC)
    }
    fn gauge(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        Box::new(NoopG)
    }
    fn histo(
        &self,
        _n: &'static str,
        _b: &'static [f64],
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram> {
        Box::new(NoopH)
    }
    fn emit(&self, _e: EngineEvent) {}
}

/// Typed events for live observation (ids and vectors never included).
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum EngineEvent {
    Cache(CacheEvt),
    Index(IndexEvt),
    Query(QueryEvt),
}

#[derive(Clone, Debug)]
pub struct CacheEvt {
    pub name: &'static str,
    pub hit_ratio: f32,
}

#[derive(Clone, Debug)]
pub enum IndexEvt {
    Insert { active: usize },
    Tombstone { tombstone_ratio: f32 },
    CompactionStart { nodes: usize, tombstones: usize },
    CompactionFinish { nodes_before: usize, nodes_after: usize },
}

#[derive(Clone, Debug)]
pub enum QueryEvt {
    Similar { k: usize, returned: usize, cached: bool },
    Seed,
}

/// Macros (simple versions). Can be feature-gated if desired.
#[macro_export]
macro_rules! obs_count {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.counter($name, $labels).inc($v as u64);
    }};
}
#[macro_export]
macro_rules! obs_hist {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.histo($name, &[], $labels).observe($v as f64);
    }};
}
#[macro_export]
macro_rules! obs_timed {
    ($m:expr, $name:expr, $labels:expr, $body:block) => {{
        let __t = std::time::Instant::now();
        let __ret = { $body };
        let __ms = __t.elapsed().as_secs_f64() * 1000.0;
        $m.histo($name, &[], $labels).observe(__ms);
        __ret
    }};
}
