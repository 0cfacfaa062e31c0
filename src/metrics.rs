//! Process-wide counters exposed at `/metrics` in Prometheus text format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::upstream::{Upstream, UpstreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Translate,
    CreateQuestion,
    QuestionResults,
}

impl Endpoint {
    pub const ALL: [Endpoint; 3] = [
        Endpoint::Translate,
        Endpoint::CreateQuestion,
        Endpoint::QuestionResults,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Translate => "natural_language_to_sql",
            Endpoint::CreateQuestion => "create_question",
            Endpoint::QuestionResults => "get_question_results",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

const UPSTREAMS: [Upstream; 2] = [Upstream::Analytics, Upstream::LanguageModel];
const ERROR_KINDS: [&str; 6] = [
    "invalid_request",
    "not_configured",
    "timeout",
    "unreachable",
    "rejected",
    "invalid_response",
];

fn upstream_index(upstream: Upstream) -> usize {
    match upstream {
        Upstream::Analytics => 0,
        Upstream::LanguageModel => 1,
    }
}

pub struct Metrics {
    requests: [AtomicU64; 3],
    failures: [AtomicU64; 3],
    upstream_calls: [AtomicU64; 2],
    upstream_errors: [[AtomicU64; 6]; 2],
    process_start_epoch: f64,
    process_start_instant: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        let start = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            requests: Default::default(),
            failures: Default::default(),
            upstream_calls: Default::default(),
            upstream_errors: Default::default(),
            process_start_epoch: start.as_secs_f64(),
            process_start_instant: Instant::now(),
        }
    }
}

impl Metrics {
    pub fn record_request(&self, endpoint: Endpoint) {
        self.requests[endpoint.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, endpoint: Endpoint) {
        self.failures[endpoint.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_call(&self, upstream: Upstream) {
        self.upstream_calls[upstream_index(upstream)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_error(&self, err: &UpstreamError) {
        let kind = err.kind();
        if let Some(k) = ERROR_KINDS.iter().position(|name| *name == kind) {
            self.upstream_errors[upstream_index(err.upstream())][k].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests(&self, endpoint: Endpoint) -> u64 {
        self.requests[endpoint.index()].load(Ordering::Relaxed)
    }

    pub fn failures(&self, endpoint: Endpoint) -> u64 {
        self.failures[endpoint.index()].load(Ordering::Relaxed)
    }

    pub fn upstream_calls(&self, upstream: Upstream) -> u64 {
        self.upstream_calls[upstream_index(upstream)].load(Ordering::Relaxed)
    }

    pub fn render(&self) -> String {
        let mut buf = String::new();
        writeln!(
            &mut buf,
            "# HELP nlq_bridge_requests_total Requests received per endpoint\n# TYPE nlq_bridge_requests_total counter"
        )
        .ok();
        for ep in Endpoint::ALL {
            writeln!(
                &mut buf,
                "nlq_bridge_requests_total{{endpoint=\"{}\"}} {}",
                ep.as_str(),
                self.requests(ep)
            )
            .ok();
        }
        writeln!(
            &mut buf,
            "# HELP nlq_bridge_failures_total Error responses per endpoint\n# TYPE nlq_bridge_failures_total counter"
        )
        .ok();
        for ep in Endpoint::ALL {
            writeln!(
                &mut buf,
                "nlq_bridge_failures_total{{endpoint=\"{}\"}} {}",
                ep.as_str(),
                self.failures(ep)
            )
            .ok();
        }
        writeln!(
            &mut buf,
            "# HELP nlq_bridge_upstream_calls_total Outbound calls attempted per upstream\n# TYPE nlq_bridge_upstream_calls_total counter"
        )
        .ok();
        for up in UPSTREAMS {
            writeln!(
                &mut buf,
                "nlq_bridge_upstream_calls_total{{upstream=\"{}\"}} {}",
                up.as_str(),
                self.upstream_calls(up)
            )
            .ok();
        }
        writeln!(
            &mut buf,
            "# HELP nlq_bridge_upstream_errors_total Outbound call failures per upstream and kind\n# TYPE nlq_bridge_upstream_errors_total counter"
        )
        .ok();
        for up in UPSTREAMS {
            for (k, kind) in ERROR_KINDS.iter().enumerate() {
                let v = self.upstream_errors[upstream_index(up)][k].load(Ordering::Relaxed);
                writeln!(
                    &mut buf,
                    "nlq_bridge_upstream_errors_total{{upstream=\"{}\",kind=\"{}\"}} {}",
                    up.as_str(),
                    kind,
                    v
                )
                .ok();
            }
        }
        writeln!(
            &mut buf,
            "# HELP nlq_bridge_build_info Build information\n# TYPE nlq_bridge_build_info gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "nlq_bridge_build_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        )
        .ok();
        writeln!(
            &mut buf,
            "# HELP nlq_bridge_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE nlq_bridge_process_start_time_seconds gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "nlq_bridge_process_start_time_seconds {}",
            self.process_start_epoch
        )
        .ok();
        writeln!(
            &mut buf,
            "# HELP nlq_bridge_process_uptime_seconds Process uptime seconds\n# TYPE nlq_bridge_process_uptime_seconds gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "nlq_bridge_process_uptime_seconds {}",
            self.process_start_instant.elapsed().as_secs_f64()
        )
        .ok();
        buf
    }
}
