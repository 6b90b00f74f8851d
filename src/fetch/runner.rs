// src/fetch/runner.rs
//! Source chain runner: try each source in order, first successful extraction wins.
//!
//! `TRYING(0) -> { SUCCEEDED | TRYING(i+1) | EXHAUSTED }`. Sources are probed
//! strictly sequentially and never retried within one run.

use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::error::AttemptError;
use crate::fetch::decode::{decode, Decoded};
use crate::fetch::ensure_metrics_described;
use crate::fetch::fetcher::Fetcher;
use crate::fetch::types::{Extracted, ExtractionResult, SourceSpec};

/// Record of one attempted source.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub source_name: String,
    pub source_url: String,
    /// `None` when this attempt answered the chain.
    pub error: Option<AttemptError>,
}

impl Attempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Succeeded(ExtractionResult),
    /// Every source was attempted and failed.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainRun {
    pub outcome: ChainOutcome,
    pub attempts: Vec<Attempt>,
}

impl ChainRun {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, ChainOutcome::Succeeded(_))
    }

    pub fn result(&self) -> Option<&ExtractionResult> {
        match &self.outcome {
            ChainOutcome::Succeeded(r) => Some(r),
            ChainOutcome::Exhausted => None,
        }
    }

    pub fn into_result(self) -> Option<ExtractionResult> {
        match self.outcome {
            ChainOutcome::Succeeded(r) => Some(r),
            ChainOutcome::Exhausted => None,
        }
    }
}

/// Run `sources` in order through fetch -> decode -> `extract`.
/// Never fails: total failure is reported as [`ChainOutcome::Exhausted`].
pub async fn run_chain<F>(fetcher: &dyn Fetcher, sources: &[SourceSpec], extract: F) -> ChainRun
where
    F: Fn(&Decoded, &SourceSpec) -> Option<Extracted> + Sync,
{
    ensure_metrics_described();

    let mut attempts = Vec::with_capacity(sources.len());
    for (position, source) in sources.iter().enumerate() {
        let t0 = Instant::now();
        let res = attempt(fetcher, source, &extract).await;
        histogram!("fetch_attempt_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("fetch_attempts_total").increment(1);

        match res {
            Ok(extracted) => {
                debug!(
                    target: "fetch",
                    source = %source.name,
                    position,
                    "source answered"
                );
                attempts.push(Attempt {
                    source_name: source.name.clone(),
                    source_url: source.url.clone(),
                    error: None,
                });
                return ChainRun {
                    outcome: ChainOutcome::Succeeded(ExtractionResult {
                        value: extracted.value,
                        as_of: extracted.as_of,
                        source_name: source.name.clone(),
                        source_url: source.url.clone(),
                        position,
                    }),
                    attempts,
                };
            }
            Err(e) => {
                warn!(
                    target: "fetch",
                    source = %source.name,
                    url = %source.url,
                    position,
                    reason = e.reason(),
                    error = %e,
                    "source attempt failed"
                );
                counter!("fetch_attempt_failures_total", "reason" => e.reason()).increment(1);
                attempts.push(Attempt {
                    source_name: source.name.clone(),
                    source_url: source.url.clone(),
                    error: Some(e),
                });
            }
        }
    }

    if !sources.is_empty() {
        warn!(target: "fetch", tried = sources.len(), "source chain exhausted");
    }
    counter!("fetch_chains_exhausted_total").increment(1);
    ChainRun {
        outcome: ChainOutcome::Exhausted,
        attempts,
    }
}

async fn attempt<F>(
    fetcher: &dyn Fetcher,
    source: &SourceSpec,
    extract: &F,
) -> Result<Extracted, AttemptError>
where
    F: Fn(&Decoded, &SourceSpec) -> Option<Extracted> + Sync,
{
    // The deadline wraps the whole fetch so file reads and test doubles obey it too.
    let body = match tokio::time::timeout(source.timeout(), fetcher.fetch(source)).await {
        Ok(res) => res?,
        Err(_) => return Err(AttemptError::Timeout(source.timeout_ms)),
    };

    let decoded = decode(&body, source);
    if decoded.is_empty() {
        return Err(AttemptError::Undecodable(source.format));
    }
    extract(&decoded, source).ok_or(AttemptError::NoPlausibleValue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::extract::extract;
    use crate::fetch::fetcher::{Scripted, ScriptedFetcher};
    use crate::fetch::types::{FieldSpec, Format, Plausible, Reading};

    fn field() -> FieldSpec {
        FieldSpec::scalar("vix", Plausible::ANY, vec![])
    }

    #[tokio::test]
    async fn empty_chain_is_exhausted() {
        let f = ScriptedFetcher::new();
        let fs = field();
        let run = run_chain(&f, &[], |d, s| extract(d, &fs, s)).await;
        assert_eq!(run.outcome, ChainOutcome::Exhausted);
        assert!(run.attempts.is_empty());
    }

    #[tokio::test]
    async fn undecodable_and_unextractable_bodies_advance() {
        let f = ScriptedFetcher::new()
            .route("a", Scripted::body("{not json"))
            .route("b", Scripted::body("Date,Close\n2024-01-02,n/a\n"))
            .route("c", Scripted::body("Date,Close\n2024-01-02,14.1\n"));
        let sources = vec![
            SourceSpec::new("A", "a", Format::Json).with_hint(&["close"]),
            SourceSpec::new("B", "b", Format::Csv).with_hint(&["close"]),
            SourceSpec::new("C", "c", Format::Csv).with_hint(&["close"]),
        ];
        let fs = field();
        let run = run_chain(&f, &sources, |d, s| extract(d, &fs, s)).await;

        let errors: Vec<_> = run.attempts.iter().map(|a| a.error.clone()).collect();
        assert_eq!(
            errors,
            vec![
                Some(AttemptError::Undecodable(Format::Json)),
                Some(AttemptError::NoPlausibleValue),
                None,
            ]
        );
        let res = run.result().unwrap();
        assert_eq!(res.value, Reading::Scalar(14.1));
        assert_eq!(res.position, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out_and_chain_advances() {
        let f = ScriptedFetcher::new()
            .route("slow", Scripted::delayed(500, Scripted::body("Close\n1\n")))
            .route("fast", Scripted::body("Close\n2\n"));
        let sources = vec![
            SourceSpec::new("Slow", "slow", Format::Csv)
                .with_hint(&["close"])
                .with_timeout_ms(150),
            SourceSpec::new("Fast", "fast", Format::Csv).with_hint(&["close"]),
        ];
        let fs = field();
        let run = run_chain(&f, &sources, |d, s| extract(d, &fs, s)).await;
        assert_eq!(run.attempts[0].error, Some(AttemptError::Timeout(150)));
        assert_eq!(run.result().unwrap().source_name, "Fast");
    }
}
