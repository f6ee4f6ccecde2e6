use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::generator::{COMMENT_BREAK, SCRIPT_BREAK};
use super::{Checker, Context, FilterChecker, OccurrenceMap, ProbeContext};

/// Probes which structural characters survive the target's filtering, per reflection.
pub struct CharFilterChecker {
    checker: Arc<dyn Checker>,
}

impl CharFilterChecker {
    pub fn new(checker: Arc<dyn Checker>) -> Self {
        Self { checker }
    }
}

fn environments(occurrences: &OccurrenceMap) -> BTreeSet<String> {
    let mut envs: BTreeSet<String> = ["<", ">"].iter().map(|s| s.to_string()).collect();
    for occ in occurrences.values() {
        match &occ.context {
            Context::Comment => {
                envs.insert(COMMENT_BREAK.to_string());
            }
            Context::Script { quote } => {
                if let Some(q) = quote {
                    envs.insert(q.to_string());
                }
                envs.insert(SCRIPT_BREAK.to_string());
            }
            Context::Attribute { name, quote, .. } => {
                if name.eq_ignore_ascii_case("srcdoc") {
                    envs.insert("&lt;".to_string());
                    envs.insert("&gt;".to_string());
                }
                if let Some(q) = quote {
                    envs.insert(q.to_string());
                }
            }
            Context::Html { .. } => {}
        }
    }
    envs
}

#[async_trait]
impl FilterChecker for CharFilterChecker {
    async fn annotate(&self, ctx: ProbeContext<'_>, occurrences: &mut OccurrenceMap) {
        let positions: Vec<usize> = occurrences.keys().copied().collect();
        for occ in occurrences.values_mut() {
            occ.scores.clear();
        }
        for env in environments(occurrences) {
            let mut efficiencies = self.checker.check_each(ctx, &env, &positions).await;
            efficiencies.resize(positions.len(), 0);
            debug!(probe = %env, ?efficiencies, "filter probe");
            for (occ, efficiency) in occurrences.values_mut().zip(efficiencies) {
                occ.scores.insert(env.clone(), efficiency);
            }
        }
    }
}
