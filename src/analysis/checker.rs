use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{encoded_marker, replace_value, Checker, ProbeContext};
use crate::requester::{Probe, Requester};
use crate::transform::decode_once;

pub const PROBE_START: &str = "st4r7s";
pub const PROBE_END: &str = "3nd";

/// Efficiency given to a reflection the server escaped with a backslash.
const ESCAPED_EFFICIENCY: u8 = 90;

/// Normalized edit-distance similarity in percent.
pub fn similarity(a: &str, b: &str) -> u8 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 100;
    }
    let dist = distance::levenshtein(a, b);
    let ratio = 1.0 - (dist as f64 / longest as f64);
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Confirms a vector by sending it wrapped in start/end tags and measuring how
/// much of it survives in each reflection.
pub struct FuzzyChecker {
    requester: Arc<dyn Requester>,
}

impl FuzzyChecker {
    pub fn new(requester: Arc<dyn Requester>) -> Self {
        Self { requester }
    }
}

impl FuzzyChecker {
    async fn efficiencies(
        &self,
        ctx: ProbeContext<'_>,
        vector: &str,
        positions: &[usize],
    ) -> Vec<u8> {
        let mut probe = format!("{PROBE_START}{vector}{PROBE_END}");
        if let Some(enc) = ctx.encoder {
            probe = enc.encode(&decode_once(&probe));
        }
        let needle = encoded_marker(ctx.encoder);
        let params = replace_value(ctx.params, &needle, &probe);
        let spec = ctx.base.clone().with_params(params);

        let text = match self.requester.execute(&spec).await {
            Probe::Response(r) => r.text.to_lowercase(),
            _ => return Vec::new(),
        };

        let expected = format!("{PROBE_START}{vector}{PROBE_END}").to_lowercase();
        let escaped = format!("{PROBE_START}\\{vector}").to_lowercase();
        let width = expected.chars().count();

        let mut efficiencies = Vec::with_capacity(positions.len());
        for (start, _) in text.match_indices(PROBE_START).take(positions.len()) {
            let tail = &text[start..];
            let reflected: String = tail.chars().take(width).collect();
            let efficiency = if !vector.starts_with('\\') && tail.starts_with(&escaped) {
                ESCAPED_EFFICIENCY
            } else {
                similarity(&reflected, &expected)
            };
            efficiencies.push(efficiency);
        }
        debug!(vector, ?efficiencies, "checker efficiencies");
        efficiencies
    }
}

#[async_trait]
impl Checker for FuzzyChecker {
    async fn check(&self, ctx: ProbeContext<'_>, vector: &str, positions: &[usize]) -> Vec<u8> {
        let mut efficiencies = self.efficiencies(ctx, vector, positions).await;
        efficiencies.retain(|e| *e > 0);
        efficiencies
    }

    async fn check_each(
        &self,
        ctx: ProbeContext<'_>,
        vector: &str,
        positions: &[usize],
    ) -> Vec<u8> {
        self.efficiencies(ctx, vector, positions).await
    }
}
