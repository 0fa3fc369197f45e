//! Output formatting for CLI display.

use visitgate::commission::Commission;
use visitgate::model::{CompletionRecord, QualityTier, VerificationResult};

fn tier_label(tier: QualityTier) -> &'static str {
    match tier {
        QualityTier::High => "high",
        QualityTier::Medium => "medium",
        QualityTier::Low => "low",
    }
}

pub(super) fn format_verification(result: &VerificationResult) -> String {
    let verdict = if result.within_threshold {
        "within"
    } else {
        "outside"
    };
    format!(
        "{:.1} m from target, {verdict} the {:.0} m threshold ({} accuracy)",
        result.distance_meters,
        result.threshold_meters,
        tier_label(result.quality_tier),
    )
}

pub(super) fn format_commission(commission: &Commission) -> String {
    let mut out: Vec<String> = commission
        .lines
        .iter()
        .map(|l| format!("  {} × {} @ {} = {}", l.kind, l.units, l.rate, l.amount))
        .collect();
    out.push(format!("Total: {} {}", commission.currency, commission.total));
    out.join("\n")
}

pub(super) fn format_completion(record: &CompletionRecord) -> String {
    let submission = &record.submission;
    let summary = &record.summary;
    let mut out = format!(
        "Visit {} for {} submitted: commission {} {}\n\
         Tasks: {}/{} done ({}%), mandatory {}/{}, {} min on site",
        submission.visit_id,
        submission.customer.display_name(),
        record.commission.currency,
        record.commission.total,
        summary.completed_tasks,
        summary.total_tasks,
        summary.completion_percent,
        summary.completed_mandatory,
        summary.mandatory_tasks,
        summary.duration_minutes,
    );
    if let Some(record) = submission.proof.override_record() {
        out.push_str(&format!(
            "\nProximity overridden at {:.1} m: {}",
            record.distance_at_override_meters, record.justification
        ));
    }
    out
}
