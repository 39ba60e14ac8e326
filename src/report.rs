use std::fmt::Write;

use crate::grade::{self, GradeSummary};
use crate::models::{GacNumber, Statistics, StudentResults};
use crate::session::SessionSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub struct GacSummary {
    pub gac_number: GacNumber,
    pub description: String,
    pub grade: GradeSummary,
}

/// Grade summary per GAC from a student's saved scores, in GAC order.
pub fn summarize_by_gac(results: &StudentResults) -> Vec<GacSummary> {
    let mut summaries: Vec<GacSummary> = results
        .by_gac
        .iter()
        .map(|gac| GacSummary {
            gac_number: gac.gac_number,
            description: gac.description.clone(),
            grade: GradeSummary::from_scores(gac.racs.iter().map(|rac| rac.puntaje)),
        })
        .collect();

    summaries.sort_by_key(|summary| summary.gac_number);
    summaries
}

/// Grade summary per GAC over the drafts currently on the sheet. Blank
/// drafts are left out of the average.
pub fn summarize_sheet(snapshot: &SessionSnapshot) -> Vec<(GacNumber, GradeSummary)> {
    snapshot
        .sample
        .groups()
        .iter()
        .map(|(gac_number, racs)| {
            let grade =
                GradeSummary::from_scores(racs.iter().filter_map(|rac| snapshot.draft(rac.id)));
            (*gac_number, grade)
        })
        .collect()
}

pub fn build_statistics_report(statistics: &Statistics) -> String {
    let general = &statistics.general;
    let overall = GradeSummary::from_average(general.average, general.total_scores as usize);

    let mut output = String::new();
    let _ = writeln!(output, "# Competency Evaluation Report");
    let _ = writeln!(
        output,
        "{} evaluations across {} students and {} RACs",
        general.total_scores, general.total_students, general.total_racs
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overall");

    if general.total_scores == 0 {
        let _ = writeln!(output, "No evaluations recorded yet.");
    } else {
        let _ = writeln!(
            output,
            "- Average: {} ({})",
            overall.classification.formatted(),
            overall.classification.tier
        );
        let _ = writeln!(
            output,
            "- Approved: {} / failed: {} ({:.1}% approval)",
            general.approved, general.failed, general.approval_percentage
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## By GAC");

    if statistics.per_gac.is_empty() {
        let _ = writeln!(output, "No GAC has evaluations yet.");
    } else {
        for gac in statistics.per_gac.iter() {
            let classification = grade::classify(gac.average);
            let _ = writeln!(
                output,
                "- GAC {} {}: {} [{}] over {} evaluations, {:.1}% approval",
                gac.gac_number,
                gac.description,
                classification.formatted(),
                classification.tier,
                gac.total_scores,
                gac.approval_percentage
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top RACs");

    if general.top_racs.is_empty() {
        let _ = writeln!(output, "No RAC has evaluations yet.");
    } else {
        for rac in general.top_racs.iter() {
            let _ = writeln!(
                output,
                "- RAC {} ({}): average {:.2} across {} evaluations",
                rac.number, rac.description, rac.average, rac.total_scores
            );
        }
    }

    output
}

pub fn build_student_report(results: &StudentResults) -> String {
    let student = &results.student;
    let overall = if results.total_scores == 0 {
        GradeSummary::from_scores(std::iter::empty())
    } else {
        GradeSummary::from_average(results.average, results.total_scores as usize)
    };

    let mut output = String::new();
    let _ = writeln!(output, "# Results for {}", student.name);
    let _ = writeln!(
        output,
        "Document {} in group {}",
        student.document, student.group
    );
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Overall: {} [{}], {}",
        overall.classification.formatted(),
        overall.classification.severity(),
        if overall.classification.passed {
            "passed"
        } else {
            "not passed"
        }
    );

    if results.by_gac.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "No evaluations recorded for this student.");
        return output;
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## By GAC");
    for summary in summarize_by_gac(results) {
        let _ = writeln!(
            output,
            "- GAC {} {}: {} [{}]",
            summary.gac_number,
            summary.description,
            summary.grade.classification.formatted(),
            summary.grade.classification.tier
        );
    }

    for gac in results.by_gac.iter() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## GAC {}: {}", gac.gac_number, gac.description);
        for rac in gac.racs.iter() {
            let when = rac
                .evaluated_at
                .map(|at| at.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                output,
                "- RAC {} ({}): {} on {}",
                rac.rac_number, rac.description, rac.puntaje, when
            );
        }
    }

    output
}
