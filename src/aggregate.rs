use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::models::{
    percentage, Gac, GacNumber, GacResult, GacStatistics, GeneralStatistics, Puntaje, RacAverage,
    RacId, RacResult, Student, StudentId, StudentResults,
};

/// Scores at or above this value count as approved in backend statistics.
pub const APPROVED_MIN: u8 = 3;
pub const TOP_RACS: usize = 5;
const EXCERPT_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct ScoredRow {
    pub student_id: StudentId,
    pub rac_id: RacId,
    pub rac_number: i32,
    pub rac_description: String,
    pub gac_number: GacNumber,
    pub gac_description: String,
    pub puntaje: Puntaje,
    pub evaluated_at: Option<DateTime<Utc>>,
}

pub fn excerpt(text: &str) -> String {
    if text.chars().count() > EXCERPT_CHARS {
        let cut: String = text.chars().take(EXCERPT_CHARS).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

fn average(total: u32, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        f64::from(total) / count as f64
    }
}

pub fn general_statistics(
    rows: &[ScoredRow],
    total_students: i64,
    total_racs: i64,
) -> GeneralStatistics {
    let total_scores = rows.len() as i64;
    let total: u32 = rows.iter().map(|row| u32::from(row.puntaje.value())).sum();
    let approved = rows
        .iter()
        .filter(|row| row.puntaje.value() >= APPROVED_MIN)
        .count() as i64;

    let mut per_rac: HashMap<RacId, (&ScoredRow, usize, u32)> = HashMap::new();
    for row in rows {
        let entry = per_rac.entry(row.rac_id).or_insert((row, 0, 0));
        entry.1 += 1;
        entry.2 += u32::from(row.puntaje.value());
    }

    let mut top_racs: Vec<RacAverage> = per_rac
        .into_values()
        .map(|(row, count, total)| RacAverage {
            number: row.rac_number,
            description: excerpt(&row.rac_description),
            average: average(total, count),
            total_scores: count as i64,
        })
        .collect();
    top_racs.sort_by(|a, b| {
        b.average
            .partial_cmp(&a.average)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.number.cmp(&b.number))
    });
    top_racs.truncate(TOP_RACS);

    GeneralStatistics {
        total_scores,
        total_students,
        total_racs,
        average: average(total, rows.len()),
        approved,
        failed: total_scores - approved,
        approval_percentage: percentage(approved, total_scores),
        top_racs,
    }
}

/// Per-GAC statistics, only for GACs that have at least one score.
pub fn gac_statistics(rows: &[ScoredRow], gacs: &[Gac]) -> Vec<GacStatistics> {
    let mut ordered: Vec<&Gac> = gacs.iter().collect();
    ordered.sort_by_key(|gac| gac.number);

    ordered
        .into_iter()
        .filter_map(|gac| {
            let scores: Vec<u8> = rows
                .iter()
                .filter(|row| row.gac_number == gac.number)
                .map(|row| row.puntaje.value())
                .collect();
            if scores.is_empty() {
                return None;
            }
            let total_scores = scores.len() as i64;
            let approved = scores.iter().filter(|v| **v >= APPROVED_MIN).count() as i64;
            let total: u32 = scores.iter().map(|v| u32::from(*v)).sum();
            Some(GacStatistics {
                gac_number: gac.number,
                description: excerpt(&gac.description),
                average: average(total, scores.len()),
                total_scores,
                approved,
                failed: total_scores - approved,
                approval_percentage: percentage(approved, total_scores),
            })
        })
        .collect()
}

pub fn student_results(student: Student, rows: &[ScoredRow]) -> StudentResults {
    let mut by_gac: BTreeMap<GacNumber, GacResult> = BTreeMap::new();
    let mut total = 0u32;
    let mut count = 0usize;

    for row in rows.iter().filter(|row| row.student_id == student.id) {
        let entry = by_gac.entry(row.gac_number).or_insert_with(|| GacResult {
            gac_number: row.gac_number,
            description: row.gac_description.clone(),
            racs: Vec::new(),
            average: 0.0,
        });
        entry.racs.push(RacResult {
            rac_number: row.rac_number,
            description: row.rac_description.clone(),
            puntaje: row.puntaje,
            evaluated_at: row.evaluated_at,
        });
        total += u32::from(row.puntaje.value());
        count += 1;
    }

    let by_gac: Vec<GacResult> = by_gac
        .into_values()
        .map(|mut gac| {
            gac.racs.sort_by_key(|rac| rac.rac_number);
            let gac_total: u32 = gac.racs.iter().map(|rac| u32::from(rac.puntaje.value())).sum();
            gac.average = average(gac_total, gac.racs.len());
            gac
        })
        .collect();

    StudentResults {
        student,
        by_gac,
        total_scores: count as i64,
        average: average(total, count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrollmentStatus;

    fn row(student_id: StudentId, rac_id: RacId, gac_number: GacNumber, score: i64) -> ScoredRow {
        ScoredRow {
            student_id,
            rac_id,
            rac_number: rac_id as i32,
            rac_description: format!("RAC {rac_id}"),
            gac_number,
            gac_description: format!("GAC {gac_number}"),
            puntaje: Puntaje::new(score).unwrap(),
            evaluated_at: None,
        }
    }

    fn student(id: StudentId) -> Student {
        Student {
            id,
            document: format!("10000{id}"),
            name: format!("Estudiante {id}"),
            email: None,
            group: "A1".to_string(),
            status: EnrollmentStatus::Enrolled,
        }
    }

    #[test]
    fn general_counts_three_as_approved() {
        let rows = vec![row(1, 1, 1, 3), row(1, 2, 1, 2), row(2, 1, 1, 5), row(2, 3, 2, 4)];
        let stats = general_statistics(&rows, 2, 3);

        assert_eq!(stats.total_scores, 4);
        assert_eq!(stats.approved, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.approval_percentage, 75.0);
        assert_eq!(stats.average, 3.5);
        assert_eq!(
            stats.top_racs.iter().map(|r| r.number).collect::<Vec<_>>(),
            vec![1, 3, 2]
        );
    }

    #[test]
    fn empty_statistics_are_zeroed() {
        let stats = general_statistics(&[], 0, 0);
        assert_eq!(stats.average, 0.0);
        assert_eq!(stats.approval_percentage, 0.0);
        assert!(stats.top_racs.is_empty());
    }

    #[test]
    fn gac_statistics_skip_unscored_gacs() {
        let gacs = vec![
            Gac { number: 2, description: "Planificación".to_string() },
            Gac { number: 1, description: "Fundamentos".to_string() },
            Gac { number: 3, description: "Cierre".to_string() },
        ];
        let rows = vec![row(1, 1, 1, 4), row(1, 2, 2, 2), row(1, 3, 2, 4)];
        let stats = gac_statistics(&rows, &gacs);

        assert_eq!(stats.iter().map(|s| s.gac_number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(stats[1].average, 3.0);
        assert_eq!(stats[1].approved, 1);
    }

    #[test]
    fn student_results_group_by_gac() {
        let rows = vec![row(1, 2, 1, 4), row(1, 1, 1, 5), row(2, 1, 1, 1), row(1, 4, 2, 3)];
        let results = student_results(student(1), &rows);

        assert_eq!(results.total_scores, 3);
        assert_eq!(results.average, 4.0);
        assert_eq!(results.by_gac.len(), 2);
        assert_eq!(results.by_gac[0].average, 4.5);
        assert_eq!(
            results.by_gac[0].racs.iter().map(|r| r.rac_number).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn excerpt_truncates_long_text() {
        let long = "a".repeat(120);
        assert_eq!(excerpt(&long).len(), 103);
        assert_eq!(excerpt("corto"), "corto");
    }
}
