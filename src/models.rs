use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;

pub type StudentId = i64;
pub type RacId = i64;
pub type GacNumber = i32;

/// Number of RACs drawn per GAC when an item sample is generated.
pub const SAMPLE_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrollmentStatus {
    PreEnrolled,
    Enrolled,
}

impl EnrollmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::PreEnrolled => "prematricula",
            EnrollmentStatus::Enrolled => "matriculado",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "prematricula" => Some(EnrollmentStatus::PreEnrolled),
            "matriculado" => Some(EnrollmentStatus::Enrolled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub id: StudentId,
    pub document: String,
    pub name: String,
    pub email: Option<String>,
    pub group: String,
    pub status: EnrollmentStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gac {
    pub number: GacNumber,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rac {
    pub id: RacId,
    pub number: i32,
    pub description: String,
    pub gac_number: GacNumber,
}

/// An integer score in `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Puntaje(u8);

impl Puntaje {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: i64) -> Option<Self> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Some(Puntaje(value as u8))
        } else {
            None
        }
    }

    /// Accepts only floats that are exact integers in range, e.g. `4.0`.
    pub fn from_f64(value: f64) -> Option<Self> {
        if value.is_finite() && value.fract() == 0.0 {
            Self::new(value as i64)
        } else {
            None
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Puntaje {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of parsing raw user input for a draft score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftInput {
    Clear,
    Set(Puntaje),
    Invalid,
}

impl DraftInput {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return DraftInput::Clear;
        }
        match trimmed.parse::<i64>().ok().and_then(Puntaje::new) {
            Some(puntaje) => DraftInput::Set(puntaje),
            None => DraftInput::Invalid,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub rac_id: RacId,
    pub puntaje: Puntaje,
    pub evaluated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreEntry {
    pub rac_id: RacId,
    pub puntaje: Puntaje,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedScore {
    pub rac_id: RacId,
    pub puntaje: Puntaje,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Saved(SavedScore),
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemResult {
    pub rac_id: RacId,
    pub outcome: ItemOutcome,
}

/// Randomized subset of RACs per GAC used for one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemSample {
    groups: BTreeMap<GacNumber, Vec<Rac>>,
}

impl ItemSample {
    pub fn new(groups: BTreeMap<GacNumber, Vec<Rac>>) -> Self {
        Self { groups }
    }

    /// Draws up to [`SAMPLE_SIZE`] distinct RACs per GAC, uniformly at random.
    /// GACs with fewer RACs keep all of them.
    pub fn draw<I>(racs: I) -> Self
    where
        I: IntoIterator<Item = Rac>,
    {
        let mut pools: BTreeMap<GacNumber, Vec<Rac>> = BTreeMap::new();
        for rac in racs {
            pools.entry(rac.gac_number).or_default().push(rac);
        }

        let mut rng = rand::rng();
        let groups = pools
            .into_iter()
            .map(|(gac_number, pool)| {
                let mut chosen: Vec<Rac> = pool
                    .choose_multiple(&mut rng, SAMPLE_SIZE)
                    .cloned()
                    .collect();
                chosen.sort_by_key(|rac| rac.number);
                (gac_number, chosen)
            })
            .collect();
        Self { groups }
    }

    pub fn groups(&self) -> &BTreeMap<GacNumber, Vec<Rac>> {
        &self.groups
    }

    pub fn racs(&self) -> impl Iterator<Item = &Rac> {
        self.groups.values().flatten()
    }

    pub fn rac_ids(&self) -> impl Iterator<Item = RacId> + '_ {
        self.racs().map(|rac| rac.id)
    }

    pub fn find(&self, rac_id: RacId) -> Option<&Rac> {
        self.racs().find(|rac| rac.id == rac_id)
    }

    pub fn contains(&self, rac_id: RacId) -> bool {
        self.find(rac_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RacAverage {
    pub number: i32,
    pub description: String,
    pub average: f64,
    pub total_scores: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneralStatistics {
    pub total_scores: i64,
    pub total_students: i64,
    pub total_racs: i64,
    pub average: f64,
    pub approved: i64,
    pub failed: i64,
    pub approval_percentage: f64,
    pub top_racs: Vec<RacAverage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GacStatistics {
    pub gac_number: GacNumber,
    pub description: String,
    pub average: f64,
    pub total_scores: i64,
    pub approved: i64,
    pub failed: i64,
    pub approval_percentage: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
    pub general: GeneralStatistics,
    pub per_gac: Vec<GacStatistics>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RacResult {
    pub rac_number: i32,
    pub description: String,
    pub puntaje: Puntaje,
    pub evaluated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GacResult {
    pub gac_number: GacNumber,
    pub description: String,
    pub racs: Vec<RacResult>,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentResults {
    pub student: Student,
    pub by_gac: Vec<GacResult>,
    pub total_scores: i64,
    pub average: f64,
}

/// Approval percentage as the backend reports it, `0.0` when nothing was scored.
pub fn percentage(part: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rac(id: RacId, gac_number: GacNumber) -> Rac {
        Rac {
            id,
            number: id as i32,
            description: format!("RAC {id}"),
            gac_number,
        }
    }

    #[test]
    fn puntaje_accepts_only_one_through_five() {
        assert!(Puntaje::new(0).is_none());
        assert!(Puntaje::new(6).is_none());
        for value in 1..=5 {
            assert_eq!(Puntaje::new(value).map(Puntaje::value), Some(value as u8));
        }
    }

    #[test]
    fn puntaje_from_float_requires_whole_number() {
        assert_eq!(Puntaje::from_f64(4.0).map(Puntaje::value), Some(4));
        assert!(Puntaje::from_f64(3.5).is_none());
        assert!(Puntaje::from_f64(f64::NAN).is_none());
    }

    #[test]
    fn draft_input_parsing() {
        assert_eq!(DraftInput::parse(""), DraftInput::Clear);
        assert_eq!(DraftInput::parse("  "), DraftInput::Clear);
        assert_eq!(DraftInput::parse("0"), DraftInput::Invalid);
        assert_eq!(DraftInput::parse("6"), DraftInput::Invalid);
        assert_eq!(DraftInput::parse("2.5"), DraftInput::Invalid);
        assert_eq!(DraftInput::parse("abc"), DraftInput::Invalid);
        assert!(matches!(DraftInput::parse("4"), DraftInput::Set(p) if p.value() == 4));
    }

    #[test]
    fn sample_lookups_span_groups() {
        let mut groups = BTreeMap::new();
        groups.insert(1, vec![rac(10, 1), rac(11, 1)]);
        groups.insert(2, vec![rac(20, 2)]);
        let sample = ItemSample::new(groups);

        assert_eq!(sample.len(), 3);
        assert!(sample.contains(20));
        assert!(!sample.contains(99));
        assert_eq!(sample.rac_ids().collect::<Vec<_>>(), vec![10, 11, 20]);
        assert!(ItemSample::default().is_empty());
    }

    #[test]
    fn draw_picks_three_distinct_per_gac() {
        let pool: Vec<Rac> = (1..=6)
            .map(|id| rac(id, 1))
            .chain((7..=8).map(|id| rac(id, 2)))
            .collect();

        for _ in 0..20 {
            let sample = ItemSample::draw(pool.clone());
            let first = &sample.groups()[&1];
            assert_eq!(first.len(), SAMPLE_SIZE);
            let mut ids: Vec<RacId> = first.iter().map(|rac| rac.id).collect();
            ids.dedup();
            assert_eq!(ids.len(), SAMPLE_SIZE);
            assert_eq!(sample.groups()[&2].len(), 2);
        }
    }

    #[test]
    fn percentage_of_empty_total_is_zero() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
    }
}
