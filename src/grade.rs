use std::fmt;

use crate::models::Puntaje;

/// Minimum raw score that counts as passed.
pub const PASS_THRESHOLD: f64 = 3.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qualitative {
    Excellent,
    Remarkable,
    Passed,
    Insufficient,
    Deficient,
    Failed,
    Unrated,
}

impl Qualitative {
    pub fn label(self) -> &'static str {
        match self {
            Qualitative::Excellent => "Excellent",
            Qualitative::Remarkable => "Remarkable",
            Qualitative::Passed => "Passed",
            Qualitative::Insufficient => "Insufficient",
            Qualitative::Deficient => "Deficient",
            Qualitative::Failed => "Failed",
            Qualitative::Unrated => "Unrated",
        }
    }
}

impl fmt::Display for Qualitative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Semaphore color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Green,
    Yellow,
    Red,
    Neutral,
}

impl Tier {
    pub fn color(self) -> &'static str {
        match self {
            Tier::Green => "green",
            Tier::Yellow => "yellow",
            Tier::Red => "red",
            Tier::Neutral => "neutral",
        }
    }

    pub fn severity(self) -> &'static str {
        match self {
            Tier::Green => "Excellent",
            Tier::Yellow => "Acceptable",
            Tier::Red => "Deficient",
            Tier::Neutral => "Unrated",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.color())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub score: Option<f64>,
    pub qualitative: Qualitative,
    pub passed: bool,
    pub tier: Tier,
}

impl Classification {
    pub fn unrated() -> Self {
        Self {
            score: None,
            qualitative: Qualitative::Unrated,
            passed: false,
            tier: Tier::Neutral,
        }
    }

    /// `"4.00 - Remarkable"`, or the bare label for unrated input.
    pub fn formatted(&self) -> String {
        match self.score {
            Some(score) => format!("{score:.2} - {}", self.qualitative),
            None => self.qualitative.to_string(),
        }
    }

    pub fn severity(&self) -> &'static str {
        self.tier.severity()
    }
}

pub fn round_one_decimal(score: f64) -> f64 {
    (score * 10.0).round() / 10.0
}

pub fn qualitative(rounded: f64) -> Qualitative {
    if rounded >= 5.0 {
        Qualitative::Excellent
    } else if rounded >= 4.0 {
        Qualitative::Remarkable
    } else if rounded >= 3.5 {
        Qualitative::Passed
    } else if rounded >= 3.0 {
        Qualitative::Insufficient
    } else if rounded >= 1.0 {
        Qualitative::Deficient
    } else {
        Qualitative::Failed
    }
}

pub fn tier(rounded: f64) -> Tier {
    if rounded >= 4.0 {
        Tier::Green
    } else if rounded >= 3.0 {
        Tier::Yellow
    } else {
        Tier::Red
    }
}

// Label, tier and pass flag are computed independently. A 3.5-3.9 average is
// "Passed" and passes but stays yellow; the pass flag reads the raw score.
pub fn classify(score: f64) -> Classification {
    if !score.is_finite() {
        return Classification::unrated();
    }

    let rounded = round_one_decimal(score);
    Classification {
        score: Some(score),
        qualitative: qualitative(rounded),
        passed: score >= PASS_THRESHOLD,
        tier: tier(rounded),
    }
}

pub fn classify_opt(score: Option<f64>) -> Classification {
    score.map_or_else(Classification::unrated, classify)
}

/// Derived view over one or more scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeSummary {
    pub count: usize,
    pub average: Option<f64>,
    pub classification: Classification,
}

impl GradeSummary {
    pub fn from_scores<I>(scores: I) -> Self
    where
        I: IntoIterator<Item = Puntaje>,
    {
        let (count, total) = scores
            .into_iter()
            .fold((0usize, 0u32), |(count, total), puntaje| {
                (count + 1, total + u32::from(puntaje.value()))
            });

        let average = if count == 0 {
            None
        } else {
            Some(f64::from(total) / count as f64)
        };

        Self {
            count,
            average,
            classification: classify_opt(average),
        }
    }

    pub fn from_average(average: f64, count: usize) -> Self {
        Self {
            count,
            average: Some(average),
            classification: classify(average),
        }
    }
}
