use anyhow::Result;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Blend weights for the weakness score.
///
/// `score = accuracy * correct + (1 - accuracy) * incorrect`. The weights sum
/// to one so the score stays in `[0, 1]`, and `incorrect >= correct` keeps the
/// score non-increasing in accuracy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaknessWeights {
    correct: f64,
    incorrect: f64,
}

impl Default for WeaknessWeights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl WeaknessWeights {
    pub const DEFAULT: Self = Self {
        correct: 0.3,
        incorrect: 0.7,
    };

    pub fn new(correct: f64, incorrect: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&correct) || !(0.0..=1.0).contains(&incorrect) {
            anyhow::bail!("weakness weights must be within [0, 1]: {correct}/{incorrect}");
        }
        if (correct + incorrect - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            anyhow::bail!("weakness weights must sum to 1: {correct} + {incorrect}");
        }
        if correct > incorrect {
            anyhow::bail!(
                "correct weight {correct} exceeds incorrect weight {incorrect}; \
                 lower accuracy would score as less weak"
            );
        }
        Ok(Self { correct, incorrect })
    }

    pub fn correct(&self) -> f64 {
        self.correct
    }

    pub fn incorrect(&self) -> f64 {
        self.incorrect
    }

    pub fn score(&self, accuracy_rate: f64) -> f64 {
        let accuracy = accuracy_rate.clamp(0.0, 1.0);
        (accuracy * self.correct + (1.0 - accuracy) * self.incorrect).clamp(0.0, 1.0)
    }
}

/// Fraction of correct attempts. Zero attempts yields zero.
pub fn accuracy_rate(attempts_total: i64, attempts_incorrect: i64) -> f64 {
    if attempts_total <= 0 {
        return 0.0;
    }
    let incorrect = attempts_incorrect.clamp(0, attempts_total);
    1.0 - (incorrect as f64 / attempts_total as f64)
}
