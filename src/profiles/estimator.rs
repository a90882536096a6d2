//! Daily calorie target from the Mifflin-St Jeor basal metabolic rate.

use super::repo_types::{Activity, BodyMetrics, Gender, Goal};

const GOAL_ADJUSTMENT_KCAL: f64 = 500.0;

impl Activity {
    pub fn factor(self) -> f64 {
        match self {
            Activity::Sedentary => 1.2,
            Activity::Light => 1.375,
            Activity::Moderate => 1.55,
            Activity::Active => 1.725,
            Activity::VeryActive => 1.9,
        }
    }
}

/// Basal metabolic rate in kcal/day.
pub fn bmr(m: &BodyMetrics) -> f64 {
    let base = 10.0 * m.weight_kg + 6.25 * m.height_cm - 5.0 * f64::from(m.age);
    match m.gender {
        Gender::Male => base + 5.0,
        Gender::Female => base - 161.0,
    }
}

/// Daily target rounded half away from zero.
pub fn estimate(m: &BodyMetrics) -> i64 {
    let mut calories = bmr(m) * m.activity.factor();
    match m.goal {
        Goal::Lose => calories -= GOAL_ADJUSTMENT_KCAL,
        Goal::Gain => calories += GOAL_ADJUSTMENT_KCAL,
        Goal::Maintain => {}
    }
    calories.round() as i64
}
