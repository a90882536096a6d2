use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{
    estimator::estimate,
    repo_types::{BodyMetrics, ProfileEntry},
};
use crate::auth::dto::{present, REQUIRED};
use crate::error::{AppError, FieldErrors};
use crate::notice::Notice;

const AT_LEAST_ONE: &str = "Number must be at least 1.";
const NOT_A_CHOICE: &str = "Not a valid choice.";

/// Dashboard form body. Every field is optional so that a missing value is
/// reported per field.
#[derive(Debug, Default, Deserialize)]
pub struct CalorieForm {
    pub age: Option<String>,
    pub gender: Option<String>,
    pub height: Option<String>,
    pub weight: Option<String>,
    pub activity: Option<String>,
    pub goal: Option<String>,
}

impl CalorieForm {
    /// Strict validation: unknown choices are errors, not defaults.
    pub fn validate(&self) -> Result<BodyMetrics, AppError> {
        let mut errors = FieldErrors::new();

        let age = match present(&self.age).map(str::parse::<i64>) {
            None => field_err(&mut errors, "age", REQUIRED),
            Some(Err(_)) => field_err(&mut errors, "age", "Not a valid integer value."),
            Some(Ok(a)) if a < 1 => field_err(&mut errors, "age", AT_LEAST_ONE),
            Some(Ok(a)) => match u32::try_from(a) {
                Ok(a) => Some(a),
                Err(_) => field_err(&mut errors, "age", "Number is too large."),
            },
        };
        let height_cm = positive_float(&mut errors, "height", &self.height);
        let weight_kg = positive_float(&mut errors, "weight", &self.weight);
        let gender = choice(&mut errors, "gender", &self.gender);
        let activity = choice(&mut errors, "activity", &self.activity);
        let goal = choice(&mut errors, "goal", &self.goal);

        match (age, gender, height_cm, weight_kg, activity, goal) {
            (
                Some(age),
                Some(gender),
                Some(height_cm),
                Some(weight_kg),
                Some(activity),
                Some(goal),
            ) if errors.is_empty() => {
                Ok(BodyMetrics {
                    age,
                    gender,
                    height_cm,
                    weight_kg,
                    activity,
                    goal,
                })
            }
            _ => Err(AppError::Validation(errors)),
        }
    }
}

fn field_err<T>(errors: &mut FieldErrors, field: &'static str, msg: &str) -> Option<T> {
    errors.insert(field, msg.to_string());
    None
}

fn positive_float(
    errors: &mut FieldErrors,
    field: &'static str,
    raw: &Option<String>,
) -> Option<f64> {
    match present(raw).map(str::parse::<f64>) {
        None => field_err(errors, field, REQUIRED),
        Some(Ok(v)) if !v.is_finite() => field_err(errors, field, "Not a valid float value."),
        Some(Err(_)) => field_err(errors, field, "Not a valid float value."),
        Some(Ok(v)) if v < 1.0 => field_err(errors, field, AT_LEAST_ONE),
        Some(Ok(v)) => Some(v),
    }
}

fn choice<T: FromStr>(
    errors: &mut FieldErrors,
    field: &'static str,
    raw: &Option<String>,
) -> Option<T> {
    match present(raw).map(str::parse::<T>) {
        None => field_err(errors, field, REQUIRED),
        Some(Err(_)) => field_err(errors, field, NOT_A_CHOICE),
        Some(Ok(v)) => Some(v),
    }
}

/// History row as displayed, with its target recomputed from stored metrics.
#[derive(Debug, Serialize)]
pub struct HistoryItem {
    #[serde(flatten)]
    pub entry: ProfileEntry,
    pub calories: i64,
}

impl From<ProfileEntry> for HistoryItem {
    fn from(entry: ProfileEntry) -> Self {
        let calories = estimate(&entry.metrics);
        Self { entry, calories }
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardView {
    pub username: String,
    pub calories: Option<i64>,
    pub history: Vec<HistoryItem>,
    pub errors: FieldErrors,
    pub notice: Option<Notice>,
    pub csrf_token: String,
}
