use std::str::FromStr;

use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Sedentary,
    Light,
    Moderate,
    Active,
    VeryActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    Maintain,
    Lose,
    Gain,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    /// Anything other than `male` takes the female branch.
    pub fn from_stored(s: &str) -> Self {
        s.parse().unwrap_or(Gender::Female)
    }
}

impl Activity {
    pub fn as_str(self) -> &'static str {
        match self {
            Activity::Sedentary => "sedentary",
            Activity::Light => "light",
            Activity::Moderate => "moderate",
            Activity::Active => "active",
            Activity::VeryActive => "very_active",
        }
    }

    /// Unknown levels count as sedentary.
    pub fn from_stored(s: &str) -> Self {
        s.parse().unwrap_or(Activity::Sedentary)
    }
}

impl Goal {
    pub fn as_str(self) -> &'static str {
        match self {
            Goal::Maintain => "maintain",
            Goal::Lose => "lose",
            Goal::Gain => "gain",
        }
    }

    /// Unknown goals leave the target unchanged.
    pub fn from_stored(s: &str) -> Self {
        s.parse().unwrap_or(Goal::Maintain)
    }
}

impl FromStr for Gender {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            _ => Err(()),
        }
    }
}

impl FromStr for Activity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sedentary" => Ok(Activity::Sedentary),
            "light" => Ok(Activity::Light),
            "moderate" => Ok(Activity::Moderate),
            "active" => Ok(Activity::Active),
            "very_active" => Ok(Activity::VeryActive),
            _ => Err(()),
        }
    }
}

impl FromStr for Goal {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maintain" => Ok(Goal::Maintain),
            "lose" => Ok(Goal::Lose),
            "gain" => Ok(Goal::Gain),
            _ => Err(()),
        }
    }
}

/// Inputs to the calorie estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BodyMetrics {
    pub age: u32,
    pub gender: Gender,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub activity: Activity,
    pub goal: Goal,
}

/// One saved estimation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileEntry {
    pub id: i64,
    pub user_id: i64,
    #[serde(flatten)]
    pub metrics: BodyMetrics,
}

/// Raw `profiles` row; enum columns are free text in the store.
#[derive(Debug, FromRow)]
pub(crate) struct ProfileRow {
    pub id: i64,
    pub user_id: i64,
    pub age: i64,
    pub gender: String,
    pub height: f64,
    pub weight: f64,
    pub activity: String,
    pub goal: String,
}

impl From<ProfileRow> for ProfileEntry {
    fn from(r: ProfileRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            metrics: BodyMetrics {
                age: u32::try_from(r.age).unwrap_or_default(),
                gender: Gender::from_stored(&r.gender),
                height_cm: r.height,
                weight_kg: r.weight,
                activity: Activity::from_stored(&r.activity),
                goal: Goal::from_stored(&r.goal),
            },
        }
    }
}
