// src/synergy/context.rs — Multi-modal context boosts on synergy benefit

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::relationship::RelationshipType;
use crate::infra::config::ContextBoostConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherContext {
    pub outdoor_temp_c: f64,
    #[serde(default)]
    pub condition: Option<String>,
}

impl WeatherContext {
    /// Outdoor conditions where climate automations pay off most.
    pub fn is_extreme(&self) -> bool {
        self.outdoor_temp_c <= 5.0 || self.outdoor_temp_c >= 28.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceLevel {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyContext {
    pub price_level: PriceLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarContext {
    pub occupants_away: bool,
}

/// Whatever enrichment the context collaborator could supply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    #[serde(default)]
    pub weather: Option<WeatherContext>,
    #[serde(default)]
    pub energy: Option<EnergyContext>,
    #[serde(default)]
    pub calendar: Option<CalendarContext>,
}

/// Resulting multiplier and the boosts that contributed to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextAdjustment {
    pub multiplier: f64,
    pub boosts: BTreeMap<&'static str, f64>,
}

pub struct ContextBooster {
    config: ContextBoostConfig,
}

impl ContextBooster {
    pub fn new(config: ContextBoostConfig) -> Self {
        Self { config }
    }

    /// Multiplier for a relationship under the given context, always within
    /// `1 ± cap`. Missing context contributes nothing.
    pub fn adjust(
        &self,
        relationship: RelationshipType,
        context: Option<&ContextSnapshot>,
    ) -> ContextAdjustment {
        let mut boosts = BTreeMap::new();
        if let Some(ctx) = context {
            if relationship.is_climate() && ctx.weather.as_ref().is_some_and(|w| w.is_extreme()) {
                boosts.insert("weather", self.config.weather);
            }
            if let Some(energy) = &ctx.energy {
                if relationship.is_climate() || relationship.is_lighting() {
                    let delta = match energy.price_level {
                        PriceLevel::High => self.config.energy,
                        PriceLevel::Normal => 0.0,
                        PriceLevel::Low => -self.config.energy / 2.0,
                    };
                    if delta != 0.0 {
                        boosts.insert("energy", delta);
                    }
                }
            }
            if relationship.is_security()
                && ctx.calendar.as_ref().is_some_and(|c| c.occupants_away)
            {
                boosts.insert("calendar", self.config.calendar);
            }
        }
        let cap = self.config.cap.clamp(0.0, 1.0);
        let multiplier = (1.0 + boosts.values().sum::<f64>()).clamp(1.0 - cap, 1.0 + cap);
        ContextAdjustment { multiplier, boosts }
    }
}
