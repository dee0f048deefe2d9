//! Tyre records: catalog enums, field validation, and the partial-update merge.
//!
//! `retail_cost` is never taken from input; every change that touches `cost`
//! recomputes it through the pricing rule.

use core::fmt;
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tyrehub_core::{DomainError, DomainResult, Money, TyreId};
use tyrehub_events::integration::TyreSnapshot;

use crate::pricing::retail_cost;

/// Speed rating code as printed on the sidewall.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedRate {
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    A8,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    J,
    K,
    L,
    M,
    N,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    Y,
    ZR,
}

impl SpeedRate {
    pub const ALL: [SpeedRate; 30] = [
        Self::A1,
        Self::A2,
        Self::A3,
        Self::A4,
        Self::A5,
        Self::A6,
        Self::A7,
        Self::A8,
        Self::B,
        Self::C,
        Self::D,
        Self::E,
        Self::F,
        Self::G,
        Self::H,
        Self::J,
        Self::K,
        Self::L,
        Self::M,
        Self::N,
        Self::P,
        Self::Q,
        Self::R,
        Self::S,
        Self::T,
        Self::U,
        Self::V,
        Self::W,
        Self::Y,
        Self::ZR,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::A3 => "A3",
            Self::A4 => "A4",
            Self::A5 => "A5",
            Self::A6 => "A6",
            Self::A7 => "A7",
            Self::A8 => "A8",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
            Self::G => "G",
            Self::H => "H",
            Self::J => "J",
            Self::K => "K",
            Self::L => "L",
            Self::M => "M",
            Self::N => "N",
            Self::P => "P",
            Self::Q => "Q",
            Self::R => "R",
            Self::S => "S",
            Self::T => "T",
            Self::U => "U",
            Self::V => "V",
            Self::W => "W",
            Self::Y => "Y",
            Self::ZR => "ZR",
        }
    }
}

impl FromStr for SpeedRate {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|rate| rate.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown speed_rate: {s}")))
    }
}

/// Season the tyre is rated for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Season {
    Summer,
    Winter,
    #[serde(rename = "All Season")]
    AllSeason,
}

impl Season {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summer => "Summer",
            Self::Winter => "Winter",
            Self::AllSeason => "All Season",
        }
    }
}

impl FromStr for Season {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Summer" => Ok(Self::Summer),
            "Winter" => Ok(Self::Winter),
            "All Season" => Ok(Self::AllSeason),
            other => Err(DomainError::validation(format!("unknown season: {other}"))),
        }
    }
}

/// EU label grade (A best, E worst), used for both fuel and wet-grip efficiency.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EfficiencyClass {
    A,
    B,
    C,
    D,
    E,
}

impl EfficiencyClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
        }
    }
}

impl FromStr for EfficiencyClass {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            "E" => Ok(Self::E),
            other => Err(DomainError::validation(format!("unknown efficiency class: {other}"))),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(SpeedRate, Season, EfficiencyClass);

/// Exclusive upper bound on `cost` (the store column is `NUMERIC(10,2)`).
const MAX_COST: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);

/// Every client-writable attribute of a tyre.
///
/// `retail_cost` is derived and lives on [`Tyre`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TyreFields {
    pub brand: String,
    pub model: String,
    pub size: String,
    pub load_rate: i32,
    pub speed_rate: SpeedRate,
    pub season: Season,
    pub supplier: String,
    pub fuel_efficiency: EfficiencyClass,
    pub weather_efficiency: EfficiencyClass,
    pub noise_level: i32,
    pub ev_approved: bool,
    pub cost: Money,
    pub quantity: i64,
}

impl TyreFields {
    /// Check the constraints enums cannot express. Run before any store access.
    pub fn validate(&self) -> DomainResult<()> {
        check_text("brand", &self.brand, 1, 50)?;
        check_text("model", &self.model, 1, 50)?;
        check_text("size", &self.size, 1, 20)?;
        check_text("supplier", &self.supplier, 2, 100)?;

        if self.load_rate <= 0 {
            return Err(DomainError::field("load_rate", "must be greater than 0"));
        }
        if self.noise_level <= 0 {
            return Err(DomainError::field("noise_level", "must be greater than 0"));
        }
        if !self.cost.is_positive() {
            return Err(DomainError::field("cost", "must be greater than 0"));
        }
        if self.cost.amount() >= MAX_COST {
            return Err(DomainError::field("cost", "must be less than 100000000"));
        }
        if self.quantity < 0 {
            return Err(DomainError::field("quantity", "cannot be negative"));
        }
        Ok(())
    }
}

fn check_text(field: &str, value: &str, min: usize, max: usize) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::field(field, "cannot be empty"));
    }
    let len = value.chars().count();
    if len < min || len > max {
        return Err(DomainError::field(
            field,
            format_args!("must be between {min} and {max} characters"),
        ));
    }
    Ok(())
}

/// A stored tyre record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tyre {
    pub id: TyreId,
    #[serde(flatten)]
    pub fields: TyreFields,
    pub retail_cost: Money,
}

impl Tyre {
    /// Build a record, deriving `retail_cost` from `fields.cost`.
    pub fn new(id: TyreId, fields: TyreFields) -> Self {
        let retail_cost = retail_cost(fields.cost);
        Self {
            id,
            fields,
            retail_cost,
        }
    }

    /// Replace every mutable field (full update).
    pub fn replace(&mut self, fields: TyreFields) {
        self.retail_cost = retail_cost(fields.cost);
        self.fields = fields;
    }

    /// Merge a partial update. `retail_cost` is recomputed only when the patch
    /// carries `cost`.
    pub fn patch(&mut self, patch: &TyrePatch) -> DomainResult<()> {
        let mut merged = self.fields.clone();
        let cost_changed = patch.apply_to(&mut merged);
        merged.validate()?;

        if cost_changed {
            self.retail_cost = retail_cost(merged.cost);
        }
        self.fields = merged;
        Ok(())
    }

    pub fn snapshot(&self) -> TyreSnapshot {
        TyreSnapshot {
            id: self.id,
            brand: self.fields.brand.clone(),
            model: self.fields.model.clone(),
            size: self.fields.size.clone(),
            supplier: self.fields.supplier.clone(),
            retail_cost: self.retail_cost,
            quantity: self.fields.quantity,
        }
    }
}

/// Partial update: `None` means "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TyrePatch {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub size: Option<String>,
    pub load_rate: Option<i32>,
    pub speed_rate: Option<SpeedRate>,
    pub season: Option<Season>,
    pub supplier: Option<String>,
    pub fuel_efficiency: Option<EfficiencyClass>,
    pub weather_efficiency: Option<EfficiencyClass>,
    pub noise_level: Option<i32>,
    pub ev_approved: Option<bool>,
    pub cost: Option<Money>,
    pub quantity: Option<i64>,
}

impl TyrePatch {
    /// Copy every supplied field onto `fields`. Returns whether `cost` was supplied.
    pub fn apply_to(&self, fields: &mut TyreFields) -> bool {
        if let Some(v) = &self.brand {
            fields.brand = v.clone();
        }
        if let Some(v) = &self.model {
            fields.model = v.clone();
        }
        if let Some(v) = &self.size {
            fields.size = v.clone();
        }
        if let Some(v) = self.load_rate {
            fields.load_rate = v;
        }
        if let Some(v) = self.speed_rate {
            fields.speed_rate = v;
        }
        if let Some(v) = self.season {
            fields.season = v;
        }
        if let Some(v) = &self.supplier {
            fields.supplier = v.clone();
        }
        if let Some(v) = self.fuel_efficiency {
            fields.fuel_efficiency = v;
        }
        if let Some(v) = self.weather_efficiency {
            fields.weather_efficiency = v;
        }
        if let Some(v) = self.noise_level {
            fields.noise_level = v;
        }
        if let Some(v) = self.ev_approved {
            fields.ev_approved = v;
        }
        if let Some(v) = self.quantity {
            fields.quantity = v;
        }
        match self.cost {
            Some(cost) => {
                fields.cost = cost;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn money(s: &str) -> Money {
        Money::from_decimal(Decimal::from_str(s).unwrap())
    }

    pub(crate) fn sample_fields() -> TyreFields {
        TyreFields {
            brand: "Michelin".into(),
            model: "Pilot Sport 4".into(),
            size: "225/45R17".into(),
            load_rate: 94,
            speed_rate: SpeedRate::Y,
            season: Season::Summer,
            supplier: "TyreCo".into(),
            fuel_efficiency: EfficiencyClass::C,
            weather_efficiency: EfficiencyClass::A,
            noise_level: 71,
            ev_approved: false,
            cost: money("100.00"),
            quantity: 10,
        }
    }

    #[test]
    fn new_tyre_derives_retail_cost() {
        let tyre = Tyre::new(TyreId::new(1), sample_fields());
        assert_eq!(tyre.retail_cost.to_string(), "135.00");
    }

    #[test]
    fn sample_fields_are_valid() {
        sample_fields().validate().unwrap();
    }

    #[test]
    fn validate_rejects_non_positive_cost() {
        let mut fields = sample_fields();
        fields.cost = Money::zero();
        assert!(matches!(fields.validate(), Err(DomainError::Validation(_))));

        fields.cost = money("-5");
        assert!(matches!(fields.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn validate_rejects_out_of_range_text_and_numbers() {
        let mut fields = sample_fields();
        fields.brand = "x".repeat(51);
        assert!(fields.validate().is_err());

        let mut fields = sample_fields();
        fields.supplier = "A".into();
        assert!(fields.validate().is_err());

        let mut fields = sample_fields();
        fields.size = "   ".into();
        assert!(fields.validate().is_err());

        let mut fields = sample_fields();
        fields.load_rate = 0;
        assert!(fields.validate().is_err());

        let mut fields = sample_fields();
        fields.quantity = -1;
        assert!(fields.validate().is_err());

        let mut fields = sample_fields();
        fields.cost = money("100000000");
        assert!(fields.validate().is_err());
    }

    #[test]
    fn enums_use_wire_names() {
        assert_eq!("ZR".parse::<SpeedRate>().unwrap(), SpeedRate::ZR);
        assert!("I".parse::<SpeedRate>().is_err());
        assert_eq!(serde_json::to_value(Season::AllSeason).unwrap(), "All Season");
        assert_eq!("All Season".parse::<Season>().unwrap(), Season::AllSeason);
        assert!(serde_json::from_value::<SpeedRate>(serde_json::json!("X")).is_err());
        assert!(serde_json::from_value::<EfficiencyClass>(serde_json::json!("F")).is_err());
    }

    #[test]
    fn speed_rate_round_trips_through_as_str() {
        for rate in SpeedRate::ALL {
            assert_eq!(rate.as_str().parse::<SpeedRate>().unwrap(), rate);
        }
    }

    #[test]
    fn patch_without_cost_keeps_retail_cost() {
        let mut tyre = Tyre::new(TyreId::new(1), sample_fields());
        let patch = TyrePatch {
            brand: Some("Pirelli".into()),
            quantity: Some(3),
            ..TyrePatch::default()
        };

        tyre.patch(&patch).unwrap();

        assert_eq!(tyre.fields.brand, "Pirelli");
        assert_eq!(tyre.fields.quantity, 3);
        assert_eq!(tyre.fields.model, "Pilot Sport 4");
        assert_eq!(tyre.retail_cost.to_string(), "135.00");
    }

    #[test]
    fn patch_with_cost_recomputes_retail_cost() {
        let mut tyre = Tyre::new(TyreId::new(1), sample_fields());
        let patch = TyrePatch {
            cost: Some(money("150.00")),
            ..TyrePatch::default()
        };

        tyre.patch(&patch).unwrap();

        assert_eq!(tyre.retail_cost.to_string(), "202.50");
    }

    #[test]
    fn invalid_patch_leaves_record_untouched() {
        let mut tyre = Tyre::new(TyreId::new(1), sample_fields());
        let before = tyre.clone();
        let patch = TyrePatch {
            brand: Some("Pirelli".into()),
            noise_level: Some(-1),
            ..TyrePatch::default()
        };

        assert!(tyre.patch(&patch).is_err());
        assert_eq!(tyre, before);
    }

    #[test]
    fn replace_recomputes_retail_cost() {
        let mut tyre = Tyre::new(TyreId::new(1), sample_fields());
        let mut fields = sample_fields();
        fields.cost = money("200.00");

        tyre.replace(fields);

        assert_eq!(tyre.retail_cost.to_string(), "270.00");
    }

    #[test]
    fn patch_ignores_unknown_retail_cost_field() {
        let patch: TyrePatch =
            serde_json::from_value(serde_json::json!({"retail_cost": "1.00", "brand": "Kumho"}))
                .unwrap();
        assert_eq!(patch.brand.as_deref(), Some("Kumho"));
        assert_eq!(patch.cost, None);
    }

    #[test]
    fn record_serializes_flat() {
        let tyre = Tyre::new(TyreId::new(7), sample_fields());
        let json = serde_json::to_value(&tyre).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["brand"], "Michelin");
        assert_eq!(json["speed_rate"], "Y");
        assert_eq!(json["cost"], "100.00");
        assert_eq!(json["retail_cost"], "135.00");
    }

    #[test]
    fn snapshot_carries_query_fields() {
        let tyre = Tyre::new(TyreId::new(7), sample_fields());
        let snap = tyre.snapshot();
        assert_eq!(snap.id, TyreId::new(7));
        assert_eq!(snap.retail_cost, tyre.retail_cost);
        assert_eq!(snap.quantity, 10);
    }
}
