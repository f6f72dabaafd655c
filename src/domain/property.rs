//! Deal memos ("properties") and their structured features.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle of a deal memo.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
    utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DealStatus {
    #[default]
    Active,
    Closed,
    Paused,
}

impl DealStatus {
    /// Database / wire representation.
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// A deal memo as stored in `properties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: Uuid,
    pub name: String,
    pub deal_type: String,
    pub summary: Option<String>,
    pub thesis: Option<String>,
    pub minimum_investment: Option<i32>,
    pub target_return: Option<String>,
    pub risk_factors: Vec<String>,
    pub ideal_investor_profile: Option<String>,
    pub structure: Option<String>,
    pub timeline: Option<String>,
    pub status: DealStatus,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub purchase_price: Option<i32>,
    pub square_feet: Option<i32>,
    pub total_equity_required: Option<i32>,
    pub document_s3_key: Option<String>,
    pub document_filename: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Structured attributes of a property (one row per property).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFeatures {
    pub id: Uuid,
    pub property_id: Uuid,
    pub asset_type: String,
    pub features: serde_json::Value,
    pub year_built: Option<i32>,
    pub year_renovated: Option<i32>,
    pub parking_spaces: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Fields accepted when creating a deal memo. New deals start `active`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewProperty {
    pub name: String,
    pub deal_type: String,
    pub summary: Option<String>,
    pub thesis: Option<String>,
    pub minimum_investment: Option<i32>,
    pub target_return: Option<String>,
    pub risk_factors: Vec<String>,
    pub ideal_investor_profile: Option<String>,
    pub structure: Option<String>,
    pub timeline: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub purchase_price: Option<i32>,
    pub square_feet: Option<i32>,
    pub total_equity_required: Option<i32>,
    pub document_s3_key: Option<String>,
    pub document_filename: Option<String>,
}

impl NewProperty {
    /// Materialize the row that will be inserted.
    pub fn into_property(self, now: OffsetDateTime) -> Property {
        Property {
            id: Uuid::new_v4(),
            name: self.name,
            deal_type: self.deal_type,
            summary: self.summary,
            thesis: self.thesis,
            minimum_investment: self.minimum_investment,
            target_return: self.target_return,
            risk_factors: self.risk_factors,
            ideal_investor_profile: self.ideal_investor_profile,
            structure: self.structure,
            timeline: self.timeline,
            status: DealStatus::Active,
            address: self.address,
            city: self.city,
            state: self.state,
            zip_code: self.zip_code,
            purchase_price: self.purchase_price,
            square_feet: self.square_feet,
            total_equity_required: self.total_equity_required,
            document_s3_key: self.document_s3_key,
            document_filename: self.document_filename,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Features supplied alongside a new deal memo.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPropertyFeatures {
    pub asset_type: String,
    pub features: serde_json::Value,
    pub year_built: Option<i32>,
    pub year_renovated: Option<i32>,
    pub parking_spaces: Option<i32>,
}

impl NewPropertyFeatures {
    /// Materialize the row that will be inserted for `property_id`.
    pub fn into_features(self, property_id: Uuid, now: OffsetDateTime) -> PropertyFeatures {
        let features = if self.features.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            self.features
        };
        PropertyFeatures {
            id: Uuid::new_v4(),
            property_id,
            asset_type: self.asset_type,
            features,
            year_built: self.year_built,
            year_renovated: self.year_renovated,
            parking_spaces: self.parking_spaces,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyUpdate {
    pub name: Option<String>,
    pub deal_type: Option<String>,
    pub summary: Option<String>,
    pub thesis: Option<String>,
    pub minimum_investment: Option<i32>,
    pub target_return: Option<String>,
    pub risk_factors: Option<Vec<String>>,
    pub ideal_investor_profile: Option<String>,
    pub structure: Option<String>,
    pub timeline: Option<String>,
    pub status: Option<DealStatus>,
}

impl PropertyUpdate {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the present fields to `property`.
    pub fn apply(&self, property: &mut Property) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        fn set_opt<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }

        set(&mut property.name, &self.name);
        set(&mut property.deal_type, &self.deal_type);
        set_opt(&mut property.summary, &self.summary);
        set_opt(&mut property.thesis, &self.thesis);
        set_opt(&mut property.minimum_investment, &self.minimum_investment);
        set_opt(&mut property.target_return, &self.target_return);
        set(&mut property.risk_factors, &self.risk_factors);
        set_opt(&mut property.ideal_investor_profile, &self.ideal_investor_profile);
        set_opt(&mut property.structure, &self.structure);
        set_opt(&mut property.timeline, &self.timeline);
        set(&mut property.status, &self.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample() -> Property {
        NewProperty {
            name: "Maple Court".to_string(),
            deal_type: "multifamily".to_string(),
            summary: Some("48 units".to_string()),
            ..Default::default()
        }
        .into_property(OffsetDateTime::UNIX_EPOCH)
    }

    #[test]
    fn new_properties_start_active() {
        assert_eq!(sample().status, DealStatus::Active);
        assert_eq!(DealStatus::from_str("paused").unwrap(), DealStatus::Paused);
        assert!(DealStatus::from_str("archived").is_err());
    }

    #[test]
    fn update_only_touches_present_fields() {
        let mut property = sample();
        let update = PropertyUpdate {
            name: Some("Maple Court II".to_string()),
            risk_factors: Some(vec!["rates".to_string()]),
            status: Some(DealStatus::Paused),
            ..Default::default()
        };
        assert!(!update.is_empty());
        update.apply(&mut property);

        assert_eq!(property.name, "Maple Court II");
        assert_eq!(property.deal_type, "multifamily");
        assert_eq!(property.summary.as_deref(), Some("48 units"));
        assert_eq!(property.risk_factors, vec!["rates"]);
        assert_eq!(property.status, DealStatus::Paused);
    }

    #[test]
    fn null_features_become_empty_object() {
        let features = NewPropertyFeatures {
            asset_type: "retail".to_string(),
            features: serde_json::Value::Null,
            year_built: Some(1998),
            year_renovated: None,
            parking_spaces: None,
        }
        .into_features(Uuid::new_v4(), OffsetDateTime::UNIX_EPOCH);
        assert_eq!(features.features, serde_json::json!({}));
    }
}
