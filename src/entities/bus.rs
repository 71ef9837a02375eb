use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum OperatingDays {
    #[sea_orm(string_value = "daily")]
    Daily,
    #[sea_orm(string_value = "weekdays")]
    Weekdays,
    #[sea_orm(string_value = "weekends")]
    Weekends,
}

impl OperatingDays {
    pub fn runs_on(self, date: NaiveDate) -> bool {
        let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        match self {
            OperatingDays::Daily => true,
            OperatingDays::Weekdays => !weekend,
            OperatingDays::Weekends => weekend,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bus")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub bus_number: String,
    pub route_number: String,
    pub operator_id: String,
    pub origin: String,
    pub destination: String,
    /// Ordered intermediate stops, a JSON array of place names
    #[sea_orm(column_type = "JsonBinary")]
    pub stops: Json,
    pub seat_capacity: i32,
    pub departure_time: String,
    pub arrival_time: String,
    pub operating_days: OperatingDays,
    pub rate_per_km: f64,
    pub is_active: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn stop_list(&self) -> Vec<String> {
        serde_json::from_value(self.stops.clone()).unwrap_or_default()
    }

    /// Origin, intermediate stops and destination, in travel order
    pub fn route_places(&self) -> Vec<String> {
        let mut places = Vec::with_capacity(2);
        places.push(self.origin.clone());
        places.extend(self.stop_list());
        places.push(self.destination.clone());
        places
    }

    pub fn departure(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.departure_time, "%H:%M").ok()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::OperatorId",
        to = "super::user::Column::Uid"
    )]
    Operator,
    #[sea_orm(has_many = "super::trip::Entity")]
    Trips,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Operator.def()
    }
}

impl Related<super::trip::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Trips.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operating_days_pattern() {
        // 2026-10-19 is a Monday
        let monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2026, 10, 24).unwrap();

        assert!(OperatingDays::Daily.runs_on(monday));
        assert!(OperatingDays::Daily.runs_on(saturday));
        assert!(OperatingDays::Weekdays.runs_on(monday));
        assert!(!OperatingDays::Weekdays.runs_on(saturday));
        assert!(OperatingDays::Weekends.runs_on(saturday));
        assert!(!OperatingDays::Weekends.runs_on(monday));
    }
}
