//! Booking record and conversation history types.
//!
//! `BookingRecord` is the structured target of the whole pipeline. Every field is
//! either unset or holds a normalized value: locations without "in"/"from"/"at",
//! dates as `NaiveDate` (serialized `YYYY-MM-DD`), body type from a closed vocabulary.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Fields the extractor can populate, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingField {
    PickupLocation,
    DropLocation,
    VehicleType,
    BodyType,
    Material,
    TripDate,
    ContactName,
    ContactNumber,
}

impl BookingField {
    /// Fields that must be set before the booking is complete.
    pub const REQUIRED: [BookingField; 6] = [
        BookingField::PickupLocation,
        BookingField::DropLocation,
        BookingField::VehicleType,
        BookingField::BodyType,
        BookingField::Material,
        BookingField::TripDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingField::PickupLocation => "pickup_location",
            BookingField::DropLocation => "drop_location",
            BookingField::VehicleType => "vehicle_type",
            BookingField::BodyType => "body_type",
            BookingField::Material => "material",
            BookingField::TripDate => "trip_date",
            BookingField::ContactName => "contact_name",
            BookingField::ContactNumber => "contact_number",
        }
    }

    /// Human label used in summaries and reply hints.
    pub fn label(&self) -> &'static str {
        match self {
            BookingField::PickupLocation => "Pickup Location",
            BookingField::DropLocation => "Drop Location",
            BookingField::VehicleType => "Vehicle Type",
            BookingField::BodyType => "Body Type",
            BookingField::Material => "Material",
            BookingField::TripDate => "Trip Date",
            BookingField::ContactName => "Contact Name",
            BookingField::ContactNumber => "Contact Number",
        }
    }
}

impl fmt::Display for BookingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Truck body: the only two options DropTruck offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    Open,
    Container,
}

impl BodyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyType::Open => "open",
            BodyType::Container => "container",
        }
    }
}

impl fmt::Display for BodyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the customer has accepted the restated booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    #[default]
    Pending,
    Confirmed,
    NotInterested,
}

impl ConfirmationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationStatus::Pending => "pending",
            ConfirmationStatus::Confirmed => "confirmed",
            ConfirmationStatus::NotInterested => "not_interested",
        }
    }
}

/// A normalized field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Body(BodyType),
    Date(NaiveDate),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Body(b) => write!(f, "{}", b),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// One change the extractor wants applied to the booking record.
///
/// `confirmed` is set when the value came from a confirmation utterance; such values
/// can only be replaced by another confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub field: BookingField,
    pub value: FieldValue,
    pub confirmed: bool,
}

/// The structured booking collected during one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub pickup_location: Option<String>,
    pub drop_location: Option<String>,
    pub vehicle_type: Option<String>,
    pub body_type: Option<BodyType>,
    pub material: Option<String>,
    pub trip_date: Option<NaiveDate>,
    pub contact_name: Option<String>,
    pub contact_number: Option<String>,
    #[serde(default)]
    pub confirmation_status: ConfirmationStatus,
    #[serde(skip)]
    confirmed_fields: BTreeSet<BookingField>,
}

impl BookingRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a field, if set.
    pub fn get(&self, field: BookingField) -> Option<FieldValue> {
        match field {
            BookingField::PickupLocation => self.pickup_location.clone().map(FieldValue::Text),
            BookingField::DropLocation => self.drop_location.clone().map(FieldValue::Text),
            BookingField::VehicleType => self.vehicle_type.clone().map(FieldValue::Text),
            BookingField::BodyType => self.body_type.map(FieldValue::Body),
            BookingField::Material => self.material.clone().map(FieldValue::Text),
            BookingField::TripDate => self.trip_date.map(FieldValue::Date),
            BookingField::ContactName => self.contact_name.clone().map(FieldValue::Text),
            BookingField::ContactNumber => self.contact_number.clone().map(FieldValue::Text),
        }
    }

    pub fn is_set(&self, field: BookingField) -> bool {
        self.get(field).is_some()
    }

    /// True once a confirmation utterance has asserted this field's value.
    pub fn is_confirmed(&self, field: BookingField) -> bool {
        self.confirmed_fields.contains(&field)
    }

    /// Apply an update. Returns false (and changes nothing) when the value kind
    /// does not fit the field.
    pub fn apply(&mut self, update: &FieldUpdate) -> bool {
        let applied = match (update.field, &update.value) {
            (BookingField::PickupLocation, FieldValue::Text(s)) => {
                self.pickup_location = Some(s.clone());
                true
            }
            (BookingField::DropLocation, FieldValue::Text(s)) => {
                self.drop_location = Some(s.clone());
                true
            }
            (BookingField::VehicleType, FieldValue::Text(s)) => {
                self.vehicle_type = Some(s.clone());
                true
            }
            (BookingField::BodyType, FieldValue::Body(b)) => {
                self.body_type = Some(*b);
                true
            }
            (BookingField::Material, FieldValue::Text(s)) => {
                self.material = Some(s.clone());
                true
            }
            (BookingField::TripDate, FieldValue::Date(d)) => {
                self.trip_date = Some(*d);
                true
            }
            (BookingField::ContactName, FieldValue::Text(s)) => {
                self.contact_name = Some(s.clone());
                true
            }
            (BookingField::ContactNumber, FieldValue::Text(s)) => {
                self.contact_number = Some(s.clone());
                true
            }
            _ => false,
        };
        if applied {
            if update.confirmed {
                self.confirmed_fields.insert(update.field);
            } else {
                self.confirmed_fields.remove(&update.field);
            }
        }
        applied
    }

    /// Required fields still unset, in declaration order.
    pub fn missing_fields(&self) -> Vec<BookingField> {
        BookingField::REQUIRED
            .iter()
            .copied()
            .filter(|f| !self.is_set(*f))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

impl fmt::Display for BookingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "{}", rule)?;
        writeln!(f, "DROPTRUCK BOOKING INFORMATION")?;
        writeln!(f, "{}", rule)?;
        let fields = BookingField::REQUIRED
            .iter()
            .chain([BookingField::ContactName, BookingField::ContactNumber].iter());
        for field in fields {
            let value = self
                .get(*field)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "[NOT PROVIDED]".to_string());
            writeln!(f, "{:.<30} {}", field.label(), value)?;
        }
        writeln!(f, "{:.<30} {}", "Confirmation Status", self.confirmation_status.as_str())?;
        write!(f, "{}", rule)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// One exchange in the conversation history. History is append-only and ordered by `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}
