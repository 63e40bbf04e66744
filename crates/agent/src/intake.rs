//! Intake record
//!
//! A fixed set of fields, each carrying its own collection state. Only the
//! dialogue policy mutates a record, one field at a time.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::Slot;

/// Collection state of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldState {
    #[default]
    Unset,
    /// Question asked, no answer yet
    Pending,
    /// Passed validation
    Collected,
    /// Last answer failed validation
    Invalid,
    /// Accepted after the retry cap without passing validation
    Unverified,
}

impl FieldState {
    /// Collected or explicitly accepted as unverified
    pub fn is_settled(&self) -> bool {
        matches!(self, FieldState::Collected | FieldState::Unverified)
    }
}

/// Intake field identifiers, in collection order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    FirstName,
    LastName,
    DateOfBirth,
    PayerName,
    InsuranceId,
    Referral,
    ReferringPhysician,
    ChiefComplaint,
    Address,
    Phone,
    Email,
    AppointmentSlot,
}

impl FieldKey {
    pub const ALL: [FieldKey; 12] = [
        FieldKey::FirstName,
        FieldKey::LastName,
        FieldKey::DateOfBirth,
        FieldKey::PayerName,
        FieldKey::InsuranceId,
        FieldKey::Referral,
        FieldKey::ReferringPhysician,
        FieldKey::ChiefComplaint,
        FieldKey::Address,
        FieldKey::Phone,
        FieldKey::Email,
        FieldKey::AppointmentSlot,
    ];

    /// Machine name used in snapshots and backend field updates
    pub fn name(&self) -> &'static str {
        match self {
            FieldKey::FirstName => "first_name",
            FieldKey::LastName => "last_name",
            FieldKey::DateOfBirth => "date_of_birth",
            FieldKey::PayerName => "payer_name",
            FieldKey::InsuranceId => "insurance_id",
            FieldKey::Referral => "referral",
            FieldKey::ReferringPhysician => "referring_physician",
            FieldKey::ChiefComplaint => "chief_complaint",
            FieldKey::Address => "address",
            FieldKey::Phone => "phone",
            FieldKey::Email => "email",
            FieldKey::AppointmentSlot => "appointment_slot",
        }
    }

    /// Spoken label
    pub fn label(&self) -> &'static str {
        match self {
            FieldKey::FirstName => "first name",
            FieldKey::LastName => "last name",
            FieldKey::DateOfBirth => "date of birth",
            FieldKey::PayerName => "insurance company",
            FieldKey::InsuranceId => "insurance member ID",
            FieldKey::Referral => "referral",
            FieldKey::ReferringPhysician => "referring physician",
            FieldKey::ChiefComplaint => "reason for your visit",
            FieldKey::Address => "address",
            FieldKey::Phone => "phone number",
            FieldKey::Email => "email address",
            FieldKey::AppointmentSlot => "appointment",
        }
    }

    /// Email may be declined; everything else must settle
    pub fn is_optional(&self) -> bool {
        matches!(self, FieldKey::Email)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Postal address. Each part records whether a validator confirmed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub street_validated: bool,
    pub city_validated: bool,
    pub state_validated: bool,
    pub postal_code_validated: bool,
}

impl Address {
    pub fn new(
        street: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        postal_code: impl Into<String>,
    ) -> Self {
        Self {
            street: street.into(),
            city: city.into(),
            state: state.into(),
            postal_code: postal_code.into(),
            street_validated: false,
            city_validated: false,
            state_validated: false,
            postal_code_validated: false,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {} {}",
            self.street, self.city, self.state, self.postal_code
        )
    }
}

/// A validated value for one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Date(NaiveDate),
    Flag(bool),
    Address(Address),
    Slot(Slot),
    /// Optional field the caller declined
    Declined,
}

/// One field with its state and retry count
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field<T> {
    value: Option<T>,
    /// Best answer heard so far, kept for unverified acceptance
    raw: Option<String>,
    state: FieldState,
    retries: u32,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self {
            value: None,
            raw: None,
            state: FieldState::Unset,
            retries: 0,
        }
    }
}

impl<T> Field<T> {
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    pub fn state(&self) -> FieldState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn collect(&mut self, value: Option<T>) {
        self.value = value;
        self.state = FieldState::Collected;
    }
}

/// Everything collected during one call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntakeRecord {
    pub first_name: Field<String>,
    pub last_name: Field<String>,
    pub date_of_birth: Field<NaiveDate>,
    pub payer_name: Field<String>,
    pub insurance_id: Field<String>,
    pub referral: Field<bool>,
    pub referring_physician: Field<String>,
    pub chief_complaint: Field<String>,
    pub address: Field<Address>,
    pub phone: Field<String>,
    pub email: Field<String>,
    pub appointment_slot: Field<Slot>,
}

/// Value type did not fit the field
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("value does not fit field {0}")]
pub struct FieldMismatch(pub FieldKey);

/// Type-erased view of one field's bookkeeping
struct Meta<'a> {
    raw: &'a mut Option<String>,
    state: &'a mut FieldState,
    retries: &'a mut u32,
}

macro_rules! meta {
    ($field:expr) => {{
        let f = &mut $field;
        Meta {
            raw: &mut f.raw,
            state: &mut f.state,
            retries: &mut f.retries,
        }
    }};
}

impl IntakeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    fn meta(&mut self, key: FieldKey) -> Meta<'_> {
        match key {
            FieldKey::FirstName => meta!(self.first_name),
            FieldKey::LastName => meta!(self.last_name),
            FieldKey::DateOfBirth => meta!(self.date_of_birth),
            FieldKey::PayerName => meta!(self.payer_name),
            FieldKey::InsuranceId => meta!(self.insurance_id),
            FieldKey::Referral => meta!(self.referral),
            FieldKey::ReferringPhysician => meta!(self.referring_physician),
            FieldKey::ChiefComplaint => meta!(self.chief_complaint),
            FieldKey::Address => meta!(self.address),
            FieldKey::Phone => meta!(self.phone),
            FieldKey::Email => meta!(self.email),
            FieldKey::AppointmentSlot => meta!(self.appointment_slot),
        }
    }

    pub fn state(&self, key: FieldKey) -> FieldState {
        match key {
            FieldKey::FirstName => self.first_name.state,
            FieldKey::LastName => self.last_name.state,
            FieldKey::DateOfBirth => self.date_of_birth.state,
            FieldKey::PayerName => self.payer_name.state,
            FieldKey::InsuranceId => self.insurance_id.state,
            FieldKey::Referral => self.referral.state,
            FieldKey::ReferringPhysician => self.referring_physician.state,
            FieldKey::ChiefComplaint => self.chief_complaint.state,
            FieldKey::Address => self.address.state,
            FieldKey::Phone => self.phone.state,
            FieldKey::Email => self.email.state,
            FieldKey::AppointmentSlot => self.appointment_slot.state,
        }
    }

    pub fn retries(&self, key: FieldKey) -> u32 {
        match key {
            FieldKey::FirstName => self.first_name.retries,
            FieldKey::LastName => self.last_name.retries,
            FieldKey::DateOfBirth => self.date_of_birth.retries,
            FieldKey::PayerName => self.payer_name.retries,
            FieldKey::InsuranceId => self.insurance_id.retries,
            FieldKey::Referral => self.referral.retries,
            FieldKey::ReferringPhysician => self.referring_physician.retries,
            FieldKey::ChiefComplaint => self.chief_complaint.retries,
            FieldKey::Address => self.address.retries,
            FieldKey::Phone => self.phone.retries,
            FieldKey::Email => self.email.retries,
            FieldKey::AppointmentSlot => self.appointment_slot.retries,
        }
    }

    /// The referring physician is only asked for after a yes to referral
    pub fn is_required(&self, key: FieldKey) -> bool {
        match key {
            FieldKey::ReferringPhysician => self.referral.value == Some(true),
            other => !other.is_optional(),
        }
    }

    /// Field needs an answer before the intake can complete
    pub fn is_outstanding(&self, key: FieldKey) -> bool {
        if key == FieldKey::ReferringPhysician && !self.is_required(key) {
            return false;
        }
        !self.state(key).is_settled()
    }

    /// First field, in collection order, still waiting for an answer
    pub fn next_outstanding(&self) -> Option<FieldKey> {
        FieldKey::ALL.into_iter().find(|k| self.is_outstanding(*k))
    }

    /// Required fields not yet collected or accepted
    pub fn missing_required(&self) -> Vec<FieldKey> {
        FieldKey::ALL
            .into_iter()
            .filter(|k| self.is_required(*k) && !self.state(*k).is_settled())
            .collect()
    }

    pub fn unverified_fields(&self) -> Vec<FieldKey> {
        FieldKey::ALL
            .into_iter()
            .filter(|k| self.state(*k) == FieldState::Unverified)
            .collect()
    }

    /// Question asked for `key`
    pub fn mark_pending(&mut self, key: FieldKey) {
        let meta = self.meta(key);
        if !meta.state.is_settled() && *meta.state != FieldState::Invalid {
            *meta.state = FieldState::Pending;
        }
    }

    /// Store a validated value
    pub fn collect(&mut self, key: FieldKey, value: FieldValue) -> Result<(), FieldMismatch> {
        match (key, value) {
            (FieldKey::FirstName, FieldValue::Text(v)) => self.first_name.collect(Some(v)),
            (FieldKey::LastName, FieldValue::Text(v)) => self.last_name.collect(Some(v)),
            (FieldKey::DateOfBirth, FieldValue::Date(v)) => self.date_of_birth.collect(Some(v)),
            (FieldKey::PayerName, FieldValue::Text(v)) => self.payer_name.collect(Some(v)),
            (FieldKey::InsuranceId, FieldValue::Text(v)) => self.insurance_id.collect(Some(v)),
            (FieldKey::Referral, FieldValue::Flag(v)) => {
                self.referral.collect(Some(v));
                if !v {
                    self.referring_physician = Field::default();
                }
            }
            (FieldKey::ReferringPhysician, FieldValue::Text(v)) => {
                self.referring_physician.collect(Some(v))
            }
            (FieldKey::ChiefComplaint, FieldValue::Text(v)) => self.chief_complaint.collect(Some(v)),
            (FieldKey::Address, FieldValue::Address(v)) => self.address.collect(Some(v)),
            (FieldKey::Phone, FieldValue::Text(v)) => self.phone.collect(Some(v)),
            (FieldKey::Email, FieldValue::Text(v)) => self.email.collect(Some(v)),
            (FieldKey::Email, FieldValue::Declined) => self.email.collect(None),
            (FieldKey::AppointmentSlot, FieldValue::Slot(v)) => self.appointment_slot.collect(Some(v)),
            (key, _) => return Err(FieldMismatch(key)),
        }
        Ok(())
    }

    /// Record a failed answer. Returns the failure count for the field.
    pub fn invalidate(&mut self, key: FieldKey, raw: &str) -> u32 {
        let meta = self.meta(key);
        if !raw.trim().is_empty() {
            *meta.raw = Some(raw.trim().to_string());
        }
        *meta.state = FieldState::Invalid;
        *meta.retries += 1;
        *meta.retries
    }

    /// Accept the best answer heard without validation
    pub fn accept_unverified(&mut self, key: FieldKey) {
        let meta = self.meta(key);
        *meta.state = FieldState::Unverified;
    }

    /// Clear a field so it is collected again
    pub fn reset(&mut self, key: FieldKey) {
        match key {
            FieldKey::FirstName => self.first_name = Field::default(),
            FieldKey::LastName => self.last_name = Field::default(),
            FieldKey::DateOfBirth => self.date_of_birth = Field::default(),
            FieldKey::PayerName => self.payer_name = Field::default(),
            FieldKey::InsuranceId => self.insurance_id = Field::default(),
            FieldKey::Referral => {
                self.referral = Field::default();
                self.referring_physician = Field::default();
            }
            FieldKey::ReferringPhysician => self.referring_physician = Field::default(),
            FieldKey::ChiefComplaint => self.chief_complaint = Field::default(),
            FieldKey::Address => self.address = Field::default(),
            FieldKey::Phone => self.phone = Field::default(),
            FieldKey::Email => self.email = Field::default(),
            FieldKey::AppointmentSlot => self.appointment_slot = Field::default(),
        }
        *self.meta(key).state = FieldState::Pending;
    }

    /// Display text of a settled field. Unverified fields show what the
    /// caller said.
    pub fn display(&self, key: FieldKey) -> Option<String> {
        let value = match key {
            FieldKey::FirstName => self.first_name.value.clone(),
            FieldKey::LastName => self.last_name.value.clone(),
            FieldKey::DateOfBirth => self
                .date_of_birth
                .value
                .map(|d| d.format("%B %-d, %Y").to_string()),
            FieldKey::PayerName => self.payer_name.value.clone(),
            FieldKey::InsuranceId => self.insurance_id.value.clone(),
            FieldKey::Referral => self
                .referral
                .value
                .map(|r| (if r { "yes" } else { "no" }).to_string()),
            FieldKey::ReferringPhysician => self.referring_physician.value.clone(),
            FieldKey::ChiefComplaint => self.chief_complaint.value.clone(),
            FieldKey::Address => self.address.value.as_ref().map(|a| a.to_string()),
            FieldKey::Phone => self.phone.value.as_deref().map(format_phone),
            FieldKey::Email => match (&self.email.value, self.email.state) {
                (Some(email), _) => Some(email.clone()),
                (None, FieldState::Collected) => Some("none given".to_string()),
                _ => None,
            },
            FieldKey::AppointmentSlot => self.appointment_slot.value.as_ref().map(|s| s.to_string()),
        };
        if value.is_some() {
            return value;
        }
        if self.state(key) == FieldState::Unverified {
            return self.raw(key).map(str::to_string);
        }
        None
    }

    fn raw(&self, key: FieldKey) -> Option<&str> {
        match key {
            FieldKey::FirstName => self.first_name.raw(),
            FieldKey::LastName => self.last_name.raw(),
            FieldKey::DateOfBirth => self.date_of_birth.raw(),
            FieldKey::PayerName => self.payer_name.raw(),
            FieldKey::InsuranceId => self.insurance_id.raw(),
            FieldKey::Referral => self.referral.raw(),
            FieldKey::ReferringPhysician => self.referring_physician.raw(),
            FieldKey::ChiefComplaint => self.chief_complaint.raw(),
            FieldKey::Address => self.address.raw(),
            FieldKey::Phone => self.phone.raw(),
            FieldKey::Email => self.email.raw(),
            FieldKey::AppointmentSlot => self.appointment_slot.raw(),
        }
    }

    /// JSON view handed to the dialogue backend and to completion handlers
    pub fn snapshot(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for key in FieldKey::ALL {
            if key == FieldKey::ReferringPhysician && !self.is_required(key) {
                continue;
            }
            map.insert(
                key.name().to_string(),
                serde_json::json!({
                    "value": self.display(key),
                    "state": self.state(key),
                }),
            );
        }
        serde_json::Value::Object(map)
    }
}

/// "5551234567" -> "555-123-4567"
pub fn format_phone(digits: &str) -> String {
    if digits.len() == 10 && digits.chars().all(|c| c.is_ascii_digit()) {
        format!("{}-{}-{}", &digits[..3], &digits[3..6], &digits[6..])
    } else {
        digits.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_order_and_referral_gate() {
        let mut record = IntakeRecord::new();
        assert_eq!(record.next_outstanding(), Some(FieldKey::FirstName));

        record.collect(FieldKey::FirstName, FieldValue::Text("Jane".into())).unwrap();
        record.collect(FieldKey::LastName, FieldValue::Text("Doe".into())).unwrap();
        record
            .collect(FieldKey::DateOfBirth, FieldValue::Date(NaiveDate::from_ymd_opt(1990, 3, 1).unwrap()))
            .unwrap();
        record.collect(FieldKey::PayerName, FieldValue::Text("Aetna".into())).unwrap();
        record.collect(FieldKey::InsuranceId, FieldValue::Text("AB1234".into())).unwrap();
        record.collect(FieldKey::Referral, FieldValue::Flag(false)).unwrap();

        // physician skipped without a referral
        assert_eq!(record.next_outstanding(), Some(FieldKey::ChiefComplaint));

        record.reset(FieldKey::Referral);
        record.collect(FieldKey::Referral, FieldValue::Flag(true)).unwrap();
        assert_eq!(record.next_outstanding(), Some(FieldKey::ReferringPhysician));
    }

    #[test]
    fn test_invalidate_then_unverified() {
        let mut record = IntakeRecord::new();
        record.mark_pending(FieldKey::Phone);
        assert_eq!(record.state(FieldKey::Phone), FieldState::Pending);

        assert_eq!(record.invalidate(FieldKey::Phone, "five five five"), 1);
        assert_eq!(record.invalidate(FieldKey::Phone, "555 12"), 2);
        assert_eq!(record.state(FieldKey::Phone), FieldState::Invalid);
        assert!(record.missing_required().contains(&FieldKey::Phone));

        record.accept_unverified(FieldKey::Phone);
        assert!(record.state(FieldKey::Phone).is_settled());
        assert_eq!(record.display(FieldKey::Phone).as_deref(), Some("555 12"));
        assert_eq!(record.unverified_fields(), vec![FieldKey::Phone]);
    }

    #[test]
    fn test_declined_email_settles() {
        let mut record = IntakeRecord::new();
        record.collect(FieldKey::Email, FieldValue::Declined).unwrap();
        assert!(record.state(FieldKey::Email).is_settled());
        assert_eq!(record.display(FieldKey::Email).as_deref(), Some("none given"));
        assert!(!record.is_required(FieldKey::Email));
    }

    #[test]
    fn test_mismatched_value_rejected() {
        let mut record = IntakeRecord::new();
        let err = record.collect(FieldKey::DateOfBirth, FieldValue::Text("x".into()));
        assert_eq!(err, Err(FieldMismatch(FieldKey::DateOfBirth)));
        assert_eq!(record.state(FieldKey::DateOfBirth), FieldState::Unset);
    }

    #[test]
    fn test_reset_and_snapshot() {
        let mut record = IntakeRecord::new();
        record.collect(FieldKey::Phone, FieldValue::Text("5551234567".into())).unwrap();
        let snapshot = record.snapshot();
        assert_eq!(snapshot["phone"]["value"], "555-123-4567");
        assert_eq!(snapshot["phone"]["state"], "collected");
        assert!(snapshot.get("referring_physician").is_none());

        record.reset(FieldKey::Phone);
        assert_eq!(record.state(FieldKey::Phone), FieldState::Pending);
        assert!(record.phone.value().is_none());
    }
}
