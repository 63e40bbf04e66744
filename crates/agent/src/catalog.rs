//! Mock appointment catalog

use serde::{Deserialize, Serialize};
use std::fmt;

/// One bookable provider/time slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub provider: String,
    pub day: String,
    pub time: String,
}

impl Slot {
    pub fn new(provider: &str, day: &str, time: &str) -> Self {
        Self {
            provider: provider.to_string(),
            day: day.to_string(),
            time: time.to_string(),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {} at {}", self.provider, self.day, self.time)
    }
}

const ORDINALS: [&[&str]; 4] = [
    &["first", "1st", "number one", "option one", "number 1", "option 1"],
    &["second", "2nd", "number two", "option two", "number 2", "option 2"],
    &["third", "3rd", "number three", "option three", "number 3", "option 3"],
    &["fourth", "4th", "number four", "option four", "number 4", "option 4"],
];

#[derive(Debug, Clone)]
pub struct SlotCatalog {
    slots: Vec<Slot>,
}

impl SlotCatalog {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    /// The fixed catalog offered to every caller
    pub fn mock() -> Self {
        Self::new(vec![
            Slot::new("Dr. Smith", "Monday", "10:00 AM"),
            Slot::new("Dr. Jones", "Tuesday", "2:30 PM"),
            Slot::new("Dr. Lee", "Wednesday", "9:15 AM"),
            Slot::new("Dr. Brown", "Friday", "4:00 PM"),
        ])
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Spoken list of every slot
    pub fn offer_text(&self) -> String {
        let items: Vec<String> = self.slots.iter().map(|s| s.to_string()).collect();
        match items.as_slice() {
            [] => String::new(),
            [only] => only.clone(),
            [rest @ .., last] => format!("{}, or {}", rest.join(", "), last),
        }
    }

    /// Match the caller's choice by doctor, day or position. Ambiguous or
    /// unmatched answers return `None`.
    pub fn select(&self, text: &str) -> Option<&Slot> {
        let text = format!(" {} ", normalize(text));

        let by_attribute: Vec<&Slot> = self
            .slots
            .iter()
            .filter(|slot| {
                let surname = slot
                    .provider
                    .rsplit(' ')
                    .next()
                    .unwrap_or(&slot.provider)
                    .to_lowercase();
                text.contains(&format!(" {} ", surname))
                    || text.contains(&format!(" {} ", slot.day.to_lowercase()))
            })
            .collect();
        if let [only] = by_attribute.as_slice() {
            return Some(*only);
        }
        if by_attribute.len() > 1 {
            return None;
        }

        if text.contains(" last ") {
            return self.slots.last();
        }
        let by_position: Vec<usize> = ORDINALS
            .iter()
            .enumerate()
            .filter(|(_, words)| words.iter().any(|w| text.contains(&format!(" {} ", w))))
            .map(|(i, _)| i)
            .collect();
        match by_position.as_slice() {
            [index] => self.slots.get(*index),
            _ => None,
        }
    }
}

impl Default for SlotCatalog {
    fn default() -> Self {
        Self::mock()
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == ' ' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_text() {
        let text = SlotCatalog::mock().offer_text();
        assert!(text.starts_with("Dr. Smith on Monday at 10:00 AM, "));
        assert!(text.ends_with(", or Dr. Brown on Friday at 4:00 PM"));
    }

    #[test]
    fn test_select_by_doctor_day_and_position() {
        let catalog = SlotCatalog::mock();
        assert_eq!(catalog.select("Dr. Jones please").unwrap().day, "Tuesday");
        assert_eq!(catalog.select("Wednesday works").unwrap().provider, "Dr. Lee");
        assert_eq!(catalog.select("the second one").unwrap().provider, "Dr. Jones");
        assert_eq!(catalog.select("I'll take the last one").unwrap().provider, "Dr. Brown");
        assert_eq!(catalog.select("option 1").unwrap().provider, "Dr. Smith");
    }

    #[test]
    fn test_select_ambiguous_or_unknown() {
        let catalog = SlotCatalog::mock();
        assert!(catalog.select("Monday or Friday").is_none());
        assert!(catalog.select("Saturday morning").is_none());
        assert!(catalog.select("").is_none());
    }
}
