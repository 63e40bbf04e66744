//! Agent wording
//!
//! Every sentence the agent speaks comes from here. Replies are read aloud,
//! so they stay short, avoid symbols and ask one question at a time.

use intake_core::ValidationError;

use crate::catalog::SlotCatalog;
use crate::intake::{FieldKey, FieldState, IntakeRecord};

pub fn greeting(practice_name: &str) -> String {
    format!(
        "Hello, thank you for calling {}. I'm the virtual intake assistant, and I'll get a few details to set up your appointment.",
        practice_name
    )
}

/// The question that collects `key`
pub fn question(key: FieldKey, record: &IntakeRecord, catalog: &SlotCatalog) -> String {
    match key {
        FieldKey::FirstName => "Can I start with your first name?".to_string(),
        FieldKey::LastName => match record.first_name.value() {
            Some(first) => format!("Thanks, {}. And what is your last name?", first),
            None => "And what is your last name?".to_string(),
        },
        FieldKey::DateOfBirth => "What is your date of birth?".to_string(),
        FieldKey::PayerName => "What is the name of your insurance company?".to_string(),
        FieldKey::InsuranceId => "And what is your insurance member ID?".to_string(),
        FieldKey::Referral => "Were you referred to us by another doctor?".to_string(),
        FieldKey::ReferringPhysician => "Which doctor referred you?".to_string(),
        FieldKey::ChiefComplaint => "What is the main reason for your visit?".to_string(),
        FieldKey::Address => {
            "What is your home address, including the city, state and ZIP code?".to_string()
        }
        FieldKey::Phone => "What is the best phone number to reach you?".to_string(),
        FieldKey::Email => {
            "What is your email address? You can say skip if you'd rather not give one.".to_string()
        }
        FieldKey::AppointmentSlot => format!(
            "We have these appointments available: {}. Which one works best for you?",
            catalog.offer_text()
        ),
    }
}

/// Re-ask that names what was wrong with the answer
pub fn reask(key: FieldKey, error: &ValidationError, question: &str) -> String {
    match error {
        ValidationError::ImpossibleDate { month, day } => format!(
            "{} doesn't have {} days. Could you tell me your date of birth again?",
            month, day
        ),
        ValidationError::MissingYear => {
            "I also need the year you were born. Could you say the full date, like March first, nineteen ninety?".to_string()
        }
        ValidationError::FutureDate => {
            "That date is in the future. Could you tell me your date of birth again?".to_string()
        }
        ValidationError::ImplausibleYear(year) => format!(
            "I heard the year {}, which doesn't seem right. Could you tell me your date of birth again?",
            year
        ),
        ValidationError::UnrecognizedDate => {
            "I didn't catch that as a date. Could you say it like March first, nineteen ninety?".to_string()
        }
        ValidationError::PhoneDigitCount(0) => {
            format!("Sorry, I didn't hear a phone number. {}", question)
        }
        ValidationError::PhoneDigitCount(count) => format!(
            "I heard {} digits, but a phone number has 10. Could you say it again, including the area code?",
            count
        ),
        ValidationError::EmailFormat => {
            "That doesn't sound like a complete email address. Could you say it again, like jane at example dot com? You can also say skip.".to_string()
        }
        ValidationError::NameFormat if key == FieldKey::PayerName => {
            "Sorry, I didn't catch the name of your insurance company. Could you say it again?".to_string()
        }
        ValidationError::NameFormat => format!(
            "Sorry, I didn't catch your {}. Could you say it again, or spell it for me?",
            key.label()
        ),
        ValidationError::InsuranceIdFormat => {
            "Member IDs are usually 4 to 20 letters and numbers. Could you read yours to me again?".to_string()
        }
        ValidationError::AddressFormat => {
            "I need the street, city, state and ZIP code. Could you say your full address, like 123 Main Street, New York, New York 10001?".to_string()
        }
        ValidationError::AddressState(state) if state.is_empty() => {
            "I didn't catch the state. Could you say your full address again?".to_string()
        }
        ValidationError::AddressState(state) => format!(
            "I didn't recognise {} as a state. Could you say your full address again?",
            state
        ),
        ValidationError::AddressZip(zip) if zip.is_empty() => {
            "I didn't catch a ZIP code. Could you say your full address again, ending with the ZIP code?".to_string()
        }
        ValidationError::AddressZip(zip) => format!(
            "The ZIP code {} doesn't look right, it should be 5 digits. Could you say your full address again?",
            zip
        ),
        ValidationError::AddressZipMismatch { zip, city } => format!(
            "The ZIP code {} doesn't match the city {}. Could you check your address and say it again?",
            zip, city
        ),
        ValidationError::AddressUndeliverable => {
            "I couldn't find that address with the post office. Could you say it again, including any apartment number?".to_string()
        }
        ValidationError::YesNo => format!("Sorry, was that a yes or a no? {}", question),
        ValidationError::UnknownSlot => format!("Sorry, I didn't catch which one you'd like. {}", question),
        ValidationError::Empty => format!("Sorry, I didn't catch that. {}", question),
    }
}

/// Acknowledgement when an answer is accepted without validation
pub fn unverified(key: FieldKey) -> String {
    format!(
        "No problem, I'll note your {} as you said it and our staff will double check it.",
        key.label()
    )
}

pub fn off_topic(question: &str) -> String {
    format!("I can only help with your intake on this call. {}", question)
}

pub fn backend_apology(question: &str) -> String {
    format!("Sorry, I'm having a little trouble on my end. {}", question)
}

pub fn declined_email() -> &'static str {
    "That's fine, we'll skip the email."
}

/// "Jane" -> "J, A, N, E"
pub fn spell(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .map(|c| c.to_uppercase().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Full readback, spelling the names and the payer
pub fn readback(record: &IntakeRecord) -> String {
    let show = |key: FieldKey| record.display(key).unwrap_or_else(|| "not provided".to_string());
    let first = show(FieldKey::FirstName);
    let last = show(FieldKey::LastName);
    let payer = show(FieldKey::PayerName);
    let insurance_id = show(FieldKey::InsuranceId);

    let mut parts = vec![
        "Let me make sure I have everything right.".to_string(),
        format!(
            "Your name is {} {}, spelled {}, then {}.",
            first,
            last,
            spell(&first),
            spell(&last)
        ),
        format!("Your date of birth is {}.", show(FieldKey::DateOfBirth)),
        format!(
            "Your insurance is {}, spelled {}, with member ID {}.",
            payer,
            spell(&payer),
            spell(&insurance_id)
        ),
    ];
    match record.referral.value().copied() {
        Some(true) => parts.push(format!(
            "You were referred by {}.",
            show(FieldKey::ReferringPhysician)
        )),
        Some(false) => parts.push("You were not referred by another doctor.".to_string()),
        None => {}
    }
    parts.push(format!("You're coming in for {}.", show(FieldKey::ChiefComplaint)));
    parts.push(format!("Your address is {}.", show(FieldKey::Address)));
    parts.push(format!("Your phone number is {}.", show(FieldKey::Phone)));
    if record.email.value().is_none() && record.email.state() == FieldState::Collected {
        parts.push("You didn't give an email address.".to_string());
    } else {
        parts.push(format!("Your email is {}.", show(FieldKey::Email)));
    }
    parts.push(format!("Your appointment is with {}.", show(FieldKey::AppointmentSlot)));
    parts.push("Is all of that correct?".to_string());
    parts.join(" ")
}

pub fn confirm_question() -> &'static str {
    "Is everything I read back correct?"
}

pub fn which_correction() -> &'static str {
    "Sorry about that. Which part should I change?"
}

pub fn correction(key: FieldKey, question: &str) -> String {
    format!("No problem, let's fix your {}. {}", key.label(), question)
}

pub fn updated(key: FieldKey) -> String {
    format!("Thanks, I've updated your {}.", key.label())
}

pub fn complete(record: &IntakeRecord) -> String {
    let name = record
        .first_name
        .value()
        .map(|n| format!(", {}", n))
        .unwrap_or_default();
    match record.display(FieldKey::AppointmentSlot) {
        Some(slot) => format!(
            "Thank you{}. You're all set for your appointment with {}. We look forward to seeing you. Goodbye!",
            name, slot
        ),
        None => format!("Thank you{}. Your details are saved and our staff will be in touch. Goodbye!", name),
    }
}

pub fn idle_closing() -> &'static str {
    "I haven't heard anything for a while, so I'll end the call now. Please call back whenever you're ready. Goodbye."
}

pub fn max_duration_closing() -> &'static str {
    "We've run out of time on this call. Our staff will follow up on anything we missed. Goodbye."
}

pub fn technical_apology() -> &'static str {
    "I'm sorry, we're having technical difficulties. Please call back in a few minutes. Goodbye."
}
