//! Field validators
//!
//! Each validator takes the caller's words as transcribed and either returns
//! a normalized value or a `ValidationError` naming what was wrong, which the
//! policy turns into a specific re-ask.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use intake_core::ValidationError;
use intake_llm::{quick_intent, Intent};

use crate::catalog::SlotCatalog;
use crate::intake::{Address, FieldKey, FieldValue};

const MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

const UNITS: [&str; 20] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const ORDINAL_UNITS: [&str; 20] = [
    "", "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth",
    "tenth", "eleventh", "twelfth", "thirteenth", "fourteenth", "fifteenth", "sixteenth",
    "seventeenth", "eighteenth", "nineteenth",
];

static US_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{2}|\d{4})\b").expect("valid regex"));
static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("valid regex"));
static DAY_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})(st|nd|rd|th)?$").expect("valid regex"));
static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9-]+(\.[a-z0-9-]+)*\.[a-z]{2,}$").expect("valid regex")
});
static ZIP_AT_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{5})(?:[-\s]?\d{4})?\s*\.?\s*$").expect("valid regex"));
static DIGITS_AT_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d[\d\s-]*)\.?\s*$").expect("valid regex"));
static STREET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+[A-Za-z]?\s+\S+").expect("valid regex"));

/// Lead-ins callers put before an answer
const LEAD_INS: &[&str] = &[
    "my first name is",
    "my last name is",
    "my name is",
    "first name is",
    "last name is",
    "my date of birth is",
    "my birthday is",
    "i was born on",
    "i was born",
    "my email address is",
    "my email is",
    "my phone number is",
    "my number is",
    "my address is",
    "i live at",
    "my insurance company is",
    "my insurance is",
    "my member id is",
    "my id is",
    "the id is",
    "i'm with",
    "i have",
    "we have",
    "it's",
    "it is",
    "this is",
    "that's",
    "i'm",
    "i am",
    "sure",
    "okay",
    "ok",
    "yeah",
    "um",
    "uh",
];

fn strip_lead_ins(text: &str) -> String {
    let mut text = text.trim().trim_end_matches(['.', '!']).trim().to_string();
    loop {
        let lower = text.to_lowercase();
        let Some(lead) = LEAD_INS.iter().find(|lead| {
            lower.starts_with(**lead)
                && lower[lead.len()..]
                    .chars()
                    .next()
                    .map_or(false, |c| c == ' ' || c == ',')
        }) else {
            return text;
        };
        text = text[lead.len()..].trim_start_matches([' ', ',']).to_string();
    }
}

fn unit_value(word: &str) -> Option<u32> {
    match word {
        "oh" | "o" => Some(0),
        _ => UNITS.iter().position(|w| *w == word).map(|i| i as u32),
    }
}

fn tens_value(word: &str) -> Option<u32> {
    TENS.iter()
        .position(|w| !w.is_empty() && *w == word)
        .map(|i| i as u32 * 10)
}

fn ordinal_value(word: &str) -> Option<u32> {
    match word {
        "twentieth" => Some(20),
        "thirtieth" => Some(30),
        _ => ORDINAL_UNITS
            .iter()
            .position(|w| !w.is_empty() && *w == word)
            .map(|i| i as u32),
    }
}

/// Pull every digit out of mixed digits and spoken digit words.
/// "five five five, 12 double three" -> "5551233".
pub fn spoken_digits(text: &str) -> String {
    let mut digits = String::new();
    let mut repeat = 1;
    for token in text
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '-' | '.' | '(' | ')'))
        .filter(|t| !t.is_empty())
    {
        match token {
            "double" => repeat = 2,
            "triple" => repeat = 3,
            t if t.chars().all(|c| c.is_ascii_digit()) => {
                for _ in 0..repeat {
                    digits.push_str(t);
                }
                repeat = 1;
            }
            t => {
                if let Some(d) = unit_value(t).filter(|d| *d < 10) {
                    for _ in 0..repeat {
                        digits.push(char::from(b'0' + d as u8));
                    }
                }
                repeat = 1;
            }
        }
    }
    digits
}

/// Ten digits, or eleven with a leading country code 1
pub fn parse_phone(text: &str) -> Result<String, ValidationError> {
    let digits = spoken_digits(text);
    let digits = match digits.len() {
        11 if digits.starts_with('1') => digits[1..].to_string(),
        _ => digits,
    };
    if digits.len() != 10 {
        return Err(ValidationError::PhoneDigitCount(digits.len()));
    }
    Ok(digits)
}

pub fn parse_email(text: &str) -> Result<String, ValidationError> {
    let text = strip_lead_ins(text).to_lowercase();
    if text.is_empty() {
        return Err(ValidationError::Empty);
    }
    let email = format!(" {} ", text)
        .replace(" at sign ", "@")
        .replace(" at ", "@")
        .replace(" dot ", ".")
        .replace(" underscore ", "_")
        .replace(" dash ", "-")
        .replace(" hyphen ", "-")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>();
    let email = email.trim_end_matches('.');
    if EMAIL.is_match(email) {
        Ok(email.to_string())
    } else {
        Err(ValidationError::EmailFormat)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

/// A first or last name, spoken or spelled. "J O H N" -> "John".
pub fn parse_name(text: &str) -> Result<String, ValidationError> {
    let text = strip_lead_ins(text);
    let lower = text.to_lowercase();
    // "Jon, spelled J O N" keeps the spelling
    let text = match lower.find("spelled") {
        Some(idx) => text[idx + "spelled".len()..].to_string(),
        None => text,
    };

    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || c == ',' || c == '.')
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return Err(ValidationError::Empty);
    }

    let letters: Vec<&str> = tokens
        .iter()
        .flat_map(|t| t.split('-'))
        .filter(|t| !t.is_empty())
        .collect();
    if letters.len() >= 2 && letters.iter().all(|t| t.chars().count() == 1) {
        let joined: String = letters.concat();
        if joined.chars().all(char::is_alphabetic) {
            return Ok(capitalize(&joined));
        }
        return Err(ValidationError::NameFormat);
    }

    if tokens.len() > 3 {
        return Err(ValidationError::NameFormat);
    }
    let valid = tokens
        .iter()
        .all(|t| t.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '-'));
    if !valid {
        return Err(ValidationError::NameFormat);
    }
    Ok(tokens
        .iter()
        .map(|t| t.split('-').map(capitalize).collect::<Vec<_>>().join("-"))
        .collect::<Vec<_>>()
        .join(" "))
}

/// Name of the referring doctor, always prefixed with "Dr."
pub fn parse_physician(text: &str) -> Result<String, ValidationError> {
    let text = strip_lead_ins(text);
    let mut words: Vec<&str> = text.split_whitespace().collect();
    if let Some(first) = words.first() {
        let title = first.trim_end_matches('.').to_lowercase();
        if title == "dr" || title == "doctor" {
            words.remove(0);
        }
    }
    let name = parse_name(&words.join(" "))?;
    Ok(format!("Dr. {}", name))
}

/// Insurance company name
pub fn parse_payer(text: &str) -> Result<String, ValidationError> {
    let text = strip_lead_ins(text);
    let words: Vec<&str> = text.split_whitespace().collect();
    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    if words.is_empty() {
        return Err(ValidationError::Empty);
    }
    if letters < 2 || words.len() > 6 {
        return Err(ValidationError::NameFormat);
    }
    Ok(words
        .iter()
        .map(|w| {
            if w.chars().any(char::is_uppercase) {
                w.to_string()
            } else {
                capitalize(w)
            }
        })
        .collect::<Vec<_>>()
        .join(" "))
}

/// Member id: spaces dropped, 4 to 20 letters or digits, at least one digit
pub fn parse_insurance_id(text: &str) -> Result<String, ValidationError> {
    let text = strip_lead_ins(text);
    let mut id = String::new();
    for token in text
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || matches!(c, '-' | ',' | '.'))
        .filter(|t| !t.is_empty())
    {
        match unit_value(token).filter(|d| *d < 10 && token != "o") {
            Some(d) => id.push(char::from(b'0' + d as u8)),
            None => id.push_str(&token.to_uppercase()),
        }
    }
    if id.is_empty() {
        return Err(ValidationError::Empty);
    }
    let valid = (4..=20).contains(&id.len())
        && id.chars().all(|c| c.is_ascii_alphanumeric())
        && id.chars().any(|c| c.is_ascii_digit());
    if valid {
        Ok(id)
    } else {
        Err(ValidationError::InsuranceIdFormat)
    }
}

pub fn parse_yes_no(text: &str) -> Result<bool, ValidationError> {
    let lower = text.to_lowercase();
    if lower.contains("not referred") || lower.contains("no referral") || lower.contains("wasn't") {
        return Ok(false);
    }
    match quick_intent(text) {
        Some(Intent::Confirm) => Ok(true),
        Some(Intent::Deny) => Ok(false),
        _ if lower.contains("i was") || lower.contains("i do") || lower.contains("i did") => Ok(true),
        _ => Err(ValidationError::YesNo),
    }
}

/// Reason for the visit in the caller's words
pub fn parse_complaint(text: &str) -> Result<String, ValidationError> {
    let text = text.trim().trim_end_matches('.').trim();
    if text.chars().filter(|c| c.is_alphabetic()).count() < 2 {
        return Err(ValidationError::Empty);
    }
    Ok(text.chars().take(300).collect())
}

fn month_number(word: &str) -> Option<u32> {
    let word = word.trim_end_matches('.');
    if word.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| {
            let m = m.to_lowercase();
            m == word || (m.starts_with(word) && (word.len() == 3 || word == "sept"))
        })
        .map(|i| i as u32 + 1)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(31)
}

/// Spoken year: "nineteen ninety", "nineteen oh five", "two thousand and
/// twelve", "twenty twenty one"
fn spoken_year(words: &[&str]) -> Option<i32> {
    let words: Vec<&str> = words.iter().copied().filter(|w| *w != "and").collect();
    if words.is_empty() {
        return None;
    }

    let small = |words: &[&str]| -> Option<u32> {
        match words {
            [] => Some(0),
            [w] => unit_value(w).or_else(|| tens_value(w)),
            [t, u] => {
                if *t == "oh" || *t == "o" {
                    unit_value(u).filter(|v| *v < 10)
                } else {
                    Some(tens_value(t)? + unit_value(u).filter(|v| *v < 10)?)
                }
            }
            _ => None,
        }
    };

    if let Some(pos) = words.iter().position(|w| *w == "thousand") {
        let thousands = small(&words[..pos])?;
        let rest = small(&words[pos + 1..])?;
        return Some((thousands * 1000 + rest) as i32);
    }

    if words.len() == 1 {
        return None;
    }
    let century = unit_value(words[0]).filter(|v| *v >= 10).or_else(|| tens_value(words[0]))?;
    let rest = small(&words[1..])?;
    Some((century * 100 + rest) as i32)
}

fn build_date(year: i32, month: u32, day: u32, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    if !(1..=12).contains(&month) {
        return Err(ValidationError::UnrecognizedDate);
    }
    let max_day = days_in_month(year, month);
    if day == 0 || day > max_day {
        return Err(ValidationError::ImpossibleDate {
            month: MONTHS[month as usize - 1].to_string(),
            day,
        });
    }
    if year < today.year() - 125 {
        return Err(ValidationError::ImplausibleYear(year));
    }
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or(ValidationError::UnrecognizedDate)?;
    if date > today {
        return Err(ValidationError::FutureDate);
    }
    Ok(date)
}

/// Date of birth from numeric or spoken forms. The day is checked against
/// the month before the year is required, so "February 30th" is reported as
/// impossible rather than incomplete.
pub fn parse_date_of_birth(text: &str, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    let text = strip_lead_ins(text).to_lowercase();
    if text.is_empty() {
        return Err(ValidationError::Empty);
    }

    if let Some(caps) = ISO_DATE.captures(&text) {
        let year: i32 = caps[1].parse().map_err(|_| ValidationError::UnrecognizedDate)?;
        let month: u32 = caps[2].parse().map_err(|_| ValidationError::UnrecognizedDate)?;
        let day: u32 = caps[3].parse().map_err(|_| ValidationError::UnrecognizedDate)?;
        return build_date(year, month, day, today);
    }
    if let Some(caps) = US_DATE.captures(&text) {
        let month: u32 = caps[1].parse().map_err(|_| ValidationError::UnrecognizedDate)?;
        let day: u32 = caps[2].parse().map_err(|_| ValidationError::UnrecognizedDate)?;
        let mut year: i32 = caps[3].parse().map_err(|_| ValidationError::UnrecognizedDate)?;
        if caps[3].len() == 2 {
            let current = today.year() % 100;
            year += if year <= current { 2000 } else { 1900 };
        }
        return build_date(year, month, day, today);
    }

    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '-'))
        .map(|t| t.trim_end_matches('.'))
        .filter(|t| !t.is_empty() && !matches!(*t, "the" | "of" | "on" | "in"))
        .collect();

    let (month_idx, month) = tokens
        .iter()
        .enumerate()
        .find_map(|(i, t)| month_number(t).map(|m| (i, m)))
        .ok_or(ValidationError::UnrecognizedDate)?;
    let rest: Vec<&str> = tokens
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != month_idx)
        .map(|(_, t)| *t)
        .collect();

    let mut used = vec![false; rest.len()];
    let mut day = None;
    for i in 0..rest.len() {
        let token = rest[i];
        if let Some(caps) = DAY_SUFFIX.captures(token) {
            day = caps[1].parse::<u32>().ok();
            used[i] = true;
            break;
        }
        if let Some(d) = ordinal_value(token) {
            day = Some(d);
            used[i] = true;
            break;
        }
        if let Some(tens) = tens_value(token) {
            if let Some(unit) = rest.get(i + 1).and_then(|t| ordinal_value(t)).filter(|u| *u < 10) {
                day = Some(tens + unit);
                used[i] = true;
                used[i + 1] = true;
                break;
            }
        }
    }
    let day = day.ok_or(ValidationError::UnrecognizedDate)?;

    let remaining: Vec<&str> = rest
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .map(|(t, _)| *t)
        .collect();
    let year = remaining
        .iter()
        .find(|t| t.len() == 4 && t.chars().all(|c| c.is_ascii_digit()))
        .and_then(|t| t.parse::<i32>().ok())
        .or_else(|| {
            let words: Vec<&str> = remaining
                .iter()
                .copied()
                .filter(|t| *t == "and" || *t == "thousand" || unit_value(t).is_some() || tens_value(t).is_some())
                .collect();
            spoken_year(&words)
        });

    // leap year stands in until the year is known
    let max_day = days_in_month(year.unwrap_or(2000), month);
    if day == 0 || day > max_day {
        return Err(ValidationError::ImpossibleDate {
            month: MONTHS[month as usize - 1].to_string(),
            day,
        });
    }
    let year = year.ok_or(ValidationError::MissingYear)?;
    build_date(year, month, day, today)
}

/// US state codes and names
const STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"), ("AK", "Alaska"), ("AZ", "Arizona"), ("AR", "Arkansas"),
    ("CA", "California"), ("CO", "Colorado"), ("CT", "Connecticut"), ("DE", "Delaware"),
    ("DC", "District of Columbia"), ("FL", "Florida"), ("GA", "Georgia"), ("HI", "Hawaii"),
    ("ID", "Idaho"), ("IL", "Illinois"), ("IN", "Indiana"), ("IA", "Iowa"), ("KS", "Kansas"),
    ("KY", "Kentucky"), ("LA", "Louisiana"), ("ME", "Maine"), ("MD", "Maryland"),
    ("MA", "Massachusetts"), ("MI", "Michigan"), ("MN", "Minnesota"), ("MS", "Mississippi"),
    ("MO", "Missouri"), ("MT", "Montana"), ("NE", "Nebraska"), ("NV", "Nevada"),
    ("NH", "New Hampshire"), ("NJ", "New Jersey"), ("NM", "New Mexico"), ("NY", "New York"),
    ("NC", "North Carolina"), ("ND", "North Dakota"), ("OH", "Ohio"), ("OK", "Oklahoma"),
    ("OR", "Oregon"), ("PA", "Pennsylvania"), ("RI", "Rhode Island"), ("SC", "South Carolina"),
    ("SD", "South Dakota"), ("TN", "Tennessee"), ("TX", "Texas"), ("UT", "Utah"),
    ("VT", "Vermont"), ("VA", "Virginia"), ("WA", "Washington"), ("WV", "West Virginia"),
    ("WI", "Wisconsin"), ("WY", "Wyoming"),
];

const STREET_SUFFIXES: &[&str] = &[
    "street", "st", "avenue", "ave", "road", "rd", "boulevard", "blvd", "lane", "ln", "drive",
    "dr", "court", "ct", "way", "place", "pl", "terrace", "parkway", "pkwy", "circle", "highway",
];

/// Split trailing state off `words`, longest name first
fn split_state<'a>(words: &[&'a str]) -> Option<(Vec<&'a str>, &'static str)> {
    for len in (1..=3).rev() {
        if words.len() < len {
            continue;
        }
        let (head, tail) = words.split_at(words.len() - len);
        let candidate = tail.join(" ");
        let found = STATES.iter().find(|(code, name)| {
            (len == 1 && candidate.eq_ignore_ascii_case(code)) || candidate.eq_ignore_ascii_case(name)
        });
        if let Some((code, _)) = found {
            return Some((head.to_vec(), code));
        }
    }
    None
}

fn title_case(words: &[&str]) -> String {
    words
        .iter()
        .map(|w| {
            if w.chars().any(char::is_uppercase) {
                w.to_string()
            } else {
                capitalize(w)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// "123 Main Street, New York, NY 10001". Commas help but are not required.
pub fn parse_address(text: &str) -> Result<Address, ValidationError> {
    let text = strip_lead_ins(text);
    if text.is_empty() {
        return Err(ValidationError::Empty);
    }

    let Some(zip) = ZIP_AT_END.captures(&text) else {
        let digits = DIGITS_AT_END
            .captures(&text)
            .map(|caps| caps[1].chars().filter(|c| c.is_ascii_digit()).collect::<String>())
            .unwrap_or_default();
        return Err(ValidationError::AddressZip(digits));
    };
    let postal_code = zip[1].to_string();
    let head = text[..zip.get(0).map_or(text.len(), |m| m.start())]
        .trim()
        .trim_end_matches(',')
        .trim();

    let parts: Vec<&str> = head.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    let (street, remainder): (String, Vec<&str>) = match parts.len() {
        0 => return Err(ValidationError::AddressFormat),
        1 => {
            // no commas: the street ends at its last suffix word
            let words: Vec<&str> = parts[0].split_whitespace().collect();
            let cut = words
                .iter()
                .rposition(|w| STREET_SUFFIXES.contains(&w.trim_end_matches('.').to_lowercase().as_str()))
                .ok_or(ValidationError::AddressFormat)?;
            (words[..=cut].join(" "), words[cut + 1..].to_vec())
        }
        2 => (parts[0].to_string(), parts[1].split_whitespace().collect()),
        n => (
            parts[..n - 2].join(", "),
            parts[n - 2..].iter().flat_map(|p| p.split_whitespace()).collect(),
        ),
    };

    if !STREET.is_match(&street) {
        return Err(ValidationError::AddressFormat);
    }

    let (city_words, state) = split_state(&remainder).ok_or_else(|| {
        ValidationError::AddressState(remainder.last().map(|s| s.to_string()).unwrap_or_default())
    })?;
    if city_words.is_empty() {
        return Err(ValidationError::AddressFormat);
    }

    let mut address = Address::new(street, title_case(&city_words), state, postal_code);
    address.street_validated = true;
    address.state_validated = true;
    address.postal_code_validated = true;
    Ok(address)
}

/// Checks a parsed address against reference data
#[async_trait::async_trait]
pub trait AddressValidator: Send + Sync {
    async fn validate(&self, address: Address) -> Result<Address, ValidationError>;
}

/// Cross-checks ZIP codes against a small city table. Unknown ZIP codes pass
/// with the city left unconfirmed.
pub struct RuleBasedAddressValidator {
    zips: HashMap<&'static str, (&'static str, &'static str)>,
}

impl RuleBasedAddressValidator {
    pub fn new() -> Self {
        let zips = HashMap::from([
            ("10001", ("New York", "NY")),
            ("90210", ("Beverly Hills", "CA")),
            ("60601", ("Chicago", "IL")),
            ("02139", ("Cambridge", "MA")),
            ("94105", ("San Francisco", "CA")),
        ]);
        Self { zips }
    }
}

impl Default for RuleBasedAddressValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AddressValidator for RuleBasedAddressValidator {
    async fn validate(&self, mut address: Address) -> Result<Address, ValidationError> {
        if let Some((city, state)) = self.zips.get(address.postal_code.as_str()) {
            if !address.city.eq_ignore_ascii_case(city) || !address.state.eq_ignore_ascii_case(state) {
                return Err(ValidationError::AddressZipMismatch {
                    zip: address.postal_code.clone(),
                    city: address.city.clone(),
                });
            }
            address.city_validated = true;
        }
        Ok(address)
    }
}

/// Validates answers for any field
#[derive(Clone)]
pub struct FieldValidator {
    today: NaiveDate,
    catalog: SlotCatalog,
    address: Arc<dyn AddressValidator>,
}

impl FieldValidator {
    pub fn new(today: NaiveDate, catalog: SlotCatalog, address: Arc<dyn AddressValidator>) -> Self {
        Self {
            today,
            catalog,
            address,
        }
    }

    /// Reference date for date-of-birth checks
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn catalog(&self) -> &SlotCatalog {
        &self.catalog
    }

    pub async fn validate(&self, key: FieldKey, text: &str) -> Result<FieldValue, ValidationError> {
        if text.trim().is_empty() {
            return Err(ValidationError::Empty);
        }
        match key {
            FieldKey::FirstName | FieldKey::LastName => parse_name(text).map(FieldValue::Text),
            FieldKey::DateOfBirth => parse_date_of_birth(text, self.today).map(FieldValue::Date),
            FieldKey::PayerName => parse_payer(text).map(FieldValue::Text),
            FieldKey::InsuranceId => parse_insurance_id(text).map(FieldValue::Text),
            FieldKey::Referral => parse_yes_no(text).map(FieldValue::Flag),
            FieldKey::ReferringPhysician => parse_physician(text).map(FieldValue::Text),
            FieldKey::ChiefComplaint => parse_complaint(text).map(FieldValue::Text),
            FieldKey::Address => {
                let address = parse_address(text)?;
                self.address.validate(address).await.map(FieldValue::Address)
            }
            FieldKey::Phone => parse_phone(text).map(FieldValue::Text),
            FieldKey::Email => parse_email(text).map(FieldValue::Text),
            FieldKey::AppointmentSlot => self
                .catalog
                .select(text)
                .cloned()
                .map(FieldValue::Slot)
                .ok_or(ValidationError::UnknownSlot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn test_dob_spoken_forms() {
        let expected = NaiveDate::from_ymd_opt(1990, 3, 1).unwrap();
        assert_eq!(parse_date_of_birth("March 1st 1990", today()), Ok(expected));
        assert_eq!(parse_date_of_birth("march first, 1990", today()), Ok(expected));
        assert_eq!(parse_date_of_birth("the first of March 1990", today()), Ok(expected));
        assert_eq!(parse_date_of_birth("March first nineteen ninety", today()), Ok(expected));
        assert_eq!(parse_date_of_birth("03/01/1990", today()), Ok(expected));
        assert_eq!(parse_date_of_birth("1990-03-01", today()), Ok(expected));
        assert_eq!(
            parse_date_of_birth("It's July twenty first, 1985.", today()),
            Ok(NaiveDate::from_ymd_opt(1985, 7, 21).unwrap())
        );
        assert_eq!(
            parse_date_of_birth("december 5 two thousand and five", today()),
            Ok(NaiveDate::from_ymd_opt(2005, 12, 5).unwrap())
        );
    }

    #[test]
    fn test_dob_rejections_name_problem() {
        assert_eq!(
            parse_date_of_birth("February 30th", today()),
            Err(ValidationError::ImpossibleDate {
                month: "February".to_string(),
                day: 30
            })
        );
        assert_eq!(
            parse_date_of_birth("February 29th 1990", today()),
            Err(ValidationError::ImpossibleDate {
                month: "February".to_string(),
                day: 29
            })
        );
        assert_eq!(parse_date_of_birth("March 1st", today()), Err(ValidationError::MissingYear));
        assert_eq!(parse_date_of_birth("July 4 2030", today()), Err(ValidationError::FutureDate));
        assert_eq!(
            parse_date_of_birth("July 4 1850", today()),
            Err(ValidationError::ImplausibleYear(1850))
        );
        assert_eq!(
            parse_date_of_birth("a long time ago", today()),
            Err(ValidationError::UnrecognizedDate)
        );
    }

    #[test]
    fn test_phone() {
        assert_eq!(parse_phone("555-123-4567"), Ok("5551234567".to_string()));
        assert_eq!(parse_phone("1 (555) 123 4567"), Ok("5551234567".to_string()));
        assert_eq!(
            parse_phone("five five five one two three four five six seven"),
            Ok("5551234567".to_string())
        );
        assert_eq!(parse_phone("five five five, one two three, double four five six"), Ok("5551234456".to_string()));
        assert_eq!(parse_phone("555 1234"), Err(ValidationError::PhoneDigitCount(7)));
        assert_eq!(parse_phone("I don't know"), Err(ValidationError::PhoneDigitCount(0)));
    }

    #[test]
    fn test_email() {
        assert_eq!(
            parse_email("my email is jane dot doe at gmail dot com"),
            Ok("jane.doe@gmail.com".to_string())
        );
        assert_eq!(parse_email("Jane@Example.org."), Ok("jane@example.org".to_string()));
        assert_eq!(parse_email("jane at gmail"), Err(ValidationError::EmailFormat));
    }

    #[test]
    fn test_names() {
        assert_eq!(parse_name("my name is jane"), Ok("Jane".to_string()));
        assert_eq!(parse_name("J O H N"), Ok("John".to_string()));
        assert_eq!(parse_name("Jon, spelled J-O-N"), Ok("Jon".to_string()));
        assert_eq!(parse_name("o'brien"), Ok("O'brien".to_string()));
        assert_eq!(parse_name("mary-kate"), Ok("Mary-Kate".to_string()));
        assert_eq!(parse_name("R2D2"), Err(ValidationError::NameFormat));
        assert_eq!(parse_physician("Doctor Patel"), Ok("Dr. Patel".to_string()));
        assert_eq!(parse_physician("dr. a. jones"), Ok("Dr. A Jones".to_string()));
    }

    #[test]
    fn test_payer_and_insurance_id() {
        assert_eq!(parse_payer("it's blue cross blue shield"), Ok("Blue Cross Blue Shield".to_string()));
        assert_eq!(parse_payer("UnitedHealthcare"), Ok("UnitedHealthcare".to_string()));
        assert_eq!(parse_insurance_id("ABC 123 456"), Ok("ABC123456".to_string()));
        assert_eq!(parse_insurance_id("x y z one two three"), Ok("XYZ123".to_string()));
        assert_eq!(parse_insurance_id("ABCDEF"), Err(ValidationError::InsuranceIdFormat));
        assert_eq!(parse_insurance_id("12"), Err(ValidationError::InsuranceIdFormat));
    }

    #[test]
    fn test_yes_no() {
        assert_eq!(parse_yes_no("Yes I was"), Ok(true));
        assert_eq!(parse_yes_no("no"), Ok(false));
        assert_eq!(parse_yes_no("I was not referred"), Ok(false));
        assert_eq!(parse_yes_no("purple"), Err(ValidationError::YesNo));
    }

    #[test]
    fn test_address_parsing() {
        let address = parse_address("123 Main Street, New York, NY 10001").unwrap();
        assert_eq!(address.street, "123 Main Street");
        assert_eq!(address.city, "New York");
        assert_eq!(address.state, "NY");
        assert_eq!(address.postal_code, "10001");

        let address = parse_address("my address is 42 oak avenue springfield illinois 62704").unwrap();
        assert_eq!(address.street, "42 oak avenue");
        assert_eq!(address.city, "Springfield");
        assert_eq!(address.state, "IL");

        let address = parse_address("9 Elm St, Apt 4, Chicago, IL 60601-1234").unwrap();
        assert_eq!(address.street, "9 Elm St, Apt 4");
        assert_eq!(address.postal_code, "60601");
    }

    #[test]
    fn test_address_problems() {
        assert_eq!(
            parse_address("123 Main Street, New York, NY 1000"),
            Err(ValidationError::AddressZip("1000".to_string()))
        );
        assert_eq!(
            parse_address("123 Main Street, Springfield, Narnia 10001"),
            Err(ValidationError::AddressState("Narnia".to_string()))
        );
        assert_eq!(
            parse_address("Main Street, New York, NY 10001"),
            Err(ValidationError::AddressFormat)
        );
    }

    #[tokio::test]
    async fn test_rule_based_validator_checks_zip_city() {
        let validator = RuleBasedAddressValidator::new();
        let ok = validator
            .validate(parse_address("123 Main Street, New York, NY 10001").unwrap())
            .await
            .unwrap();
        assert!(ok.city_validated);

        let err = validator
            .validate(parse_address("123 Main Street, Boston, MA 10001").unwrap())
            .await;
        assert!(matches!(err, Err(ValidationError::AddressZipMismatch { .. })));

        let unknown = validator
            .validate(parse_address("5 Pine Rd, Austin, TX 73301").unwrap())
            .await
            .unwrap();
        assert!(!unknown.city_validated);
    }

    #[tokio::test]
    async fn test_field_validator_dispatch() {
        let validator = FieldValidator::new(
            today(),
            SlotCatalog::mock(),
            Arc::new(RuleBasedAddressValidator::new()),
        );
        assert_eq!(
            validator.validate(FieldKey::Phone, "555 123 4567").await,
            Ok(FieldValue::Text("5551234567".to_string()))
        );
        assert!(matches!(
            validator.validate(FieldKey::AppointmentSlot, "Tuesday").await,
            Ok(FieldValue::Slot(_))
        ));
        assert_eq!(
            validator.validate(FieldKey::AppointmentSlot, "Sunday").await,
            Err(ValidationError::UnknownSlot)
        );
        assert_eq!(validator.validate(FieldKey::Email, "  ").await, Err(ValidationError::Empty));
    }
}
