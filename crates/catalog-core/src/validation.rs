//! Field validation against per-resource rule tables.
//!
//! Inputs arrive as flat string fields (multipart text parts). A
//! [`Validator`] checks them in either create mode (required fields must be
//! present) or update mode (missing fields are skipped, supplied fields obey
//! the same rules) and accumulates human-readable messages keyed by field
//! name, so a caller gets every problem in one pass.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::NaiveDate;

/// Field name to list of reasons the field was rejected.
pub type ValidationErrors = BTreeMap<String, Vec<String>>;

/// Raw textual fields of one request.
#[derive(Debug, Default, Clone)]
pub struct RawFields(HashMap<String, String>);

impl RawFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Whether missing fields are an error (create) or a skip (partial update).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    Update,
}

/// Accumulating validator over one set of raw fields.
pub struct Validator<'a> {
    fields: &'a RawFields,
    mode: Mode,
    errors: ValidationErrors,
}

impl<'a> Validator<'a> {
    pub fn new(fields: &'a RawFields, mode: Mode) -> Self {
        Self {
            fields,
            mode,
            errors: ValidationErrors::new(),
        }
    }

    /// Consumes the validator, yielding whatever was collected.
    pub fn finish(self) -> ValidationErrors {
        self.errors
    }

    pub fn fail(&mut self, name: &str, message: impl Into<String>) {
        self.errors.entry(name.to_string()).or_default().push(message.into());
    }

    /// Fetches the raw value, recording a required-field error in create
    /// mode. `None` always means "do not touch this field further".
    fn raw(&mut self, name: &str) -> Option<&'a str> {
        match self.fields.get(name) {
            Some(value) => Some(value),
            None => {
                if self.mode == Mode::Create {
                    self.fail(name, format!("The {name} field is required."));
                }
                None
            }
        }
    }

    /// `string|max:<max>`
    pub fn string(&mut self, name: &str, max: usize) -> Option<String> {
        let value = self.raw(name)?;
        if value.chars().count() > max {
            self.fail(
                name,
                format!("The {name} field must not be greater than {max} characters."),
            );
            return None;
        }
        Some(value.to_string())
    }

    /// `sometimes|nullable|string`: an empty value clears the field. The
    /// outer `Option` is "was it supplied", the inner one the stored value.
    pub fn nullable_text(&mut self, name: &str) -> Option<Option<String>> {
        let value = self.fields.get(name)?;
        if value.is_empty() {
            Some(None)
        } else {
            Some(Some(value.to_string()))
        }
    }

    /// `in:<enum>`: the value must parse as one of the declared literals.
    pub fn one_of<T: FromStr>(&mut self, name: &str) -> Option<T> {
        let value = self.raw(name)?;
        match value.parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                self.fail(name, format!("The selected {name} is invalid."));
                None
            }
        }
    }

    /// `numeric`
    pub fn numeric(&mut self, name: &str) -> Option<f64> {
        let value = self.raw(name)?;
        match value.trim().parse::<f64>() {
            Ok(parsed) if parsed.is_finite() => Some(parsed),
            _ => {
                self.fail(name, format!("The {name} field must be numeric."));
                None
            }
        }
    }

    /// `date`: an ISO calendar date.
    pub fn date(&mut self, name: &str) -> Option<NaiveDate> {
        let value = self.raw(name)?;
        match value.parse::<NaiveDate>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                self.fail(name, format!("The {name} field must be a valid date."));
                None
            }
        }
    }
}

/// `image` rule: sniffs the payload for a known raster format signature.
pub fn is_image(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        || bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
        || bytes.starts_with(b"GIF87a")
        || bytes.starts_with(b"GIF89a")
        || (bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP")
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_db::{CardState, ItemStatus};

    fn fields(pairs: &[(&str, &str)]) -> RawFields {
        pairs.iter().copied().collect()
    }

    #[test]
    fn create_mode_requires_fields() {
        let input = fields(&[]);
        let mut v = Validator::new(&input, Mode::Create);
        assert!(v.string("title", 255).is_none());
        assert!(v.numeric("price").is_none());
        let errors = v.finish();
        assert_eq!(errors["title"], vec!["The title field is required."]);
        assert_eq!(errors["price"], vec!["The price field is required."]);
    }

    #[test]
    fn update_mode_skips_missing_fields() {
        let input = fields(&[("title", "Ace")]);
        let mut v = Validator::new(&input, Mode::Update);
        assert_eq!(v.string("title", 255).as_deref(), Some("Ace"));
        assert!(v.date("date").is_none());
        assert!(v.finish().is_empty());
    }

    #[test]
    fn string_rule_enforces_max_length() {
        let long = "x".repeat(256);
        let input = fields(&[("title", long.as_str())]);
        let mut v = Validator::new(&input, Mode::Create);
        assert!(v.string("title", 255).is_none());
        let errors = v.finish();
        assert_eq!(
            errors["title"],
            vec!["The title field must not be greater than 255 characters."]
        );
    }

    #[test]
    fn enum_rule_rejects_values_outside_literal_set() {
        let input = fields(&[("state", "Broken"), ("status", "Out of stock")]);
        let mut v = Validator::new(&input, Mode::Create);
        assert!(v.one_of::<CardState>("state").is_none());
        assert_eq!(v.one_of::<ItemStatus>("status"), Some(ItemStatus::OutOfStock));
        let errors = v.finish();
        assert_eq!(errors["state"], vec!["The selected state is invalid."]);
        assert!(!errors.contains_key("status"));
    }

    #[test]
    fn numeric_and_date_rules() {
        let input = fields(&[("price", "4.99"), ("date", "2024-02-30")]);
        let mut v = Validator::new(&input, Mode::Create);
        assert_eq!(v.numeric("price"), Some(4.99));
        assert!(v.date("date").is_none());
        let errors = v.finish();
        assert_eq!(errors["date"], vec!["The date field must be a valid date."]);
    }

    #[test]
    fn nullable_text_distinguishes_clear_from_absent() {
        let supplied = fields(&[("description", "")]);
        let mut v = Validator::new(&supplied, Mode::Update);
        assert_eq!(v.nullable_text("description"), Some(None));

        let absent = fields(&[]);
        let mut v = Validator::new(&absent, Mode::Update);
        assert_eq!(v.nullable_text("description"), None);
        assert!(v.finish().is_empty());
    }

    #[test]
    fn image_sniffing_accepts_known_signatures_only() {
        assert!(is_image(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]));
        assert!(is_image(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1]));
        assert!(is_image(b"GIF89a trailing"));
        assert!(is_image(b"RIFF\x00\x00\x00\x00WEBPVP8 "));
        assert!(!is_image(b"%PDF-1.4"));
        assert!(!is_image(b""));
    }
}
