//! Pluralization for default route paths
//!
//! Entity routes are derived from the plural of the entity name. Only the
//! regular English rules are applied; use a route path override for
//! irregular nouns.

/// Utility for converting between singular and plural forms of English nouns
pub struct Pluralizer;

fn is_vowel(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u')
}

impl Pluralizer {
    /// Convert a singular noun to its plural form
    ///
    /// # Examples
    ///
    /// ```
    /// use zapi::core::pluralize::Pluralizer;
    ///
    /// assert_eq!(Pluralizer::pluralize("user"), "users");
    /// assert_eq!(Pluralizer::pluralize("category"), "categories");
    /// assert_eq!(Pluralizer::pluralize("address"), "addresses");
    /// assert_eq!(Pluralizer::pluralize("day"), "days");
    /// ```
    pub fn pluralize(singular: &str) -> String {
        if singular.is_empty() {
            return String::new();
        }

        if let Some(stem) = singular.strip_suffix('y') {
            // consonant + y -> ies
            if stem.chars().last().is_some_and(|c| !is_vowel(c)) {
                return format!("{}ies", stem);
            }
        }

        if ["s", "x", "z", "ch", "sh"]
            .iter()
            .any(|suffix| singular.ends_with(suffix))
        {
            return format!("{}es", singular);
        }

        format!("{}s", singular)
    }

    /// Convert a plural noun back to its singular form.
    ///
    /// This is the inverse of [`Pluralizer::pluralize`] only for words those
    /// rules produce; other words may lose letters.
    ///
    /// # Examples
    ///
    /// ```
    /// use zapi::core::pluralize::Pluralizer;
    ///
    /// assert_eq!(Pluralizer::singularize("users"), "user");
    /// assert_eq!(Pluralizer::singularize("categories"), "category");
    /// assert_eq!(Pluralizer::singularize("boxes"), "box");
    /// ```
    pub fn singularize(plural: &str) -> String {
        if let Some(stem) = plural.strip_suffix("ies")
            && !stem.is_empty()
        {
            return format!("{}y", stem);
        }

        if let Some(stem) = plural.strip_suffix("es")
            && ["s", "x", "z", "ch", "sh"]
                .iter()
                .any(|suffix| stem.ends_with(suffix))
        {
            return stem.to_string();
        }

        if let Some(stem) = plural.strip_suffix('s')
            && !stem.ends_with('s')
            && !stem.is_empty()
        {
            return stem.to_string();
        }

        plural.to_string()
    }
}
