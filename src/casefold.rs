//! Upper-case folding for case-insensitive lexicons.
//!
//! Entries are folded when they are inserted and input characters are folded one at a time
//! while scanning, so both sides must use the same [`CaseFolder`].

/// Locale-dependent upper-case folding.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CaseFolder {
    locale: String,
    dotted_i: bool,
}

impl Default for CaseFolder {
    fn default() -> Self {
        Self::new("en")
    }
}

impl CaseFolder {
    /// Creates a folder for the given language tag, e.g. `"en"` or `"tr-TR"`.
    pub fn new(locale: &str) -> Self {
        let lang = locale
            .split(|c: char| c == '-' || c == '_')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        Self {
            locale: locale.to_string(),
            dotted_i: lang == "tr" || lang == "az",
        }
    }

    /// Returns the language tag this folder was created for.
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Folds a single character. Characters whose upper-case form is longer than one
    /// character are kept as they are.
    #[inline(always)]
    pub fn fold_char(&self, c: char) -> char {
        if self.dotted_i && c == 'i' {
            return 'İ';
        }
        let mut upper = c.to_uppercase();
        match (upper.next(), upper.next()) {
            (Some(u), None) => u,
            _ => c,
        }
    }

    /// Folds a whole string, allowing a character to expand into several.
    pub fn fold_str(&self, s: &str) -> String {
        if self.dotted_i {
            s.chars()
                .map(|c| {
                    if c == 'i' {
                        'İ'.to_string()
                    } else {
                        c.to_uppercase().to_string()
                    }
                })
                .collect()
        } else {
            s.to_uppercase()
        }
    }

    /// Returns the forms under which `entry` is inserted into a case-insensitive store.
    ///
    /// This is the folded string, followed by the character-wise folded string if folding
    /// changed the number of characters.
    pub fn variants(&self, entry: &str) -> Vec<String> {
        let full = self.fold_str(entry);
        if full.chars().count() == entry.chars().count() {
            return vec![full];
        }
        let charwise: String = entry.chars().map(|c| self.fold_char(c)).collect();
        if charwise == full {
            vec![full]
        } else {
            vec![full, charwise]
        }
    }
}
