//! Keyword based item categories.
//!
//! Categories are never stored: they are derived from the item description
//! every time a summary or a report is rendered.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    Food,
    Stationery,
    Transport,
    Shopping,
    General,
}

impl ItemCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Food => "Food",
            Self::Stationery => "Stationery",
            Self::Transport => "Transport",
            Self::Shopping => "Shopping",
            Self::General => "General",
        }
    }
}

const FOOD: &[&str] = &[
    "ayam", "nasi", "bakso", "mie", "kopi", "teh", "roti", "makan", "minum", "goreng", "bakar",
    "geprek", "es", "warung", "soto", "sate", "coffee", "tea", "lunch", "dinner", "breakfast",
    "snack", "food", "drink",
];
const STATIONERY: &[&str] = &[
    "bolpoin", "pulpen", "kertas", "buku", "alat tulis", "penghapus", "penggaris", "pensil",
    "pen", "pencil", "paper", "notebook",
];
const TRANSPORT: &[&str] = &[
    "grab", "gojek", "transport", "parkir", "tol", "ojek", "taxi", "bensin", "pertalite",
    "pertamax", "parking", "fuel", "bus", "train",
];
const SHOPPING: &[&str] = &[
    "indomaret", "alfamart", "supermarket", "groceries", "belanja", "sabun", "shampoo", "odol",
    "soap", "toothpaste",
];

fn matches_any(words: &[&str], text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| {
        if keyword.contains(' ') {
            text.contains(keyword)
        } else {
            words.iter().any(|word| word == keyword)
        }
    })
}

/// Derive the category of an item from its description.
pub fn auto_category(description: &str) -> ItemCategory {
    let text = description.to_lowercase();
    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if matches_any(&words, &text, FOOD) {
        ItemCategory::Food
    } else if matches_any(&words, &text, STATIONERY) {
        ItemCategory::Stationery
    } else if matches_any(&words, &text, TRANSPORT) {
        ItemCategory::Transport
    } else if matches_any(&words, &text, SHOPPING) {
        ItemCategory::Shopping
    } else {
        ItemCategory::General
    }
}

/// `"nasi GORENG spesial"` -> `"Nasi Goreng Spesial"`.
pub fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_keywords() {
        assert_eq!(auto_category("Nasi goreng"), ItemCategory::Food);
        assert_eq!(auto_category("Iced coffee"), ItemCategory::Food);
        assert_eq!(auto_category("buku tulis"), ItemCategory::Stationery);
        assert_eq!(auto_category("alat tulis kantor"), ItemCategory::Stationery);
        assert_eq!(auto_category("Grab ke kantor"), ItemCategory::Transport);
        assert_eq!(auto_category("Belanja bulanan"), ItemCategory::Shopping);
        assert_eq!(auto_category("Phone bill"), ItemCategory::General);
    }

    #[test]
    fn short_keywords_match_whole_words_only() {
        assert_eq!(auto_category("running shoes"), ItemCategory::General);
        assert_eq!(auto_category("es teh manis"), ItemCategory::Food);
    }

    #[test]
    fn title_case_normalizes_words() {
        assert_eq!(title_case("nasi GORENG  spesial"), "Nasi Goreng Spesial");
        assert_eq!(title_case(""), "");
    }
}
